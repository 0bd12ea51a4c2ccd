// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Annotation overlay: shapes on the image kept in step with the word list

pub mod layer;
pub mod sync;

pub use layer::{AnnotationLayer, AnnotationShape, InMemoryLayer, ShapeStyle, HIGHLIGHT_FILL};
pub use sync::{AnnotationSync, Interaction, InteractionKind, SyncEffect, SyncState};
