// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Document OCR stages
//!
//! Components:
//! - `heatmap` - Detection graph to text probability heatmap
//! - `detection` - Heatmap to word boxes (DB post-processing)
//! - `recognition` - Box crops to words (CTC decoding)
//! - `preprocessing` - Resize and normalize for both graphs
//! - `model` - Boxes and words shared with the annotation layer

pub mod detection;
pub mod heatmap;
pub mod model;
pub mod preprocessing;
pub mod recognition;

pub use detection::{BoxDecoder, DEFAULT_BIN_THRESHOLD, DEFAULT_MIN_BOX_SIZE, DEFAULT_UNCLIP_RATIO};
pub use heatmap::{Heatmap, HeatmapExtractor};
pub use model::{palette_color, BoundingBox, Word, PALETTE};
pub use preprocessing::{Normalization, DETECTION_NORMALIZATION, RECOGNITION_NORMALIZATION};
pub use recognition::{crop_box, Charset, WordRecognizer, DEFAULT_BATCH_SIZE};
