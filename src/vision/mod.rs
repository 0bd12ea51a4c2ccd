// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Client-side document vision
//!
//! This module provides:
//! - Model lifecycle per role (detection, recognition) with hot swapping
//! - Heatmap extraction, box decoding and word recognition
//! - An annotation layer kept in step with the recognized words
//!
//! Inference runs on CPU through ONNX Runtime.

pub mod annotation;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod graph;
pub mod image_utils;
pub mod model_registry;
pub mod ocr;
pub mod session;

pub use annotation::{
    AnnotationLayer, AnnotationShape, AnnotationSync, InMemoryLayer, Interaction, InteractionKind,
    ShapeStyle, SyncEffect, SyncState,
};
pub use catalog::{
    DetectionVariant, InputSize, ModelConfig, ModelRole, RecognitionVariant,
    DETECTION_INPUT_SIZE, RECOGNITION_INPUT_SIZE,
};
pub use config::VisionConfig;
pub use errors::VisionError;
pub use graph::{InferenceGraph, ModelLoader, OnnxGraph, OnnxModelLoader};
pub use image_utils::{
    decode_base64_image, decode_data_url, decode_image_bytes, detect_format, ImageError,
    ImageSource,
};
pub use model_registry::{ModelHandle, ModelRegistry, RoleStatus};
pub use ocr::{BoundingBox, BoxDecoder, Charset, Heatmap, HeatmapExtractor, Word, WordRecognizer};
pub use session::{ExtractionObserver, ExtractionOutcome, NoopObserver, VisionSession};
