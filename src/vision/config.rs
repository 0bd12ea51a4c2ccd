// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the document vision pipeline

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use super::catalog::{DetectionVariant, RecognitionVariant};
use super::errors::VisionError;
use super::ocr::{DEFAULT_BATCH_SIZE, DEFAULT_BIN_THRESHOLD, DEFAULT_MIN_BOX_SIZE, DEFAULT_UNCLIP_RATIO};

/// Configuration for the vision pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Directory holding (or receiving downloaded) ONNX models
    pub models_dir: PathBuf,
    /// Detection model variant
    pub detection: DetectionVariant,
    /// Recognition model variant
    pub recognition: RecognitionVariant,
    /// Heatmap binarization threshold (0.0-1.0)
    pub bin_threshold: f32,
    /// Minimum region side in heatmap pixels (exclusive)
    pub min_box_size: usize,
    /// Box expansion ratio
    pub unclip_ratio: f32,
    /// Crops per recognition pass
    pub recognition_batch_size: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Custom recognition charset, one symbol per line
    pub charset_path: Option<PathBuf>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("./models"),
            detection: DetectionVariant::default(),
            recognition: RecognitionVariant::default(),
            bin_threshold: DEFAULT_BIN_THRESHOLD,
            min_box_size: DEFAULT_MIN_BOX_SIZE,
            unclip_ratio: DEFAULT_UNCLIP_RATIO,
            recognition_batch_size: DEFAULT_BATCH_SIZE,
            intra_threads: 4,
            charset_path: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl VisionConfig {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            models_dir: env::var("VISION_MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.models_dir),
            detection: env_parse("VISION_DET_MODEL").unwrap_or(defaults.detection),
            recognition: env_parse("VISION_RECO_MODEL").unwrap_or(defaults.recognition),
            bin_threshold: env_parse("VISION_BIN_THRESHOLD").unwrap_or(defaults.bin_threshold),
            min_box_size: env_parse("VISION_MIN_BOX_SIZE").unwrap_or(defaults.min_box_size),
            unclip_ratio: env_parse("VISION_UNCLIP_RATIO").unwrap_or(defaults.unclip_ratio),
            recognition_batch_size: env_parse("VISION_RECO_BATCH_SIZE")
                .unwrap_or(defaults.recognition_batch_size),
            intra_threads: env_parse("VISION_INTRA_THREADS").unwrap_or(defaults.intra_threads),
            charset_path: env::var("VISION_CHARSET_PATH").ok().map(PathBuf::from),
        }
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VisionError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| VisionError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.bin_threshold) {
            return Err(format!(
                "Binarization threshold must be within 0.0-1.0, got {}",
                self.bin_threshold
            ));
        }
        if !self.unclip_ratio.is_finite() || self.unclip_ratio < 0.0 {
            return Err("Unclip ratio must be a non-negative number".to_string());
        }
        if self.recognition_batch_size == 0 {
            return Err("Recognition batch size must be greater than 0".to_string());
        }
        if self.intra_threads == 0 {
            return Err("Intra threads must be greater than 0".to_string());
        }
        Ok(())
    }
}
