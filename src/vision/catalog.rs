// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model catalog: the fixed set of detection and recognition variants
//!
//! A `ModelConfig` is the immutable descriptor the registry keys on.
//! Selecting a different `ModelConfig` for a role is the only thing that
//! triggers a reload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which inference graph a model serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Detection,
    Recognition,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detection => write!(f, "detection"),
            Self::Recognition => write!(f, "recognition"),
        }
    }
}

/// Model input size as `[height, width]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSize {
    pub height: u32,
    pub width: u32,
}

impl InputSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn as_array(&self) -> [u32; 2] {
        [self.height, self.width]
    }
}

/// Identifies one model: family, variant, expected input size and artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Architecture family (e.g. "db", "crnn")
    pub family: String,
    /// Variant name (e.g. "db_mobilenet_v2")
    pub variant: String,
    /// Human readable label
    pub label: String,
    /// Expected input `[height, width]`
    pub input_size: InputSize,
    /// File name under the models directory, or an http(s) URL
    pub artifact: String,
}

impl ModelConfig {
    /// Whether the artifact must be downloaded before loading
    pub fn is_remote(&self) -> bool {
        self.artifact.starts_with("http://") || self.artifact.starts_with("https://")
    }
}

/// Detection input size shared by all DB variants
pub const DETECTION_INPUT_SIZE: InputSize = InputSize::new(512, 512);

/// Recognition input size shared by all recognition variants
pub const RECOGNITION_INPUT_SIZE: InputSize = InputSize::new(32, 128);

/// Available text detection models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionVariant {
    #[default]
    DbMobilenetV2,
    DbResnet50,
}

impl DetectionVariant {
    pub const ALL: [DetectionVariant; 2] = [Self::DbMobilenetV2, Self::DbResnet50];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DbMobilenetV2 => "db_mobilenet_v2",
            Self::DbResnet50 => "db_resnet50",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DbMobilenetV2 => "DB (MobileNet V2)",
            Self::DbResnet50 => "DB (ResNet 50)",
        }
    }

    pub fn config(&self) -> ModelConfig {
        ModelConfig {
            family: "db".to_string(),
            variant: self.name().to_string(),
            label: self.label().to_string(),
            input_size: DETECTION_INPUT_SIZE,
            artifact: format!("{}.onnx", self.name()),
        }
    }
}

/// Available text recognition models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionVariant {
    #[default]
    CrnnVgg16Bn,
    CrnnMobilenetV2,
    Master,
    SarResnet31,
}

impl RecognitionVariant {
    pub const ALL: [RecognitionVariant; 4] = [
        Self::CrnnVgg16Bn,
        Self::CrnnMobilenetV2,
        Self::Master,
        Self::SarResnet31,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CrnnVgg16Bn => "crnn_vgg16_bn",
            Self::CrnnMobilenetV2 => "crnn_mobilenet_v2",
            Self::Master => "master",
            Self::SarResnet31 => "sar_resnet31",
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Self::CrnnVgg16Bn | Self::CrnnMobilenetV2 => "crnn",
            Self::Master => "master",
            Self::SarResnet31 => "sar",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CrnnVgg16Bn => "CRNN (VGG16-BN)",
            Self::CrnnMobilenetV2 => "CRNN (MobileNet V2)",
            Self::Master => "MASTER",
            Self::SarResnet31 => "SAR (ResNet 31)",
        }
    }

    pub fn config(&self) -> ModelConfig {
        ModelConfig {
            family: self.family().to_string(),
            variant: self.name().to_string(),
            label: self.label().to_string(),
            input_size: RECOGNITION_INPUT_SIZE,
            artifact: format!("{}.onnx", self.name()),
        }
    }
}

impl fmt::Display for DetectionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for RecognitionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectionVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| format!("Unknown detection model: {}", s))
    }
}

impl FromStr for RecognitionVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| format!("Unknown recognition model: {}", s))
    }
}
