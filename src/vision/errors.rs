// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the vision extraction pipeline
//!
//! The taxonomy follows how far a failure reaches:
//! - model load errors disable a role until a successful reload
//! - inference errors (runtime failure or a superseded model) abort one run
//! - decode errors degrade to "no boxes"
//! - recognition errors degrade a single word to an empty string

use thiserror::Error;

use super::catalog::ModelRole;

/// Errors produced by the extraction pipeline
///
/// `Clone` so that coalesced model loads can hand the same outcome to
/// every waiting caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VisionError {
    /// The graph for a role could not be fetched or parsed
    #[error("Failed to load {role} model '{variant}': {reason}")]
    ModelLoad {
        role: ModelRole,
        variant: String,
        reason: String,
    },

    /// No usable model is loaded for the role
    #[error("{role} model unavailable")]
    ModelUnavailable { role: ModelRole },

    /// The model handle was superseded while the call was running
    #[error("{role} model was superseded during inference")]
    StaleModel { role: ModelRole },

    /// Runtime failure inside a forward pass
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Malformed heatmap or empty input to the box decoder
    #[error("Heatmap decode failed: {0}")]
    Decode(String),

    /// Recognition failed for a single box
    #[error("Recognition failed for box {box_id}: {reason}")]
    Recognition { box_id: String, reason: String },

    /// The image source could not be decoded
    #[error("Invalid image source: {0}")]
    Image(String),

    /// A state machine transition was requested from the wrong state
    #[error("Cannot {action} while in state {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl VisionError {
    /// Whether this is a run-level inference failure (runtime or stale model)
    pub fn is_inference(&self) -> bool {
        matches!(self, Self::Inference(_) | Self::StaleModel { .. })
    }

    /// Whether this error disables a model role
    pub fn is_model_load(&self) -> bool {
        matches!(self, Self::ModelLoad { .. } | Self::ModelUnavailable { .. })
    }
}

impl From<super::image_utils::ImageError> for VisionError {
    fn from(err: super::image_utils::ImageError) -> Self {
        Self::Image(err.to_string())
    }
}
