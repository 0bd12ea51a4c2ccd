// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text probability heatmaps from the detection graph

use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, ArrayD, Axis};
use std::sync::Arc;
use tracing::{debug, info};

use super::preprocessing::{to_tensor, Normalization, DETECTION_NORMALIZATION};
use crate::vision::catalog::InputSize;
use crate::vision::errors::VisionError;
use crate::vision::model_registry::ModelHandle;

/// Per-pixel text probability at detection resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    scores: Array2<f32>,
}

impl Heatmap {
    /// Wrap a `[height, width]` score grid
    pub fn new(scores: Array2<f32>) -> Self {
        Self { scores }
    }

    /// Build from row-major scores
    pub fn from_vec(height: usize, width: usize, scores: Vec<f32>) -> Result<Self, VisionError> {
        Array2::from_shape_vec((height, width), scores)
            .map(Self::new)
            .map_err(|e| VisionError::Decode(e.to_string()))
    }

    /// Interpret a raw model output as a heatmap
    ///
    /// Accepts `[1, 1, H, W]`, `[1, H, W, 1]`, `[1, H, W]` and `[H, W]`.
    pub fn from_output(output: ArrayD<f32>) -> Result<Self, VisionError> {
        let shape = output.shape().to_vec();
        let mut scores = output;

        while scores.ndim() > 2 {
            let axis = if scores.shape()[0] == 1 {
                0
            } else if scores.shape()[scores.ndim() - 1] == 1 {
                scores.ndim() - 1
            } else {
                return Err(VisionError::Inference(format!(
                    "Unexpected detection output shape: {:?}",
                    shape
                )));
            };
            scores = scores.index_axis_move(Axis(axis), 0);
        }

        let scores = scores
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|_| {
                VisionError::Inference(format!("Unexpected detection output shape: {:?}", shape))
            })?;

        Ok(Self::new(scores.mapv(|v| v.clamp(0.0, 1.0))))
    }

    pub fn height(&self) -> usize {
        self.scores.nrows()
    }

    pub fn width(&self) -> usize {
        self.scores.ncols()
    }

    /// `[height, width]` the heatmap was computed at
    pub fn size(&self) -> [usize; 2] {
        [self.height(), self.width()]
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, x: usize, y: usize) -> f32 {
        self.scores[[y, x]]
    }

    pub fn scores(&self) -> &Array2<f32> {
        &self.scores
    }

    /// `(min, max)` over all scores
    pub fn range(&self) -> (f32, f32) {
        self.scores
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), &v| (min.min(v), max.max(v)))
    }

    /// Render as grayscale (score × 255) for display
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            Luma([(self.score(x as usize, y as usize) * 255.0).round() as u8])
        })
    }
}

/// Runs the detection graph over an image
#[derive(Debug, Clone)]
pub struct HeatmapExtractor {
    normalization: Normalization,
}

impl Default for HeatmapExtractor {
    fn default() -> Self {
        Self {
            normalization: DETECTION_NORMALIZATION,
        }
    }
}

impl HeatmapExtractor {
    pub fn new(normalization: Normalization) -> Self {
        Self { normalization }
    }

    /// Compute the text heatmap of `image` at `target_size`
    ///
    /// # Errors
    /// - `StaleModel` if `model` was superseded before or during the pass;
    ///   the caller must discard any result
    /// - `Inference` on runtime failure or unexpected output shape
    pub async fn extract(
        &self,
        image: Arc<RgbImage>,
        model: &ModelHandle,
        target_size: InputSize,
    ) -> Result<Heatmap, VisionError> {
        model.ensure_current()?;

        let graph = model.graph();
        let normalization = self.normalization;

        let output = tokio::task::spawn_blocking(move || {
            let input = to_tensor(&image, target_size, &normalization);
            graph.run(input)
        })
        .await
        .map_err(|e| VisionError::Inference(format!("detection task failed: {}", e)))??;

        model.ensure_current()?;

        debug!("Detection output shape: {:?}", output.shape());
        let heatmap = Heatmap::from_output(output)?;

        let (min, max) = heatmap.range();
        info!(
            "Heatmap {}x{} computed with {} (range {:.4}..{:.4})",
            heatmap.height(),
            heatmap.width(),
            model.config().variant,
            min,
            max
        );

        Ok(heatmap)
    }
}
