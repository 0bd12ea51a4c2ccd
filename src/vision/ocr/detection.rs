// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Differentiable Binarization post-processing
//!
//! Turns a text heatmap into word boxes: threshold the scores, drop
//! speckle with a 2x2 opening, label 8-connected regions in raster
//! order, fit and expand a rectangle per region, then rescale it to
//! the original image.

use tracing::debug;
use uuid::Uuid;

use super::heatmap::Heatmap;
use super::model::{palette_color, BoundingBox};
use crate::vision::errors::VisionError;

/// Default binarization threshold
pub const DEFAULT_BIN_THRESHOLD: f32 = 0.3;

/// Regions must be strictly wider and taller than this (heatmap pixels)
pub const DEFAULT_MIN_BOX_SIZE: usize = 2;

/// Default rectangle expansion ratio
pub const DEFAULT_UNCLIP_RATIO: f32 = 1.8;

/// One connected text region in heatmap space
#[derive(Debug, Clone, PartialEq)]
struct Region {
    min_x: usize,
    max_x: usize,
    min_y: usize,
    max_y: usize,
    count: usize,
    sum_score: f32,
}

impl Region {
    fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    fn mean_score(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_score / self.count as f32
        }
    }
}

/// Heatmap to bounding box decoder
#[derive(Debug, Clone, PartialEq)]
pub struct BoxDecoder {
    min_box_size: usize,
    unclip_ratio: f32,
}

impl Default for BoxDecoder {
    fn default() -> Self {
        Self {
            min_box_size: DEFAULT_MIN_BOX_SIZE,
            unclip_ratio: DEFAULT_UNCLIP_RATIO,
        }
    }
}

impl BoxDecoder {
    pub fn new(min_box_size: usize, unclip_ratio: f32) -> Self {
        Self {
            min_box_size,
            unclip_ratio: unclip_ratio.max(0.0),
        }
    }

    pub fn min_box_size(&self) -> usize {
        self.min_box_size
    }

    pub fn unclip_ratio(&self) -> f32 {
        self.unclip_ratio
    }

    /// Decode `heatmap` into boxes in `original_size` (`(width, height)`) coordinates
    ///
    /// Boxes come out in the order their regions are first met scanning
    /// top-to-bottom, left-to-right. Each gets a fresh id and the palette
    /// color of its index. An empty result is not an error.
    ///
    /// # Errors
    /// `Decode` if the heatmap or the original size is empty, or the
    /// threshold is not a number.
    pub fn decode(
        &self,
        heatmap: &Heatmap,
        threshold: f32,
        original_size: (u32, u32),
    ) -> Result<Vec<BoundingBox>, VisionError> {
        if heatmap.is_empty() {
            return Err(VisionError::Decode("empty heatmap".to_string()));
        }
        if original_size.0 == 0 || original_size.1 == 0 {
            return Err(VisionError::Decode(format!(
                "invalid original size {}x{}",
                original_size.0, original_size.1
            )));
        }
        if threshold.is_nan() {
            return Err(VisionError::Decode("threshold is NaN".to_string()));
        }

        let (width, height) = (heatmap.width(), heatmap.height());
        let mask = open_2x2(&binarize(heatmap, threshold), width, height);

        let regions = label_regions(heatmap, &mask, width, height);
        let total = regions.len();

        let scale_x = original_size.0 as f32 / width as f32;
        let scale_y = original_size.1 as f32 / height as f32;

        let boxes: Vec<BoundingBox> = regions
            .into_iter()
            .filter(|r| r.width() > self.min_box_size && r.height() > self.min_box_size)
            .enumerate()
            .map(|(index, region)| {
                let (x0, y0, x1, y1) = self.unclip(&region, width, height);
                BoundingBox::from_rect(
                    Uuid::new_v4().to_string(),
                    x0 * scale_x,
                    y0 * scale_y,
                    (x1 - x0) * scale_x,
                    (y1 - y0) * scale_y,
                    region.mean_score(),
                    palette_color(index),
                )
            })
            .collect();

        debug!(
            "Decoded {} boxes from {} regions (threshold {:.2})",
            boxes.len(),
            total,
            threshold
        );

        Ok(boxes)
    }

    /// Expand a region's rect by the DB unclip offset, clamped to the heatmap
    fn unclip(&self, region: &Region, width: usize, height: usize) -> (f32, f32, f32, f32) {
        let w = region.width() as f32;
        let h = region.height() as f32;
        let offset = w * h * self.unclip_ratio / (2.0 * (w + h));

        let x0 = (region.min_x as f32 - offset).max(0.0);
        let y0 = (region.min_y as f32 - offset).max(0.0);
        let x1 = (region.min_x as f32 + w + offset).min(width as f32);
        let y1 = (region.min_y as f32 + h + offset).min(height as f32);

        (x0, y0, x1, y1)
    }
}

fn binarize(heatmap: &Heatmap, threshold: f32) -> Vec<bool> {
    heatmap.scores().iter().map(|&s| s >= threshold).collect()
}

/// Morphological opening with a 2x2 square: a pixel survives only if it
/// belongs to some fully set 2x2 block.
fn open_2x2(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let at = |m: &[bool], x: usize, y: usize| x < width && y < height && m[y * width + x];

    let mut eroded = vec![false; mask.len()];
    for y in 0..height {
        for x in 0..width {
            eroded[y * width + x] = at(mask, x, y)
                && at(mask, x + 1, y)
                && at(mask, x, y + 1)
                && at(mask, x + 1, y + 1);
        }
    }

    let mut opened = vec![false; mask.len()];
    for y in 0..height {
        for x in 0..width {
            let left = x > 0;
            let up = y > 0;
            opened[y * width + x] = eroded[y * width + x]
                || (left && eroded[y * width + x - 1])
                || (up && eroded[(y - 1) * width + x])
                || (left && up && eroded[(y - 1) * width + x - 1]);
        }
    }

    opened
}

fn label_regions(heatmap: &Heatmap, mask: &[bool], width: usize, height: usize) -> Vec<Region> {
    let mut visited = vec![false; mask.len()];
    let mut regions = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if mask[idx] && !visited[idx] {
                regions.push(flood_fill(heatmap, mask, &mut visited, x, y));
            }
        }
    }

    regions
}

/// Collect the 8-connected region containing `(start_x, start_y)`
fn flood_fill(
    heatmap: &Heatmap,
    mask: &[bool],
    visited: &mut [bool],
    start_x: usize,
    start_y: usize,
) -> Region {
    let (width, height) = (heatmap.width(), heatmap.height());
    let mut stack = vec![(start_x, start_y)];
    let mut region = Region {
        min_x: start_x,
        max_x: start_x,
        min_y: start_y,
        max_y: start_y,
        count: 0,
        sum_score: 0.0,
    };

    while let Some((x, y)) = stack.pop() {
        let idx = y * width + x;
        if visited[idx] || !mask[idx] {
            continue;
        }

        visited[idx] = true;
        region.count += 1;
        region.sum_score += heatmap.score(x, y);

        region.min_x = region.min_x.min(x);
        region.max_x = region.max_x.max(x);
        region.min_y = region.min_y.min(y);
        region.max_y = region.max_y.max(y);

        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                if !visited[ny * width + nx] {
                    stack.push((nx, ny));
                }
            }
        }
    }

    region
}
