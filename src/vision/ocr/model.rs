// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Data model shared by detection, recognition and the annotation layer

use serde::{Deserialize, Serialize};

/// Stroke colors assigned to boxes by their index in scan order
pub const PALETTE: [&str; 12] = [
    "#E6194B", "#3CB44B", "#4363D8", "#F58231", "#911EB4", "#42D4F4", "#F032E6", "#BFEF45",
    "#469990", "#9A6324", "#800000", "#000075",
];

/// Default color for the box at `index`
pub fn palette_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// A detected word region in original image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Unique within one extraction run; joins box, word and shape
    pub id: String,
    /// Corners clockwise from top-left: `[[x, y]; 4]`
    pub points: [[f32; 2]; 4],
    /// Mean heatmap score inside the region (0.0-1.0)
    pub confidence: f32,
    /// Stroke color derived from the box index
    pub color: String,
}

impl BoundingBox {
    /// Axis-aligned rectangle box
    pub fn from_rect(
        id: impl Into<String>,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            points: [[x, y], [x + width, y], [x + width, y + height], [x, y + height]],
            confidence,
            color: color.into(),
        }
    }

    /// `(min_x, min_y, max_x, max_y)` of the polygon
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(min_x, min_y, max_x, max_y), [x, y]| {
                (min_x.min(*x), min_y.min(*y), max_x.max(*x), max_y.max(*y))
            },
        )
    }

    pub fn width(&self) -> f32 {
        let (min_x, _, max_x, _) = self.bounds();
        max_x - min_x
    }

    pub fn height(&self) -> f32 {
        let (_, min_y, _, max_y) = self.bounds();
        max_y - min_y
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// A recognized word bound to its box by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub id: String,
    /// Recognized text; empty when the crop could not be read
    pub value: String,
    pub color: String,
    /// Set while the word's shape is hovered
    pub is_active: bool,
    /// Recognition confidence (0.0-1.0)
    pub confidence: f32,
    /// Geometry inherited from the bounding box
    pub points: [[f32; 2]; 4],
}

impl Word {
    pub fn from_box(bbox: &BoundingBox, value: String, confidence: f32) -> Self {
        Self {
            id: bbox.id.clone(),
            value,
            color: bbox.color.clone(),
            is_active: false,
            confidence,
            points: bbox.points,
        }
    }

    /// A word whose crop could not be recognized
    pub fn unreadable(bbox: &BoundingBox) -> Self {
        Self::from_box(bbox, String::new(), 0.0)
    }
}
