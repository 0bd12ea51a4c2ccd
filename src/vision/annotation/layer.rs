// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Annotation layer primitives
//!
//! The layer renders one shape per detected box. Shapes are addressed
//! only by id; nothing outside the layer holds a shape directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::vision::ocr::BoundingBox;

/// Fill used by the word-list hover preview
pub const HIGHLIGHT_FILL: &str = "transparent";

/// Render style of one shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeStyle {
    pub fill: String,
    pub stroke: String,
}

impl ShapeStyle {
    /// Resting style: translucent fill (alpha 0x33)
    pub fn inactive(color: &str) -> Self {
        Self {
            fill: format!("{}33", color),
            stroke: color.to_string(),
        }
    }

    /// Style of a shape whose word is active (alpha 0x80)
    pub fn active(color: &str) -> Self {
        Self {
            fill: format!("{}80", color),
            stroke: color.to_string(),
        }
    }

    pub fn for_word(color: &str, is_active: bool) -> Self {
        if is_active {
            Self::active(color)
        } else {
            Self::inactive(color)
        }
    }

    /// Temporary preview while the word's list entry is hovered
    pub fn highlight(color: &str) -> Self {
        Self {
            fill: HIGHLIGHT_FILL.to_string(),
            stroke: color.to_string(),
        }
    }
}

/// Canvas counterpart of a bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationShape {
    pub id: String,
    pub points: [[f32; 2]; 4],
    pub color: String,
    pub style: ShapeStyle,
}

impl AnnotationShape {
    pub fn from_box(bbox: &BoundingBox) -> Self {
        Self {
            id: bbox.id.clone(),
            points: bbox.points,
            color: bbox.color.clone(),
            style: ShapeStyle::inactive(&bbox.color),
        }
    }
}

/// Rendering primitives driven by `AnnotationSync`
pub trait AnnotationLayer: Send {
    /// Replace the layer's content with `shapes` and draw it
    fn instantiate(&mut self, shapes: Vec<AnnotationShape>);

    /// Remove every shape
    fn clear(&mut self);

    /// Update a shape's style without drawing; false if `id` is unknown
    fn set_shape_style(&mut self, id: &str, style: ShapeStyle) -> bool;

    /// Update a shape's style and redraw only that shape; false if `id` is unknown
    fn draw_shape(&mut self, id: &str, style: ShapeStyle) -> bool;

    /// Redraw the whole layer
    fn draw_layer(&mut self);

    fn shape(&self, id: &str) -> Option<AnnotationShape>;

    fn shapes(&self) -> Vec<AnnotationShape>;
}

/// Layer kept in memory, counting draws
#[derive(Debug, Default, Clone)]
pub struct InMemoryLayer {
    shapes: Vec<AnnotationShape>,
    layer_draws: usize,
    shape_draws: HashMap<String, usize>,
}

impl InMemoryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-layer draws since creation
    pub fn layer_draws(&self) -> usize {
        self.layer_draws
    }

    /// Single-shape draws of `id` since it was instantiated
    pub fn shape_draws(&self, id: &str) -> usize {
        self.shape_draws.get(id).copied().unwrap_or(0)
    }

    pub fn style(&self, id: &str) -> Option<&ShapeStyle> {
        self.shapes.iter().find(|s| s.id == id).map(|s| &s.style)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    fn shape_mut(&mut self, id: &str) -> Option<&mut AnnotationShape> {
        self.shapes.iter_mut().find(|s| s.id == id)
    }
}

impl AnnotationLayer for InMemoryLayer {
    fn instantiate(&mut self, shapes: Vec<AnnotationShape>) {
        debug!("Instantiating annotation layer with {} shapes", shapes.len());
        self.shapes = shapes;
        self.shape_draws.clear();
        self.layer_draws += 1;
    }

    fn clear(&mut self) {
        self.shapes.clear();
        self.shape_draws.clear();
    }

    fn set_shape_style(&mut self, id: &str, style: ShapeStyle) -> bool {
        match self.shape_mut(id) {
            Some(shape) => {
                shape.style = style;
                true
            }
            None => false,
        }
    }

    fn draw_shape(&mut self, id: &str, style: ShapeStyle) -> bool {
        if !self.set_shape_style(id, style) {
            return false;
        }
        *self.shape_draws.entry(id.to_string()).or_insert(0) += 1;
        true
    }

    fn draw_layer(&mut self) {
        self.layer_draws += 1;
    }

    fn shape(&self, id: &str) -> Option<AnnotationShape> {
        self.shapes.iter().find(|s| s.id == id).cloned()
    }

    fn shapes(&self) -> Vec<AnnotationShape> {
        self.shapes.clone()
    }
}
