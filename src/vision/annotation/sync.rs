// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Word list and annotation layer synchronization
//!
//! `AnnotationSync` owns the word list and drives the layer. Words and
//! shapes are joined only by id. Shape hover marks the word active and
//! redraws that one shape; word-list hover previews the shape with a
//! transparent fill and leaves `is_active` alone.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::layer::{AnnotationLayer, AnnotationShape, ShapeStyle};
use crate::vision::errors::VisionError;
use crate::vision::ocr::{BoundingBox, Word};

/// Where the annotation state machine is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// No image
    Idle,
    /// Image set, no shapes
    ImageLoaded,
    /// Shapes rendered, recognition pending
    BoxesReady,
    /// Words bound to shapes
    WordsReady,
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::ImageLoaded => "image_loaded",
            SyncState::BoxesReady => "boxes_ready",
            SyncState::WordsReady => "words_ready",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionKind {
    HoverEnter,
    HoverLeave,
    Click,
}

/// Pointer events from the annotation layer and the word list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interaction {
    ShapeHoverEnter(String),
    ShapeHoverLeave(String),
    ShapeClick(String),
    FieldHoverEnter(String),
    FieldHoverLeave(String),
}

impl Interaction {
    /// Event forwarded from the rendering layer
    pub fn shape(shape_id: impl Into<String>, kind: InteractionKind) -> Self {
        let id = shape_id.into();
        match kind {
            InteractionKind::HoverEnter => Interaction::ShapeHoverEnter(id),
            InteractionKind::HoverLeave => Interaction::ShapeHoverLeave(id),
            InteractionKind::Click => Interaction::ShapeClick(id),
        }
    }
}

/// What an interaction changed, for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    None,
    WordsChanged,
    BringIntoView { index: usize, word_id: String },
}

/// Word list and annotation layer kept consistent by id
pub struct AnnotationSync<L: AnnotationLayer> {
    state: SyncState,
    words: Vec<Word>,
    layer: L,
}

impl<L: AnnotationLayer> AnnotationSync<L> {
    pub fn new(layer: L) -> Self {
        Self {
            state: SyncState::Idle,
            words: Vec::new(),
            layer,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn shapes(&self) -> Vec<AnnotationShape> {
        self.layer.shapes()
    }

    /// New image: clear words and shapes
    pub fn load_image(&mut self) {
        self.clear_results();
        self.state = SyncState::ImageLoaded;
    }

    /// Drop image, words and shapes
    pub fn reset(&mut self) {
        self.clear_results();
        self.state = SyncState::Idle;
    }

    /// Clear results of the current run, keeping the image
    pub fn restart(&mut self) -> Result<(), VisionError> {
        if self.state == SyncState::Idle {
            return Err(self.invalid("restart"));
        }
        self.load_image();
        Ok(())
    }

    fn clear_results(&mut self) {
        self.words.clear();
        self.layer.clear();
    }

    fn invalid(&self, action: &'static str) -> VisionError {
        VisionError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    /// Render one shape per box
    pub fn set_boxes(&mut self, boxes: &[BoundingBox]) -> Result<(), VisionError> {
        if self.state != SyncState::ImageLoaded {
            return Err(self.invalid("set boxes"));
        }

        self.layer
            .instantiate(boxes.iter().map(AnnotationShape::from_box).collect());
        self.state = SyncState::BoxesReady;
        debug!("Annotation layer holds {} shapes", boxes.len());
        Ok(())
    }

    /// Bind words to their shapes by id
    ///
    /// Words without a shape are dropped. Each bound shape is restyled
    /// from its word, then the layer is redrawn once.
    pub fn set_words(&mut self, words: Vec<Word>) -> Result<(), VisionError> {
        if self.state != SyncState::BoxesReady {
            return Err(self.invalid("set words"));
        }

        let shape_ids: HashSet<String> = self.layer.shapes().into_iter().map(|s| s.id).collect();
        let (bound, orphans): (Vec<Word>, Vec<Word>) =
            words.into_iter().partition(|w| shape_ids.contains(&w.id));

        if !orphans.is_empty() {
            warn!("Dropping {} words without a shape", orphans.len());
        }

        for word in &bound {
            self.layer
                .set_shape_style(&word.id, ShapeStyle::for_word(&word.color, word.is_active));
        }
        self.layer.draw_layer();

        self.words = bound;
        self.state = SyncState::WordsReady;
        Ok(())
    }

    fn word_index(&self, id: &str) -> Option<usize> {
        self.words.iter().position(|w| w.id == id)
    }

    /// Mark the shape's word active or inactive and redraw that shape
    pub fn on_shape_hover(&mut self, shape_id: &str, active: bool) -> SyncEffect {
        let Some(index) = self.word_index(shape_id) else {
            return SyncEffect::None;
        };

        let word = &mut self.words[index];
        word.is_active = active;
        let style = ShapeStyle::for_word(&word.color, active);
        self.layer.draw_shape(shape_id, style);

        SyncEffect::WordsChanged
    }

    /// Preview the word's shape with a transparent fill
    pub fn on_field_hover_enter(&mut self, word_id: &str) -> SyncEffect {
        if let Some(shape) = self.layer.shape(word_id) {
            self.layer
                .set_shape_style(word_id, ShapeStyle::highlight(&shape.color));
            self.layer.draw_layer();
        }
        SyncEffect::None
    }

    /// Restore the resting fill of the word's shape
    pub fn on_field_hover_leave(&mut self, word_id: &str) -> SyncEffect {
        if let Some(shape) = self.layer.shape(word_id) {
            self.layer
                .draw_shape(word_id, ShapeStyle::inactive(&shape.color));
        }
        SyncEffect::None
    }

    /// Ask the word list to bring the clicked shape's word into view
    pub fn on_shape_click(&self, shape_id: &str) -> SyncEffect {
        match self.word_index(shape_id) {
            Some(index) => SyncEffect::BringIntoView {
                index,
                word_id: shape_id.to_string(),
            },
            None => SyncEffect::None,
        }
    }

    pub fn handle(&mut self, interaction: &Interaction) -> SyncEffect {
        match interaction {
            Interaction::ShapeHoverEnter(id) => self.on_shape_hover(id, true),
            Interaction::ShapeHoverLeave(id) => self.on_shape_hover(id, false),
            Interaction::ShapeClick(id) => self.on_shape_click(id),
            Interaction::FieldHoverEnter(id) => self.on_field_hover_enter(id),
            Interaction::FieldHoverLeave(id) => self.on_field_hover_leave(id),
        }
    }
}
