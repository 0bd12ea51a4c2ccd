// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Fakes shared by the vision integration tests
//!
//! - `FixedHeatmapGraph` answers every detection pass with the same heatmap
//! - `TextGraph` emits CTC sequences spelling fixed words
//! - `Gate` parks a graph or a load until the test opens it
//! - `FakeLoader` hands out graphs per variant and counts loads

#![allow(dead_code)]

use async_trait::async_trait;
use fabstir_doc_vision::vision::{
    Charset, ExtractionObserver, InMemoryLayer, InferenceGraph, ModelConfig, ModelLoader,
    ModelRole, VisionConfig, VisionError, VisionSession, Word,
};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array3, Array4, ArrayD, Axis};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use tokio::sync::Notify;

/// Detection resolution used by every catalog variant
pub const HEATMAP_SIZE: usize = 512;

/// `(x, y, w, h)` text blocks in heatmap pixels, one per word
pub const THREE_WORDS: [(usize, usize, usize, usize); 3] =
    [(40, 40, 120, 30), (220, 40, 90, 30), (40, 200, 200, 40)];

/// Heatmap with `score` inside each block and 0.0 elsewhere
pub fn heatmap_with(blocks: &[(usize, usize, usize, usize)], score: f32) -> Array2<f32> {
    let mut heatmap = Array2::zeros((HEATMAP_SIZE, HEATMAP_SIZE));
    for &(x, y, w, h) in blocks {
        for row in y..y + h {
            for col in x..x + w {
                heatmap[[row, col]] = score;
            }
        }
    }
    heatmap
}

pub fn document_image() -> RgbImage {
    RgbImage::from_pixel(640, 480, Rgb([250, 250, 245]))
}

// =============================================================================
// Gate
// =============================================================================

/// Holds a graph run or a model load until opened
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
        self.released.notify_waiters();
    }

    /// Wait until something reached the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Blocking pass, for code running on a blocking thread
    pub fn pass_blocking(&self) {
        self.entered.notify_one();
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }

    pub async fn pass(&self) {
        self.entered.notify_one();
        loop {
            let released = self.released.notified();
            if *self.open.lock().unwrap() {
                return;
            }
            released.await;
        }
    }
}

// =============================================================================
// Graphs
// =============================================================================

/// Detection graph returning a fixed `[1, 1, H, W]` heatmap
pub struct FixedHeatmapGraph {
    heatmap: Array2<f32>,
    gate: Option<Arc<Gate>>,
}

impl FixedHeatmapGraph {
    pub fn new(heatmap: Array2<f32>) -> Self {
        Self {
            heatmap,
            gate: None,
        }
    }

    pub fn gated(heatmap: Array2<f32>, gate: Arc<Gate>) -> Self {
        Self {
            heatmap,
            gate: Some(gate),
        }
    }
}

impl InferenceGraph for FixedHeatmapGraph {
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, VisionError> {
        assert_eq!(input.shape()[1], 3, "detection input must be NCHW");
        if let Some(gate) = &self.gate {
            gate.pass_blocking();
        }
        Ok(self
            .heatmap
            .clone()
            .insert_axis(Axis(0))
            .insert_axis(Axis(0))
            .into_dyn())
    }
}

/// Recognition graph spelling `words[i % len]` for the i-th crop of a batch
pub struct TextGraph {
    charset: Charset,
    words: Vec<String>,
    timesteps: usize,
    gate: Option<Arc<Gate>>,
}

impl TextGraph {
    pub fn new(words: &[&str]) -> Self {
        Self {
            charset: Charset::french(),
            words: words.iter().map(|w| w.to_string()).collect(),
            timesteps: 32,
            gate: None,
        }
    }

    pub fn gated(words: &[&str], gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(words)
        }
    }

    /// One-hot steps: each symbol followed by a blank, padded with blanks
    fn sequence(&self, word: &str) -> Vec<usize> {
        let blank = self.charset.blank_index();
        let mut steps: Vec<usize> = word
            .chars()
            .flat_map(|c| [self.charset.index_of(c).unwrap_or(blank), blank])
            .collect();
        steps.resize(self.timesteps, blank);
        steps
    }
}

impl InferenceGraph for TextGraph {
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, VisionError> {
        assert_eq!(&input.shape()[1..], &[3, 32, 128], "recognition input must be 32x128");
        if let Some(gate) = &self.gate {
            gate.pass_blocking();
        }

        let batch = input.shape()[0];
        let classes = self.charset.num_classes();
        let mut output = Array3::zeros((batch, self.timesteps, classes));
        for n in 0..batch {
            let word = &self.words[n % self.words.len()];
            for (t, index) in self.sequence(word).into_iter().enumerate() {
                output[[n, t, index]] = 1.0;
            }
        }
        Ok(output.into_dyn())
    }
}

/// Graph whose every pass fails
pub struct FailingGraph;

impl InferenceGraph for FailingGraph {
    fn run(&self, _input: Array4<f32>) -> Result<ArrayD<f32>, VisionError> {
        Err(VisionError::Inference("device lost".to_string()))
    }
}

// =============================================================================
// Loader
// =============================================================================

/// Model loader serving registered graphs by variant name
#[derive(Default)]
pub struct FakeLoader {
    graphs: Mutex<HashMap<String, Arc<dyn InferenceGraph>>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    failing: Mutex<Vec<String>>,
    loads: Mutex<Vec<(ModelRole, String)>>,
}

impl FakeLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_graph(&self, variant: &str, graph: impl InferenceGraph + 'static) -> &Self {
        self.graphs
            .lock()
            .unwrap()
            .insert(variant.to_string(), Arc::new(graph));
        self
    }

    /// Park loads of `variant` on `gate`
    pub fn gate_load(&self, variant: &str, gate: Arc<Gate>) -> &Self {
        self.gates.lock().unwrap().insert(variant.to_string(), gate);
        self
    }

    pub fn fail(&self, variant: &str) -> &Self {
        self.failing.lock().unwrap().push(variant.to_string());
        self
    }

    pub fn loads_of(&self, role: ModelRole, variant: &str) -> usize {
        self.loads
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, v)| *r == role && v == variant)
            .count()
    }

    pub fn total_loads(&self, role: ModelRole) -> usize {
        self.loads
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(
        &self,
        role: ModelRole,
        config: &ModelConfig,
    ) -> Result<Arc<dyn InferenceGraph>, VisionError> {
        self.loads
            .lock()
            .unwrap()
            .push((role, config.variant.clone()));

        let gate = self.gates.lock().unwrap().get(&config.variant).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let load_error = |reason: &str| VisionError::ModelLoad {
            role,
            variant: config.variant.clone(),
            reason: reason.to_string(),
        };

        if self.failing.lock().unwrap().contains(&config.variant) {
            return Err(load_error("corrupt graph"));
        }

        self.graphs
            .lock()
            .unwrap()
            .get(&config.variant)
            .cloned()
            .ok_or_else(|| load_error("not found"))
    }
}

// =============================================================================
// Observer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Words(Vec<Word>),
    Extracting(bool),
    BringIntoView(usize, String),
    Unavailable(ModelRole, String),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn last_words(&self) -> Option<Vec<Word>> {
        self.events().into_iter().rev().find_map(|e| match e {
            Event::Words(words) => Some(words),
            _ => None,
        })
    }
}

impl ExtractionObserver for RecordingObserver {
    fn on_words_changed(&self, words: &[Word]) {
        self.events.lock().unwrap().push(Event::Words(words.to_vec()));
    }

    fn on_extraction_state_changed(&self, is_extracting: bool) {
        self.events.lock().unwrap().push(Event::Extracting(is_extracting));
    }

    fn on_bring_into_view(&self, index: usize, word_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::BringIntoView(index, word_id.to_string()));
    }

    fn on_model_unavailable(&self, role: ModelRole, reason: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Unavailable(role, reason.to_string()));
    }
}

pub type TestSession = VisionSession<InMemoryLayer>;

/// Session over `loader` with default config and a recording observer
pub fn session_with(loader: Arc<FakeLoader>) -> (Arc<TestSession>, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let session = VisionSession::new(loader, &VisionConfig::default(), InMemoryLayer::new())
        .unwrap()
        .with_observer(observer.clone());
    (Arc::new(session), observer)
}
