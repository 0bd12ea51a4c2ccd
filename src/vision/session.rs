// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Extraction session: drives the pipeline for one document view
//!
//! Every image load, extraction and model change starts a new run. Async
//! work remembers the run it was started for and its results are only
//! applied while that run is still current; otherwise they are dropped
//! without error.
//!
//! The session state sits behind a std mutex that is never held across
//! an `.await`, so interaction events are handled while an extraction
//! is suspended on inference.

use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::annotation::{
    AnnotationLayer, AnnotationShape, AnnotationSync, Interaction, SyncEffect, SyncState,
};
use super::catalog::{ModelConfig, ModelRole};
use super::config::VisionConfig;
use super::errors::VisionError;
use super::graph::ModelLoader;
use super::image_utils::ImageSource;
use super::model_registry::{ModelRegistry, RoleStatus};
use super::ocr::{BoxDecoder, Charset, Heatmap, HeatmapExtractor, Word, WordRecognizer};

/// Callbacks for the word list display
///
/// Called outside the session lock, so implementations may call back
/// into the session.
pub trait ExtractionObserver: Send + Sync {
    fn on_words_changed(&self, _words: &[Word]) {}

    fn on_extraction_state_changed(&self, _is_extracting: bool) {}

    /// The list entry at `index` should be scrolled into view
    fn on_bring_into_view(&self, _index: usize, _word_id: &str) {}

    /// A model role failed to load and is disabled until reloaded
    fn on_model_unavailable(&self, _role: ModelRole, _reason: &str) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExtractionObserver for NoopObserver {}

/// How an extraction ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Words were published for `run`
    Completed { run: u64, words: Vec<Word> },
    /// `run` was superseded before it finished; nothing was published
    Discarded { run: u64 },
}

impl ExtractionOutcome {
    pub fn run(&self) -> u64 {
        match self {
            Self::Completed { run, .. } | Self::Discarded { run } => *run,
        }
    }

    pub fn words(&self) -> &[Word] {
        match self {
            Self::Completed { words, .. } => words,
            Self::Discarded { .. } => &[],
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded { .. })
    }
}

struct SessionState<L: AnnotationLayer> {
    sync: AnnotationSync<L>,
    image: Option<Arc<RgbImage>>,
    detection: ModelConfig,
    recognition: ModelConfig,
    run: u64,
    extracting_run: Option<u64>,
    last_heatmap: Option<Arc<Heatmap>>,
}

impl<L: AnnotationLayer> SessionState<L> {
    fn config(&self, role: ModelRole) -> &ModelConfig {
        match role {
            ModelRole::Detection => &self.detection,
            ModelRole::Recognition => &self.recognition,
        }
    }

    /// Start a new run, invalidating the previous one
    ///
    /// Returns whether an extraction was in flight.
    fn next_run(&mut self) -> bool {
        self.run += 1;
        self.last_heatmap = None;
        self.extracting_run.take().is_some()
    }
}

/// Changes to report once the session lock is released
#[derive(Default)]
struct Notifications {
    words: Option<Vec<Word>>,
    extracting: Option<bool>,
    bring_into_view: Option<(usize, String)>,
    unavailable: Option<(ModelRole, String)>,
}

/// One document view: image, models, word list and annotation layer
pub struct VisionSession<L: AnnotationLayer> {
    registry: ModelRegistry,
    extractor: HeatmapExtractor,
    decoder: BoxDecoder,
    recognizer: WordRecognizer,
    threshold: f32,
    observer: Arc<dyn ExtractionObserver>,
    state: Mutex<SessionState<L>>,
}

impl<L: AnnotationLayer> VisionSession<L> {
    /// Create a session for `config`, loading models through `loader`
    ///
    /// Models are loaded lazily on the first extraction.
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        config: &VisionConfig,
        layer: L,
    ) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;

        let charset = match &config.charset_path {
            Some(path) => Charset::from_file(path)?,
            None => Charset::french(),
        };

        info!(
            "Vision session: detection={}, recognition={}, threshold={}",
            config.detection, config.recognition, config.bin_threshold
        );

        Ok(Self {
            registry: ModelRegistry::new(loader),
            extractor: HeatmapExtractor::default(),
            decoder: BoxDecoder::new(config.min_box_size, config.unclip_ratio),
            recognizer: WordRecognizer::new(Arc::new(charset), config.recognition_batch_size),
            threshold: config.bin_threshold,
            observer: Arc::new(NoopObserver),
            state: Mutex::new(SessionState {
                sync: AnnotationSync::new(layer),
                image: None,
                detection: config.detection.config(),
                recognition: config.recognition.config(),
                run: 0,
                extracting_run: None,
                last_heatmap: None,
            }),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExtractionObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<L>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, notifications: Notifications) {
        if let Some(words) = notifications.words {
            self.observer.on_words_changed(&words);
        }
        if let Some((index, word_id)) = notifications.bring_into_view {
            self.observer.on_bring_into_view(index, &word_id);
        }
        if let Some((role, reason)) = notifications.unavailable {
            self.observer.on_model_unavailable(role, &reason);
        }
        if let Some(extracting) = notifications.extracting {
            self.observer.on_extraction_state_changed(extracting);
        }
    }

    /// Set a new image; clears words and shapes and invalidates any run
    ///
    /// Returns the new run id.
    pub fn load_image(&self, source: &dyn ImageSource) -> Result<u64, VisionError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(VisionError::Image(format!(
                "image has no pixels ({}x{})",
                source.width(),
                source.height()
            )));
        }
        let image = Arc::new(source.to_rgb());

        let mut notifications = Notifications::default();
        let run = {
            let mut state = self.lock();
            if state.next_run() {
                notifications.extracting = Some(false);
            }
            if !state.sync.words().is_empty() {
                notifications.words = Some(Vec::new());
            }
            state.sync.load_image();
            state.image = Some(image);
            state.run
        };
        self.notify(notifications);

        debug!("Image loaded for run {}", run);
        Ok(run)
    }

    /// Load `source` and extract its words
    pub async fn process_image(
        &self,
        source: &dyn ImageSource,
    ) -> Result<ExtractionOutcome, VisionError> {
        self.load_image(source)?;
        self.extract().await
    }

    /// Run detection and recognition over the current image
    ///
    /// # Errors
    /// - `InvalidTransition` without an image
    /// - `ModelUnavailable` if a role's last load failed
    /// - `ModelLoad` if a model fails to load now
    /// - `Inference` if a forward pass fails
    ///
    /// A run superseded while suspended yields `Discarded`, never an error.
    pub async fn extract(&self) -> Result<ExtractionOutcome, VisionError> {
        let mut notifications = Notifications::default();
        let (run, image, detection, recognition) = {
            let mut state = self.lock();
            let image = state.image.clone().ok_or_else(|| VisionError::InvalidTransition {
                state: state.sync.state().name(),
                action: "extract",
            })?;

            for role in [ModelRole::Detection, ModelRole::Recognition] {
                if let RoleStatus::Failed(config, _) = self.registry.status(role) {
                    if &config == state.config(role) {
                        return Err(VisionError::ModelUnavailable { role });
                    }
                }
            }

            if !state.sync.words().is_empty() {
                notifications.words = Some(Vec::new());
            }
            state.next_run();
            state.sync.restart()?;
            state.extracting_run = Some(state.run);

            (
                state.run,
                image,
                state.detection.clone(),
                state.recognition.clone(),
            )
        };
        notifications.extracting = Some(true);
        self.notify(notifications);

        info!("Run {} started ({}x{})", run, image.width(), image.height());

        match self.run_pipeline(run, image, &detection, &recognition).await {
            Ok(Some(words)) => Ok(ExtractionOutcome::Completed { run, words }),
            Ok(None) => Ok(ExtractionOutcome::Discarded { run }),
            Err(e) => self.fail_run(run, e),
        }
    }

    /// The pipeline chain; `None` once the run is no longer current
    async fn run_pipeline(
        &self,
        run: u64,
        image: Arc<RgbImage>,
        detection: &ModelConfig,
        recognition: &ModelConfig,
    ) -> Result<Option<Vec<Word>>, VisionError> {
        let det_model = self
            .registry
            .ensure_loaded(ModelRole::Detection, detection)
            .await?;
        if !self.is_current(run) {
            return Ok(None);
        }

        let heatmap = Arc::new(
            self.extractor
                .extract(image.clone(), &det_model, detection.input_size)
                .await?,
        );

        let boxes = match self
            .decoder
            .decode(&heatmap, self.threshold, image.dimensions())
        {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!("{}; treating as zero boxes", e);
                Vec::new()
            }
        };
        info!("Run {}: {} boxes detected", run, boxes.len());

        {
            let mut state = self.lock();
            if state.run != run {
                return Ok(None);
            }
            state.last_heatmap = Some(heatmap);
            state.sync.set_boxes(&boxes)?;
        }

        let words = if boxes.is_empty() {
            Vec::new()
        } else {
            let reco_model = self
                .registry
                .ensure_loaded(ModelRole::Recognition, recognition)
                .await?;
            if !self.is_current(run) {
                return Ok(None);
            }
            self.recognizer
                .recognize_all(image, &boxes, &reco_model, recognition.input_size)
                .await?
        };

        let words = {
            let mut state = self.lock();
            if state.run != run {
                return Ok(None);
            }
            state.sync.set_words(words)?;
            state.extracting_run = None;
            state.sync.words().to_vec()
        };

        info!("Run {} completed with {} words", run, words.len());
        self.notify(Notifications {
            words: Some(words.clone()),
            extracting: Some(false),
            ..Default::default()
        });

        Ok(Some(words))
    }

    /// Close `run` after a run-level error, unless it was superseded
    fn fail_run(&self, run: u64, error: VisionError) -> Result<ExtractionOutcome, VisionError> {
        {
            let mut state = self.lock();
            if state.run != run {
                debug!("Run {} superseded, dropping error: {}", run, error);
                return Ok(ExtractionOutcome::Discarded { run });
            }
            state.extracting_run = None;
        }

        warn!("⚠️ Run {} failed: {}", run, error);

        let unavailable = match &error {
            VisionError::ModelLoad { role, reason, .. } => Some((*role, reason.clone())),
            _ => None,
        };
        self.notify(Notifications {
            extracting: Some(false),
            unavailable,
            ..Default::default()
        });

        Err(error)
    }

    /// Switch the model for `role`
    ///
    /// Clears words, shapes and the image, invalidates any run and loads
    /// the new model before returning. A request for the config already
    /// in use is ignored unless its last load failed.
    pub async fn request_reload(
        &self,
        role: ModelRole,
        config: ModelConfig,
    ) -> Result<(), VisionError> {
        let failed = matches!(self.registry.status(role), RoleStatus::Failed(..));

        let mut notifications = Notifications::default();
        {
            let mut state = self.lock();
            if state.config(role) == &config && !failed {
                return Ok(());
            }

            info!("Switching {} model to {}", role, config.variant);
            match role {
                ModelRole::Detection => state.detection = config.clone(),
                ModelRole::Recognition => state.recognition = config.clone(),
            }
            if state.next_run() {
                notifications.extracting = Some(false);
            }
            if !state.sync.words().is_empty() {
                notifications.words = Some(Vec::new());
            }
            state.sync.reset();
            state.image = None;
        }
        self.notify(notifications);

        match self.registry.ensure_loaded(role, &config).await {
            Ok(_) => Ok(()),
            Err(VisionError::StaleModel { .. }) => {
                debug!("{} reload of {} superseded", role, config.variant);
                Ok(())
            }
            Err(e) => {
                if let VisionError::ModelLoad { reason, .. } = &e {
                    self.observer.on_model_unavailable(role, reason);
                }
                Err(e)
            }
        }
    }

    /// Apply a pointer event from the layer or the word list
    pub fn handle_interaction(&self, interaction: Interaction) -> SyncEffect {
        let mut notifications = Notifications::default();
        let effect = {
            let mut state = self.lock();
            let effect = state.sync.handle(&interaction);
            match &effect {
                SyncEffect::WordsChanged => {
                    notifications.words = Some(state.sync.words().to_vec());
                }
                SyncEffect::BringIntoView { index, word_id } => {
                    notifications.bring_into_view = Some((*index, word_id.clone()));
                }
                SyncEffect::None => {}
            }
            effect
        };
        self.notify(notifications);
        effect
    }

    fn is_current(&self, run: u64) -> bool {
        self.lock().run == run
    }

    pub fn words(&self) -> Vec<Word> {
        self.lock().sync.words().to_vec()
    }

    pub fn shapes(&self) -> Vec<AnnotationShape> {
        self.lock().sync.shapes()
    }

    pub fn state(&self) -> SyncState {
        self.lock().sync.state()
    }

    pub fn is_extracting(&self) -> bool {
        self.lock().extracting_run.is_some()
    }

    pub fn current_run(&self) -> u64 {
        self.lock().run
    }

    /// Heatmap of the current run, once detection finished
    pub fn last_heatmap(&self) -> Option<Arc<Heatmap>> {
        self.lock().last_heatmap.clone()
    }

    pub fn model_config(&self, role: ModelRole) -> ModelConfig {
        self.lock().config(role).clone()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Inspect the annotation layer
    pub fn with_layer<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        f(self.lock().sync.layer())
    }
}
