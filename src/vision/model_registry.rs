// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model registry: one live model per role, reloaded on config change
//!
//! `ensure_loaded` returns the current model when its config matches.
//! Otherwise it releases the previous model and starts exactly one load
//! per role; callers arriving while that load is pending await the same
//! shared result.
//!
//! Every load bumps the role's generation. A `ModelHandle` remembers the
//! generation it was built at, so anyone holding an old handle can tell
//! it has been superseded (`is_stale`).

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::catalog::{ModelConfig, ModelRole};
use super::errors::VisionError;
use super::graph::{InferenceGraph, ModelLoader};

type LoadFuture = Shared<BoxFuture<'static, Result<ModelHandle, VisionError>>>;

/// A loaded inference graph plus the config it was built from
pub struct LoadedModel {
    role: ModelRole,
    config: ModelConfig,
    generation: u64,
    graph: Arc<dyn InferenceGraph>,
}

impl Drop for LoadedModel {
    fn drop(&mut self) {
        debug!(
            "Released {} model {} (generation {})",
            self.role, self.config.variant, self.generation
        );
    }
}

/// Opaque, cheaply clonable reference to a loaded model
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<LoadedModel>,
    live_generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("role", &self.model.role)
            .field("variant", &self.model.config.variant)
            .field("generation", &self.model.generation)
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl ModelHandle {
    pub fn role(&self) -> ModelRole {
        self.model.role
    }

    pub fn config(&self) -> &ModelConfig {
        &self.model.config
    }

    pub fn generation(&self) -> u64 {
        self.model.generation
    }

    /// True once a newer load for the same role has been requested
    pub fn is_stale(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) != self.model.generation
    }

    /// Fail with `StaleModel` if this handle has been superseded
    pub fn ensure_current(&self) -> Result<(), VisionError> {
        if self.is_stale() {
            Err(VisionError::StaleModel {
                role: self.model.role,
            })
        } else {
            Ok(())
        }
    }

    pub(crate) fn graph(&self) -> Arc<dyn InferenceGraph> {
        self.model.graph.clone()
    }
}

/// Load status of one role
#[derive(Debug, Clone, PartialEq)]
pub enum RoleStatus {
    Unloaded,
    Loading(ModelConfig),
    Ready(ModelConfig),
    Failed(ModelConfig, String),
}

struct PendingLoad {
    config: ModelConfig,
    future: LoadFuture,
}

#[derive(Default)]
struct SlotState {
    current: Option<ModelHandle>,
    pending: Option<PendingLoad>,
    failure: Option<(ModelConfig, String)>,
}

struct RoleSlot {
    role: ModelRole,
    /// Generation of the most recently requested load
    live_generation: Arc<AtomicU64>,
    next_generation: AtomicU64,
    state: Mutex<SlotState>,
}

impl RoleSlot {
    fn new(role: ModelRole) -> Self {
        Self {
            role,
            live_generation: Arc::new(AtomicU64::new(0)),
            next_generation: AtomicU64::new(1),
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the result of load `generation` unless a newer load superseded it
    fn finish(
        &self,
        generation: u64,
        config: ModelConfig,
        result: Result<Arc<dyn InferenceGraph>, VisionError>,
    ) -> Result<ModelHandle, VisionError> {
        let mut state = self.lock();

        if self.live_generation.load(Ordering::SeqCst) != generation {
            debug!(
                "Discarding superseded {} load of {} (generation {})",
                self.role, config.variant, generation
            );
            return Err(VisionError::StaleModel { role: self.role });
        }

        state.pending = None;

        match result {
            Ok(graph) => {
                let handle = ModelHandle {
                    model: Arc::new(LoadedModel {
                        role: self.role,
                        config,
                        generation,
                        graph,
                    }),
                    live_generation: self.live_generation.clone(),
                };
                state.current = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                warn!("⚠️ {} model {} failed to load: {}", self.role, config.variant, e);
                state.failure = Some((config, e.to_string()));
                Err(e)
            }
        }
    }
}

/// Owner of the detection and recognition models
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    detection: Arc<RoleSlot>,
    recognition: Arc<RoleSlot>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            detection: Arc::new(RoleSlot::new(ModelRole::Detection)),
            recognition: Arc::new(RoleSlot::new(ModelRole::Recognition)),
        }
    }

    fn slot(&self, role: ModelRole) -> &Arc<RoleSlot> {
        match role {
            ModelRole::Detection => &self.detection,
            ModelRole::Recognition => &self.recognition,
        }
    }

    /// Return a ready model for `role` built from `config`
    ///
    /// # Behavior
    /// - Matching current model: returned as is, no side effects
    /// - Matching pending load: awaits the same load
    /// - Otherwise: releases the previous model, marks old handles stale
    ///   and starts a new load
    ///
    /// # Errors
    /// - `ModelLoad` if the graph cannot be fetched or parsed
    /// - `StaleModel` if a newer config was requested while this load ran
    pub async fn ensure_loaded(
        &self,
        role: ModelRole,
        config: &ModelConfig,
    ) -> Result<ModelHandle, VisionError> {
        let slot = self.slot(role);

        let future = {
            let mut state = slot.lock();

            if let Some(current) = &state.current {
                if current.config() == config {
                    return Ok(current.clone());
                }
            }

            match &state.pending {
                Some(pending) if pending.config == *config => {
                    debug!("Joining pending {} load of {}", role, config.variant);
                    pending.future.clone()
                }
                _ => self.start_load(slot, &mut state, config),
            }
        };

        future.await
    }

    fn start_load(
        &self,
        slot: &Arc<RoleSlot>,
        state: &mut SlotState,
        config: &ModelConfig,
    ) -> LoadFuture {
        let generation = slot.next_generation.fetch_add(1, Ordering::SeqCst);
        slot.live_generation.store(generation, Ordering::SeqCst);

        if let Some(previous) = state.current.take() {
            info!(
                "Releasing {} model {} in favour of {}",
                slot.role,
                previous.config().variant,
                config.variant
            );
        }
        state.failure = None;

        info!(
            "Loading {} model {} (generation {})",
            slot.role, config.variant, generation
        );

        let loader = self.loader.clone();
        let task_slot = slot.clone();
        let task_config = config.clone();
        let role = slot.role;

        let future = async move {
            let result = loader.load(role, &task_config).await;
            task_slot.finish(generation, task_config, result)
        }
        .boxed()
        .shared();

        state.pending = Some(PendingLoad {
            config: config.clone(),
            future: future.clone(),
        });

        future
    }

    /// Current model for `role`, if one is loaded
    pub fn current(&self, role: ModelRole) -> Option<ModelHandle> {
        self.slot(role).lock().current.clone()
    }

    /// Whether `handle` is still the live model for its role
    pub fn is_current(&self, handle: &ModelHandle) -> bool {
        !handle.is_stale()
    }

    pub fn status(&self, role: ModelRole) -> RoleStatus {
        let state = self.slot(role).lock();

        if let Some(pending) = &state.pending {
            RoleStatus::Loading(pending.config.clone())
        } else if let Some(current) = &state.current {
            RoleStatus::Ready(current.config().clone())
        } else if let Some((config, reason)) = &state.failure {
            RoleStatus::Failed(config.clone(), reason.clone())
        } else {
            RoleStatus::Unloaded
        }
    }
}
