// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inference graphs and how they are loaded
//!
//! `InferenceGraph` is a frozen, ready-to-run model taking one NCHW batch.
//! `ModelLoader` turns a `ModelConfig` into a graph. The production
//! loader reads ONNX files with ONNX Runtime on CPU; tests plug in fakes.

use async_trait::async_trait;
use ndarray::{Array4, ArrayD};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::catalog::{ModelConfig, ModelRole};
use super::errors::VisionError;

/// A ready-to-run inference graph
pub trait InferenceGraph: Send + Sync {
    /// Run one forward pass over an NCHW `f32` batch
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, VisionError>;
}

/// Loads the graph described by a `ModelConfig`
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        role: ModelRole,
        config: &ModelConfig,
    ) -> Result<Arc<dyn InferenceGraph>, VisionError>;
}

/// ONNX Runtime backed graph (CPU-only)
pub struct OnnxGraph {
    /// ONNX Runtime session (thread-safe)
    session: Mutex<Session>,
    /// Model input name
    input_name: String,
}

impl std::fmt::Debug for OnnxGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxGraph")
            .field("input_name", &self.input_name)
            .finish_non_exhaustive()
    }
}

impl OnnxGraph {
    /// Build a session from an ONNX file
    pub fn from_file(model_path: &Path, intra_threads: usize) -> Result<Self, String> {
        let session = Session::builder()
            .map_err(|e| format!("Failed to create session builder: {}", e))?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| format!("Failed to set CPU execution provider: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| format!("Failed to set optimization level: {}", e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| format!("Failed to set intra threads: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| format!("Failed to parse {}: {}", model_path.display(), e))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "input".to_string());

        if let Some(input) = session.inputs.first() {
            debug!("Model expected input: {:?}", input.input_type);
        }

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl InferenceGraph for OnnxGraph {
    fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, VisionError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::Inference("session lock poisoned".to_string()))?;

        let input_value = Value::from_array(input)
            .map_err(|e| VisionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| VisionError::Inference(format!("Failed to extract output tensor: {}", e)))?;

        Ok(output.to_owned())
    }
}

/// Loads ONNX graphs from a models directory, downloading remote artifacts once
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    models_dir: PathBuf,
    intra_threads: usize,
}

impl OnnxModelLoader {
    pub fn new(models_dir: impl Into<PathBuf>, intra_threads: usize) -> Self {
        Self {
            models_dir: models_dir.into(),
            intra_threads: intra_threads.max(1),
        }
    }

    /// Local path of a model artifact
    pub fn artifact_path(&self, config: &ModelConfig) -> PathBuf {
        if config.is_remote() {
            let file_name = reqwest::Url::parse(&config.artifact)
                .ok()
                .and_then(|url| {
                    url.path_segments()
                        .and_then(|mut segments| segments.next_back())
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("{}.onnx", config.variant));
            self.models_dir.join(file_name)
        } else {
            self.models_dir.join(&config.artifact)
        }
    }

    async fn ensure_artifact(&self, config: &ModelConfig, path: &Path) -> Result<(), String> {
        if path.exists() || !config.is_remote() {
            return Ok(());
        }

        info!("Downloading model {} from {}", config.variant, config.artifact);
        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .map_err(|e| format!("Failed to create models directory: {}", e))?;

        // Leftover from an interrupted download
        let part = partial_path(path);
        if part.exists() {
            debug!("Removing stale partial download {}", part.display());
            tokio::fs::remove_file(&part)
                .await
                .map_err(|e| format!("Failed to remove partial download: {}", e))?;
        }

        let size = match download_to(&config.artifact, &part).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    debug!("No partial download to remove: {}", cleanup);
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&part, path)
            .await
            .map_err(|e| format!("Failed to move model into place: {}", e))?;

        info!("Model {} downloaded ({} bytes)", config.variant, size);
        Ok(())
    }
}

/// Sibling path a download is written to before it is moved into place
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn download_to(url: &str, dest: &Path) -> Result<usize, String> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| format!("Failed to download model: {}", e))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("Failed to read model bytes: {}", e))?;
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| format!("Failed to write model file: {}", e))?;
    Ok(bytes.len())
}

#[async_trait]
impl ModelLoader for OnnxModelLoader {
    async fn load(
        &self,
        role: ModelRole,
        config: &ModelConfig,
    ) -> Result<Arc<dyn InferenceGraph>, VisionError> {
        let load_error = |reason: String| VisionError::ModelLoad {
            role,
            variant: config.variant.clone(),
            reason,
        };

        let path = self.artifact_path(config);
        self.ensure_artifact(config, &path).await.map_err(load_error)?;

        if !path.exists() {
            return Err(load_error(format!("model not found: {}", path.display())));
        }

        info!("Loading {} model {} from {}", role, config.variant, path.display());

        let intra_threads = self.intra_threads;
        let graph = tokio::task::spawn_blocking(move || OnnxGraph::from_file(&path, intra_threads))
            .await
            .map_err(|e| load_error(format!("load task failed: {}", e)))?
            .map_err(load_error)?;

        info!("✅ {} model {} loaded (CPU-only)", role, config.variant);
        Ok(Arc::new(graph))
    }
}
