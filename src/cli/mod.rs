// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Command line front end: extract the words of one document image

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::vision::{
    decode_data_url, decode_image_bytes, DetectionVariant, ExtractionObserver, InMemoryLayer,
    ModelRole, OnnxModelLoader, RecognitionVariant, VisionConfig, VisionSession, Word,
};

/// Fabstir Doc Vision CLI
#[derive(Parser, Debug)]
#[command(name = "fabstir-doc-vision")]
#[command(version)]
#[command(about = "Detect and read the words of a document image", long_about = None)]
pub struct Cli {
    /// Image file (PNG, JPEG, WebP, GIF) or a text file holding a data URL
    pub image: PathBuf,

    /// TOML configuration file (defaults come from VISION_* variables)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the ONNX models
    #[arg(long, env = "VISION_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    /// Detection model (db_mobilenet_v2, db_resnet50)
    #[arg(long)]
    pub det: Option<DetectionVariant>,

    /// Recognition model (crnn_vgg16_bn, crnn_mobilenet_v2, master, sar_resnet31)
    #[arg(long)]
    pub reco: Option<RecognitionVariant>,

    /// Heatmap binarization threshold (0.0-1.0)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Treat the input file as a data URL
    #[arg(long)]
    pub data_url: bool,

    /// Save the detection heatmap as a grayscale PNG
    #[arg(long)]
    pub heatmap_out: Option<PathBuf>,

    /// Print the words as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the pipeline configuration: file or environment, then flags
    pub fn resolve_config(&self) -> Result<VisionConfig> {
        let mut config = match &self.config {
            Some(path) => VisionConfig::from_toml_file(path)?,
            None => VisionConfig::from_env(),
        };

        if let Some(dir) = &self.models_dir {
            config.models_dir = dir.clone();
        }
        if let Some(det) = self.det {
            config.detection = det;
        }
        if let Some(reco) = self.reco {
            config.recognition = reco;
        }
        if let Some(threshold) = self.threshold {
            config.bin_threshold = threshold;
        }

        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

/// Logs session events
struct LoggingObserver;

impl ExtractionObserver for LoggingObserver {
    fn on_extraction_state_changed(&self, is_extracting: bool) {
        info!("Extracting words: {}", is_extracting);
    }

    fn on_model_unavailable(&self, role: ModelRole, reason: &str) {
        warn!("❌ {} model unavailable: {}", role, reason);
    }
}

fn format_word(index: usize, word: &Word) -> String {
    let [x0, y0] = word.points[0];
    let [x1, y1] = word.points[2];
    format!(
        "{:>3}  {:<24} {:.2}  [{:.0}, {:.0}, {:.0}, {:.0}]",
        index, word.value, word.confidence, x0, y0, x1, y1
    )
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.resolve_config()?;

    let image = if cli.data_url {
        let text = tokio::fs::read_to_string(&cli.image)
            .await
            .with_context(|| format!("Failed to read {}", cli.image.display()))?;
        decode_data_url(text.trim())?
    } else {
        let bytes = tokio::fs::read(&cli.image)
            .await
            .with_context(|| format!("Failed to read {}", cli.image.display()))?;
        decode_image_bytes(&bytes)?
    };

    let loader = Arc::new(OnnxModelLoader::new(&config.models_dir, config.intra_threads));
    let session = VisionSession::new(loader, &config, InMemoryLayer::new())?
        .with_observer(Arc::new(LoggingObserver));

    let outcome = session.process_image(&image).await?;

    if let Some(path) = &cli.heatmap_out {
        let heatmap = session
            .last_heatmap()
            .context("No heatmap was produced")?;
        heatmap
            .to_image()
            .save(path)
            .with_context(|| format!("Failed to save heatmap to {}", path.display()))?;
        info!("Heatmap saved to {}", path.display());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(outcome.words())?);
    } else {
        println!("📄 {} words", outcome.words().len());
        for (index, word) in outcome.words().iter().enumerate() {
            println!("{}", format_word(index, word));
        }
    }

    Ok(())
}
