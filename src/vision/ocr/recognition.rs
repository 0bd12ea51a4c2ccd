// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Word recognition over detected boxes
//!
//! Each box is cropped from the source image, the crops are batched
//! through the recognition graph and every output sequence is decoded
//! with CTC best path against a `Charset`.

use image::RgbImage;
use ndarray::{ArrayView2, Axis, Ix3};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::model::{BoundingBox, Word};
use super::preprocessing::{batch_to_tensor, Normalization, RECOGNITION_NORMALIZATION};
use crate::vision::catalog::InputSize;
use crate::vision::errors::VisionError;
use crate::vision::model_registry::ModelHandle;

/// Default number of crops per forward pass
pub const DEFAULT_BATCH_SIZE: usize = 32;

const FRENCH_VOCAB: &str = concat!(
    "0123456789",
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~",
    "°£€¥¢฿",
    "àâéèêëîïôùûüçÀÂÉÈÊËÎÏÔÙÛÜÇ",
);

/// Symbols a recognition model can emit; the CTC blank follows the last one
#[derive(Debug, Clone, PartialEq)]
pub struct Charset {
    symbols: Vec<char>,
}

impl Default for Charset {
    fn default() -> Self {
        Self::french()
    }
}

impl Charset {
    pub fn new(symbols: Vec<char>) -> Self {
        Self { symbols }
    }

    /// The 126-symbol French vocabulary the stock models are trained on
    pub fn french() -> Self {
        Self::new(FRENCH_VOCAB.chars().collect())
    }

    /// Load a charset with one symbol per line
    ///
    /// Empty lines are skipped; only the first character of a line counts.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            VisionError::Config(format!("Failed to open charset {}: {}", path.display(), e))
        })?;

        let mut symbols = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line
                .map_err(|e| VisionError::Config(format!("Failed to read charset line: {}", e)))?;
            if let Some(ch) = line.chars().next() {
                symbols.push(ch);
            }
        }

        if symbols.is_empty() {
            return Err(VisionError::Config(format!(
                "Charset {} is empty",
                path.display()
            )));
        }

        debug!("Loaded charset with {} symbols from {}", symbols.len(), path.display());
        Ok(Self::new(symbols))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn blank_index(&self) -> usize {
        self.symbols.len()
    }

    /// Position of `symbol` in the charset
    pub fn index_of(&self, symbol: char) -> Option<usize> {
        self.symbols.iter().position(|&c| c == symbol)
    }

    /// Classes the model output must have (symbols + blank)
    pub fn num_classes(&self) -> usize {
        self.symbols.len() + 1
    }

    /// CTC best path decoding of one `[timesteps, classes]` sequence
    ///
    /// Takes the argmax per step, collapses repeats and drops blanks.
    /// Returns the text and the mean of the per-step max probabilities.
    pub fn decode_best_path(&self, sequence: ArrayView2<f32>) -> Result<(String, f32), String> {
        if sequence.ncols() != self.num_classes() {
            return Err(format!(
                "sequence has {} classes, charset expects {}",
                sequence.ncols(),
                self.num_classes()
            ));
        }
        if sequence.iter().any(|v| !v.is_finite()) {
            return Err("sequence contains non-finite scores".to_string());
        }

        let mut text = String::new();
        let mut total_confidence = 0.0f32;
        let mut prev_index: Option<usize> = None;

        for row in sequence.rows() {
            let probs = as_probabilities(row.to_vec());

            let (max_index, max_prob) = probs
                .iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &p)| {
                    if p > best.1 {
                        (i, p)
                    } else {
                        best
                    }
                });

            total_confidence += max_prob;

            if max_index != self.blank_index() && Some(max_index) != prev_index {
                text.push(self.symbols[max_index]);
            }
            prev_index = Some(max_index);
        }

        let confidence = if sequence.nrows() == 0 {
            0.0
        } else {
            (total_confidence / sequence.nrows() as f32).clamp(0.0, 1.0)
        };

        Ok((text, confidence))
    }
}

/// Softmax the row unless it already is a probability distribution
fn as_probabilities(row: Vec<f32>) -> Vec<f32> {
    let sum: f32 = row.iter().sum();
    if row.iter().all(|&v| v >= 0.0) && (sum - 1.0).abs() < 1e-3 {
        return row;
    }

    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / total).collect()
}

/// Crop the box's bounding rect, clamped to the image; `None` if nothing is left
pub fn crop_box(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (min_x, min_y, max_x, max_y) = bbox.bounds();
    if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
        return None;
    }

    let (width, height) = image.dimensions();
    let x0 = min_x.floor().clamp(0.0, width as f32) as u32;
    let y0 = min_y.floor().clamp(0.0, height as f32) as u32;
    let x1 = max_x.ceil().clamp(0.0, width as f32) as u32;
    let y1 = max_y.ceil().clamp(0.0, height as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Reads the text of every box with the recognition graph
#[derive(Debug, Clone)]
pub struct WordRecognizer {
    charset: Arc<Charset>,
    batch_size: usize,
    normalization: Normalization,
}

impl Default for WordRecognizer {
    fn default() -> Self {
        Self::new(Arc::new(Charset::french()), DEFAULT_BATCH_SIZE)
    }
}

impl WordRecognizer {
    pub fn new(charset: Arc<Charset>, batch_size: usize) -> Self {
        Self {
            charset,
            batch_size: batch_size.max(1),
            normalization: RECOGNITION_NORMALIZATION,
        }
    }

    pub fn charset(&self) -> &Charset {
        &self.charset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Recognize one word per box, in box order
    ///
    /// Boxes whose crop is degenerate, or whose output sequence cannot
    /// be decoded, yield an empty word instead of failing the batch.
    ///
    /// # Errors
    /// - `StaleModel` if `model` is superseded before or between batches
    /// - `Inference` if a forward pass fails or returns the wrong shape
    pub async fn recognize_all(
        &self,
        image: Arc<RgbImage>,
        boxes: &[BoundingBox],
        model: &ModelHandle,
        target_size: InputSize,
    ) -> Result<Vec<Word>, VisionError> {
        model.ensure_current()?;

        let mut words: Vec<Option<Word>> = vec![None; boxes.len()];
        let mut pending = Vec::with_capacity(boxes.len());

        for (index, bbox) in boxes.iter().enumerate() {
            match crop_box(&image, bbox) {
                Some(crop) => pending.push((index, crop)),
                None => {
                    warn!("Box {} has a degenerate crop, leaving it unread", bbox.id);
                    words[index] = Some(Word::unreadable(bbox));
                }
            }
        }

        for chunk in pending.chunks(self.batch_size) {
            model.ensure_current()?;

            let indices: Vec<usize> = chunk.iter().map(|(i, _)| *i).collect();
            let crops: Vec<RgbImage> = chunk.iter().map(|(_, crop)| crop.clone()).collect();
            let graph = model.graph();
            let normalization = self.normalization;

            let output = tokio::task::spawn_blocking(move || {
                let input = batch_to_tensor(&crops, target_size, &normalization);
                graph.run(input)
            })
            .await
            .map_err(|e| VisionError::Inference(format!("recognition task failed: {}", e)))??;

            let output = output.into_dimensionality::<Ix3>().map_err(|e| {
                VisionError::Inference(format!("Unexpected recognition output: {}", e))
            })?;
            if output.len_of(Axis(0)) != indices.len() {
                return Err(VisionError::Inference(format!(
                    "Recognition returned {} sequences for {} crops",
                    output.len_of(Axis(0)),
                    indices.len()
                )));
            }

            for (sequence, &index) in output.axis_iter(Axis(0)).zip(&indices) {
                let bbox = &boxes[index];
                let word = match self.charset.decode_best_path(sequence) {
                    Ok((text, confidence)) => Word::from_box(bbox, text, confidence),
                    Err(reason) => {
                        let failure = VisionError::Recognition {
                            box_id: bbox.id.clone(),
                            reason,
                        };
                        warn!("{}", failure);
                        Word::unreadable(bbox)
                    }
                };
                words[index] = Some(word);
            }
        }

        model.ensure_current()?;

        let words: Vec<Word> = words
            .into_iter()
            .zip(boxes)
            .map(|(word, bbox)| word.unwrap_or_else(|| Word::unreadable(bbox)))
            .collect();

        info!(
            "Recognized {} words ({} empty) with {}",
            words.len(),
            words.iter().filter(|w| w.value.is_empty()).count(),
            model.config().variant
        );

        Ok(words)
    }
}
