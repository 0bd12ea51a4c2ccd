// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for the detection and recognition graphs

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{s, Array4};

use crate::vision::catalog::InputSize;

/// Per-channel normalization: `(pixel / 255 - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// Detection normalization (DB models)
pub const DETECTION_NORMALIZATION: Normalization = Normalization {
    mean: [0.798, 0.785, 0.772],
    std: [0.264, 0.2749, 0.287],
};

/// Recognition normalization (CRNN / MASTER / SAR models)
pub const RECOGNITION_NORMALIZATION: Normalization = Normalization {
    mean: [0.694, 0.695, 0.693],
    std: [0.299, 0.296, 0.301],
};

/// Resize `image` to exactly `size` with nearest neighbour sampling
pub fn resize_to(image: &RgbImage, size: InputSize) -> RgbImage {
    if image.dimensions() == (size.width, size.height) {
        return image.clone();
    }
    image::imageops::resize(image, size.width, size.height, FilterType::Nearest)
}

/// Preprocess one image into a `[1, 3, H, W]` tensor
pub fn to_tensor(image: &RgbImage, size: InputSize, norm: &Normalization) -> Array4<f32> {
    batch_to_tensor(std::slice::from_ref(image), size, norm)
}

/// Preprocess a batch of crops into a `[N, 3, H, W]` tensor
///
/// Steps per crop:
/// 1. Resize exactly to `size` (no aspect preservation)
/// 2. Normalize each channel with `norm`
/// 3. Write into NCHW layout
pub fn batch_to_tensor(images: &[RgbImage], size: InputSize, norm: &Normalization) -> Array4<f32> {
    let (h, w) = (size.height as usize, size.width as usize);
    let mut tensor = Array4::zeros((images.len(), 3, h, w));

    for (n, image) in images.iter().enumerate() {
        let resized = resize_to(image, size);
        let mut slot = tensor.slice_mut(s![n, .., .., ..]);

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                slot[[c, y as usize, x as usize]] =
                    (pixel[c] as f32 / 255.0 - norm.mean[c]) / norm.std[c];
            }
        }
    }

    tensor
}
