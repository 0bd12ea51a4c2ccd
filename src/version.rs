// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for Fabstir Doc Vision

/// Full version string with feature description
pub const VERSION: &str = "v0.1.0-doc-vision-2025-11-02";

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Build date
pub const BUILD_DATE: &str = "2025-11-02";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "db-text-detection",
    "ctc-word-recognition",
    "model-hot-swap",
    "stale-run-discard",
    "annotation-sync",
    "heatmap-export",
    "data-url-input",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("Fabstir Doc Vision {} ({})", VERSION_NUMBER, BUILD_DATE)
}

/// Get full version info as JSON
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "build": VERSION,
        "date": BUILD_DATE,
        "features": FEATURES,
    })
}
