// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for MathLens

use thiserror::Error;

/// Result type alias for MathLens operations
pub type Result<T> = std::result::Result<T, MathLensError>;

/// MathLens error types
#[derive(Error, Debug)]
pub enum MathLensError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No image has been captured for this session")]
    NoImage,

    #[error("Problem has not been solved yet")]
    NoSolution,

    #[error("Session changed while waiting for the model")]
    SessionChanged,

    #[error("Upload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Unsupported rotation: {0} degrees (use a multiple of 90)")]
    UnsupportedRotation(i32),
}

impl MathLensError {
    /// Whether a failed model call is worth repeating
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
