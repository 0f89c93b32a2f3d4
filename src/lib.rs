// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! MathLens: photograph a math problem, get a worked solution
//!
//! Captured photos are sent to a hosted vision model for OCR and solving.
//! Answers get light math formatting and can be followed up with doubts.

pub mod config;
pub mod error;
pub mod format;
pub mod gemini;
pub mod imaging;
pub mod session;
pub mod tutor;
pub mod web;

pub use config::AppConfig;
pub use error::{MathLensError, Result};
