// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for MathLens

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// AI engine configuration
    pub ai_engine: EngineConfig,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Image preparation settings
    #[serde(default)]
    pub image: ImageConfig,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Base URL of the generative language API (without `/models/...`)
    #[serde(default = "default_engine_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_solve_prompt")]
    pub solve: String,
    #[serde(default = "default_clarify_prompt")]
    pub clarify: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImageConfig {
    /// Longest side sent to the model, in pixels
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

// Default value functions
fn default_engine_url() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_model() -> String { "gemini-1.5-flash".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 2 }
fn default_max_dimension() -> u32 { 1600 }
fn default_jpeg_quality() -> u8 { 85 }
fn default_max_upload_bytes() -> usize { 10 * 1024 * 1024 }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }

fn default_solve_prompt() -> String {
    "Read the math problem in this image. First write out the problem exactly as \
     it appears, then solve it step by step and finish with the final answer. \
     Write exponents as ^n and subscripts as _n. Use markdown.".to_string()
}

fn default_clarify_prompt() -> String {
    "You previously solved the math problem in this image. The student has a doubt \
     about your solution. Answer the doubt clearly and briefly, referring to the \
     relevant step. Write exponents as ^n and subscripts as _n. Use markdown.".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_engine: EngineConfig::default(),
            prompts: PromptConfig::default(),
            image: ImageConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            solve: default_solve_prompt(),
            clarify: default_clarify_prompt(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::MathLensError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read the API key from the environment, loading `.env` first if present
    pub fn api_key(&self) -> crate::Result<String> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        self.api_key_from(|name| std::env::var(name).ok())
    }

    fn api_key_from<F>(&self, lookup: F) -> crate::Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = &self.ai_engine.api_key_env;
        match lookup(name) {
            Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(crate::MathLensError::Config(format!(
                "API key not set. Export {} or add it to .env",
                name
            ))),
        }
    }
}
