// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gemini API client for hosted vision inference

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::{MathLensError, Result};

/// A model that answers a text prompt about a single image
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model identifier, for logs
    fn name(&self) -> &str;

    /// Send the prompt together with the image and return the model's text
    async fn ask(&self, prompt: &str, image: &[u8], mime_type: &str) -> Result<String>;
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    retries: u32,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: &EngineConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Normalize URL
        let base_url = config.url.trim_end_matches('/').to_string();
        let model = config.model.trim_start_matches("models/").to_string();

        Ok(Self {
            client,
            base_url,
            model,
            api_key: api_key.into(),
            retries: config.retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Override the base backoff delay between retries
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Model in use
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the API is reachable with the configured key
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);

        let response = self.client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        check_status(response).await.map(|_| ())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);

        let response = self.client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        let models: ModelsResponse = check_status(response).await?.json().await?;
        Ok(models.models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    /// Check if the configured model is offered
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == &self.model))
    }

    /// Generate text from a prompt and an inline image
    pub async fn generate_with_image(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = build_request(prompt, image, mime_type);

        debug!("Sending vision request to Gemini: model={} image_bytes={}", self.model, image.len());

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let result: GenerateResponse = check_status(response).await?.json().await?;
        extract_text(result)
    }

    /// Generate with retry logic
    pub async fn generate_with_retry(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String> {
        let mut attempt = 0;

        loop {
            match self.generate_with_image(prompt, image, mime_type).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let delay = self.retry_delay * 2u32.pow(attempt);
                    attempt += 1;
                    warn!("Gemini request failed ({}), retrying in {:?} (attempt {})", e, delay, attempt + 1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn ask(&self, prompt: &str, image: &[u8], mime_type: &str) -> Result<String> {
        self.generate_with_retry(prompt, image, mime_type).await
    }
}

fn build_request<'a>(prompt: &'a str, image: &[u8], mime_type: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![
                Part::Text { text: prompt },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type,
                        data: general_purpose::STANDARD.encode(image),
                    },
                },
            ],
        }],
    }
}

/// Join the text parts of the first candidate
fn extract_text(response: GenerateResponse) -> Result<String> {
    let text: String = response.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(MathLensError::EmptyResponse);
    }
    Ok(text)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(MathLensError::Api { status: status.as_u16(), message })
}
