//! HTTP client for a `generateContent`-style AI service
//!
//! Sends one prompt (plus optional inline media) and validates the returned
//! JSON array. Nothing escapes: transport failures, error statuses and
//! malformed bodies are logged and become an empty item list, which callers
//! read as "no progress from this call". There is no retry here.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::prompt::{GenerationPrompt, PromptSource};
use super::validate::{parse_response, MalformedResponse};
use super::QuestionGenerator;
use crate::config::GenerationConfig;
use crate::metrics;
use crate::models::GeneratedItem;

/// Failures inside one generation call; logged, never returned
#[derive(Error, Debug)]
enum GenerationError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response carried no candidate text")]
    MissingText,

    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: String },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// Generation client for the configured endpoint and model
pub struct GeminiClient {
    client: Client,
    config: GenerationConfig,
}

impl GeminiClient {
    pub fn new(config: GenerationConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_body<'a>(prompt: &GenerationPrompt<'a>) -> GenerateRequest<'a> {
        let mut parts = vec![RequestPart::Text {
            text: prompt.render(),
        }];

        if let PromptSource::Media(media) = prompt.source {
            parts.push(RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: &media.media_type,
                    data: BASE64.encode(&media.bytes),
                },
            });
        }

        GenerateRequest {
            contents: vec![RequestContent { parts }],
        }
    }

    async fn call(&self, prompt: &GenerationPrompt<'_>) -> Result<Vec<GeneratedItem>, GenerationError> {
        let api_key = prompt
            .api_key
            .or(self.config.api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
            .ok_or(GenerationError::MissingApiKey)?;

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key.trim())
            .json(&Self::build_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: crate::utils::truncate_chars(&body, 200).to_string(),
            });
        }

        let payload: GenerateResponse = response.json().await?;
        let text = payload.first_text().ok_or(GenerationError::MissingText)?;
        let report = parse_response(&text, self.config.max_explanation_chars)?;

        for rejected in &report.rejected {
            tracing::debug!(index = rejected.index, reason = %rejected.reason, "Generated item rejected");
        }
        if !report.rejected.is_empty() {
            tracing::info!(
                kept = report.items.len(),
                rejected = report.rejected.len(),
                "Dropped malformed generated items"
            );
            metrics::record_items_rejected(report.rejected.len());
        }

        Ok(report.items)
    }
}

#[async_trait]
impl QuestionGenerator for GeminiClient {
    async fn generate(&self, prompt: &GenerationPrompt<'_>) -> Vec<GeneratedItem> {
        match self.call(prompt).await {
            Ok(items) => {
                metrics::record_items_generated(items.len());
                items
            }
            Err(e) => {
                tracing::warn!(error = %e, requested = prompt.count, "Generation call produced nothing");
                Vec::new()
            }
        }
    }
}
