//! Question generation
//!
//! ```text
//!   GenerationRequest
//!        │
//!        ├── text ──▶ chunk() ──▶ distribute() ──▶ one call per chunk
//!        ├── title ─────────────────────────────▶ one call
//!        └── media ─────────────────────────────▶ one call (inline data)
//!                                                      │
//!                                         QuestionGenerator::generate
//!                                                      │
//!                                             Vec<GeneratedItem>
//! ```
//!
//! Zero items across every call is the only failure this module reports
//! ([`Error::GenerationEmpty`]); anything less than requested is kept.

pub mod chunker;
pub mod client;
pub mod prompt;
pub mod validate;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{GeneratedItem, GenerationRequest};

pub use chunker::{chunk, distribute, per_chunk_target, Distribution};
pub use client::GeminiClient;
pub use prompt::{GenerationPrompt, PromptSource};
pub use validate::{RejectReason, RejectedItem, ValidationReport};

/// The external AI call; implementations never fail, they return no items
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, prompt: &GenerationPrompt<'_>) -> Vec<GeneratedItem>;
}

/// Items produced for one request
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub items: Vec<GeneratedItem>,
    pub requested: usize,
    pub chunks: usize,
    pub calls: usize,
}

impl GenerationOutcome {
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.items.len())
    }
}

/// Run generation for a whole request
///
/// `api_key` overrides the service key for this request only.
pub async fn generate_for_request(
    generator: &dyn QuestionGenerator,
    request: &GenerationRequest,
    max_chunk_chars: usize,
    api_key: Option<&str>,
) -> Result<GenerationOutcome> {
    let requested = request.desired_count.max(1) as usize;

    let outcome = if let Some(media) = &request.media {
        let prompt = GenerationPrompt::new(PromptSource::Media(media), requested, request.difficulty)
            .allow_beyond(true)
            .with_api_key(api_key);
        single_call(generator, &prompt, requested).await
    } else if let Some(text) = request.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let chunks = chunk(text, max_chunk_chars);
        let difficulty = request.difficulty;
        let allow_beyond = request.allow_beyond_source;
        let distribution = distribute(&chunks, requested, |piece, per_chunk| {
            let text = piece.text.clone();
            async move {
                let prompt = GenerationPrompt::new(PromptSource::Text(&text), per_chunk, difficulty)
                    .allow_beyond(allow_beyond)
                    .with_api_key(api_key);
                generator.generate(&prompt).await
            }
        })
        .await;

        GenerationOutcome {
            items: distribution.items,
            requested,
            chunks: chunks.len(),
            calls: distribution.calls,
        }
    } else if let Some(title) = request.title.as_deref().filter(|t| !t.trim().is_empty()) {
        let prompt = GenerationPrompt::new(PromptSource::Title(title.trim()), requested, request.difficulty)
            .allow_beyond(true)
            .with_api_key(api_key);
        single_call(generator, &prompt, requested).await
    } else {
        return Err(Error::validation("Nothing to generate questions from."));
    };

    if outcome.items.is_empty() {
        return Err(Error::GenerationEmpty {
            chunks: outcome.chunks,
        });
    }

    if outcome.shortfall() > 0 {
        tracing::info!(
            requested = outcome.requested,
            delivered = outcome.items.len(),
            chunks = outcome.chunks,
            "Generation under-delivered"
        );
    }

    Ok(outcome)
}

async fn single_call(
    generator: &dyn QuestionGenerator,
    prompt: &GenerationPrompt<'_>,
    requested: usize,
) -> GenerationOutcome {
    let mut items = generator.generate(prompt).await;
    items.truncate(requested);
    GenerationOutcome {
        items,
        requested,
        chunks: 1,
        calls: 1,
    }
}
