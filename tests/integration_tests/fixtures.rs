//! Test fixtures for integration tests
//!
//! Provides sample study material, canned AI responses and a harness that
//! wires the orchestrator to a mock generation service.

use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quizline::config::{Config, GenerationConfig, QuotaConfig};
use quizline::content::ContentNormalizer;
use quizline::delivery::{DeliveryEngine, MessageSender};
use quizline::generation::GeminiClient;
use quizline::pipeline::QuizOrchestrator;
use quizline::quota::QuotaGate;
use quizline::storage::SqliteStore;

use crate::common::RecordingSender;

pub const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

/// Sample study note
pub const SAMPLE_NOTE: &str = "Photosynthesis converts light energy into chemical energy. \
It takes place in the chloroplasts of plant cells. Chlorophyll absorbs mostly blue and red \
light. The light-dependent reactions produce ATP and NADPH, which the Calvin cycle uses to \
fix carbon dioxide into sugar.";

/// `n` well-formed items as the AI service would return them
pub fn items_json(n: usize) -> String {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "question": format!("Where does step {i} happen?"),
                "choices": ["Chloroplast", "Mitochondrion", "Nucleus"],
                "answer_index": 0,
                "explanation": "Photosynthesis happens in chloroplasts."
            })
        })
        .collect();
    Value::Array(items).to_string()
}

/// generateContent response carrying `text`
pub fn candidate(text: &str) -> Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

/// Mount a generation mock answering every call with `n` items
pub async fn mount_items(server: &MockServer, n: usize) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&items_json(n))))
        .mount(server)
        .await;
}

pub fn generation_config(server: &MockServer) -> GenerationConfig {
    GenerationConfig {
        endpoint: server.uri(),
        api_key: Some("service-key".to_string()),
        timeout_secs: 5,
        ..Config::default().generation
    }
}

/// Quota without cooldown so consecutive submissions reach the daily cap
pub fn quota_without_cooldown() -> QuotaConfig {
    QuotaConfig {
        cooldown_secs: 0,
        ..Config::default().quota
    }
}

/// Orchestrator over an in-memory store, a mock AI service and a recording sender
pub struct Harness {
    pub orchestrator: QuizOrchestrator,
    pub store: Arc<SqliteStore>,
    pub sender: Arc<RecordingSender>,
}

impl Harness {
    pub fn new(server: &MockServer, quota: QuotaConfig) -> Self {
        Self::with_parts(
            generation_config(server),
            quota,
            ContentNormalizer::default(),
            Arc::new(RecordingSender::default()),
        )
    }

    pub fn with_parts(
        generation: GenerationConfig,
        quota: QuotaConfig,
        normalizer: ContentNormalizer,
        sender: Arc<RecordingSender>,
    ) -> Self {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let max_chunk_chars = generation.max_chunk_chars;
        let generator = Arc::new(GeminiClient::new(generation).unwrap());
        let delivery = DeliveryEngine::new(
            sender.clone() as Arc<dyn MessageSender>,
            store.clone(),
            store.clone(),
        );
        let orchestrator = QuizOrchestrator::new(
            normalizer,
            QuotaGate::new(store.clone(), quota),
            generator,
            delivery,
            store.clone(),
            max_chunk_chars,
        )
        .with_pacing(0, 0, 0);

        Self {
            orchestrator,
            store,
            sender,
        }
    }
}
