//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use quizline::delivery::{DeliveryEngine, DeliveryResult, MessageSender, PollMessage};
use quizline::generation::{GenerationPrompt, QuestionGenerator};
use quizline::models::{Destination, GeneratedItem};
use quizline::scheduler::JobExecutor;
use quizline::storage::SqliteStore;

/// Create a valid item with three choices
pub fn create_test_item(i: usize) -> GeneratedItem {
    GeneratedItem {
        question: format!("Question {i}?"),
        choices: vec!["Alpha".into(), "Beta".into(), "Gamma".into()],
        answer_index: i % 3,
        explanation: format!("Explanation {i}"),
    }
}

/// Generator answering every call with up to `per_call` items
pub struct CountingGenerator {
    pub per_call: usize,
    pub calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new(per_call: usize) -> Self {
        Self {
            per_call,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerator for CountingGenerator {
    async fn generate(&self, prompt: &GenerationPrompt<'_>) -> Vec<GeneratedItem> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (0..self.per_call.min(prompt.count)).map(create_test_item).collect()
    }
}

/// Sender that records every message with its chat id
#[derive(Default)]
pub struct RecordingSender {
    pub messages: Mutex<Vec<(i64, String)>>,
}

impl RecordingSender {
    pub fn count_to(&self, chat_id: i64) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .count()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, destination: &Destination, html: &str) -> DeliveryResult<()> {
        self.messages
            .lock()
            .unwrap()
            .push((destination.chat_id, html.to_string()));
        Ok(())
    }

    async fn send_poll(&self, destination: &Destination, poll: &PollMessage) -> DeliveryResult<()> {
        self.messages
            .lock()
            .unwrap()
            .push((destination.chat_id, poll.question.clone()));
        Ok(())
    }
}

/// Executor with zero pacing over the given store
pub fn create_executor(
    store: Arc<SqliteStore>,
    generator: Arc<dyn QuestionGenerator>,
    sender: Arc<dyn MessageSender>,
) -> JobExecutor {
    let delivery = DeliveryEngine::new(sender, store.clone(), store.clone());
    JobExecutor::new(generator, delivery, store, 3500).with_pacing_bounds(0, 0)
}
