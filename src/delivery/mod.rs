//! Paced delivery of generated items
//!
//! ```text
//!   items ──▶ render ──▶ MessageSender ──▶ destination
//!               ▲              │
//!               │       pacing sleep (cancelable)
//!               └──────────────┘
//!                              │
//!                              ▼
//!          usage counters + Quiz record (after the last send)
//! ```
//!
//! Pacing is a spaced-delivery feature: items arrive one by one with a
//! 5 to 60 second gap. The wait is an async sleep raced against a cancel
//! signal, so no thread is held and delivery can be stopped midway.
//!
//! A failed send does not abort the run. Delivery fails only when nothing
//! at all reached the destination. A [`SendGuard`] is consulted before each
//! send; scheduled jobs use it to renew their lease and to stop as soon as
//! another worker owns the job.

pub mod render;
pub mod telegram;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::{ErrorCategory, QuizErrorTrait};
use crate::metrics;
use crate::models::{Destination, GeneratedItem, Quiz, RenderFormat, UserId};
use crate::storage::{QuizRepository, UserRepository};

pub use render::{render, render_poll, render_text, PollMessage, RenderedMessage};
pub use telegram::{BotApiSender, ConsoleSender};

/// Result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors raised while delivering
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Destination API rejected the call
    #[error("API error {status}: {description}")]
    Api { status: u16, description: String },

    /// Destination API asked us to slow down
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Sender misconfigured
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Not a single item reached the destination
    #[error("None of {attempted} item(s) could be delivered")]
    NothingDelivered { attempted: usize },
}

impl QuizErrorTrait for DeliveryError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            Self::RateLimited { .. } => true,
            Self::InvalidConfig(_) | Self::NothingDelivered { .. } => false,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::NothingDelivered { .. } => {
                "Could not post any question. Check that the bot can write to the destination."
                    .to_string()
            }
            _ => "Could not post the questions to the destination.".to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Delivery
    }
}

/// Something that can put messages in front of a destination
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(&self, destination: &Destination, html: &str) -> DeliveryResult<()>;

    async fn send_poll(&self, destination: &Destination, poll: &PollMessage) -> DeliveryResult<()>;

    /// Send an already rendered message
    async fn send(&self, destination: &Destination, message: &RenderedMessage) -> DeliveryResult<()> {
        match message {
            RenderedMessage::Text(html) => self.send_text(destination, html).await,
            RenderedMessage::Poll(poll) => self.send_poll(destination, poll).await,
        }
    }
}

/// Gap between consecutive sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing(Duration);

impl Pacing {
    pub const MIN_SECS: u32 = 5;
    pub const MAX_SECS: u32 = 60;

    /// Pacing clamped into the 5..=60 second range
    pub fn clamped(secs: u32) -> Self {
        Self::within(secs, Self::MIN_SECS, Self::MAX_SECS)
    }

    /// Pacing clamped into a configured range
    pub fn within(secs: u32, min_secs: u32, max_secs: u32) -> Self {
        Self(Duration::from_secs(u64::from(secs.clamp(min_secs, max_secs.max(min_secs)))))
    }

    /// No gap at all; for tests and console output
    pub fn immediate() -> Self {
        Self(Duration::ZERO)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

/// Handle that stops an in-flight delivery
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving side of a [`CancelHandle`]
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A linked handle/signal pair
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(Arc::new(tx)), CancelSignal(rx))
    }

    /// A signal that never fires
    pub fn never() -> CancelSignal {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once cancelled; pends forever if the handle is gone
    async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Consulted before every send; `false` halts the run
pub trait SendGuard: Send + Sync {
    fn may_send(&self) -> bool;
}

/// Guard that never halts
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl SendGuard for Unguarded {
    fn may_send(&self) -> bool {
        true
    }
}

/// Everything one delivery run needs
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    pub owner: UserId,
    pub destination: Destination,
    pub title: String,
    pub items: Vec<GeneratedItem>,
    pub format: RenderFormat,
    pub pacing: Pacing,
}

/// What a delivery run achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Persisted quiz, if storing it succeeded
    pub quiz_id: Option<String>,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// The guard refused a send; nothing was recorded for this run
    pub halted: bool,
}

/// Renders, paces and sends items, then records the result
#[derive(Clone)]
pub struct DeliveryEngine {
    sender: Arc<dyn MessageSender>,
    quizzes: Arc<dyn QuizRepository>,
    users: Arc<dyn UserRepository>,
}

impl DeliveryEngine {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        quizzes: Arc<dyn QuizRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            sender,
            quizzes,
            users,
        }
    }

    pub fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.sender
    }

    /// Deliver every item of the plan
    pub async fn deliver(
        &self,
        plan: DeliveryPlan,
        cancel: CancelSignal,
    ) -> DeliveryResult<DeliveryReport> {
        self.deliver_guarded(plan, cancel, &Unguarded).await
    }

    /// Deliver every item of the plan while `guard` allows it
    ///
    /// A halted run returns its partial report without touching usage
    /// counters or the quiz library.
    pub async fn deliver_guarded(
        &self,
        plan: DeliveryPlan,
        mut cancel: CancelSignal,
        guard: &dyn SendGuard,
    ) -> DeliveryResult<DeliveryReport> {
        let mut report = DeliveryReport {
            quiz_id: None,
            attempted: 0,
            delivered: 0,
            failed: 0,
            cancelled: false,
            halted: false,
        };

        for (i, item) in plan.items.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if i > 0 && !plan.pacing.duration().is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(plan.pacing.duration()) => {}
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                }
            }

            if !guard.may_send() {
                report.halted = true;
                break;
            }

            let message = render(plan.format, i + 1, item);
            report.attempted += 1;
            match self.sender.send(&plan.destination, &message).await {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_message(plan.format.as_str(), true);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_message(plan.format.as_str(), false);
                    tracing::warn!(
                        destination = %plan.destination,
                        item = i + 1,
                        error = %e,
                        "Failed to deliver item"
                    );
                }
            }
        }

        if report.cancelled {
            tracing::info!(
                destination = %plan.destination,
                delivered = report.delivered,
                "Delivery cancelled"
            );
        }

        if report.halted {
            tracing::warn!(
                destination = %plan.destination,
                delivered = report.delivered,
                "Delivery halted"
            );
            return Ok(report);
        }

        if report.delivered == 0 {
            if report.cancelled {
                return Ok(report);
            }
            return Err(DeliveryError::NothingDelivered {
                attempted: report.attempted,
            });
        }

        if let Err(e) = self.users.record_generation(plan.owner, report.delivered as u64) {
            tracing::warn!(user_id = plan.owner, error = %e, "Failed to update usage counters");
        }

        let quiz = Quiz::new(plan.owner, plan.title, plan.items);
        match self.quizzes.insert_quiz(&quiz) {
            Ok(()) => report.quiz_id = Some(quiz.id),
            Err(e) => {
                tracing::warn!(user_id = plan.owner, error = %e, "Failed to store quiz");
            }
        }

        Ok(report)
    }
}
