//! Immediate ("deliver now") path
//!
//! ```text
//!   QuotaGate::check ──▶ start_cooldown ──▶ ContentNormalizer ──▶ generate_for_request
//!          │ refused                                                   │ zero items
//!          ▼                                                           ▼
//!    QuotaExceeded / CooldownActive                             Error::GenerationEmpty
//!                                                                      │ items
//!                                                                      ▼
//!                                        DeliveryEngine::deliver ──▶ consume_quota
//! ```
//!
//! The cooldown starts as soon as the gate lets a submission through, so
//! failing submissions cannot hammer the AI service back to back. The daily
//! quota is consumed only after at least one item was delivered, so a failed
//! generation or delivery does not cost the user a request.

use std::sync::Arc;

use crate::content::{ContentNormalizer, SourceInput};
use crate::delivery::{CancelSignal, DeliveryEngine, DeliveryPlan, DeliveryReport, Pacing};
use crate::error::Result;
use crate::generation::{generate_for_request, QuestionGenerator};
use crate::models::{api_key_fingerprint, Destination, Difficulty, RenderFormat, UserId};
use crate::quota::{GateDecision, QuotaGate};
use crate::storage::UserRepository;

/// One user action asking for a quiz right now
pub struct QuizSubmission {
    pub requester: UserId,
    pub input: SourceInput,
    pub destination: Destination,
    /// Falls back to the user's questions-per-request setting
    pub desired_count: Option<u32>,
    /// Falls back to the user's default format
    pub format: Option<RenderFormat>,
    pub difficulty: Difficulty,
    pub allow_beyond_source: bool,
    pub pacing_secs: Option<u32>,
    /// User-supplied AI key, used for this request only. Unlocks the
    /// custom-key caps when it matches the registered key.
    pub api_key: Option<String>,
}

impl QuizSubmission {
    /// Submission to the requester's own chat with default settings
    pub fn new(requester: UserId, input: SourceInput) -> Self {
        Self {
            requester,
            input,
            destination: Destination::direct(requester),
            desired_count: None,
            format: None,
            difficulty: Difficulty::default(),
            allow_beyond_source: false,
            pacing_secs: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for QuizSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizSubmission")
            .field("requester", &self.requester)
            .field("destination", &self.destination)
            .field("desired_count", &self.desired_count)
            .field("format", &self.format)
            .field("difficulty", &self.difficulty)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// A delivered quiz
#[derive(Debug, Clone)]
pub struct DeliveredQuiz {
    pub title: String,
    pub requested: usize,
    pub generated: usize,
    pub report: DeliveryReport,
    /// Source was a bare title; questions may go beyond what the user meant
    pub title_mode_warning: bool,
}

/// Result of [`QuizOrchestrator::deliver_now`] when nothing failed
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Delivered(DeliveredQuiz),
    QuotaExceeded { used: u32, cap: u32 },
    CooldownActive { retry_after_secs: u64 },
}

impl SubmitOutcome {
    /// Notice shown to the user for a refused submission
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::Delivered(_) => None,
            Self::QuotaExceeded { used, cap } => {
                GateDecision::QuotaExceeded { used: *used, cap: *cap }.user_message()
            }
            Self::CooldownActive { retry_after_secs } => GateDecision::CooldownActive {
                retry_after_secs: *retry_after_secs,
            }
            .user_message(),
        }
    }
}

/// Composes gate, normalizer, generation and delivery
#[derive(Clone)]
pub struct QuizOrchestrator {
    normalizer: ContentNormalizer,
    gate: QuotaGate,
    generator: Arc<dyn QuestionGenerator>,
    delivery: DeliveryEngine,
    users: Arc<dyn UserRepository>,
    max_chunk_chars: usize,
    min_pacing_secs: u32,
    max_pacing_secs: u32,
    default_pacing_secs: u32,
}

impl QuizOrchestrator {
    pub fn new(
        normalizer: ContentNormalizer,
        gate: QuotaGate,
        generator: Arc<dyn QuestionGenerator>,
        delivery: DeliveryEngine,
        users: Arc<dyn UserRepository>,
        max_chunk_chars: usize,
    ) -> Self {
        Self {
            normalizer,
            gate,
            generator,
            delivery,
            users,
            max_chunk_chars,
            min_pacing_secs: Pacing::MIN_SECS,
            max_pacing_secs: Pacing::MAX_SECS,
            default_pacing_secs: Pacing::MIN_SECS,
        }
    }

    /// Pacing range and default used when a submission names none
    pub fn with_pacing(mut self, min_secs: u32, max_secs: u32, default_secs: u32) -> Self {
        self.min_pacing_secs = min_secs;
        self.max_pacing_secs = max_secs;
        self.default_pacing_secs = default_secs;
        self
    }

    pub fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    /// Register (or clear) a user's own AI key; only its fingerprint is kept
    ///
    /// Later submissions presenting this key get the custom-key caps.
    pub fn register_api_key(&self, user: UserId, api_key: Option<&str>) -> Result<()> {
        let fingerprint = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(api_key_fingerprint);
        self.users
            .set_api_key_fingerprint(user, fingerprint.as_deref())?;
        tracing::info!(user_id = user, custom_key = fingerprint.is_some(), "API key setting changed");
        Ok(())
    }

    /// Item count for a submission, capped by the user's tier
    fn resolve_count(&self, user: UserId, desired: Option<u32>, api_key: Option<&str>) -> u32 {
        let cap = self
            .gate
            .config()
            .per_request_cap(self.gate.tier(user, api_key))
            .max(1);
        match desired {
            Some(count) => count.clamp(1, cap),
            None => self.gate.items_per_request(user, api_key),
        }
    }

    fn resolve_format(&self, user: UserId, format: Option<RenderFormat>) -> RenderFormat {
        if let Some(format) = format {
            return format;
        }
        match self.users.get_or_create(user) {
            Ok(record) => record.default_format,
            Err(e) => {
                tracing::warn!(user_id = user, error = %e, "Failed to load default format");
                RenderFormat::default()
            }
        }
    }

    /// Generate and deliver a quiz now
    ///
    /// Quota and cooldown refusals are outcomes, not errors. Errors are
    /// content problems, zero generated items, or a delivery that reached
    /// nobody.
    pub async fn deliver_now(&self, submission: QuizSubmission, cancel: CancelSignal) -> Result<SubmitOutcome> {
        let user = submission.requester;
        let api_key = submission.api_key.as_deref();

        match self.gate.check(user, api_key) {
            GateDecision::Allowed => {}
            GateDecision::QuotaExceeded { used, cap } => {
                tracing::info!(user_id = user, used, cap, "Submission refused: daily quota reached");
                return Ok(SubmitOutcome::QuotaExceeded { used, cap });
            }
            GateDecision::CooldownActive { retry_after_secs } => {
                tracing::info!(user_id = user, retry_after_secs, "Submission refused: cooldown");
                return Ok(SubmitOutcome::CooldownActive { retry_after_secs });
            }
        }

        self.gate.start_cooldown(user);

        let count = self.resolve_count(user, submission.desired_count, api_key);
        let format = self.resolve_format(user, submission.format);

        let normalized = self.normalizer.normalize(submission.input).await?;
        let title_mode_warning = normalized.descriptor.is_title_mode();
        let request = normalized.into_request(
            user,
            count,
            submission.difficulty,
            submission.allow_beyond_source,
        );
        let title = request.quiz_title();

        tracing::info!(
            user_id = user,
            kind = %request.kind,
            count,
            format = %format,
            "Generating quiz"
        );

        let outcome = generate_for_request(
            self.generator.as_ref(),
            &request,
            self.max_chunk_chars,
            api_key,
        )
        .await?;
        let generated = outcome.items.len();

        let pacing = Pacing::within(
            submission.pacing_secs.unwrap_or(self.default_pacing_secs),
            self.min_pacing_secs,
            self.max_pacing_secs,
        );
        let plan = DeliveryPlan {
            owner: user,
            destination: submission.destination,
            title: title.clone(),
            items: outcome.items,
            format,
            pacing,
        };
        let report = self.delivery.deliver(plan, cancel).await?;

        if report.delivered > 0 {
            self.gate.consume_quota(user);
        }

        Ok(SubmitOutcome::Delivered(DeliveredQuiz {
            title,
            requested: outcome.requested,
            generated,
            report,
            title_mode_warning,
        }))
    }
}
