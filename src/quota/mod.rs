//! Per-user quota and cooldown gate
//!
//! The daily counter is keyed to the local calendar date of the configured
//! UTC offset and reset lazily: the first access on a new local day zeroes
//! it with a conditional update, so a reset happens at most once per day
//! even when several callers race.
//!
//! None of the gate's operations fail. Storage errors are logged and the
//! gate answers conservatively (no quota, no submission) so a broken
//! database never turns into free AI calls.
//!
//! Tier-dependent operations take the API key presented with the request.
//! The custom-key caps apply only when that key matches the registered one;
//! a request riding on the service key gets the premium or regular caps.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::config::QuotaConfig;
use crate::models::{QuotaRecord, Tier, UserId};
use crate::storage::UserRepository;
use crate::utils::local_date;

/// Outcome of the combined quota + cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    QuotaExceeded { used: u32, cap: u32 },
    CooldownActive { retry_after_secs: u64 },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Notice shown to the user when refused
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Allowed => None,
            Self::QuotaExceeded { cap, .. } => Some(format!(
                "You have reached your daily limit of {cap}. \
                 Add your own API key in Settings to increase limits."
            )),
            Self::CooldownActive { retry_after_secs } => Some(format!(
                "Please wait {retry_after_secs}s before sending another note."
            )),
        }
    }
}

/// Quota gate over a [`UserRepository`]
#[derive(Clone)]
pub struct QuotaGate {
    users: Arc<dyn UserRepository>,
    config: QuotaConfig,
}

impl QuotaGate {
    pub fn new(users: Arc<dyn UserRepository>, config: QuotaConfig) -> Self {
        Self { users, config }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Local date string (`YYYY-MM-DD`) for an instant
    pub fn today(&self, now: DateTime<Utc>) -> String {
        local_date(now, self.config.utc_offset_hours)
            .format("%Y-%m-%d")
            .to_string()
    }

    fn load(&self, user: UserId) -> Option<QuotaRecord> {
        match self.users.get_or_create(user) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(user_id = user, error = %e, "Failed to load quota record");
                None
            }
        }
    }

    /// Tier of a user's request; regular when the record cannot be read
    pub fn tier(&self, user: UserId, api_key: Option<&str>) -> Tier {
        self.load(user).map_or(Tier::Regular, |r| r.tier(api_key))
    }

    /// Items one request may ask for, from the user's setting capped by tier
    pub fn items_per_request(&self, user: UserId, api_key: Option<&str>) -> u32 {
        match self.load(user) {
            Some(record) => record
                .questions_per_request
                .clamp(1, self.config.per_request_cap(record.tier(api_key))),
            None => 5,
        }
    }

    /// Zero the daily counter if the stored day is not today
    pub fn reset_if_new_day(&self, user: UserId) {
        self.reset_if_new_day_at(user, Utc::now());
    }

    pub fn reset_if_new_day_at(&self, user: UserId, now: DateTime<Utc>) {
        let today = self.today(now);
        match self.users.reset_daily_if_stale(user, &today) {
            Ok(true) => tracing::debug!(user_id = user, day = %today, "Daily counter reset"),
            Ok(false) => {}
            Err(e) => warn!(user_id = user, error = %e, "Failed to reset daily counter"),
        }
    }

    /// Whether today's count is below the tier's daily cap
    pub fn has_quota(&self, user: UserId, api_key: Option<&str>) -> bool {
        self.has_quota_at(user, api_key, Utc::now())
    }

    pub fn has_quota_at(&self, user: UserId, api_key: Option<&str>, now: DateTime<Utc>) -> bool {
        self.reset_if_new_day_at(user, now);
        self.load(user)
            .is_some_and(|r| r.daily_count < self.config.daily_cap(r.tier(api_key)))
    }

    /// Whether at least `cooldown_secs` passed since the last submission
    pub fn can_submit_now(&self, user: UserId, cooldown_secs: u64) -> bool {
        self.can_submit_now_at(user, cooldown_secs, Utc::now())
    }

    pub fn can_submit_now_at(&self, user: UserId, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(user, cooldown_secs, now)
            .is_some_and(|remaining| remaining == 0)
    }

    fn cooldown_remaining(&self, user: UserId, cooldown_secs: u64, now: DateTime<Utc>) -> Option<u64> {
        let record = self.load(user)?;
        let Some(last) = record.last_submission_at else {
            return Some(0);
        };
        let cooldown = Duration::seconds(cooldown_secs as i64);
        let elapsed = now - last;
        if elapsed >= cooldown {
            Some(0)
        } else {
            Some((cooldown - elapsed).num_seconds().max(1) as u64)
        }
    }

    /// Stamp the submission and consume one unit of today's quota
    pub fn record_submission(&self, user: UserId) {
        self.record_submission_at(user, Utc::now());
    }

    pub fn record_submission_at(&self, user: UserId, now: DateTime<Utc>) {
        let today = self.today(now);
        if let Err(e) = self.users.record_submission(user, &today, now) {
            warn!(user_id = user, error = %e, "Failed to record submission");
        }
    }

    /// Start the cooldown for a submission that passed the gate
    pub fn start_cooldown(&self, user: UserId) {
        self.start_cooldown_at(user, Utc::now());
    }

    pub fn start_cooldown_at(&self, user: UserId, now: DateTime<Utc>) {
        if let Err(e) = self.users.touch_submission(user, now) {
            warn!(user_id = user, error = %e, "Failed to stamp submission");
        }
    }

    /// Consume one unit of today's quota, leaving the cooldown as it is
    pub fn consume_quota(&self, user: UserId) {
        self.consume_quota_at(user, Utc::now());
    }

    pub fn consume_quota_at(&self, user: UserId, now: DateTime<Utc>) {
        let today = self.today(now);
        if let Err(e) = self.users.consume_quota(user, &today) {
            warn!(user_id = user, error = %e, "Failed to consume quota");
        }
    }

    /// Quota first, then cooldown, using the configured cooldown
    pub fn check(&self, user: UserId, api_key: Option<&str>) -> GateDecision {
        self.check_at(user, api_key, Utc::now())
    }

    pub fn check_at(&self, user: UserId, api_key: Option<&str>, now: DateTime<Utc>) -> GateDecision {
        if !self.has_quota_at(user, api_key, now) {
            let (used, cap) = self
                .load(user)
                .map_or((0, 0), |r| (r.daily_count, self.config.daily_cap(r.tier(api_key))));
            return GateDecision::QuotaExceeded { used, cap };
        }

        match self.cooldown_remaining(user, self.config.cooldown_secs, now) {
            Some(0) => GateDecision::Allowed,
            Some(retry_after_secs) => GateDecision::CooldownActive { retry_after_secs },
            None => GateDecision::CooldownActive {
                retry_after_secs: self.config.cooldown_secs,
            },
        }
    }
}
