//! Configuration management for quizline
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Tier;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// AI generation service
    pub generation: GenerationConfig,

    /// Per-user quota and cooldown
    pub quota: QuotaConfig,

    /// Scheduled-job poller
    pub scheduler: SchedulerConfig,

    /// Delivery to destinations
    pub delivery: DeliveryConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// AI generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base endpoint of the generateContent-style API
    pub endpoint: String,

    /// Model name
    pub model: String,

    /// Service API key (a user's own key overrides it per request)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum characters per content chunk
    pub max_chunk_chars: usize,

    /// Maximum explanation length kept from the AI response
    pub max_explanation_chars: usize,
}

/// Quota configuration; daily caps and per-request caps per tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub daily_regular: u32,
    pub daily_premium: u32,
    pub daily_custom_key: u32,

    pub max_items_regular: u32,
    pub max_items_premium: u32,
    pub max_items_custom_key: u32,

    /// Minimum seconds between submissions
    pub cooldown_secs: u64,

    /// Offset from UTC, in hours, that defines the local day
    pub utc_offset_hours: i32,
}

/// Poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll ticks
    pub poll_interval_secs: u64,

    /// Maximum due jobs fetched per tick
    pub batch_size: usize,

    /// How long a claim stays valid before another worker may take over
    pub lease_secs: u64,

    /// Claims allowed per job before an expired lease marks it failed
    pub max_attempts: u32,
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Bot API base URL
    pub api_base: String,

    /// Bot token (required for the bot-API sender)
    #[serde(default)]
    pub bot_token: Option<String>,

    pub min_pacing_secs: u32,
    pub max_pacing_secs: u32,
    pub default_pacing_secs: u32,

    /// Outbound messages per second
    pub sends_per_second: u32,

    /// Retries for a single send on rate limit / server errors
    pub send_retries: u32,

    /// Chat that receives job failure notices
    #[serde(default)]
    pub operator_chat_id: Option<i64>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let generation = GenerationConfig {
            endpoint: std::env::var("QUIZLINE_AI_ENDPOINT")
                .unwrap_or(defaults.generation.endpoint),
            model: std::env::var("QUIZLINE_AI_MODEL").unwrap_or(defaults.generation.model),
            api_key: std::env::var("QUIZLINE_AI_API_KEY")
                .or_else(|_| std::env::var("GEMINI_API_KEY"))
                .ok(),
            timeout_secs: env_parse("QUIZLINE_AI_TIMEOUT")
                .unwrap_or(defaults.generation.timeout_secs),
            max_chunk_chars: env_parse("QUIZLINE_MAX_CHUNK_CHARS")
                .unwrap_or(defaults.generation.max_chunk_chars),
            max_explanation_chars: defaults.generation.max_explanation_chars,
        };

        let quota = QuotaConfig {
            daily_regular: env_parse("QUIZLINE_DAILY_REGULAR")
                .unwrap_or(defaults.quota.daily_regular),
            daily_premium: env_parse("QUIZLINE_DAILY_PREMIUM")
                .unwrap_or(defaults.quota.daily_premium),
            daily_custom_key: env_parse("QUIZLINE_DAILY_CUSTOM_KEY")
                .unwrap_or(defaults.quota.daily_custom_key),
            max_items_regular: env_parse("QUIZLINE_MAX_ITEMS_REGULAR")
                .unwrap_or(defaults.quota.max_items_regular),
            max_items_premium: env_parse("QUIZLINE_MAX_ITEMS_PREMIUM")
                .unwrap_or(defaults.quota.max_items_premium),
            max_items_custom_key: env_parse("QUIZLINE_MAX_ITEMS_CUSTOM_KEY")
                .unwrap_or(defaults.quota.max_items_custom_key),
            cooldown_secs: env_parse("QUIZLINE_COOLDOWN_SECS")
                .unwrap_or(defaults.quota.cooldown_secs),
            utc_offset_hours: env_parse("QUIZLINE_UTC_OFFSET_HOURS")
                .unwrap_or(defaults.quota.utc_offset_hours),
        };

        let scheduler = SchedulerConfig {
            poll_interval_secs: env_parse("QUIZLINE_POLL_INTERVAL")
                .unwrap_or(defaults.scheduler.poll_interval_secs),
            batch_size: env_parse("QUIZLINE_POLL_BATCH")
                .unwrap_or(defaults.scheduler.batch_size),
            lease_secs: env_parse("QUIZLINE_LEASE_SECS").unwrap_or(defaults.scheduler.lease_secs),
            max_attempts: env_parse("QUIZLINE_MAX_ATTEMPTS")
                .unwrap_or(defaults.scheduler.max_attempts),
        };

        let delivery = DeliveryConfig {
            api_base: std::env::var("QUIZLINE_BOT_API").unwrap_or(defaults.delivery.api_base),
            bot_token: std::env::var("QUIZLINE_BOT_TOKEN")
                .or_else(|_| std::env::var("BOT_TOKEN"))
                .ok(),
            operator_chat_id: env_parse("QUIZLINE_OPERATOR_CHAT_ID"),
            ..defaults.delivery
        };

        let database = DatabaseConfig {
            sqlite_path: std::env::var("QUIZLINE_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database.sqlite_path),
        };

        let logging = LoggingConfig {
            level: std::env::var("QUIZLINE_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("QUIZLINE_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            generation,
            quota,
            scheduler,
            delivery,
            database,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_chunk_chars == 0 {
            anyhow::bail!("max_chunk_chars must be greater than 0");
        }

        if self.generation.timeout_secs == 0 {
            anyhow::bail!("generation timeout must be greater than 0");
        }

        url::Url::parse(&self.generation.endpoint)
            .with_context(|| format!("Invalid AI endpoint: {}", self.generation.endpoint))?;

        if self.scheduler.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.scheduler.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.delivery.min_pacing_secs > self.delivery.max_pacing_secs {
            anyhow::bail!("min_pacing_secs must not exceed max_pacing_secs");
        }

        if !(-23..=23).contains(&self.quota.utc_offset_hours) {
            anyhow::bail!("utc_offset_hours must be within -23..=23");
        }

        Ok(())
    }

    /// Get generation request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }
}

impl QuotaConfig {
    /// Requests allowed per local day for a tier
    pub fn daily_cap(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Regular => self.daily_regular,
            Tier::Premium => self.daily_premium,
            Tier::CustomKey => self.daily_custom_key,
        }
    }

    /// Items allowed in a single request for a tier
    pub fn per_request_cap(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Regular => self.max_items_regular,
            Tier::Premium => self.max_items_premium,
            Tier::CustomKey => self.max_items_custom_key,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generation: GenerationConfig {
                endpoint: String::from("https://generativelanguage.googleapis.com"),
                model: String::from("gemini-2.0-flash"),
                api_key: None,
                timeout_secs: 60,
                max_chunk_chars: 3500,
                max_explanation_chars: 200,
            },
            quota: QuotaConfig {
                daily_regular: 2,
                daily_premium: 20,
                daily_custom_key: 50,
                max_items_regular: 100,
                max_items_premium: 150,
                max_items_custom_key: 300,
                cooldown_secs: 10,
                utc_offset_hours: 3,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: 5,
                batch_size: 10,
                lease_secs: 900,
                max_attempts: 3,
            },
            delivery: DeliveryConfig {
                api_base: String::from("https://api.telegram.org"),
                bot_token: None,
                min_pacing_secs: 5,
                max_pacing_secs: 60,
                default_pacing_secs: 5,
                sends_per_second: 20,
                send_retries: 3,
                operator_chat_id: None,
            },
            database: DatabaseConfig {
                sqlite_path: PathBuf::from("data/quizline.db"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
