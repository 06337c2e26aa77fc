//! Bot-API message sender
//!
//! Posts `sendMessage` / `sendPoll` calls to a Telegram-compatible bot API.
//! Outbound calls pass through a `governor` rate limiter and are retried
//! with exponential backoff on rate limiting, server errors and transport
//! failures. A 429 waits at least its `retry_after` before the next attempt.
//! Client errors (bad chat, missing rights) are not retried.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use super::{DeliveryError, DeliveryResult, MessageSender, PollMessage};
use crate::config::DeliveryConfig;
use crate::error::QuizErrorTrait;
use crate::models::Destination;
use crate::utils::retry::{with_retry_hinted, RetryConfig};

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct SendPollBody<'a> {
    chat_id: i64,
    question: &'a str,
    options: &'a [String],
    #[serde(rename = "type")]
    kind: &'static str,
    correct_option_id: usize,
    is_anonymous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Sender for a Telegram-compatible bot API
pub struct BotApiSender {
    client: Client,
    api_base: String,
    token: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    retry: RetryConfig,
}

impl BotApiSender {
    /// Create a sender from delivery configuration
    pub fn new(config: &DeliveryConfig) -> DeliveryResult<Self> {
        let token = config
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DeliveryError::InvalidConfig("bot token is not set".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DeliveryError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        let rate = NonZeroU32::new(config.sends_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
            retry: RetryConfig::new(config.send_retries),
        })
    }

    /// Override retry delays (tests use millisecond backoff)
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn post_once<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> DeliveryResult<()> {
        self.rate_limiter.until_ready().await;

        let response = self.client.post(self.method_url(method)).json(body).send().await?;
        let status = response.status();
        let parsed: Option<ApiResponse> = response.json().await.ok();

        if status.is_success() && parsed.as_ref().is_some_and(|r| r.ok) {
            return Ok(());
        }

        let description = parsed
            .as_ref()
            .and_then(|r| r.description.clone())
            .unwrap_or_else(|| status.to_string());

        if status.as_u16() == 429 {
            let retry_after_secs = parsed
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            return Err(DeliveryError::RateLimited { retry_after_secs });
        }

        Err(DeliveryError::Api {
            status: status.as_u16(),
            description,
        })
    }

    async fn post<B: Serialize + Sync + ?Sized>(&self, method: &str, body: &B) -> DeliveryResult<()> {
        with_retry_hinted(
            &self.retry,
            || self.post_once(method, body),
            |e| e.is_recoverable(),
            |e| match e {
                DeliveryError::RateLimited { retry_after_secs } => {
                    Some(Duration::from_secs(*retry_after_secs))
                }
                _ => None,
            },
        )
        .await
    }
}

#[async_trait]
impl MessageSender for BotApiSender {
    fn name(&self) -> &str {
        "bot-api"
    }

    async fn send_text(&self, destination: &Destination, html: &str) -> DeliveryResult<()> {
        let body = SendMessageBody {
            chat_id: destination.chat_id,
            text: html,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        self.post("sendMessage", &body).await?;
        tracing::debug!(destination = %destination, "Text message sent");
        Ok(())
    }

    async fn send_poll(&self, destination: &Destination, poll: &PollMessage) -> DeliveryResult<()> {
        let body = SendPollBody {
            chat_id: destination.chat_id,
            question: &poll.question,
            options: &poll.options,
            kind: "quiz",
            correct_option_id: poll.correct_option_id,
            is_anonymous: true,
            explanation: poll.explanation.as_deref(),
        };
        self.post("sendPoll", &body).await?;
        tracing::debug!(destination = %destination, "Poll sent");
        Ok(())
    }
}

/// Prints messages to stdout instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSender;

#[async_trait]
impl MessageSender for ConsoleSender {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_text(&self, destination: &Destination, html: &str) -> DeliveryResult<()> {
        println!("--- to {destination} ---\n{html}\n");
        Ok(())
    }

    async fn send_poll(&self, destination: &Destination, poll: &PollMessage) -> DeliveryResult<()> {
        println!("--- poll to {destination} ---\n{}", poll.question);
        for (i, option) in poll.options.iter().enumerate() {
            let marker = if i == poll.correct_option_id { "*" } else { " " };
            println!("{marker} {}. {option}", super::render::choice_label(i));
        }
        if let Some(explanation) = &poll.explanation {
            println!("  ({explanation})");
        }
        println!();
        Ok(())
    }
}
