//! Error scenario integration tests
//!
//! Tests refusal and failure paths:
//! - Daily quota and cooldown refusals
//! - Custom-key caps that need the key itself
//! - Unusable content
//! - AI service failures
//! - Destinations that accept nothing
//! - Cancellation before the first send
//! - Malformed schedule times

use async_trait::async_trait;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quizline::config::Config;
use quizline::content::{ContentError, ContentNormalizer, SourceInput, UploadedFile};
use quizline::delivery::{
    CancelSignal, DeliveryEngine, DeliveryError, DeliveryResult, MessageSender, PollMessage,
};
use quizline::error::{Error, ErrorCategory, QuizErrorTrait};
use quizline::generation::GeminiClient;
use quizline::models::{Destination, GenerationRequest, RenderFormat};
use quizline::pipeline::{QuizOrchestrator, QuizSubmission, SubmitOutcome};
use quizline::quota::QuotaGate;
use quizline::scheduler::{JobBook, SchedulerError};
use quizline::storage::{JobRepository, SqliteStore, UserRepository};

use super::fixtures::{generation_config, mount_items, quota_without_cooldown, Harness, GENERATE_PATH};

fn title(user: i64, topic: &str) -> QuizSubmission {
    let mut submission = QuizSubmission::new(user, SourceInput::Title(topic.to_string()));
    submission.desired_count = Some(2);
    submission
}

// ============================================================================
// Quota and Cooldown
// ============================================================================

#[tokio::test]
async fn test_third_submission_exceeds_daily_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(super::fixtures::candidate(
            &super::fixtures::items_json(2),
        )))
        .expect(2)
        .mount(&server)
        .await;
    let harness = Harness::new(&server, quota_without_cooldown());

    for topic in ["Volcanoes", "Glaciers"] {
        let outcome = harness
            .orchestrator
            .deliver_now(title(20, topic), CancelSignal::never())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
    }

    let outcome = harness
        .orchestrator
        .deliver_now(title(20, "Rivers"), CancelSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::QuotaExceeded { used: 2, cap: 2 }));
    assert!(outcome.notice().is_some());
    assert_eq!(harness.sender.count_to(20), 4);
}

#[tokio::test]
async fn test_cooldown_refuses_without_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(super::fixtures::candidate(
            &super::fixtures::items_json(2),
        )))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server, Config::default().quota);

    harness
        .orchestrator
        .deliver_now(title(21, "Deserts"), CancelSignal::never())
        .await
        .unwrap();
    let outcome = harness
        .orchestrator
        .deliver_now(title(21, "Oceans"), CancelSignal::never())
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::CooldownActive { retry_after_secs } => {
            assert!((1..=10).contains(&retry_after_secs));
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    assert_eq!(harness.store.get_or_create(21).unwrap().daily_count, 1);
}

#[tokio::test]
async fn test_failed_generation_still_starts_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(super::fixtures::candidate("[]")))
        .mount(&server)
        .await;
    let harness = Harness::new(&server, Config::default().quota);

    let err = harness
        .orchestrator
        .deliver_now(title(29, "Tsunamis"), CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationEmpty { .. }));

    let outcome = harness
        .orchestrator
        .deliver_now(title(29, "Earthquakes"), CancelSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::CooldownActive { .. }));

    let user = harness.store.get_or_create(29).unwrap();
    assert_eq!(user.daily_count, 0);
    assert!(user.last_submission_at.is_some());
}

#[tokio::test]
async fn test_registered_key_must_be_presented_for_its_caps() {
    let server = MockServer::start().await;
    let body = super::fixtures::candidate(&super::fixtures::items_json(2));
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "sk-user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server, quota_without_cooldown());
    harness.orchestrator.register_api_key(28, Some("sk-user")).unwrap();

    let mut delivered = 0;
    for topic in ["Auroras", "Nebulae", "Quasars", "Pulsars", "Comets"] {
        match harness
            .orchestrator
            .deliver_now(title(28, topic), CancelSignal::never())
            .await
            .unwrap()
        {
            SubmitOutcome::Delivered(_) => delivered += 1,
            SubmitOutcome::QuotaExceeded { used, cap } => assert_eq!((used, cap), (2, 2)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(delivered, 2);

    // the key itself lifts the cap
    let mut with_key = title(28, "Galaxies");
    with_key.api_key = Some("sk-user".to_string());
    let outcome = harness
        .orchestrator
        .deliver_now(with_key, CancelSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
    assert_eq!(harness.store.get_or_create(28).unwrap().daily_count, 3);
}

// ============================================================================
// Content Failures
// ============================================================================

#[tokio::test]
async fn test_blank_file_is_rejected_before_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let harness = Harness::new(&server, Config::default().quota);

    let file = UploadedFile {
        bytes: b"  \n\t ".to_vec(),
        filename: Some("empty.txt".to_string()),
        mime_type: None,
    };
    let err = harness
        .orchestrator
        .deliver_now(QuizSubmission::new(22, SourceInput::File(file)), CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Content(ContentError::NoExtractableText)));
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(err.user_message(), "Failed to parse file content.");
    assert_eq!(harness.store.get_or_create(22).unwrap().daily_count, 0);
}

#[tokio::test]
async fn test_video_without_source_is_content_error() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server, Config::default().quota);

    let submission = QuizSubmission::new(
        23,
        SourceInput::Video {
            reference: "https://youtu.be/dQw4w9WgXcQ".to_string(),
        },
    );
    let err = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Content(ContentError::NoTranscriptOrAudio)));
}

// ============================================================================
// Generation Failures
// ============================================================================

#[tokio::test]
async fn test_ai_outage_is_generation_error_and_free() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;
    let harness = Harness::new(&server, Config::default().quota);

    let err = harness
        .orchestrator
        .deliver_now(title(24, "Comets"), CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::GenerationEmpty { .. }));
    assert_eq!(err.category(), ErrorCategory::Generation);
    assert!(err.is_recoverable());
    assert!(harness.sender.messages.lock().unwrap().is_empty());
    assert_eq!(harness.store.get_or_create(24).unwrap().daily_count, 0);
}

// ============================================================================
// Delivery Failures
// ============================================================================

struct ClosedChat;

#[async_trait]
impl MessageSender for ClosedChat {
    fn name(&self) -> &str {
        "closed"
    }

    async fn send_text(&self, _: &Destination, _: &str) -> DeliveryResult<()> {
        Err(DeliveryError::Api {
            status: 403,
            description: "Forbidden: bot is not a member of the channel chat".to_string(),
        })
    }

    async fn send_poll(&self, _: &Destination, _: &PollMessage) -> DeliveryResult<()> {
        Err(DeliveryError::Api {
            status: 403,
            description: "Forbidden: bot is not a member of the channel chat".to_string(),
        })
    }
}

#[tokio::test]
async fn test_unreachable_destination_costs_nothing() {
    let server = MockServer::start().await;
    mount_items(&server, 2).await;

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let generation = generation_config(&server);
    let max_chunk_chars = generation.max_chunk_chars;
    let orchestrator = QuizOrchestrator::new(
        ContentNormalizer::default(),
        QuotaGate::new(store.clone(), Config::default().quota),
        Arc::new(GeminiClient::new(generation).unwrap()),
        DeliveryEngine::new(Arc::new(ClosedChat), store.clone(), store.clone()),
        store.clone(),
        max_chunk_chars,
    )
    .with_pacing(0, 0, 0);

    let mut submission = title(25, "Eclipses");
    submission.destination = Destination::new(-100999, "Someone Else's Channel");
    submission.format = Some(RenderFormat::Poll);

    let err = orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Delivery(DeliveryError::NothingDelivered { attempted: 2 })
    ));
    assert_eq!(err.category(), ErrorCategory::Delivery);
    assert_eq!(store.get_or_create(25).unwrap().daily_count, 0);
}

#[tokio::test]
async fn test_cancelled_before_first_send() {
    let server = MockServer::start().await;
    mount_items(&server, 2).await;
    let harness = Harness::new(&server, Config::default().quota);

    let (handle, signal) = CancelSignal::pair();
    handle.cancel();

    let SubmitOutcome::Delivered(quiz) = harness
        .orchestrator
        .deliver_now(title(26, "Meteors"), signal)
        .await
        .unwrap()
    else {
        panic!("expected a delivery report");
    };

    assert!(quiz.report.cancelled);
    assert_eq!(quiz.report.delivered, 0);
    assert!(quiz.report.quiz_id.is_none());
    assert!(harness.sender.messages.lock().unwrap().is_empty());
    assert_eq!(harness.store.get_or_create(26).unwrap().daily_count, 0);
}

// ============================================================================
// Scheduling Input
// ============================================================================

#[test]
fn test_malformed_schedule_time_is_validation_error() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let book = JobBook::new(store.clone(), 3);

    for input in ["tomorrow", "2025-13-01 10:00", "2025-01-01", "10:00 2025-01-01"] {
        let err = book
            .schedule(
                GenerationRequest::title(27, "Stars"),
                Destination::direct(27),
                RenderFormat::Text,
                5,
                input,
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidScheduleTime { .. }));

        let err: Error = err.into();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.user_message().contains("YYYY-MM-DD HH:MM"));
    }

    assert!(store.list_jobs_for_owner(27).unwrap().is_empty());
}
