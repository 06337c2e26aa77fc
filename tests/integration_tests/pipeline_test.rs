//! End-to-end pipeline integration tests
//!
//! Tests the complete immediate workflow:
//! 1. Source normalization
//! 2. Chunked generation against a mocked AI service
//! 3. Rendering and delivery
//! 4. Quiz library and quota bookkeeping

use async_trait::async_trait;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quizline::config::{Config, GenerationConfig};
use quizline::content::{
    ContentError, ContentNormalizer, SourceInput, TranscriptOutcome, UploadedFile,
    VideoExtraction, VideoSource,
};
use quizline::delivery::CancelSignal;
use quizline::models::{Destination, RenderFormat};
use quizline::pipeline::{QuizSubmission, SubmitOutcome};
use quizline::storage::{QuizRepository, UserRepository};

use super::fixtures::{candidate, items_json, mount_items, Harness, GENERATE_PATH, SAMPLE_NOTE};
use crate::common::RecordingSender;

// ============================================================================
// Complete Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_note_to_channel_as_polls() {
    let server = MockServer::start().await;
    mount_items(&server, 3).await;
    let harness = Harness::new(&server, Config::default().quota);

    let mut submission = QuizSubmission::new(10, SourceInput::Note(SAMPLE_NOTE.to_string()));
    submission.destination = Destination::new(-100300, "Biology Channel");
    submission.desired_count = Some(3);
    submission.format = Some(RenderFormat::Poll);

    let outcome = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap();

    let SubmitOutcome::Delivered(quiz) = outcome else {
        panic!("expected delivery, got {outcome:?}");
    };
    assert_eq!(quiz.requested, 3);
    assert_eq!(quiz.generated, 3);
    assert_eq!(quiz.report.delivered, 3);
    assert_eq!(quiz.title, "Photosynthesis converts light ...");

    // every poll went to the channel, nothing to the requester
    assert_eq!(harness.sender.count_to(-100300), 3);
    assert_eq!(harness.sender.count_to(10), 0);

    let stored = harness.store.list_quizzes_for_owner(10, 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].items.len(), 3);
    assert_eq!(quiz.report.quiz_id.as_deref(), Some(stored[0].id.as_str()));

    assert_eq!(harness.store.get_or_create(10).unwrap().daily_count, 1);
}

#[tokio::test]
async fn test_long_note_is_chunked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&items_json(2))))
        .expect(3)
        .mount(&server)
        .await;

    let generation = GenerationConfig {
        max_chunk_chars: 100,
        ..super::fixtures::generation_config(&server)
    };
    let harness = Harness::with_parts(
        generation,
        Config::default().quota,
        ContentNormalizer::default(),
        Arc::new(RecordingSender::default()),
    );

    // 250 characters: three chunks, two items asked from each
    let note = "a".repeat(250);
    let mut submission = QuizSubmission::new(11, SourceInput::Note(note));
    submission.desired_count = Some(6);

    let SubmitOutcome::Delivered(quiz) = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap()
    else {
        panic!("expected delivery");
    };
    assert_eq!(quiz.generated, 6);
    assert_eq!(harness.sender.count_to(11), 6);
}

#[tokio::test]
async fn test_under_delivery_is_kept() {
    let server = MockServer::start().await;
    mount_items(&server, 2).await;
    let harness = Harness::new(&server, Config::default().quota);

    let mut submission = QuizSubmission::new(12, SourceInput::Title("Photosynthesis".into()));
    submission.desired_count = Some(10);

    let SubmitOutcome::Delivered(quiz) = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap()
    else {
        panic!("expected delivery");
    };
    assert_eq!(quiz.requested, 10);
    assert_eq!(quiz.generated, 2);
    assert!(quiz.title_mode_warning);
    assert_eq!(quiz.title, "Photosynthesis");
}

#[tokio::test]
async fn test_uploaded_file_titles_quiz() {
    let server = MockServer::start().await;
    mount_items(&server, 1).await;
    let harness = Harness::new(&server, Config::default().quota);

    let file = UploadedFile {
        bytes: SAMPLE_NOTE.as_bytes().to_vec(),
        filename: Some("biology.txt".to_string()),
        mime_type: Some("text/plain".to_string()),
    };
    let mut submission = QuizSubmission::new(13, SourceInput::File(file));
    submission.desired_count = Some(1);
    submission.format = Some(RenderFormat::Text);

    let SubmitOutcome::Delivered(quiz) = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap()
    else {
        panic!("expected delivery");
    };
    assert_eq!(quiz.title, "biology.txt");

    let messages = harness.sender.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("Where does step 0 happen?"));
}

#[tokio::test]
async fn test_user_key_used_for_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "user-own-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&items_json(1))))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server, Config::default().quota);

    let mut submission = QuizSubmission::new(14, SourceInput::Title("Tides".into()));
    submission.desired_count = Some(1);
    submission.api_key = Some("user-own-key".to_string());

    let outcome = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
}

// ============================================================================
// Video Sources
// ============================================================================

struct BlockedTranscript;

#[async_trait]
impl VideoSource for BlockedTranscript {
    async fn fetch(&self, _reference: &str) -> Result<VideoExtraction, ContentError> {
        Ok(VideoExtraction {
            transcript: TranscriptOutcome::Restricted("sign in to confirm".to_string()),
            audio: Some(vec![1, 2, 3]),
            media_type: Some("audio/mp4".to_string()),
            title: "Cell Biology 101".to_string(),
            description: String::new(),
        })
    }
}

#[tokio::test]
async fn test_video_falls_back_to_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_string_contains("\"mime_type\":\"audio/mp4\""))
        .and(body_string_contains("\"data\":\"AQID\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&items_json(2))))
        .expect(1)
        .mount(&server)
        .await;

    let normalizer = ContentNormalizer::default().with_video_source(Arc::new(BlockedTranscript));
    let harness = Harness::with_parts(
        super::fixtures::generation_config(&server),
        Config::default().quota,
        normalizer,
        Arc::new(RecordingSender::default()),
    );

    let mut submission = QuizSubmission::new(
        15,
        SourceInput::Video {
            reference: "https://youtu.be/dQw4w9WgXcQ".to_string(),
        },
    );
    submission.desired_count = Some(2);

    let SubmitOutcome::Delivered(quiz) = harness
        .orchestrator
        .deliver_now(submission, CancelSignal::never())
        .await
        .unwrap()
    else {
        panic!("expected delivery");
    };
    assert_eq!(quiz.title, "Cell Biology 101");
    assert_eq!(quiz.report.delivered, 2);
}
