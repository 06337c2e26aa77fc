//! Integration tests for BotApiSender using wiremock

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quizline::config::Config;
use quizline::delivery::{BotApiSender, DeliveryError, MessageSender, PollMessage};
use quizline::models::Destination;
use quizline::utils::retry::RetryConfig;

const TOKEN: &str = "TEST:token";

fn sender_for(server: &MockServer) -> BotApiSender {
    let mut config = Config::default().delivery;
    config.api_base = server.uri();
    config.bot_token = Some(TOKEN.to_string());
    config.sends_per_second = 100;
    BotApiSender::new(&config)
        .unwrap()
        .with_retry(RetryConfig::with_delays(2, 1, 5))
}

fn ok_body() -> serde_json::Value {
    json!({ "ok": true, "result": {} })
}

#[tokio::test]
async fn test_send_text_uses_html_parse_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .and(body_partial_json(json!({
            "chat_id": -100500,
            "text": "<b>Q1.</b> Hello",
            "parse_mode": "HTML",
            "disable_web_page_preview": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender_for(&server);
    sender
        .send_text(&Destination::new(-100500, "Group"), "<b>Q1.</b> Hello")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_poll_is_quiz_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendPoll")))
        .and(body_partial_json(json!({
            "chat_id": 42,
            "question": "Largest planet?",
            "options": ["Mars", "Jupiter"],
            "type": "quiz",
            "correct_option_id": 1,
            "is_anonymous": true,
            "explanation": "Gas giant"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&server)
        .await;

    let poll = PollMessage {
        question: "Largest planet?".to_string(),
        options: vec!["Mars".to_string(), "Jupiter".to_string()],
        correct_option_id: 1,
        explanation: Some("Gas giant".to_string()),
    };
    sender_for(&server)
        .send_poll(&Destination::direct(42), &poll)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rate_limit_waits_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "ok": false,
            "description": "Too Many Requests: retry after 1",
            "parameters": { "retry_after": 1 }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&server)
        .await;

    // backoff alone would retry after 1ms
    let started = std::time::Instant::now();
    sender_for(&server)
        .send_text(&Destination::direct(7), "hello")
        .await
        .unwrap();
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = sender_for(&server)
        .send_text(&Destination::new(-1, "Gone"), "hello")
        .await
        .unwrap_err();

    match err {
        DeliveryError::Api { status, description } => {
            assert_eq!(status, 400);
            assert!(description.contains("chat not found"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let err = sender_for(&server)
        .send_text(&Destination::direct(1), "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Api { status: 502, .. }));
}
