//! End-to-end tests against the reference server.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use request_guard::security::{sign, ManualClock, WebhookSecret};
use std::sync::Arc;

mod common;

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[tokio::test]
async fn test_health() {
    let server = common::start_server().await;

    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    server.stop().await;
}

#[tokio::test]
async fn test_submission_accepted_then_rate_limited() {
    let server = common::start_server_with_clock(Arc::new(ManualClock::default())).await;
    let client = reqwest::Client::new();
    let body = json!({
        "email": "visitor@EXAMPLE.com",
        "subject": "Hello",
        "message": "Two\nlines",
        "quantity": 3,
    });

    for _ in 0..3 {
        let response = client
            .post(server.url("/submit/contact"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value: Value = response.json().await.unwrap();
        assert_eq!(value["fields"]["email"], "visitor@example.com");
        assert_eq!(value["fields"]["quantity"], "3");
    }

    let response = client
        .post(server.url("/submit/contact"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "4");
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["errors"][0]["kind"], "rate_limit_exceeded");

    server.stop().await;
}

#[tokio::test]
async fn test_header_injection_is_400_and_echoes_no_value() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/submit/contact"))
        .header("x-request-id", "req-123")
        .json(&json!({
            "email": "visitor@example.com\r\nBcc: victim@example.com",
            "subject": "Hello",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let text = response.text().await.unwrap();
    assert!(!text.contains("victim"));
    let value: Value = serde_json::from_str(&text).unwrap();
    let errors = value["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["kind"], "header_injection_attempt");
    assert_eq!(errors[0]["field"], "email");
    assert_eq!(errors[1]["kind"], "missing_field");
    assert_eq!(errors[1]["field"], "message");

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_submission_bodies_are_400() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();

    let cases = [
        ("[1,2]", Some("application/json")),
        ("not json", None),
        (r#"{"email":"#, Some("application/json")),
    ];
    for (body, content_type) in cases {
        let mut request = client.post(server.url("/submit/contact")).body(body);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let value: Value = response.json().await.unwrap();
        assert_eq!(value["errors"][0]["kind"], "malformed_body", "{body}");
    }

    server.stop().await;
}

#[tokio::test]
async fn test_repeated_field_is_rejected_as_duplicate() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/submit/contact"))
        .body(
            r#"{"email":"visitor@example.com","subject":"Hi","subject":"Hi
Bcc: x@y.com","message":"m"}"#,
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["errors"][0]["kind"], "duplicate_field");
    assert_eq!(value["errors"][0]["field"], "subject");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_routes_are_404() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/submit/newsletter"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(server.url("/webhooks/github"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_webhook_verification() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();
    let secret = WebhookSecret::new(common::WEBHOOK_SECRET);
    let payload = r#"{"event":"invoice.paid","id":"in_42"}"#;
    let ts = now();

    let response = client
        .post(server.url("/webhooks/payments"))
        .header("x-timestamp", ts.to_string())
        .header("x-signature", sign(payload.as_bytes(), ts, &secret))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let wrong = sign(payload.as_bytes(), ts, &WebhookSecret::new("not-the-secret"));
    let response = client
        .post(server.url("/webhooks/payments"))
        .header("x-timestamp", ts.to_string())
        .header("x-signature", wrong)
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let text = response.text().await.unwrap();
    assert!(text.contains("signature_mismatch"));
    assert!(!text.contains(common::WEBHOOK_SECRET));

    let stale = ts - 3600;
    let response = client
        .post(server.url("/webhooks/payments"))
        .header("x-timestamp", stale.to_string())
        .header("x-signature", sign(payload.as_bytes(), stale, &secret))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(server.url("/webhooks/payments"))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/webhooks/payments"))
        .body("x".repeat(8192))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    server.stop().await;
}
