//! Mapping gateway results onto HTTP responses.
//!
//! # Responsibilities
//! - Pick one status for a set of rejections (most severe wins)
//! - Add `Retry-After` to rate limited responses
//! - Render the `{"errors": [...]}` body
//!
//! # Design Decisions
//! - 401 > 503 > 429 > 400: an unauthenticated caller learns nothing about quota
//! - Bodies carry kind, field and message only; never values or bucket state

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use crate::gateway::{Category, GatewayError, Rejection};

/// Rejections rendered as one HTTP response.
#[derive(Debug, Clone)]
pub struct RejectionResponse(pub Vec<Rejection>);

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    errors: Vec<ErrorEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct ErrorEntry<'a> {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
    message: String,
}

fn category_status(category: Category) -> StatusCode {
    match category {
        Category::Validation => StatusCode::BAD_REQUEST,
        Category::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        Category::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
        Category::Authentication => StatusCode::UNAUTHORIZED,
    }
}

/// Status for a rejection set. An empty set maps to 400.
pub fn status_for(rejections: &[Rejection]) -> StatusCode {
    rejections
        .iter()
        .map(Rejection::category)
        .max()
        .map(category_status)
        .unwrap_or(StatusCode::BAD_REQUEST)
}

/// Whole seconds, rounded up, for the `Retry-After` header.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

impl IntoResponse for RejectionResponse {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorBody {
            errors: self
                .0
                .iter()
                .map(|rejection| ErrorEntry {
                    kind: rejection.kind(),
                    field: rejection.field(),
                    message: rejection.to_string(),
                })
                .collect(),
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry = self.0.iter().filter_map(Rejection::retry_after).max();
            if let Some(retry) = retry {
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(retry)),
                );
            }
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::UnknownForm(_) | GatewayError::UnknownWebhook(_) => StatusCode::NOT_FOUND,
            _ => {
                tracing::error!(error = %self, "Gateway misconfigured");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(secs: f64) -> Rejection {
        Rejection::RateLimitExceeded {
            retry_after: Some(Duration::from_secs_f64(secs)),
        }
    }

    #[test]
    fn test_most_severe_status_wins() {
        let email = Rejection::MalformedEmail {
            field: "email".into(),
        };
        assert_eq!(status_for(&[email.clone()]), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&[email.clone(), limited(1.0)]), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status_for(&[limited(1.0), Rejection::StoreTimeout]),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&[Rejection::StoreTimeout, Rejection::SignatureMismatch, email]),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(3_334)), 4);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = RejectionResponse(vec![limited(3.34)]).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "4");
    }

    #[test]
    fn test_no_retry_after_when_unknown() {
        let rejection = Rejection::RateLimitExceeded { retry_after: None };
        let response = RejectionResponse(vec![rejection]).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
