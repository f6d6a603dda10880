//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the submission, webhook and health routes
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Hand each request to the gateway and render its outcome
//! - Stop on the shutdown broadcast, draining in-flight requests
//!
//! # Design Decisions
//! - The body limit sits outside the timeout so oversized bodies are refused
//!   before any handler work
//! - Submission bodies are parsed here, not by the `Json` extractor, so every
//!   malformed body renders as a 400 rejection and repeated keys survive

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::gateway::{Outcome, Rejection, SecurityGateway, SubmissionRequest, WebhookRequest};
use crate::http::request::{RequestIdExt, UuidRequestId};
use crate::http::response::RejectionResponse;
use crate::observability::metrics;
use crate::security::rate_limit::RateLimitKey;
use crate::security::webhook::WebhookEnvelope;

/// Header names a webhook sender uses.
#[derive(Debug, Clone)]
struct WebhookHeaders {
    signature: String,
    timestamp: String,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<SecurityGateway>,
    webhook_headers: Arc<HashMap<String, WebhookHeaders>>,
}

/// Reference HTTP server mounting the gateway.
pub struct GuardServer {
    router: Router,
}

impl GuardServer {
    pub fn new(gateway: Arc<SecurityGateway>, config: &GuardConfig) -> Self {
        let webhook_headers = config
            .webhooks
            .iter()
            .map(|w| {
                (
                    w.name.clone(),
                    WebhookHeaders {
                        signature: w.signature_header.to_ascii_lowercase(),
                        timestamp: w.timestamp_header.to_ascii_lowercase(),
                    },
                )
            })
            .collect();

        let state = AppState {
            gateway,
            webhook_headers: Arc::new(webhook_headers),
        };

        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/submit/{form}", post(submit_handler))
            .route("/webhooks/{name}", post(webhook_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id = request.headers().request_id()
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.listener.request_timeout_secs,
                    ))),
            )
    }

    /// Run until the shutdown signal fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /submit/{form}`: JSON object of fields, peer IP as identity.
async fn submit_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(form): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let fields = match serde_json::from_slice::<SubmittedFields>(&body) {
        Ok(SubmittedFields(fields)) => fields,
        Err(error) => {
            tracing::warn!(
                form = %form,
                request_id = headers.request_id(),
                line = error.line(),
                column = error.column(),
                "Submission body rejected"
            );
            metrics::record_rejection(Rejection::MalformedBody.kind());
            return RejectionResponse(vec![Rejection::MalformedBody]).into_response();
        }
    };

    let request = SubmissionRequest {
        form: &form,
        identity: RateLimitKey::new(peer.ip().to_string()),
        fields: &fields,
    };

    match state.gateway.check_submission(&request).await {
        Ok(Outcome::Accepted(normalized)) => {
            let fields: Map<String, Value> = normalized
                .into_inner()
                .into_iter()
                .map(|(name, value)| (name, Value::String(value)))
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "accepted", "fields": fields })),
            )
                .into_response()
        }
        Ok(Outcome::Rejected(rejections)) => RejectionResponse(rejections).into_response(),
        Err(error) => error.into_response(),
    }
}

/// Submitted fields in body order. Unlike `serde_json::Map`, a repeated
/// key is kept, so the sanitizer can report it as a duplicate.
struct SubmittedFields(Vec<(String, String)>);

impl<'de> Deserialize<'de> for SubmittedFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = SubmittedFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object of fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, Value>()? {
                    if let Some(text) = field_text(value) {
                        fields.push((name, text));
                    }
                }
                Ok(SubmittedFields(fields))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// Scalars become field text; arrays, objects and null are dropped, so a
/// required field sent that way reports as missing.
fn field_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// `POST /webhooks/{name}`: raw body, webhook name as identity.
async fn webhook_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(names) = state.webhook_headers.get(&name) else {
        return crate::gateway::GatewayError::UnknownWebhook(name).into_response();
    };

    let request = WebhookRequest {
        webhook: &name,
        identity: RateLimitKey::new(name.clone()),
        envelope: WebhookEnvelope {
            payload: &body,
            signature: header_str(&headers, &names.signature),
            timestamp: header_str(&headers, &names.timestamp),
        },
    };

    tracing::debug!(
        webhook = %name,
        request_id = headers.request_id(),
        bytes = body.len(),
        "Webhook received"
    );

    match state.gateway.check_webhook(&request).await {
        Ok(Outcome::Accepted(())) => {
            (StatusCode::OK, Json(serde_json::json!({ "status": "accepted" }))).into_response()
        }
        Ok(Outcome::Rejected(rejections)) => RejectionResponse(rejections).into_response(),
        Err(error) => error.into_response(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
