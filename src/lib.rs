//! Request guard library.
//!
//! Security validation for HTTP route handlers: input sanitization,
//! token bucket rate limiting and webhook signature verification, plus a
//! gateway that runs them in order for one request.

pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GuardConfig;
pub use gateway::{Outcome, Rejection, SecurityGateway, SubmissionRequest, WebhookRequest};
pub use http::GuardServer;
pub use lifecycle::Shutdown;
