//! HTTP protocol handling for the reference server.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, tower-http layers)
//!     → request.rs (request ID generation and propagation)
//!     → SecurityGateway (check_submission / check_webhook)
//!     → response.rs (Outcome → status, Retry-After, JSON body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use response::{status_for, RejectionResponse};
pub use server::GuardServer;
