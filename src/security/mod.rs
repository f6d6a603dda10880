//! Security guards.
//!
//! # Data Flow
//! ```text
//! Submission:
//!     → sanitizer.rs (validate every declared field against rules.rs)
//!     → rate_limit.rs / store.rs (per-identity token bucket)
//!
//! Webhook:
//!     → webhook.rs (timestamp window, HMAC-SHA256, constant-time compare)
//!     → rate_limit.rs / store.rs (optional, per channel)
//! ```
//!
//! # Design Decisions
//! - Each guard is usable on its own; none reads another's state
//! - Sanitizer and verifier hold no mutable state
//! - Rate limit state is owned by limiter objects, never global
//! - Fail closed: store failures deny unless configured otherwise

pub mod clock;
pub mod eviction;
pub mod rate_limit;
pub mod rules;
pub mod sanitizer;
pub mod store;
pub mod webhook;

pub use clock::{Clock, ManualClock, SystemClock};
pub use eviction::EvictionTask;
pub use rate_limit::{
    Decision, PolicyError, RateLimitKey, RateLimitPolicy, RateLimiter, TokenBucket,
};
pub use rules::{ByteClass, FieldKind, FormSchema, ValidationRule};
pub use sanitizer::{
    validate, validate_form, FieldRejection, NormalizedFields, RejectReason, ValidationResult,
};
pub use store::{
    BucketStore, ChannelLimiter, FailurePolicy, InMemoryStore, StoreBackedLimiter, StoreError,
};
pub use webhook::{
    sign, verify, verify_at, VerifyError, WebhookEnvelope, WebhookSecret, WebhookVerifier,
};
