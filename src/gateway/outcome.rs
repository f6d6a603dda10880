//! Gateway outcomes and the rejection taxonomy.

use std::time::Duration;
use thiserror::Error;

use crate::security::sanitizer::{FieldRejection, RejectReason};
use crate::security::store::StoreError;
use crate::security::webhook::VerifyError;

/// Result of running the guards over one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Accepted(T),
    Rejected(Vec<Rejection>),
}

impl<T> Outcome<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    /// Empty when accepted.
    pub fn rejections(&self) -> &[Rejection] {
        match self {
            Outcome::Accepted(_) => &[],
            Outcome::Rejected(rejections) => rejections,
        }
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            Outcome::Accepted(value) => Some(value),
            Outcome::Rejected(_) => None,
        }
    }
}

/// Broad class of a rejection, which decides how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    /// Malformed input; resend corrected data.
    Validation,
    /// Quota exhausted; retry later.
    RateLimit,
    /// Shared store unavailable; retry later.
    Infrastructure,
    /// Unauthenticated webhook; needs a freshly signed payload.
    Authentication,
}

/// Every way the gateway can refuse a request.
///
/// Carries field names and retry hints only; never submitted values,
/// secrets or bucket state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("field `{field}`: value contains a carriage return or line feed")]
    HeaderInjectionAttempt { field: String },

    #[error("field `{field}`: value is {actual} characters long, limit is {max}")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("field `{field}`: value is not a well-formed email address")]
    MalformedEmail { field: String },

    #[error("field `{field}`: disallowed character at position {position}")]
    InvalidCharacter { field: String, position: usize },

    #[error("field `{field}`: value is not a well-formed number")]
    MalformedNumber { field: String },

    #[error("field `{field}`: required field is missing")]
    MissingField { field: String },

    #[error("field `{field}`: submitted more than once")]
    DuplicateField { field: String },

    #[error("request body is not a JSON object of fields")]
    MalformedBody,

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    #[error("webhook signature does not match payload")]
    SignatureMismatch,

    #[error("webhook signature header is malformed")]
    MalformedSignature,

    #[error("webhook timestamp missing or outside the accepted window")]
    ExpiredOrFutureTimestamp,

    #[error("rate limit store unavailable")]
    StoreTimeout,
}

impl Rejection {
    /// Stable snake_case identifier, used in responses and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::HeaderInjectionAttempt { .. } => "header_injection_attempt",
            Rejection::TooLong { .. } => "too_long",
            Rejection::MalformedEmail { .. } => "malformed_email",
            Rejection::InvalidCharacter { .. } => "invalid_character",
            Rejection::MalformedNumber { .. } => "malformed_number",
            Rejection::MissingField { .. } => "missing_field",
            Rejection::DuplicateField { .. } => "duplicate_field",
            Rejection::MalformedBody => "malformed_body",
            Rejection::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Rejection::SignatureMismatch => "signature_mismatch",
            Rejection::MalformedSignature => "malformed_signature",
            Rejection::ExpiredOrFutureTimestamp => "expired_or_future_timestamp",
            Rejection::StoreTimeout => "store_timeout",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Rejection::HeaderInjectionAttempt { field }
            | Rejection::TooLong { field, .. }
            | Rejection::MalformedEmail { field }
            | Rejection::InvalidCharacter { field, .. }
            | Rejection::MalformedNumber { field }
            | Rejection::MissingField { field }
            | Rejection::DuplicateField { field } => Some(field),
            _ => None,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Rejection::RateLimitExceeded { .. } => Category::RateLimit,
            Rejection::StoreTimeout => Category::Infrastructure,
            Rejection::SignatureMismatch
            | Rejection::MalformedSignature
            | Rejection::ExpiredOrFutureTimestamp => Category::Authentication,
            _ => Category::Validation,
        }
    }

    /// Whether resending the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), Category::RateLimit | Category::Infrastructure)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Rejection::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<FieldRejection> for Rejection {
    fn from(rejection: FieldRejection) -> Self {
        let field = rejection.field;
        match rejection.reason {
            RejectReason::HeaderInjectionAttempt => Rejection::HeaderInjectionAttempt { field },
            RejectReason::TooLong { max, actual } => Rejection::TooLong { field, max, actual },
            RejectReason::MalformedEmail => Rejection::MalformedEmail { field },
            RejectReason::InvalidCharacter { position } => {
                Rejection::InvalidCharacter { field, position }
            }
            RejectReason::MalformedNumber => Rejection::MalformedNumber { field },
            RejectReason::MissingField => Rejection::MissingField { field },
            RejectReason::DuplicateField => Rejection::DuplicateField { field },
        }
    }
}

impl From<VerifyError> for Rejection {
    fn from(error: VerifyError) -> Self {
        match error {
            VerifyError::ExpiredOrFutureTimestamp => Rejection::ExpiredOrFutureTimestamp,
            VerifyError::MalformedSignature => Rejection::MalformedSignature,
            VerifyError::SignatureMismatch => Rejection::SignatureMismatch,
        }
    }
}

impl From<StoreError> for Rejection {
    fn from(_: StoreError) -> Self {
        Rejection::StoreTimeout
    }
}
