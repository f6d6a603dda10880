//! Inbound webhook authentication.
//!
//! # Wire Format
//! ```text
//! X-Timestamp: 1760400000
//! X-Signature: v1=<hex HMAC-SHA256(secret, "1760400000" || "." || body)>
//! ```
//! Several comma-separated `v1=` entries may be sent while the sender
//! rotates secrets; any one matching is enough.
//!
//! # Design Decisions
//! - Timestamp window checked before any MAC work
//! - Tags compared with `subtle`, every candidate, no early exit
//! - Replays inside the tolerance window are not detected here

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_SCHEME: &str = "v1";

/// Default maximum age of a signed payload.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Default allowance for sender clocks running ahead of ours.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 5;

const TAG_LEN: usize = 32;
const MAX_CANDIDATES: usize = 8;

/// Shared secret for one webhook sender. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyError {
    #[error("timestamp missing or outside the accepted window")]
    ExpiredOrFutureTimestamp,
    #[error("signature header missing or not in v1=<hex> form")]
    MalformedSignature,
    #[error("signature does not match payload")]
    SignatureMismatch,
}

/// Raw pieces of an inbound webhook call.
#[derive(Debug, Clone, Copy)]
pub struct WebhookEnvelope<'a> {
    pub payload: &'a [u8],
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
}

/// Verifier bound to one sender's secret and window.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: WebhookSecret,
    tolerance: Duration,
    max_skew: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: WebhookSecret, tolerance: Duration) -> Self {
        Self {
            secret,
            tolerance,
            max_skew: Duration::from_secs(DEFAULT_MAX_CLOCK_SKEW_SECS),
        }
    }

    pub fn max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn verify(&self, envelope: &WebhookEnvelope<'_>) -> Result<(), VerifyError> {
        self.verify_at(envelope, unix_now())
    }

    pub fn verify_at(
        &self,
        envelope: &WebhookEnvelope<'_>,
        now_unix: u64,
    ) -> Result<(), VerifyError> {
        verify_at(
            envelope.payload,
            envelope.signature,
            envelope.timestamp,
            &self.secret,
            self.tolerance,
            self.max_skew,
            now_unix,
        )
    }
}

/// Verify against the system clock with the default skew allowance.
pub fn verify(
    payload: &[u8],
    signature_header: Option<&str>,
    timestamp: Option<&str>,
    secret: &WebhookSecret,
    tolerance: Duration,
) -> Result<(), VerifyError> {
    verify_at(
        payload,
        signature_header,
        timestamp,
        secret,
        tolerance,
        Duration::from_secs(DEFAULT_MAX_CLOCK_SKEW_SECS),
        unix_now(),
    )
}

/// Verify with an explicit current time (seconds since the Unix epoch).
pub fn verify_at(
    payload: &[u8],
    signature_header: Option<&str>,
    timestamp: Option<&str>,
    secret: &WebhookSecret,
    tolerance: Duration,
    max_skew: Duration,
    now_unix: u64,
) -> Result<(), VerifyError> {
    let (raw_timestamp, timestamp) = parse_timestamp(timestamp)?;
    if timestamp.saturating_add(tolerance.as_secs()) < now_unix
        || timestamp > now_unix.saturating_add(max_skew.as_secs())
    {
        return Err(VerifyError::ExpiredOrFutureTimestamp);
    }

    let candidates = parse_signatures(signature_header)?;
    // The MAC covers the header text as sent, not a re-formatted number.
    let expected = compute_tag(payload, raw_timestamp, secret);

    let mut matched = Choice::from(0u8);
    for candidate in &candidates {
        matched |= expected[..].ct_eq(&candidate[..]);
    }

    if bool::from(matched) {
        Ok(())
    } else {
        Err(VerifyError::SignatureMismatch)
    }
}

/// Produce the signature header value for `payload` sent at `timestamp`.
pub fn sign(payload: &[u8], timestamp: u64, secret: &WebhookSecret) -> String {
    let tag = compute_tag(payload, &timestamp.to_string(), secret);
    format!("{}={}", SIGNATURE_SCHEME, hex::encode(tag))
}

fn compute_tag(payload: &[u8], timestamp: &str, secret: &WebhookSecret) -> [u8; TAG_LEN] {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    tag
}

fn parse_timestamp(raw: Option<&str>) -> Result<(&str, u64), VerifyError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VerifyError::ExpiredOrFutureTimestamp);
    }
    let seconds = raw.parse().map_err(|_| VerifyError::ExpiredOrFutureTimestamp)?;
    Ok((raw, seconds))
}

fn parse_signatures(header: Option<&str>) -> Result<Vec<[u8; TAG_LEN]>, VerifyError> {
    let header = header.ok_or(VerifyError::MalformedSignature)?;

    let mut candidates = Vec::new();
    for entry in header.split(',') {
        let Some((scheme, value)) = entry.trim().split_once('=') else {
            continue;
        };
        if scheme.trim() != SIGNATURE_SCHEME {
            continue;
        }
        let mut tag = [0u8; TAG_LEN];
        hex::decode_to_slice(value.trim(), &mut tag).map_err(|_| VerifyError::MalformedSignature)?;
        candidates.push(tag);
    }

    if candidates.is_empty() || candidates.len() > MAX_CANDIDATES {
        return Err(VerifyError::MalformedSignature);
    }
    Ok(candidates)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
