//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Webhook secrets are never read from the file; the loader resolves them
//! from the environment variable each webhook names.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::security::rate_limit::{PolicyError, RateLimitPolicy, DEFAULT_IDLE_MULTIPLIER};
use crate::security::rules::{ByteClass, FieldKind, FormSchema, ValidationRule};
use crate::security::store::FailurePolicy;
use crate::security::webhook::{
    WebhookSecret, WebhookVerifier, DEFAULT_MAX_CLOCK_SKEW_SECS, DEFAULT_TOLERANCE_SECS,
};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration for the reference server.
    pub listener: ListenerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Idle bucket reclamation.
    pub eviction: EvictionConfig,

    /// Rate limit channels.
    pub channels: Vec<ChannelConfig>,

    /// Submission forms and their field rules.
    pub forms: Vec<FormConfig>,

    /// Webhook senders.
    pub webhooks: Vec<WebhookConfig>,
}

impl GuardConfig {
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn webhook(&self, name: &str) -> Option<&WebhookConfig> {
        self.webhooks.iter().find(|w| w.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 64 * 1024,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is unset (e.g. "info", "request_guard=debug").
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Idle bucket eviction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Sweep interval in seconds.
    pub interval_secs: u64,

    /// A bucket is idle after this many full-refill periods untouched.
    pub idle_multiplier: u32,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            idle_multiplier: DEFAULT_IDLE_MULTIPLIER,
        }
    }
}

impl EvictionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// A named rate limit channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub name: String,

    /// Bucket size (maximum burst).
    pub capacity: f64,

    /// Tokens added per second.
    pub refill_per_sec: f64,

    /// Deadline for a shared store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Behaviour when the shared store times out or errors.
    #[serde(default)]
    pub on_store_failure: FailurePolicy,
}

fn default_store_timeout_ms() -> u64 {
    250
}

impl ChannelConfig {
    pub fn policy(&self) -> Result<RateLimitPolicy, PolicyError> {
        RateLimitPolicy::new(self.capacity, self.refill_per_sec)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// A submission form: its fields and the channel limiting it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormConfig {
    pub name: String,
    pub channel: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

impl FormConfig {
    pub fn schema(&self) -> FormSchema {
        self.fields
            .iter()
            .fold(FormSchema::new(), |schema, field| schema.field(&field.name, field.rule()))
    }
}

/// One declared form field.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldConfig {
    pub name: String,
    pub kind: FieldKind,

    /// Defaults per kind when unset.
    #[serde(default)]
    pub max_len: Option<usize>,

    /// Value ends up in an email or other protocol header.
    #[serde(default)]
    pub header_sensitive: bool,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default)]
    pub forbid: Vec<ByteClass>,
}

fn default_required() -> bool {
    true
}

impl FieldConfig {
    pub fn rule(&self) -> ValidationRule {
        let mut rule = ValidationRule::new(self.kind);
        if let Some(max_len) = self.max_len {
            rule = rule.max_len(max_len);
        }
        if self.header_sensitive {
            rule = rule.header_sensitive();
        }
        if !self.required {
            rule = rule.optional();
        }
        self.forbid.iter().fold(rule, |rule, class| rule.forbid(*class))
    }
}

/// A webhook sender.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub name: String,

    /// Environment variable holding the shared secret.
    pub secret_env: String,

    /// Resolved by the loader; never (de)serialized.
    #[serde(skip)]
    pub secret: WebhookSecret,

    /// Maximum payload age in seconds.
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,

    /// Allowance for sender clocks ahead of ours, in seconds.
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,

    /// Channel applied after verification, if any.
    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default = "default_signature_header")]
    pub signature_header: String,

    #[serde(default = "default_timestamp_header")]
    pub timestamp_header: String,
}

fn default_tolerance_secs() -> u64 {
    DEFAULT_TOLERANCE_SECS
}

fn default_max_clock_skew_secs() -> u64 {
    DEFAULT_MAX_CLOCK_SKEW_SECS
}

fn default_signature_header() -> String {
    "x-signature".to_string()
}

fn default_timestamp_header() -> String {
    "x-timestamp".to_string()
}

impl WebhookConfig {
    pub fn verifier(&self) -> WebhookVerifier {
        WebhookVerifier::new(self.secret.clone(), Duration::from_secs(self.tolerance_secs))
            .max_skew(Duration::from_secs(self.max_clock_skew_secs))
    }
}
