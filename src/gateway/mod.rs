//! Security gateway: sequences the guards for one request.
//!
//! # Data Flow
//! ```text
//! Submission:
//!     SubmissionRequest → validate_form (every field, all errors)
//!         → Rejected(validation errors)            [no quota spent]
//!         → channel limiter (identity key, cost 1)
//!         → Accepted(NormalizedFields) | Rejected(RateLimitExceeded | StoreTimeout)
//!
//! Webhook:
//!     WebhookRequest → WebhookVerifier (window, HMAC)
//!         → Rejected(authentication error)         [no quota spent]
//!         → channel limiter, if configured
//!         → Accepted(()) | Rejected(RateLimitExceeded | StoreTimeout)
//! ```
//!
//! # Design Decisions
//! - Unknown form, webhook or channel names are `GatewayError`s: they are
//!   caller bugs, never client rejections
//! - One limiter per channel, shared by every form and webhook naming it
//! - The only suspension point is a shared store call

pub mod outcome;

pub use outcome::{Category, Outcome, Rejection};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::GuardConfig;
use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};
use crate::security::eviction::EvictionTask;
use crate::security::rate_limit::{
    PolicyError, RateLimitKey, RateLimitPolicy, RateLimiter, DEFAULT_IDLE_MULTIPLIER,
};
use crate::security::rules::FormSchema;
use crate::security::sanitizer::{validate_form, NormalizedFields};
use crate::security::store::{BucketStore, ChannelLimiter, FailurePolicy, StoreBackedLimiter};
use crate::security::webhook::{WebhookEnvelope, WebhookVerifier};

/// Default deadline for a shared store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error, PartialEq)]
pub enum GatewayError {
    #[error("unknown form `{0}`")]
    UnknownForm(String),

    #[error("unknown webhook `{0}`")]
    UnknownWebhook(String),

    #[error("`{owner}` references unknown channel `{channel}`")]
    UnknownChannel { owner: String, channel: String },

    #[error("channel `{channel}`: {source}")]
    Policy {
        channel: String,
        #[source]
        source: PolicyError,
    },
}

/// A form submission to check.
#[derive(Debug, Clone)]
pub struct SubmissionRequest<'a> {
    pub form: &'a str,
    /// Rate limit identity, e.g. the client address.
    pub identity: RateLimitKey,
    pub fields: &'a [(String, String)],
}

/// An inbound webhook call to check.
#[derive(Debug, Clone)]
pub struct WebhookRequest<'a> {
    pub webhook: &'a str,
    /// Rate limit identity, used only when the webhook names a channel.
    pub identity: RateLimitKey,
    pub envelope: WebhookEnvelope<'a>,
}

struct FormEntry {
    schema: FormSchema,
    limiter: ChannelLimiter,
}

struct WebhookEntry {
    verifier: WebhookVerifier,
    limiter: Option<ChannelLimiter>,
}

struct ChannelSpec {
    policy: RateLimitPolicy,
    store_timeout: Duration,
    on_failure: FailurePolicy,
}

/// Builder for [`SecurityGateway`].
pub struct GatewayBuilder {
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn BucketStore>>,
    idle_multiplier: u32,
    channels: Vec<(String, ChannelSpec)>,
    forms: Vec<(String, FormSchema, String)>,
    webhooks: Vec<(String, WebhookVerifier, Option<String>)>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            store: None,
            idle_multiplier: DEFAULT_IDLE_MULTIPLIER,
            channels: Vec::new(),
            forms: Vec::new(),
            webhooks: Vec::new(),
        }
    }

    /// Clock for in-process limiters.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Keep buckets in a shared store instead of in-process.
    pub fn store(mut self, store: Arc<dyn BucketStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn idle_multiplier(mut self, multiplier: u32) -> Self {
        self.idle_multiplier = multiplier;
        self
    }

    /// Declare a channel with the default store timeout, failing closed.
    pub fn channel(self, name: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.channel_with_failure(name, policy, DEFAULT_STORE_TIMEOUT, FailurePolicy::FailClosed)
    }

    /// Declare a channel with explicit shared store behaviour.
    pub fn channel_with_failure(
        mut self,
        name: impl Into<String>,
        policy: RateLimitPolicy,
        store_timeout: Duration,
        on_failure: FailurePolicy,
    ) -> Self {
        self.channels.push((
            name.into(),
            ChannelSpec {
                policy,
                store_timeout,
                on_failure,
            },
        ));
        self
    }

    pub fn form(
        mut self,
        name: impl Into<String>,
        schema: FormSchema,
        channel: impl Into<String>,
    ) -> Self {
        self.forms.push((name.into(), schema, channel.into()));
        self
    }

    pub fn webhook(
        mut self,
        name: impl Into<String>,
        verifier: WebhookVerifier,
        channel: Option<String>,
    ) -> Self {
        self.webhooks.push((name.into(), verifier, channel));
        self
    }

    pub fn build(self) -> Result<SecurityGateway, GatewayError> {
        let mut limiters: HashMap<String, ChannelLimiter> = HashMap::new();
        let mut local = Vec::new();

        for (name, channel) in self.channels {
            let limiter = match &self.store {
                Some(store) => ChannelLimiter::Shared(StoreBackedLimiter::new(
                    name.clone(),
                    channel.policy,
                    Arc::clone(store),
                    channel.store_timeout,
                    channel.on_failure,
                )),
                None => {
                    let clock = Arc::clone(&self.clock);
                    let limiter = Arc::new(
                        RateLimiter::with_clock(name.clone(), channel.policy, clock)
                            .idle_multiplier(self.idle_multiplier),
                    );
                    local.push(Arc::clone(&limiter));
                    ChannelLimiter::Local(limiter)
                }
            };
            limiters.insert(name, limiter);
        }

        let lookup = |owner: &str, channel: &str| {
            limiters
                .get(channel)
                .cloned()
                .ok_or_else(|| GatewayError::UnknownChannel {
                    owner: owner.to_string(),
                    channel: channel.to_string(),
                })
        };

        let mut forms = HashMap::new();
        for (name, schema, channel) in self.forms {
            let limiter = lookup(&name, &channel)?;
            forms.insert(name, FormEntry { schema, limiter });
        }

        let mut webhooks = HashMap::new();
        for (name, verifier, channel) in self.webhooks {
            let limiter = channel.as_deref().map(|c| lookup(&name, c)).transpose()?;
            webhooks.insert(name, WebhookEntry { verifier, limiter });
        }

        tracing::info!(
            forms = forms.len(),
            webhooks = webhooks.len(),
            channels = limiters.len(),
            shared_store = self.store.is_some(),
            "Security gateway built"
        );

        Ok(SecurityGateway {
            forms,
            webhooks,
            local,
            store: self.store,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the sanitizer, verifier and rate limiter in the required order.
///
/// Owns all rate limit state; construct once at start and share by
/// reference (or `Arc`) across handlers.
pub struct SecurityGateway {
    forms: HashMap<String, FormEntry>,
    webhooks: HashMap<String, WebhookEntry>,
    local: Vec<Arc<RateLimiter>>,
    store: Option<Arc<dyn BucketStore>>,
}

impl SecurityGateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build from validated configuration with resolved secrets.
    pub fn from_config(
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn BucketStore>>,
    ) -> Result<Self, GatewayError> {
        let mut builder = GatewayBuilder::new()
            .clock(clock)
            .idle_multiplier(config.eviction.idle_multiplier);
        if let Some(store) = store {
            builder = builder.store(store);
        }

        for channel in &config.channels {
            let policy = channel.policy().map_err(|source| GatewayError::Policy {
                channel: channel.name.clone(),
                source,
            })?;
            builder = builder.channel_with_failure(
                channel.name.clone(),
                policy,
                channel.store_timeout(),
                channel.on_store_failure,
            );
        }
        for form in &config.forms {
            builder = builder.form(form.name.clone(), form.schema(), form.channel.clone());
        }
        for webhook in &config.webhooks {
            builder = builder.webhook(
                webhook.name.clone(),
                webhook.verifier(),
                webhook.channel.clone(),
            );
        }

        builder.build()
    }

    /// Validate every declared field, then spend one token of the form's
    /// channel. Invalid submissions never touch the quota.
    pub async fn check_submission(
        &self,
        request: &SubmissionRequest<'_>,
    ) -> Result<Outcome<NormalizedFields>, GatewayError> {
        let form = self
            .forms
            .get(request.form)
            .ok_or_else(|| GatewayError::UnknownForm(request.form.to_string()))?;

        let fields = match validate_form(&form.schema, request.fields) {
            Ok(fields) => fields,
            Err(errors) => {
                let rejections = errors.into_iter().map(Rejection::from).collect();
                return Ok(reject(request.form, &request.identity, rejections));
            }
        };

        match consume(&form.limiter, &request.identity).await {
            None => {
                tracing::debug!(
                    form = request.form,
                    key = %request.identity,
                    "Submission accepted"
                );
                Ok(Outcome::Accepted(fields))
            }
            Some(rejection) => Ok(reject(request.form, &request.identity, vec![rejection])),
        }
    }

    /// Verify against the system clock, then apply the webhook's channel.
    pub async fn check_webhook(
        &self,
        request: &WebhookRequest<'_>,
    ) -> Result<Outcome<()>, GatewayError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check_webhook_at(request, now).await
    }

    /// As [`check_webhook`](Self::check_webhook) with an explicit Unix time.
    pub async fn check_webhook_at(
        &self,
        request: &WebhookRequest<'_>,
        now_unix: u64,
    ) -> Result<Outcome<()>, GatewayError> {
        let webhook = self
            .webhooks
            .get(request.webhook)
            .ok_or_else(|| GatewayError::UnknownWebhook(request.webhook.to_string()))?;

        if let Err(error) = webhook.verifier.verify_at(&request.envelope, now_unix) {
            return Ok(reject(request.webhook, &request.identity, vec![error.into()]));
        }

        if let Some(limiter) = &webhook.limiter {
            if let Some(rejection) = consume(limiter, &request.identity).await {
                return Ok(reject(request.webhook, &request.identity, vec![rejection]));
            }
        }

        tracing::debug!(webhook = request.webhook, "Webhook accepted");
        Ok(Outcome::Accepted(()))
    }

    /// Sweeper for the in-process limiters and, when configured, the
    /// shared store's in-process buckets.
    pub fn eviction_task(&self, interval: Duration) -> EvictionTask {
        let task = EvictionTask::new(self.local.clone(), interval);
        match &self.store {
            Some(store) => task.with_store(Arc::clone(store)),
            None => task,
        }
    }

    pub fn has_form(&self, name: &str) -> bool {
        self.forms.contains_key(name)
    }

    pub fn has_webhook(&self, name: &str) -> bool {
        self.webhooks.contains_key(name)
    }
}

async fn consume(limiter: &ChannelLimiter, key: &RateLimitKey) -> Option<Rejection> {
    match limiter.allow(key, 1).await {
        Ok(decision) if decision.allowed => None,
        Ok(decision) => Some(Rejection::RateLimitExceeded {
            retry_after: decision.retry_after,
        }),
        Err(error) => Some(error.into()),
    }
}

fn reject<T>(route: &str, key: &RateLimitKey, rejections: Vec<Rejection>) -> Outcome<T> {
    for rejection in &rejections {
        tracing::warn!(
            route,
            key = %key,
            kind = rejection.kind(),
            field = rejection.field(),
            "Request rejected"
        );
        metrics::record_rejection(rejection.kind());
    }
    Outcome::Rejected(rejections)
}
