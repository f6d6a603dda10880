//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (forms and webhooks reference existing channels)
//! - Validate value ranges (capacity, refill, tolerance, timeouts)
//! - Detect duplicate names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::security::rate_limit::PolicyError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{section}: entry with empty name")]
    EmptyName { section: &'static str },

    #[error("{section}: duplicate name `{name}`")]
    DuplicateName { section: &'static str, name: String },

    #[error("{section} `{owner}` references unknown channel `{channel}`")]
    UnknownChannel {
        section: &'static str,
        owner: String,
        channel: String,
    },

    #[error("channel `{channel}`: {reason}")]
    InvalidPolicy { channel: String, reason: PolicyError },

    #[error("channel `{channel}`: store_timeout_ms must be greater than 0")]
    ZeroStoreTimeout { channel: String },

    #[error("form `{form}` declares no fields")]
    EmptyForm { form: String },

    #[error("form `{form}`: field `{field}` declared twice")]
    DuplicateField { form: String, field: String },

    #[error("form `{form}`: field `{field}` has max_len 0")]
    ZeroMaxLen { form: String, field: String },

    #[error("webhook `{webhook}`: tolerance_secs must be greater than 0")]
    ZeroTolerance { webhook: String },

    #[error("webhook `{webhook}`: secret_env is empty")]
    EmptySecretEnv { webhook: String },

    #[error("eviction.interval_secs must be greater than 0")]
    ZeroEvictionInterval,

    #[error("{field}: `{value}` is not a socket address")]
    InvalidAddress { field: &'static str, value: String },
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);
    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }
    if config.eviction.interval_secs == 0 {
        errors.push(ValidationError::ZeroEvictionInterval);
    }

    check_names("channels", config.channels.iter().map(|c| c.name.as_str()), &mut errors);
    check_names("forms", config.forms.iter().map(|f| f.name.as_str()), &mut errors);
    check_names("webhooks", config.webhooks.iter().map(|w| w.name.as_str()), &mut errors);

    for channel in &config.channels {
        if let Err(reason) = channel.policy() {
            errors.push(ValidationError::InvalidPolicy {
                channel: channel.name.clone(),
                reason,
            });
        }
        if channel.store_timeout_ms == 0 {
            errors.push(ValidationError::ZeroStoreTimeout {
                channel: channel.name.clone(),
            });
        }
    }

    let channels: HashSet<&str> = config.channels.iter().map(|c| c.name.as_str()).collect();

    for form in &config.forms {
        if !channels.contains(form.channel.as_str()) {
            errors.push(ValidationError::UnknownChannel {
                section: "form",
                owner: form.name.clone(),
                channel: form.channel.clone(),
            });
        }
        if form.fields.is_empty() {
            errors.push(ValidationError::EmptyForm {
                form: form.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        for field in &form.fields {
            if !seen.insert(field.name.as_str()) {
                errors.push(ValidationError::DuplicateField {
                    form: form.name.clone(),
                    field: field.name.clone(),
                });
            }
            if field.max_len == Some(0) {
                errors.push(ValidationError::ZeroMaxLen {
                    form: form.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
    }

    for webhook in &config.webhooks {
        if webhook.tolerance_secs == 0 {
            errors.push(ValidationError::ZeroTolerance {
                webhook: webhook.name.clone(),
            });
        }
        if webhook.secret_env.trim().is_empty() {
            errors.push(ValidationError::EmptySecretEnv {
                webhook: webhook.name.clone(),
            });
        }
        if let Some(channel) = &webhook.channel {
            if !channels.contains(channel.as_str()) {
                errors.push(ValidationError::UnknownChannel {
                    section: "webhook",
                    owner: webhook.name.clone(),
                    channel: channel.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_names<'a>(
    section: &'static str,
    names: impl Iterator<Item = &'a str>,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyName { section });
        } else if !seen.insert(name) {
            errors.push(ValidationError::DuplicateName {
                section,
                name: name.to_string(),
            });
        }
    }
}
