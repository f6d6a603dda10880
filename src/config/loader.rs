//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::security::webhook::WebhookSecret;

/// Path of the TOML configuration file.
pub const CONFIG_ENV: &str = "REQUEST_GUARD_CONFIG";

/// Overrides `listener.bind_address`.
pub const BIND_ENV: &str = "REQUEST_GUARD_BIND";

/// Overrides `observability.log_level`.
pub const LOG_ENV: &str = "REQUEST_GUARD_LOG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Names the variable, never its value.
    #[error("webhook `{webhook}`: environment variable {variable} is unset or empty")]
    MissingSecret { webhook: String, variable: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from `path` (or defaults when `None`) using the
/// process environment.
pub fn load_config(path: Option<&Path>) -> Result<GuardConfig, ConfigError> {
    let content = match path {
        Some(path) => fs::read_to_string(path)?,
        None => String::new(),
    };
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parse, apply overrides, validate and resolve secrets.
///
/// `env` looks up environment variables; tests pass a closure over a map.
pub fn parse_config<F>(content: &str, env: F) -> Result<GuardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: GuardConfig = toml::from_str(content)?;

    apply_env_overrides(&mut config, &env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    resolve_secrets(&mut config, &env)?;

    tracing::debug!(
        channels = config.channels.len(),
        forms = config.forms.len(),
        webhooks = config.webhooks.len(),
        "Configuration parsed"
    );
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut GuardConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = env(BIND_ENV).filter(|v| !v.is_empty()) {
        config.listener.bind_address = bind;
    }
    if let Some(level) = env(LOG_ENV).filter(|v| !v.is_empty()) {
        config.observability.log_level = level;
    }
}

fn resolve_secrets<F>(config: &mut GuardConfig, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for webhook in &mut config.webhooks {
        match env(&webhook.secret_env).filter(|v| !v.is_empty()) {
            Some(value) => webhook.secret = WebhookSecret::new(value.into_bytes()),
            None => {
                return Err(ConfigError::MissingSecret {
                    webhook: webhook.name.clone(),
                    variable: webhook.secret_env.clone(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [listener]
        bind_address = "127.0.0.1:8080"

        [[channels]]
        name = "contact"
        capacity = 5
        refill_per_sec = 0.1

        [[channels]]
        name = "webhooks"
        capacity = 100
        refill_per_sec = 10
        store_timeout_ms = 100
        on_store_failure = "fail_open"

        [[forms]]
        name = "contact"
        channel = "contact"

        [[forms.fields]]
        name = "email"
        kind = "email"
        header_sensitive = true

        [[forms.fields]]
        name = "message"
        kind = "free_text"
        max_len = 5000
        forbid = ["null"]

        [[webhooks]]
        name = "payments"
        secret_env = "PAYMENTS_WEBHOOK_SECRET"
        channel = "webhooks"
    "#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE, env(&[("PAYMENTS_WEBHOOK_SECRET", "s3cr3t")])).unwrap();

        assert_eq!(config.channels.len(), 2);
        let webhooks = config.channel("webhooks").unwrap();
        assert_eq!(webhooks.on_store_failure, crate::security::FailurePolicy::FailOpen);
        assert_eq!(config.channel("contact").unwrap().store_timeout_ms, 250);

        let schema = config.forms[0].schema();
        assert!(schema.rule("email").unwrap().header_sensitive);
        assert_eq!(schema.rule("message").unwrap().max_len, 5000);

        let webhook = config.webhook("payments").unwrap();
        assert_eq!(webhook.tolerance_secs, 300);
        assert_eq!(webhook.signature_header, "x-signature");
        assert!(!webhook.secret.is_empty());
    }

    #[test]
    fn test_missing_secret_names_variable_only() {
        let err = parse_config(SAMPLE, env(&[])).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ConfigError::MissingSecret { .. }));
        assert!(message.contains("PAYMENTS_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_secret_absent_from_debug_and_serialized_output() {
        let config =
            parse_config(SAMPLE, env(&[("PAYMENTS_WEBHOOK_SECRET", "s3cr3t-value")])).unwrap();
        assert!(!format!("{:?}", config).contains("s3cr3t-value"));
        assert!(!serde_json::to_string(&config).unwrap().contains("s3cr3t-value"));
    }

    #[test]
    fn test_env_overrides() {
        let config = parse_config(
            "",
            env(&[(BIND_ENV, "127.0.0.1:9999"), (LOG_ENV, "request_guard=trace")]),
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");
        assert_eq!(config.observability.log_level, "request_guard=trace");
    }

    #[test]
    fn test_validation_errors_reported() {
        let err = parse_config(
            "[[channels]]\nname = \"c\"\ncapacity = 0\nrefill_per_sec = 1\n",
            env(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nmax_body_bytes = 1024").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.listener.max_body_bytes, 1024);
        assert!(matches!(
            load_config(Some(Path::new("/nonexistent/guard.toml"))),
            Err(ConfigError::Io(_))
        ));
    }
}
