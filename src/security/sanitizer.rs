//! Input validation for untrusted string fields.
//!
//! # Responsibilities
//! - Reject CR/LF in values bound for protocol headers
//! - Enforce per-field length limits
//! - Check structural shape for emails and numbers
//! - Reject NUL and non-printable control characters in free text
//!
//! # Design Decisions
//! - Rejection, never stripping: a value is accepted as submitted or refused
//! - Pure functions; every field error is returned so callers can report all at once
//! - Normalization is limited to surrounding whitespace, email domain case and
//!   a leading `+` on numbers, and is idempotent

use serde::Serialize;
use thiserror::Error;

use crate::security::rules::{FieldKind, FormSchema, ValidationRule};

/// Why a field was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("value contains a carriage return or line feed")]
    HeaderInjectionAttempt,

    #[error("value is {actual} characters long, limit is {max}")]
    TooLong { max: usize, actual: usize },

    #[error("value is not a well-formed email address")]
    MalformedEmail,

    #[error("disallowed character at position {position}")]
    InvalidCharacter { position: usize },

    #[error("value is not a well-formed number")]
    MalformedNumber,

    #[error("required field is missing")]
    MissingField,

    #[error("field was submitted more than once")]
    DuplicateField,
}

/// A rejected field. Carries the field name, never the submitted value.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("field `{field}`: {reason}")]
pub struct FieldRejection {
    pub field: String,
    pub reason: RejectReason,
}

impl FieldRejection {
    fn new(field: &str, reason: RejectReason) -> Self {
        Self {
            field: field.to_string(),
            reason,
        }
    }
}

/// Accepted fields in schema declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedFields(Vec<(String, String)>);

impl NormalizedFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, String)> {
        self.0
    }
}

/// Outcome of validating a whole form. Never partially valid.
pub type ValidationResult = Result<NormalizedFields, Vec<FieldRejection>>;

/// Characters permitted in an unquoted local part besides alphanumerics and `.`.
const ATEXT: &str = "!#$%&'*+/=?^_`{|}~-";

const LOCAL_PART_MAX: usize = 64;
const DOMAIN_MAX: usize = 253;
const LABEL_MAX: usize = 63;

/// Validate a single field against its rule.
pub fn validate(field: &str, raw: &str, rule: &ValidationRule) -> Result<String, FieldRejection> {
    validate_value(raw, rule).map_err(|reason| FieldRejection::new(field, reason))
}

/// Validate every declared field of `schema` against the submitted pairs.
///
/// All declared fields are checked before returning. Submitted fields the
/// schema does not declare are dropped from the result.
pub fn validate_form<K, V>(schema: &FormSchema, submitted: &[(K, V)]) -> ValidationResult
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut accepted = Vec::with_capacity(schema.len());
    let mut rejected = Vec::new();

    for (name, rule) in schema.fields() {
        let mut values = submitted
            .iter()
            .filter(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_ref());

        match (values.next(), values.next()) {
            (None, _) if rule.required => {
                rejected.push(FieldRejection::new(name, RejectReason::MissingField));
            }
            (None, _) => {}
            (Some(_), Some(_)) => {
                rejected.push(FieldRejection::new(name, RejectReason::DuplicateField));
            }
            (Some(raw), None) => match validate(name, raw, rule) {
                Ok(value) => accepted.push((name.to_string(), value)),
                Err(rejection) => rejected.push(rejection),
            },
        }
    }

    for (name, _) in submitted {
        if schema.rule(name.as_ref()).is_none() {
            tracing::debug!(field = %name.as_ref(), "Dropping undeclared field");
        }
    }

    if rejected.is_empty() {
        Ok(NormalizedFields(accepted))
    } else {
        Err(rejected)
    }
}

fn validate_value(raw: &str, rule: &ValidationRule) -> Result<String, RejectReason> {
    if rule.rejects_line_breaks() && raw.contains(['\r', '\n']) {
        return Err(RejectReason::HeaderInjectionAttempt);
    }

    let length = raw.chars().count();
    if length > rule.max_len {
        return Err(RejectReason::TooLong {
            max: rule.max_len,
            actual: length,
        });
    }

    if let Some(position) = raw
        .chars()
        .position(|c| rule.forbidden.iter().any(|class| class.contains(c)))
    {
        return Err(RejectReason::InvalidCharacter { position });
    }

    match rule.kind {
        FieldKind::Email => normalize_email(raw).ok_or(RejectReason::MalformedEmail),
        FieldKind::FreeText => check_free_text(raw),
        FieldKind::Numeric => normalize_number(raw).ok_or(RejectReason::MalformedNumber),
    }
}

fn trim_blank(raw: &str) -> &str {
    raw.trim_matches(|c| c == ' ' || c == '\t')
}

fn check_free_text(raw: &str) -> Result<String, RejectReason> {
    match raw
        .chars()
        .position(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
    {
        Some(position) => Err(RejectReason::InvalidCharacter { position }),
        None => Ok(raw.to_string()),
    }
}

fn normalize_email(raw: &str) -> Option<String> {
    let value = trim_blank(raw);
    let (local, domain) = value.split_once('@')?;
    if !is_local_part(local) || !is_domain(domain) {
        return None;
    }
    Some(format!("{}@{}", local, domain.to_ascii_lowercase()))
}

fn is_local_part(local: &str) -> bool {
    !local.is_empty()
        && local.len() <= LOCAL_PART_MAX
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || ATEXT.contains(c))
}

fn is_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > DOMAIN_MAX {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= LABEL_MAX
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    // Checked above: split always yields at least two labels here.
    let tld = labels[labels.len() - 1];
    labels_ok && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

fn normalize_number(raw: &str) -> Option<String> {
    let value = trim_blank(raw);
    let (sign, unsigned) = match value.as_bytes().first() {
        Some(b'-') => ("-", &value[1..]),
        Some(b'+') => ("", &value[1..]),
        _ => ("", value),
    };

    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(integer) || !fraction.map_or(true, digits) {
        return None;
    }

    Some(format!("{}{}", sign, unsigned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rules::ByteClass;
    use proptest::prelude::*;

    fn reason(raw: &str, rule: &ValidationRule) -> RejectReason {
        validate("f", raw, rule).unwrap_err().reason
    }

    #[test]
    fn test_accepts_representative_emails() {
        let rule = ValidationRule::email();
        assert_eq!(validate("email", "a@b.com", &rule).unwrap(), "a@b.com");
        assert_eq!(
            validate("email", "first.last@sub.domain.org", &rule).unwrap(),
            "first.last@sub.domain.org"
        );
    }

    #[test]
    fn test_rejects_malformed_emails() {
        let rule = ValidationRule::email();
        for raw in ["a@b", "a b@c.com", "", "@b.com", "a@@b.com", "a@b@c.com", ".a@b.com",
            "a..b@c.com", "a@-b.com", "a@b.c", "a@b.c0m", "a@b..com", "a\u{7}@b.com"]
        {
            assert_eq!(reason(raw, &rule), RejectReason::MalformedEmail, "{:?}", raw);
        }
    }

    #[test]
    fn test_email_normalization_is_idempotent() {
        let rule = ValidationRule::email();
        let first = validate("email", "  Jo.Smith@Example.COM\t", &rule).unwrap();
        assert_eq!(first, "Jo.Smith@example.com");
        let second = validate("email", &first, &rule).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_header_injection_takes_precedence() {
        let rule = ValidationRule::email().header_sensitive().max_len(5);
        assert_eq!(
            reason("victim@example.com\r\nBcc: everyone@example.com", &rule),
            RejectReason::HeaderInjectionAttempt
        );
    }

    #[test]
    fn test_line_breaks_allowed_in_plain_free_text() {
        let rule = ValidationRule::free_text();
        let body = "Hello,\r\nI would like a quote.\n\tThanks";
        assert_eq!(validate("message", body, &rule).unwrap(), body);
    }

    #[test]
    fn test_free_text_rejects_null_and_controls() {
        let rule = ValidationRule::free_text();
        assert_eq!(reason("ab\0cd", &rule), RejectReason::InvalidCharacter { position: 2 });
        assert_eq!(reason("\u{1b}[31m", &rule), RejectReason::InvalidCharacter { position: 0 });
        assert!(validate("name", "Zoë Ünal", &rule).is_ok());
    }

    #[test]
    fn test_too_long_counts_characters() {
        let rule = ValidationRule::free_text().max_len(3);
        assert!(validate("f", "äöü", &rule).is_ok());
        assert_eq!(reason("äöüß", &rule), RejectReason::TooLong { max: 3, actual: 4 });
    }

    #[test]
    fn test_forbidden_classes() {
        let rule = ValidationRule::free_text().forbid(ByteClass::NonAscii);
        assert_eq!(reason("café", &rule), RejectReason::InvalidCharacter { position: 3 });
    }

    #[test]
    fn test_numeric() {
        let rule = ValidationRule::numeric();
        assert_eq!(validate("n", " +42 ", &rule).unwrap(), "42");
        assert_eq!(validate("n", "-0.25", &rule).unwrap(), "-0.25");
        for raw in ["", "-", "1.", ".5", "1e5", "12a", "1.2.3", "--1"] {
            assert_eq!(reason(raw, &rule), RejectReason::MalformedNumber, "{:?}", raw);
        }
    }

    #[test]
    fn test_form_aggregates_all_errors_in_declared_order() {
        let schema = FormSchema::new()
            .field("email", ValidationRule::email().header_sensitive())
            .field("subject", ValidationRule::free_text().header_sensitive())
            .field("phone", ValidationRule::numeric())
            .field("company", ValidationRule::free_text().optional());

        let submitted = [("subject", "Hi\nBcc: x@y.com"), ("email", "nope"), ("extra", "ignored")];
        let errors = validate_form(&schema, &submitted).unwrap_err();

        let got: Vec<_> = errors.iter().map(|e| (e.field.as_str(), e.reason.clone())).collect();
        assert_eq!(
            got,
            [
                ("email", RejectReason::MalformedEmail),
                ("subject", RejectReason::HeaderInjectionAttempt),
                ("phone", RejectReason::MissingField),
            ]
        );
    }

    #[test]
    fn test_form_drops_undeclared_and_rejects_duplicates() {
        let schema = FormSchema::new().field("email", ValidationRule::email());

        let ok = validate_form(&schema, &[("email", "a@b.com"), ("utm", "x")]).unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok.get("email"), Some("a@b.com"));
        assert_eq!(ok.get("utm"), None);

        let dup =
            validate_form(&schema, &[("email", "a@b.com"), ("email", "c@d.com")]).unwrap_err();
        assert_eq!(dup[0].reason, RejectReason::DuplicateField);
    }

    #[test]
    fn test_rejection_never_echoes_value() {
        let rule = ValidationRule::email();
        let err = validate("email", "secret-token-123", &rule).unwrap_err();
        assert!(!err.to_string().contains("secret-token-123"));
    }

    proptest! {
        #[test]
        fn prop_line_breaks_rejected_in_header_fields(
            prefix in ".{0,20}",
            brk in prop::sample::select(vec!["\r", "\n", "\r\n"]),
            suffix in ".{0,20}",
        ) {
            let raw = format!("{}{}{}", prefix, brk, suffix);
            for rule in [
                ValidationRule::email().header_sensitive(),
                ValidationRule::free_text().header_sensitive(),
                ValidationRule::numeric().header_sensitive(),
            ] {
                prop_assert_eq!(reason(&raw, &rule), RejectReason::HeaderInjectionAttempt);
            }
        }

        #[test]
        fn prop_accepted_values_are_fixed_points(raw in "[ -~]{0,40}") {
            let rules = [
                ValidationRule::email(),
                ValidationRule::free_text(),
                ValidationRule::numeric(),
            ];
            for rule in rules {
                if let Ok(first) = validate("f", &raw, &rule) {
                    prop_assert_eq!(validate("f", &first, &rule).unwrap(), first);
                }
            }
        }
    }
}
