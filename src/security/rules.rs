//! Field validation rules.
//!
//! Rules are built once at configuration time and never change afterwards.

use serde::{Deserialize, Serialize};

/// Structural kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Email,
    FreeText,
    Numeric,
}

/// Character classes a rule can forbid outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteClass {
    /// `\r` and `\n`.
    LineBreak,
    /// `\0`.
    Null,
    /// C0/C1 control characters other than tab and line breaks.
    Control,
    /// Anything outside 7-bit ASCII.
    NonAscii,
}

impl ByteClass {
    pub fn contains(self, c: char) -> bool {
        match self {
            ByteClass::LineBreak => c == '\r' || c == '\n',
            ByteClass::Null => c == '\0',
            ByteClass::Control => c.is_control() && !matches!(c, '\t' | '\r' | '\n'),
            ByteClass::NonAscii => !c.is_ascii(),
        }
    }
}

/// Default maximum length in characters when a rule does not set one.
pub const DEFAULT_MAX_LEN: usize = 1024;

/// Maximum length of an address per RFC 5321.
pub const EMAIL_MAX_LEN: usize = 254;

/// Validation rule for a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRule {
    pub kind: FieldKind,
    pub max_len: usize,
    /// Value is destined for a protocol header (email To/Subject etc.).
    pub header_sensitive: bool,
    pub forbidden: Vec<ByteClass>,
    pub required: bool,
}

impl ValidationRule {
    pub fn new(kind: FieldKind) -> Self {
        let max_len = match kind {
            FieldKind::Email => EMAIL_MAX_LEN,
            FieldKind::FreeText | FieldKind::Numeric => DEFAULT_MAX_LEN,
        };
        Self {
            kind,
            max_len,
            header_sensitive: false,
            forbidden: Vec::new(),
            required: true,
        }
    }

    pub fn email() -> Self {
        Self::new(FieldKind::Email)
    }

    pub fn free_text() -> Self {
        Self::new(FieldKind::FreeText)
    }

    pub fn numeric() -> Self {
        Self::new(FieldKind::Numeric)
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn header_sensitive(mut self) -> Self {
        self.header_sensitive = true;
        self
    }

    pub fn forbid(mut self, class: ByteClass) -> Self {
        if !self.forbidden.contains(&class) {
            self.forbidden.push(class);
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Whether CR/LF must be rejected for this field.
    pub fn rejects_line_breaks(&self) -> bool {
        self.header_sensitive || self.forbidden.contains(&ByteClass::LineBreak)
    }
}

/// Ordered set of declared fields for one submission route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSchema {
    fields: Vec<(String, ValidationRule)>,
}

impl FormSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. A later declaration with the same name replaces
    /// the earlier rule but keeps its position.
    pub fn field(mut self, name: impl Into<String>, rule: ValidationRule) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = rule,
            None => self.fields.push((name, rule)),
        }
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &ValidationRule)> {
        self.fields.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn rule(&self, name: &str) -> Option<&ValidationRule> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
