//! Declarative structural contracts for stored records and inbound payloads.
//!
//! A [`Schema`] lists field rules; validation walks a document against it and
//! either collects every failing field path or stops at the first one. Strict
//! mode rejects fields the schema does not name, permissive mode drops them from
//! the returned document. Validation never touches the store.

mod catalog;

pub use catalog::{SchemaCatalog, SchemaKind, MIN_LISTING_IMAGES};

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use crate::store::Document;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Non-empty string.
    Text,
    /// Non-empty string or integer, canonicalised to a string.
    Identifier,
    Number { min: Option<f64> },
    Boolean,
    /// RFC 3339 instant.
    Timestamp,
    /// `YYYY-MM-DD`, or an RFC 3339 instant whose date part is used.
    Date,
    OneOf(&'static [&'static str]),
    List {
        items: Box<FieldKind>,
        min_len: usize,
        unique: bool,
    },
    Object(Schema),
}

impl FieldKind {
    pub fn list(items: FieldKind, min_len: usize, unique: bool) -> Self {
        Self::List {
            items: Box::new(items),
            min_len,
            unique,
        }
    }

    const fn expected(&self) -> &'static str {
        match self {
            Self::Text | Self::Timestamp | Self::Date | Self::OneOf(_) => "string",
            Self::Identifier => "string or integer",
            Self::Number { .. } => "number",
            Self::Boolean => "boolean",
            Self::List { .. } => "array",
            Self::Object(_) => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldRule {
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: &'static str,
    fields: Vec<FieldRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Unknown fields are reported.
    Strict,
    /// Unknown fields are discarded from the output.
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    AllIssues,
    FirstIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub mode: Mode,
    pub report: Report,
}

impl Validation {
    pub const STRICT: Self = Self {
        mode: Mode::Strict,
        report: Report::AllIssues,
    };
    pub const PERMISSIVE: Self = Self {
        mode: Mode::Permissive,
        report: Report::AllIssues,
    };

    pub const fn first_issue(self) -> Self {
        Self {
            mode: self.mode,
            report: Report::FirstIssue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    Missing,
    UnknownField,
    Empty,
    WrongType { expected: &'static str },
    NotAllowed { allowed: &'static [&'static str] },
    BelowMinimum { minimum: f64 },
    TooFewItems { minimum: usize },
    DuplicateItem,
    InvalidTimestamp,
    InvalidDate,
    /// Field is owned by the lifecycle managers and cannot be written directly.
    Managed,
    /// Value contradicts a referenced record.
    Mismatch { expected: String },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Missing => write!(f, "is required"),
            Problem::UnknownField => write!(f, "is not allowed"),
            Problem::Empty => write!(f, "must not be empty"),
            Problem::WrongType { expected } => write!(f, "must be a {expected}"),
            Problem::NotAllowed { allowed } => write!(f, "must be one of {}", allowed.join(", ")),
            Problem::BelowMinimum { minimum } => write!(f, "must be at least {minimum}"),
            Problem::TooFewItems { minimum } => write!(f, "must hold at least {minimum} items"),
            Problem::DuplicateItem => write!(f, "duplicates an earlier item"),
            Problem::InvalidTimestamp => write!(f, "must be an RFC 3339 timestamp"),
            Problem::InvalidDate => write!(f, "must be a YYYY-MM-DD date"),
            Problem::Managed => write!(f, "is managed by the record lifecycle"),
            Problem::Mismatch { expected } => write!(f, "must equal {expected}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub path: String,
    pub problem: Problem,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.path, self.problem)
    }
}

/// Every failing field path of one validation run (or only the first).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{schema} failed validation: {}", describe(.issues))]
pub struct ValidationError {
    pub schema: &'static str,
    pub issues: Vec<FieldIssue>,
}

fn describe(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(schema: &'static str, path: impl Into<String>, problem: Problem) -> Self {
        Self {
            schema,
            issues: vec![FieldIssue {
                path: path.into(),
                problem,
            }],
        }
    }

    pub fn paths(&self) -> Vec<&str> {
        self.issues.iter().map(|issue| issue.path.as_str()).collect()
    }

    pub fn has(&self, path: &str) -> bool {
        self.issues.iter().any(|issue| issue.path == path)
    }
}

/// Raised when a schema is malformed. Fatal at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaDefinitionError {
    #[error("schema `{schema}` declares `{path}` more than once")]
    DuplicateField { schema: &'static str, path: String },
    #[error("schema `{schema}` has an empty or dotted field name at `{path}`")]
    InvalidName { schema: &'static str, path: String },
    #[error("schema `{schema}` field `{path}` allows no values")]
    EmptyChoice { schema: &'static str, path: String },
    #[error("schema `{schema}` field `{path}` has a non-finite minimum")]
    InvalidMinimum { schema: &'static str, path: String },
}

impl Schema {
    pub fn new(name: &'static str, fields: Vec<FieldRule>) -> Self {
        Self { name, fields }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|rule| rule.name == name)
    }

    /// Check the definition itself; called once when the catalog is built.
    pub fn check(&self) -> Result<(), SchemaDefinitionError> {
        self.check_fields(self.name, "")
    }

    fn check_fields(&self, root: &'static str, prefix: &str) -> Result<(), SchemaDefinitionError> {
        let mut seen = HashSet::new();
        for rule in &self.fields {
            let path = join(prefix, rule.name);
            if rule.name.is_empty() || rule.name.contains('.') {
                return Err(SchemaDefinitionError::InvalidName { schema: root, path });
            }
            if !seen.insert(rule.name) {
                return Err(SchemaDefinitionError::DuplicateField { schema: root, path });
            }
            check_kind(&rule.kind, root, &path)?;
        }
        Ok(())
    }

    /// Validate `document`, returning it with identifiers canonicalised and, in
    /// permissive mode, unknown fields removed.
    pub fn validate(
        &self,
        document: &Document,
        options: Validation,
    ) -> Result<Document, ValidationError> {
        let mut walker = Walker {
            mode: options.mode,
            issues: Vec::new(),
        };
        let output = walker.object(self, document, "");

        if walker.issues.is_empty() {
            return Ok(output);
        }
        if options.report == Report::FirstIssue {
            walker.issues.truncate(1);
        }
        Err(ValidationError {
            schema: self.name,
            issues: walker.issues,
        })
    }
}

fn check_kind(kind: &FieldKind, root: &'static str, path: &str) -> Result<(), SchemaDefinitionError> {
    match kind {
        FieldKind::OneOf(allowed) if allowed.is_empty() => Err(SchemaDefinitionError::EmptyChoice {
            schema: root,
            path: path.to_string(),
        }),
        FieldKind::Number { min: Some(min) } if !min.is_finite() => {
            Err(SchemaDefinitionError::InvalidMinimum {
                schema: root,
                path: path.to_string(),
            })
        }
        FieldKind::List { items, .. } => check_kind(items, root, &format!("{path}[]")),
        FieldKind::Object(schema) => schema.check_fields(root, path),
        _ => Ok(()),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

struct Walker {
    mode: Mode,
    issues: Vec<FieldIssue>,
}

impl Walker {
    fn report(&mut self, path: String, problem: Problem) {
        self.issues.push(FieldIssue { path, problem });
    }

    fn object(&mut self, schema: &Schema, document: &Document, prefix: &str) -> Document {
        let mut output = Document::new();

        for rule in &schema.fields {
            let path = join(prefix, rule.name);
            match document.get(rule.name) {
                None | Some(Value::Null) => {
                    if rule.required {
                        self.report(path, Problem::Missing);
                    }
                }
                Some(value) => {
                    if let Some(normalized) = self.value(&rule.kind, value, path) {
                        output.insert(rule.name.to_string(), normalized);
                    }
                }
            }
        }

        if self.mode == Mode::Strict {
            for key in document.keys() {
                if schema.field(key).is_none() {
                    self.report(join(prefix, key), Problem::UnknownField);
                }
            }
        }

        output
    }

    fn value(&mut self, kind: &FieldKind, value: &Value, path: String) -> Option<Value> {
        let wrong_type = Problem::WrongType {
            expected: kind.expected(),
        };

        match (kind, value) {
            (FieldKind::Text, Value::String(text)) => {
                if text.trim().is_empty() {
                    self.report(path, Problem::Empty);
                    return None;
                }
                Some(value.clone())
            }
            (FieldKind::Identifier, Value::String(text)) => {
                if text.trim().is_empty() {
                    self.report(path, Problem::Empty);
                    return None;
                }
                Some(Value::String(text.trim().to_string()))
            }
            (FieldKind::Identifier, Value::Number(number)) if number.is_i64() || number.is_u64() => {
                Some(Value::String(number.to_string()))
            }
            (FieldKind::Number { min }, Value::Number(number)) => {
                let actual = number.as_f64().unwrap_or(f64::NAN);
                match min {
                    Some(minimum) if !(actual >= *minimum) => {
                        self.report(path, Problem::BelowMinimum { minimum: *minimum });
                        None
                    }
                    _ => Some(value.clone()),
                }
            }
            (FieldKind::Boolean, Value::Bool(_)) => Some(value.clone()),
            (FieldKind::Timestamp, Value::String(text)) => {
                if DateTime::parse_from_rfc3339(text).is_err() {
                    self.report(path, Problem::InvalidTimestamp);
                    return None;
                }
                Some(value.clone())
            }
            (FieldKind::Date, Value::String(text)) => {
                if parse_date(text).is_none() {
                    self.report(path, Problem::InvalidDate);
                    return None;
                }
                Some(value.clone())
            }
            (FieldKind::OneOf(allowed), Value::String(text)) => {
                if !allowed.contains(&text.as_str()) {
                    self.report(path, Problem::NotAllowed { allowed: *allowed });
                    return None;
                }
                Some(value.clone())
            }
            (
                FieldKind::List {
                    items,
                    min_len,
                    unique,
                },
                Value::Array(entries),
            ) => self.list(items, *min_len, *unique, entries, path),
            (FieldKind::Object(schema), Value::Object(map)) => {
                Some(Value::Object(self.object(schema, map, &path)))
            }
            _ => {
                self.report(path, wrong_type);
                None
            }
        }
    }

    fn list(
        &mut self,
        items: &FieldKind,
        min_len: usize,
        unique: bool,
        entries: &[Value],
        path: String,
    ) -> Option<Value> {
        let before = self.issues.len();
        if entries.len() < min_len {
            self.report(path.clone(), Problem::TooFewItems { minimum: min_len });
        }

        let mut output: Vec<Value> = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let item_path = format!("{path}[{index}]");
            if let Some(normalized) = self.value(items, entry, item_path.clone()) {
                if unique && output.contains(&normalized) {
                    self.report(item_path, Problem::DuplicateItem);
                    continue;
                }
                output.push(normalized);
            }
        }

        (self.issues.len() == before).then_some(Value::Array(output))
    }
}

/// Parse a calendar date from `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|instant| instant.date_naive())
        })
}
