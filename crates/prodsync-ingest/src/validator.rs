//! Item validation
//!
//! A validator is a pure function of one item: it never touches storage and
//! returns the same verdict, with the same messages, for the same input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::item::{FieldError, Item};

/// Field name → human-readable violations, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors map holding a single message.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Verdict for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(ValidationErrors),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Validates one item against a fixed schema.
pub trait ItemValidator: Send + Sync {
    fn validate(&self, item: &Item) -> ValidationResult;
}

/// Constraint applied to a single field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Present, a string, and not blank
    RequiredString,
    /// Present, numeric, and `>= min`
    RequiredNumber { min: f64 },
    /// When present: an integer `>= min`
    OptionalInteger { min: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field: &'static str,
    pub rule: Rule,
}

/// Rule-list validator.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    rules: Vec<FieldRule>,
}

impl SchemaValidator {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// Rules for the third-party product feed.
    pub fn products() -> Self {
        Self::new(vec![
            FieldRule { field: "id", rule: Rule::RequiredString },
            FieldRule { field: "sku", rule: Rule::RequiredString },
            FieldRule { field: "title", rule: Rule::RequiredString },
            FieldRule { field: "price", rule: Rule::RequiredNumber { min: 0.0 } },
            FieldRule { field: "stock", rule: Rule::OptionalInteger { min: 0 } },
        ])
    }

    fn check(item: &Item, field: &str, rule: Rule) -> Option<String> {
        match rule {
            Rule::RequiredString => match item.str_field(field) {
                Ok(s) if s.trim().is_empty() => Some(required(field)),
                Ok(_) => None,
                Err(FieldError::Missing) => Some(required(field)),
                Err(FieldError::WrongType { .. }) => Some(format!("The {field} field must be a string.")),
            },
            Rule::RequiredNumber { min } => match item.f64_field(field) {
                Ok(v) if v < min => Some(at_least(field, min)),
                Ok(_) => None,
                Err(FieldError::Missing) => Some(required(field)),
                Err(FieldError::WrongType { .. }) => Some(format!("The {field} field must be a number.")),
            },
            Rule::OptionalInteger { min } => match item.i64_field(field) {
                Ok(v) if v < min => Some(at_least(field, min)),
                Ok(_) | Err(FieldError::Missing) => None,
                Err(FieldError::WrongType { .. }) => Some(format!("The {field} field must be an integer.")),
            },
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::products()
    }
}

impl ItemValidator for SchemaValidator {
    fn validate(&self, item: &Item) -> ValidationResult {
        let mut errors = ValidationErrors::new();

        for FieldRule { field, rule } in &self.rules {
            if let Some(message) = Self::check(item, field, *rule) {
                errors.add(*field, message);
            }
        }

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(errors)
        }
    }
}

/// Errors for a page entry that is not a JSON object at all.
pub fn not_an_object(value: &Value) -> ValidationErrors {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ValidationErrors::single("item", format!("The item must be an object, got {kind}."))
}

fn required(field: &str) -> String {
    format!("The {field} field is required.")
}

fn at_least(field: &str, min: impl std::fmt::Display) -> String {
    format!("The {field} field must be at least {min}.")
}
