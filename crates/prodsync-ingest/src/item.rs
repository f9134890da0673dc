//! Schema-less records and page envelopes from the remote source
//!
//! The remote source does not commit to a record schema, so items are kept
//! as raw JSON objects. Typed accessors report a missing field separately
//! from a field of the wrong type; the validator turns those into messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Why a typed field lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    /// Absent or `null`
    Missing,
    /// Present with a different JSON type
    WrongType { expected: &'static str },
}

/// One raw record as returned by the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    /// Wrap a JSON value, rejecting anything that is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Raw lookup, with `null` reported as absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, field: &str) -> Result<&str, FieldError> {
        match self.get(field) {
            None => Err(FieldError::Missing),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(FieldError::WrongType { expected: "string" }),
        }
    }

    pub fn f64_field(&self, field: &str) -> Result<f64, FieldError> {
        match self.get(field) {
            None => Err(FieldError::Missing),
            Some(Value::Number(n)) => n.as_f64().ok_or(FieldError::WrongType { expected: "number" }),
            Some(_) => Err(FieldError::WrongType { expected: "number" }),
        }
    }

    /// Integer lookup. Floats with a fractional part are rejected; `3.0` is accepted.
    pub fn i64_field(&self, field: &str) -> Result<i64, FieldError> {
        const WRONG: FieldError = FieldError::WrongType { expected: "integer" };

        match self.get(field) {
            None => Err(FieldError::Missing),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Ok(i)
                } else if n.is_u64() {
                    // above i64::MAX; saturate, the sign is what rules care about
                    Ok(i64::MAX)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                        _ => Err(WRONG),
                    }
                }
            }
            Some(_) => Err(WRONG),
        }
    }

    /// Identifier used to label quarantine records: `id` as a string, or a
    /// numeric `id` rendered as text.
    pub fn external_id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Raw entries in the order received. Non-object entries are kept so the
    /// validator can quarantine them.
    pub items: Vec<Value>,
    pub total_pages: Option<u64>,
}

/// Accepted keys for the items array, in lookup order.
pub const ITEMS_KEYS: [&str; 2] = ["items", "data"];

/// Accepted keys for the page count hint, in lookup order.
pub const TOTAL_PAGES_KEYS: [&str; 2] = ["total_pages", "totalPages"];

impl Page {
    /// Extract a page from a response body.
    ///
    /// Returns `None` when the body is not a JSON object. A missing or
    /// non-array items key yields an empty page. A page count that is not a
    /// non-negative integer is ignored.
    pub fn from_body(body: &Value) -> Option<Self> {
        let envelope = body.as_object()?;

        let items = ITEMS_KEYS
            .iter()
            .find_map(|key| envelope.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default();

        let total_pages = TOTAL_PAGES_KEYS
            .iter()
            .find_map(|key| envelope.get(*key).and_then(Value::as_u64));

        Some(Self { items, total_pages })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
