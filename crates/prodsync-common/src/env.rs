//! Typed access to environment settings
//!
//! Unset and blank variables fall back to the supplied default. A variable
//! that is set but cannot be parsed is an error rather than a silent default,
//! so a typo in a deployment surfaces at startup.

use crate::error::{CommonError, Result};
use std::str::FromStr;

/// Read a variable, treating blank values as unset.
pub fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a variable, falling back to `default` when unset.
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| CommonError::invalid_value(key, raw.as_str(), e)),
        None => Ok(default),
    }
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag_or(key: &str, default: bool) -> Result<bool> {
    let Some(raw) = var(key) else {
        return Ok(default);
    };

    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CommonError::invalid_value(key, raw, "expected a boolean")),
    }
}
