//! Cross-site scripting guard.
//!
//! Every string leaf of a parameter structure is matched against a fixed
//! denylist: opening or closing `script`, `link`, `form`, `iframe`/`frame`,
//! `frameset` and `meta` tags, and template-injection braces (`{{`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::http::Parameters;

static SUSPICIOUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(script|link|form|i?frame|frameset|meta)|\{\{")
        .expect("injection pattern is valid")
});

/// Raised when a suspicious value is found.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("XSS injection attempt detected, stopping request processing")]
    InjectionDetected,
}

/// Recursively scans `value`, rejecting the first suspicious string.
///
/// ```
/// use rmvc::security::prevent_injection;
/// use serde_json::json;
///
/// assert!(prevent_injection(&json!({"q": "rust"})).is_ok());
/// assert!(prevent_injection(&json!({"q": ["ok", "<script>"]})).is_err());
/// ```
pub fn prevent_injection(value: &Value) -> Result<(), GuardError> {
    match value {
        Value::String(s) if SUSPICIOUS.is_match(s) => Err(GuardError::InjectionDetected),
        Value::Array(items) => items.iter().try_for_each(prevent_injection),
        Value::Object(map) => map.values().try_for_each(prevent_injection),
        _ => Ok(()),
    }
}

/// Scans every value of a parameter map.
pub fn prevent_injection_in(params: &Parameters) -> Result<(), GuardError> {
    params.values().try_for_each(prevent_injection)
}

/// Escapes `&`, `"`, `<` and `>` for inclusion in HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
