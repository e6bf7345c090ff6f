//! Quote escaping for SQL text.
//!
//! These helpers are for the rare statement text that has to be assembled
//! by hand. Prefer bound parameters.
//!
//! Nothing is allocated when the input holds no quote to escape.

use std::borrow::Cow;

use serde_json::Value;

/// Escape double quotes with a backslash: `a"b` becomes `a\"b`.
#[must_use]
pub fn escape_double_quotes(s: &str) -> Cow<'_, str> {
    if s.contains('"') {
        Cow::Owned(s.replace('"', "\\\""))
    } else {
        Cow::Borrowed(s)
    }
}

/// Escape single quotes by doubling them: `a'b` becomes `a''b`.
#[must_use]
pub fn escape_single_quotes(s: &str) -> Cow<'_, str> {
    if s.contains('\'') {
        Cow::Owned(s.replace('\'', "''"))
    } else {
        Cow::Borrowed(s)
    }
}

/// [`escape_double_quotes`] for JSON values. Non-strings pass through as the
/// same reference.
#[must_use]
pub fn escape_value_double(value: &Value) -> Cow<'_, Value> {
    escape_value(value, escape_double_quotes)
}

/// [`escape_single_quotes`] for JSON values. Non-strings pass through as the
/// same reference.
#[must_use]
pub fn escape_value_single(value: &Value) -> Cow<'_, Value> {
    escape_value(value, escape_single_quotes)
}

fn escape_value<'a>(value: &'a Value, escape: fn(&str) -> Cow<'_, str>) -> Cow<'a, Value> {
    match value {
        Value::String(s) => match escape(s) {
            Cow::Borrowed(_) => Cow::Borrowed(value),
            Cow::Owned(escaped) => Cow::Owned(Value::String(escaped)),
        },
        _ => Cow::Borrowed(value),
    }
}
