use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::schema::PropertyType;

/// A property value after coercion to its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot coerce {found} to {expected}")]
pub struct CoercionError {
    pub expected: PropertyType,
    pub found: String,
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Coerce an untrusted JSON value to `target`.
///
/// `Ok(None)` means the value is absent (null or blank), which is not a
/// coercion failure.
pub fn coerce(raw: &Value, target: PropertyType) -> Result<Option<PropertyValue>, CoercionError> {
    if raw.is_null() {
        return Ok(None);
    }
    if let Value::String(s) = raw {
        if s.trim().is_empty() {
            return Ok(None);
        }
    }

    let coerced = match target {
        PropertyType::String => coerce_string(raw),
        PropertyType::Int => coerce_int(raw),
        PropertyType::Float => coerce_float(raw),
        PropertyType::Bool => coerce_bool(raw),
        PropertyType::Date => coerce_date(raw),
    };

    coerced.map(Some).ok_or_else(|| CoercionError {
        expected: target,
        found: describe(raw),
    })
}

fn coerce_string(raw: &Value) -> Option<PropertyValue> {
    match raw {
        Value::String(s) => Some(PropertyValue::String(s.trim().to_string())),
        Value::Number(n) => Some(PropertyValue::String(n.to_string())),
        Value::Bool(b) => Some(PropertyValue::String(b.to_string())),
        _ => None,
    }
}

fn coerce_int(raw: &Value) -> Option<PropertyValue> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral))
            .map(PropertyValue::Int),
        Value::String(s) => {
            let cleaned = strip_separators(s);
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().and_then(integral))
                .map(PropertyValue::Int)
        }
        _ => None,
    }
}

fn coerce_float(raw: &Value) -> Option<PropertyValue> {
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => strip_separators(s).parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(PropertyValue::Float(value))
}

fn coerce_bool(raw: &Value) -> Option<PropertyValue> {
    match raw {
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(PropertyValue::Bool(false)),
            Some(1) => Some(PropertyValue::Bool(true)),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(PropertyValue::Bool(true)),
            "false" | "no" | "n" | "0" => Some(PropertyValue::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_date(raw: &Value) -> Option<PropertyValue> {
    let Value::String(s) = raw else {
        return None;
    };
    let s = s.trim();

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .map(PropertyValue::Date)
}

fn integral(x: f64) -> Option<i64> {
    (x.is_finite() && x.fract() == 0.0 && x.abs() < i64::MAX as f64).then_some(x as i64)
}

fn strip_separators(s: &str) -> String {
    s.trim().chars().filter(|c| *c != ',' && *c != '_').collect()
}

fn describe(raw: &Value) -> String {
    let text = raw.to_string();
    if text.chars().count() > 60 {
        format!("{}...", text.chars().take(60).collect::<String>())
    } else {
        text
    }
}
