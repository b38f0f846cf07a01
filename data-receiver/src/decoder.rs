//! Turns loosely typed wire records into typed rows.
//!
//! Hospital systems send values in whatever shape their export produced:
//! numbers as strings, dates with or without a time part, timestamps with or
//! without an offset. Each field is coerced to its declared type here so
//! nothing past this point deals with wire formats.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use row_store::{EntityDescriptor, FieldSpec, FieldType, Row, RowKey, Value};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use thiserror::Error;

/// A record as it arrives on the wire.
pub type RawRecord = serde_json::Map<String, JsonValue>;

/// Longest excerpt of an offending value quoted in an error.
const MAX_EXCERPT_CHARS: usize = 64;

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("missing required field {0}")]
    MissingField(String),

    #[error("field {0} cannot be null")]
    NullNotAllowed(String),

    #[error("field {field} expects {expected}, got {found}")]
    InvalidValue {
        field: String,
        expected: &'static str,
        found: String,
    },
}

/// A decoded record: one value per declared field plus its natural key.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    key: RowKey,
    values: Row,
}

impl EntityRecord {
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn values(&self) -> &Row {
        &self.values
    }

    pub fn into_parts(self) -> (RowKey, Row) {
        (self.key, self.values)
    }
}

/// Decodes `raw` against `descriptor`.
///
/// Fields the descriptor does not declare are ignored. Omitted fields take
/// their default, which is null unless one was configured.
pub fn decode(raw: &RawRecord, descriptor: &EntityDescriptor) -> Result<EntityRecord, DecodeError> {
    let mut values = Row::with_capacity(raw.len());

    for spec in descriptor.fields() {
        let value = match raw.get(&spec.name) {
            Some(json) => coerce(spec, json)?,
            None => spec.default.clone(),
        };

        if value.is_null() && !spec.nullable {
            return Err(match raw.get(&spec.name) {
                Some(_) => DecodeError::NullNotAllowed(spec.name.clone()),
                None => DecodeError::MissingField(spec.name.clone()),
            });
        }

        values.insert(spec.name.clone(), value);
    }

    let key = descriptor.key_of(&values);
    Ok(EntityRecord { key, values })
}

/// Coerces a single wire value to the declared type of `spec`.
///
/// A JSON null always coerces to [`Value::Null`]; nullability is enforced by
/// [`decode`].
pub fn coerce(spec: &FieldSpec, json: &JsonValue) -> Result<Value, DecodeError> {
    if json.is_null() {
        return Ok(Value::Null);
    }

    let coerced = match &spec.field_type {
        FieldType::Text { .. } => coerce_text(json),
        FieldType::Integer => coerce_integer(json),
        FieldType::Decimal { scale, .. } => coerce_decimal(json, *scale),
        FieldType::Date => coerce_date(json),
        FieldType::Timestamp => coerce_timestamp(json),
    };

    coerced.ok_or_else(|| DecodeError::InvalidValue {
        field: spec.name.clone(),
        expected: spec.field_type.name(),
        found: excerpt(json),
    })
}

fn coerce_text(json: &JsonValue) -> Option<Value> {
    match json {
        JsonValue::String(s) => Some(Value::Text(s.clone())),
        JsonValue::Number(n) => Some(Value::Text(n.to_string())),
        _ => None,
    }
}

fn coerce_integer(json: &JsonValue) -> Option<Value> {
    let integer = match json {
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => float_to_integer(n.as_f64()?)?,
        },
        JsonValue::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(Value::Integer(integer))
}

fn float_to_integer(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_decimal(json: &JsonValue, scale: u32) -> Option<Value> {
    let text = match json {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        _ => return None,
    };

    let mut decimal = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()?
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    decimal.rescale(scale);
    Some(Value::Decimal(decimal))
}

fn coerce_date(json: &JsonValue) -> Option<Value> {
    let JsonValue::String(s) = json else {
        return None;
    };
    let s = s.trim();

    // A date keeps the calendar day the sender wrote, whatever the offset
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.date_naive()))
        .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
        .map(Value::Date)
}

fn coerce_timestamp(json: &JsonValue) -> Option<Value> {
    let timestamp = match json {
        JsonValue::String(s) => parse_timestamp(s.trim())?,
        JsonValue::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?.naive_utc(),
        _ => return None,
    };
    Some(Value::Timestamp(timestamp))
}

/// Parses the timestamp shapes seen on the wire. Offsets are converted to UTC.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn excerpt(json: &JsonValue) -> String {
    let rendered = json.to_string();
    match rendered.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((end, _)) => format!("{}...", &rendered[..end]),
        None => rendered,
    }
}
