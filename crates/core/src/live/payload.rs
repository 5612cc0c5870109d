//! Parse-once validation of loosely-typed inbound payloads.
//!
//! Event sources deliver rows as JSON where numbers may arrive stringified
//! and required fields may be null. [`Payload`] coerces and range-checks at
//! the ingestion boundary so records never carry unvalidated data.

use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::errors::MalformedEventError;

type Result<T> = std::result::Result<T, MalformedEventError>;

/// Borrowed view over a JSON object payload.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Payload<'a> {
    pub fn new(value: &'a Value) -> Result<Self> {
        value
            .as_object()
            .map(|fields| Self { fields })
            .ok_or(MalformedEventError::NotAnObject)
    }

    /// Present and not null.
    fn present(&self, field: &str) -> Option<&'a Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &str) -> Result<&'a Value> {
        self.present(field)
            .ok_or_else(|| MalformedEventError::MissingField {
                field: field.to_string(),
            })
    }

    /// Identity of the row. Strings and integers are accepted; blank strings,
    /// nulls and anything else count as missing.
    pub fn id(&self, field: &str) -> Result<String> {
        let missing = || MalformedEventError::MissingId {
            field: field.to_string(),
        };
        match self.present(field).ok_or_else(missing)? {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            _ => Err(missing()),
        }
    }

    pub fn string(&self, field: &str) -> Result<String> {
        match self.required(field)? {
            Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
            Value::String(_) => Err(MalformedEventError::MissingField {
                field: field.to_string(),
            }),
            other => Err(MalformedEventError::InvalidValue {
                field: field.to_string(),
                reason: format!("expected a string, got {}", other),
            }),
        }
    }

    pub fn optional_string(&self, field: &str) -> Result<Option<String>> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(_) => self.string(field).map(Some),
        }
    }

    /// A finite number, given either as a JSON number or a numeric string.
    pub fn number(&self, field: &str) -> Result<f64> {
        coerce_f64(field, self.required(field)?)
    }

    pub fn number_in(&self, field: &str, range: RangeInclusive<f64>) -> Result<f64> {
        let value = self.number(field)?;
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(MalformedEventError::OutOfRange {
                field: field.to_string(),
                value,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    pub fn decimal(&self, field: &str) -> Result<Decimal> {
        let raw = self.required(field)?;
        let not_a_number = || MalformedEventError::NotANumber {
            field: field.to_string(),
            value: raw.to_string(),
        };
        match raw {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Decimal::from(i))
                } else {
                    n.as_f64()
                        .and_then(|f| Decimal::try_from(f).ok())
                        .ok_or_else(not_a_number)
                }
            }
            Value::String(s) => Decimal::from_str(s.trim())
                .or_else(|_| Decimal::from_scientific(s.trim()))
                .map_err(|_| not_a_number()),
            _ => Err(not_a_number()),
        }
    }

    /// RFC 3339 string or epoch milliseconds.
    pub fn timestamp(&self, field: &str) -> Result<DateTime<Utc>> {
        let raw = self.required(field)?;
        let invalid = || MalformedEventError::InvalidTimestamp {
            field: field.to_string(),
            value: raw.to_string(),
        };
        match raw {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid()),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    pub fn optional_timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>> {
        match self.present(field) {
            None => Ok(None),
            Some(_) => self.timestamp(field).map(Some),
        }
    }
}

fn coerce_f64(field: &str, raw: &Value) -> Result<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| MalformedEventError::NotANumber {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

/// True when every filter matches the payload's top-level field exactly.
pub fn matches_filters<'f>(
    payload: &Value,
    filters: impl IntoIterator<Item = (&'f String, &'f Value)>,
) -> bool {
    filters
        .into_iter()
        .all(|(field, expected)| payload.get(field) == Some(expected))
}
