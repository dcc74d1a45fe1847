//! Value factories
//!
//! The codec stops at [`RawValue`]; turning that into an application value is
//! the job of a [`ValueFactory`] supplied by the caller.

use super::codec::{DateTimeValue, RawValue, TimeValue};
use super::constants::{column_type, BINARY_COLLATION};
use super::message::ColumnDefinition;
use crate::{Error, Result};
use bytes::Bytes;

/// Converts decoded wire values into caller-owned values
pub trait ValueFactory {
    /// Produced value type
    type Output;

    /// Build a value for `column` from `raw`
    fn make(&self, column: &ColumnDefinition, raw: RawValue<'_>) -> Result<Self::Output>;
}

/// Owned intermediate value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// DATE, DATETIME or TIMESTAMP
    DateTime(DateTimeValue),
    /// TIME
    Time(TimeValue),
    /// Everything else, as sent by the server
    Bytes(Bytes),
}

impl Value {
    /// Returns true for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view, parsing text-protocol bytes if needed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Float view, parsing text-protocol bytes if needed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// UTF-8 view of byte values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Raw bytes view
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Factory producing [`Value`]s, copying byte windows out of the packet
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnedValueFactory;

impl ValueFactory for OwnedValueFactory {
    type Output = Value;

    fn make(&self, _column: &ColumnDefinition, raw: RawValue<'_>) -> Result<Value> {
        Ok(match raw {
            RawValue::Null => Value::Null,
            RawValue::Int(v) => Value::Int(v),
            RawValue::UInt(v) => Value::UInt(v),
            RawValue::Float(v) => Value::Float(v),
            RawValue::Double(v) => Value::Double(v),
            RawValue::DateTime(v) => Value::DateTime(v),
            RawValue::Time(v) => Value::Time(v),
            RawValue::Bytes(b) => Value::Bytes(Bytes::copy_from_slice(b)),
        })
    }
}

/// Factory producing `serde_json::Value`s
///
/// JSON columns are parsed, numbers stay numbers, temporal values become ISO-8601
/// strings and binary strings are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueFactory;

impl ValueFactory for JsonValueFactory {
    type Output = serde_json::Value;

    fn make(&self, column: &ColumnDefinition, raw: RawValue<'_>) -> Result<serde_json::Value> {
        use serde_json::Value as Json;
        Ok(match raw {
            RawValue::Null => Json::Null,
            RawValue::Int(v) => Json::from(v),
            RawValue::UInt(v) => Json::from(v),
            RawValue::Float(v) => Json::from(f64::from(v)),
            RawValue::Double(v) => Json::from(v),
            RawValue::DateTime(v) => Json::String(format_datetime(&v, column.column_type)),
            RawValue::Time(v) => Json::String(format_time(&v)),
            RawValue::Bytes(b) if column.column_type == column_type::JSON => {
                serde_json::from_slice(b).map_err(|e| {
                    Error::Protocol(format!("invalid JSON in column '{}': {}", column.name, e))
                })?
            }
            RawValue::Bytes(b) => {
                if column.character_set == BINARY_COLLATION && !column.is_numeric() {
                    return Err(Error::Protocol(format!(
                        "binary column '{}' has no JSON representation",
                        column.name
                    )));
                }
                let text = std::str::from_utf8(b).map_err(|e| {
                    Error::Protocol(format!("invalid UTF-8 in column '{}': {}", column.name, e))
                })?;
                if column.is_numeric() {
                    text.parse::<serde_json::Number>()
                        .map(Json::Number)
                        .unwrap_or_else(|_| Json::String(text.to_string()))
                } else {
                    Json::String(text.to_string())
                }
            }
        })
    }
}

fn format_datetime(v: &DateTimeValue, col_type: u8) -> String {
    let date = format!("{:04}-{:02}-{:02}", v.year, v.month, v.day);
    if col_type == column_type::DATE {
        return date;
    }
    let mut s = format!("{}T{:02}:{:02}:{:02}", date, v.hour, v.minute, v.second);
    if v.nanosecond != 0 {
        s.push_str(&format!(".{:06}", v.nanosecond / 1000));
    }
    s
}

fn format_time(v: &TimeValue) -> String {
    let sign = if v.negative { "-" } else { "" };
    let mut s = format!("{}{:02}:{:02}:{:02}", sign, v.hours, v.minutes, v.seconds);
    if v.nanosecond != 0 {
        s.push_str(&format!(".{:06}", v.nanosecond / 1000));
    }
    s
}
