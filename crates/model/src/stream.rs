use crate::core::data_type::DataType;
use crate::core::value::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot decode {0:?} as {1:?}")]
    Decode(String, DataType),
}

/// A declared column of a stream. The field owns the codecs that turn a
/// checkpoint string or a raw log value back into a typed [`Value`], so
/// parameter encoding always matches the column's wire type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Field {
            name: name.to_string(),
            data_type,
        }
    }

    /// Parses a checkpoint string (the `pk_val`/`cursor` wire form) back
    /// into a typed value. Unparseable temporal and binary inputs fall back
    /// to the raw string so that old checkpoints written in a prior format
    /// keep working.
    pub fn decode_state_value(&self, raw: &str) -> Result<Value, CodecError> {
        if raw.is_empty() || raw == "null" {
            return Ok(Value::Null);
        }
        match self.data_type {
            DataType::Int | DataType::BigInt => raw
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| CodecError::Decode(raw.to_string(), self.data_type)),
            DataType::Float | DataType::Double | DataType::Decimal => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| CodecError::Decode(raw.to_string(), self.data_type)),
            DataType::Boolean => raw
                .parse::<bool>()
                .map(Value::Boolean)
                .map_err(|_| CodecError::Decode(raw.to_string(), self.data_type)),
            DataType::Binary => Ok(BASE64
                .decode(raw)
                .map(Value::Bytes)
                .unwrap_or_else(|_| Value::String(raw.to_string()))),
            DataType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| CodecError::Decode(raw.to_string(), self.data_type)),
            DataType::Timestamp | DataType::TimestampTz => Ok(parse_timestamp(raw)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::String(raw.to_string()))),
            DataType::VarChar | DataType::Text | DataType::Json => {
                Ok(Value::String(raw.to_string()))
            }
        }
    }

    /// Decodes a raw log-event value. The log engine represents numbers as
    /// either native JSON numbers or strings, and binary columns as base64
    /// strings.
    pub fn decode_log_value(&self, raw: &serde_json::Value) -> Value {
        if raw.is_null() {
            return Value::Null;
        }
        match self.data_type {
            DataType::Int | DataType::BigInt => match raw {
                serde_json::Value::Number(n) => {
                    n.as_i64().map(Value::Int).unwrap_or(Value::Null)
                }
                serde_json::Value::String(s) => {
                    s.parse::<i64>().map(Value::Int).unwrap_or(Value::Null)
                }
                _ => Value::Null,
            },
            DataType::Float | DataType::Double | DataType::Decimal => match raw {
                serde_json::Value::Number(n) => {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
                serde_json::Value::String(s) => {
                    s.parse::<f64>().map(Value::Float).unwrap_or(Value::Null)
                }
                _ => Value::Null,
            },
            DataType::Boolean => match raw {
                serde_json::Value::Bool(b) => Value::Boolean(*b),
                serde_json::Value::Number(n) => Value::Boolean(n.as_i64() == Some(1)),
                _ => Value::Null,
            },
            DataType::Binary => match raw.as_str() {
                Some(s) => BASE64
                    .decode(s)
                    .map(Value::Bytes)
                    .unwrap_or_else(|_| Value::String(s.to_string())),
                None => Value::Null,
            },
            DataType::Date => match raw.as_str().and_then(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
            }) {
                Some(d) => Value::Date(d),
                None => Value::Null,
            },
            DataType::Timestamp | DataType::TimestampTz => match raw.as_str() {
                Some(s) => parse_timestamp(s)
                    .map(Value::Timestamp)
                    .unwrap_or_else(|| Value::String(s.to_string())),
                None => Value::Null,
            },
            DataType::VarChar | DataType::Text => match raw.as_str() {
                Some(s) => Value::String(s.to_string()),
                None => Value::String(raw.to_string()),
            },
            DataType::Json => Value::Json(raw.clone()),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // No offset: assume UTC. Accepts both "T" and space separators.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// How a stream is configured to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    CursorIncremental,
    Cdc,
}

/// A configured stream from the catalog. Read-only to the extraction core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub namespace: Option<String>,
    pub fields: Vec<Field>,
    pub primary_key: Vec<Field>,
    pub cursor: Option<Field>,
    pub sync_mode: SyncMode,
}

impl Stream {
    /// Identity used in state-store keys and log lines.
    pub fn id(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}
