// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Canonical Values
//!
//! Every source adapter converts its native column types into this small,
//! closed set. Destinations only ever see these values.

use crate::domain::errors::{ExtractError, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical type of a column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalType {
    Text,
    Integer,
    /// Exact decimal, never a float.
    Decimal,
    /// Dates and timestamps, normalised to a naive UTC date-time.
    DateTime,
    Binary,
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Text => write!(f, "TEXT"),
            CanonicalType::Integer => write!(f, "INTEGER"),
            CanonicalType::Decimal => write!(f, "DECIMAL"),
            CanonicalType::DateTime => write!(f, "DATETIME"),
            CanonicalType::Binary => write!(f, "BINARY"),
        }
    }
}

/// One column of a result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub canonical_type: CanonicalType,
    /// What the backend called the type (e.g. "NUMBER(10,2)", "P").
    pub native_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, canonical_type: CanonicalType, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            canonical_type,
            native_type: native_type.into(),
        }
    }
}

/// A single canonical value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    Binary(Vec<u8>),
}

/// An ordered row of canonical values, aligned with the stream's columns.
pub type Row = Vec<Value>;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String form used for join-key matching and membership filters.
    ///
    /// Returns `None` for nulls, which never participate in a join.
    pub fn key_literal(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_field()),
        }
    }

    /// Text rendering for flat-file destinations. Nulls become empty strings,
    /// binaries are base64.
    pub fn to_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
            Value::Binary(b) => general_purpose::STANDARD.encode(b),
        }
    }

    /// Approximate in-memory size, used for throughput reporting.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Text(s) => s.len(),
            Value::Integer(_) => 8,
            Value::Decimal(_) => 16,
            Value::DateTime(_) => 8,
            Value::Binary(b) => b.len(),
        }
    }
}

/// Reads back a date-time key produced by `Value::key_literal`.
pub fn parse_key_datetime(key: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(key, DATETIME_FORMAT)
        .map_err(|e| ExtractError::Query(format!("join key '{}' is not a date-time: {}", key, e)))
}

/// Upper-case hex of a binary key produced by `Value::key_literal`.
pub fn key_hex(key: &str) -> Result<String> {
    let bytes = general_purpose::STANDARD
        .decode(key)
        .map_err(|e| ExtractError::Query(format!("join key '{}' is not base64: {}", key, e)))?;
    Ok(bytes.iter().map(|b| format!("{:02X}", b)).collect())
}
