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

//! # Type Mapping Logic
//!
//! This module is the "Translator". Every backend names its column types
//! differently; this module folds them into the canonical set
//! (`CanonicalType`) so the rest of the engine never sees a native type.
//!
//! We map in two directions:
//! 1. **Native -> Canonical**: Oracle (`NUMBER(10,0)`) and ABAP (`P`, `D`...)
//!    types become `Integer`, `Decimal`, `Text`, `DateTime` or `Binary`.
//! 2. **Canonical -> Arrow**: the physical type used by the Parquet writer.
//!
//! Types we cannot represent without loss are rejected with a `Query` error,
//! which fails the owning partition without retry.

use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::CanonicalType;
use arrow_schema::{DataType, TimeUnit};
use oracle::sql_type::OracleType;

/// ABAP dictionary types the table-read call cannot return faithfully.
pub const BANNED_ABAP_DICT_TYPES: &[&str] = &[
    "D16D", "D34D", "STRG", "D16R", "INT2", "D34R", "SSTR", "D16S", "D34S", "RSTR",
];

/// Maps a column type reported by the Oracle driver.
pub fn map_oracle_type(oracle_type: &OracleType) -> Result<CanonicalType> {
    match oracle_type {
        OracleType::Number(prec, scale) => Ok(map_number(*prec, *scale)),

        OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => {
            Ok(CanonicalType::Decimal)
        }

        OracleType::Int64 | OracleType::UInt64 => Ok(CanonicalType::Integer),

        OracleType::Char(_)
        | OracleType::NChar(_)
        | OracleType::Varchar2(_)
        | OracleType::NVarchar2(_)
        | OracleType::Long
        | OracleType::CLOB
        | OracleType::NCLOB
        | OracleType::Rowid => Ok(CanonicalType::Text),

        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => Ok(CanonicalType::DateTime),

        OracleType::Raw(_) | OracleType::BLOB => Ok(CanonicalType::Binary),

        other => Err(ExtractError::Query(format!(
            "unsupported Oracle column type {}",
            other
        ))),
    }
}

/// Maps an Oracle type given by name, e.g. `"NUMBER(10,2)"` or `"TIMESTAMP(6) WITH TIME ZONE"`.
pub fn map_oracle_type_name(name: &str) -> Result<CanonicalType> {
    let upper = name.trim().to_uppercase();
    let (base, args) = match upper.find('(') {
        Some(open) => {
            let close = upper.rfind(')').unwrap_or(upper.len());
            (upper[..open].trim(), &upper[open + 1..close.max(open + 1)])
        }
        None => (upper.as_str(), ""),
    };

    match base {
        "NUMBER" | "NUMERIC" | "DECIMAL" => {
            let mut parts = args.split(',').map(str::trim);
            let prec = parts.next().and_then(|p| p.parse::<u8>().ok()).unwrap_or(0);
            let scale = parts.next().and_then(|s| s.parse::<i8>().ok());
            match (prec, scale) {
                (0, _) => Ok(CanonicalType::Decimal),
                (p, None) => Ok(map_number(p, 0)),
                (p, Some(s)) => Ok(map_number(p, s)),
            }
        }
        "INTEGER" | "INT" | "SMALLINT" => Ok(CanonicalType::Decimal),
        "FLOAT" | "BINARY_FLOAT" | "BINARY_DOUBLE" => Ok(CanonicalType::Decimal),
        "CHAR" | "NCHAR" | "VARCHAR2" | "NVARCHAR2" | "VARCHAR" | "LONG" | "CLOB"
        | "NCLOB" | "ROWID" => Ok(CanonicalType::Text),
        "DATE" => Ok(CanonicalType::DateTime),
        "RAW" | "BLOB" => Ok(CanonicalType::Binary),
        _ if base.starts_with("TIMESTAMP") || upper.starts_with("TIMESTAMP") => {
            Ok(CanonicalType::DateTime)
        }
        _ => Err(ExtractError::Query(format!(
            "unsupported Oracle column type {}",
            name
        ))),
    }
}

fn map_number(prec: u8, scale: i8) -> CanonicalType {
    if scale == 0 && prec > 0 && prec <= 18 {
        CanonicalType::Integer
    } else {
        CanonicalType::Decimal
    }
}

/// Maps an ABAP internal type (the `TYPE` column of the `FIELDS` table),
/// optionally checking the dictionary type against the banned list.
pub fn map_abap_type(internal_type: &str, dict_type: Option<&str>) -> Result<CanonicalType> {
    if let Some(dt) = dict_type {
        let dt = dt.trim().to_uppercase();
        if BANNED_ABAP_DICT_TYPES.contains(&dt.as_str()) {
            return Err(ExtractError::Query(format!(
                "unsupported ABAP dictionary type {}",
                dt
            )));
        }
    }

    match internal_type.trim() {
        "C" | "N" | "T" | "g" => Ok(CanonicalType::Text),
        "D" => Ok(CanonicalType::DateTime),
        "P" | "F" => Ok(CanonicalType::Decimal),
        "I" | "b" | "s" | "8" => Ok(CanonicalType::Integer),
        "X" | "y" => Ok(CanonicalType::Binary),
        other => Err(ExtractError::Query(format!(
            "unsupported ABAP type '{}'",
            other
        ))),
    }
}

/// Returns the Arrow DataType for Parquet export.
///
/// Decimals are written as exact strings: arrow's `Decimal128` needs a fixed
/// scale per column, which neither backend guarantees.
pub fn map_canonical_to_arrow(canonical: CanonicalType) -> DataType {
    match canonical {
        CanonicalType::Text => DataType::Utf8,
        CanonicalType::Integer => DataType::Int64,
        CanonicalType::Decimal => DataType::Utf8,
        CanonicalType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
        CanonicalType::Binary => DataType::Binary,
    }
}
