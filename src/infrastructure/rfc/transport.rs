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

//! The seam between the RFC adapter and a vendor RFC library.
//!
//! A binding implements `RfcTransport` (logon) and `RfcSession` (one call of
//! a table-read function module such as `RFC_READ_TABLE` or
//! `/BODS/RFC_READ_TABLE2`).

use crate::domain::errors::ExtractError;
use thiserror::Error;

/// Parameters of one table-read call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadTableCall {
    pub function_module: String,
    /// `QUERY_TABLE`
    pub query_table: String,
    /// `DELIMITER`; `None` asks for fixed-width rows.
    pub delimiter: Option<char>,
    /// `FIELDS`; empty means every field.
    pub fields: Vec<String>,
    /// `OPTIONS`, one where-clause line per entry.
    pub options: Vec<String>,
    /// `ROWCOUNT`
    pub row_count: u64,
    /// `ROWSKIPS`
    pub row_skips: u64,
}

/// One entry of the `FIELDS` table returned by the call.
#[derive(Debug, Clone, PartialEq)]
pub struct RfcField {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    /// ABAP internal type (`TYPE`), e.g. `C`, `P`, `D`.
    pub abap_type: String,
    /// Dictionary type, when the binding looked it up (e.g. `CURR`, `STRG`).
    pub dict_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadTableResponse {
    pub fields: Vec<RfcField>,
    /// `DATA` (or the table named by `OUT_TABLE`), one `WA` line per row.
    pub data: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RfcError {
    #[error("RFC communication failure: {0}")]
    Communication(String),

    #[error("RFC call timed out: {0}")]
    Timeout(String),

    #[error("RFC logon failed: {0}")]
    Logon(String),

    #[error("ABAP exception {key}: {message}")]
    Abap { key: String, message: String },
}

impl From<RfcError> for ExtractError {
    fn from(e: RfcError) -> Self {
        match e {
            RfcError::Communication(_) | RfcError::Timeout(_) => {
                ExtractError::TransientFetch(e.to_string())
            }
            RfcError::Logon(_) => ExtractError::Connection(e.to_string()),
            RfcError::Abap { .. } => ExtractError::Query(e.to_string()),
        }
    }
}

pub trait RfcSession {
    fn read_table(&mut self, call: &ReadTableCall) -> std::result::Result<ReadTableResponse, RfcError>;
}

pub trait RfcTransport: Send + Sync {
    fn connect(&self) -> std::result::Result<Box<dyn RfcSession>, RfcError>;
}
