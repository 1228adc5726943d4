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

//! Core error definitions for the extraction engine.
//!
//! Errors fall into two families:
//! - **partition-level** errors (connection, fetch, query, sink write) that are
//!   recorded against one partition while the run carries on, and
//! - **run-fatal** errors (ledger unreadable or inconsistent, destination
//!   corrupt) that abort the whole extraction.

use std::time::Duration;
use thiserror::Error;

/// Error types encountered during an extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid extraction definition: {0}")]
    Validation(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    /// A network blip or timeout during a fetch. The only retryable kind.
    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    /// Malformed query, unsupported column type, missing privilege.
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Fetch still failing after {attempts} attempt(s) in {elapsed:?}: {last}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    #[error("Destination write failed: {0}")]
    SinkWrite(String),

    #[error("Destination is corrupt: {0}")]
    DestinationCorrupt(String),

    #[error("Progress ledger error: {0}")]
    Ledger(String),

    #[error("Progress ledger is inconsistent: {0}")]
    LedgerInconsistent(String),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// True when the same fetch may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::TransientFetch(_))
    }

    /// True when the error invalidates shared state and must abort the run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::DestinationCorrupt(_)
                | ExtractError::Ledger(_)
                | ExtractError::LedgerInconsistent(_)
        )
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        ExtractError::Ledger(format!("record encoding: {}", e))
    }
}

/// A specialized Result type for the extraction engine.
pub type Result<T> = std::result::Result<T, ExtractError>;
