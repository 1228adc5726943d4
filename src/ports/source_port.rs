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

//! # Source Port
//!
//! The capability every backend implements. The engine only ever calls
//! `open` and `fetch`; new backends are added by implementing these traits.

use crate::domain::entities::{ExtractionUnit, KeyFilter};
use crate::domain::errors::Result;
use crate::domain::values::{CanonicalType, Column, Row};

/// What to read: a unit's query or call, optionally narrowed by a key filter.
#[derive(Debug, Clone, Copy)]
pub struct SourceRequest<'a> {
    pub unit: &'a ExtractionUnit,
    pub filter: Option<&'a KeyFilter>,
}

/// Position within a result. `offset` counts rows already handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub offset: u64,
}

/// One page of rows. `next == None` means the result is exhausted.
#[derive(Debug, Clone)]
pub struct FetchPage {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub next: Option<Cursor>,
}

pub trait SourceAdapter: Send + Sync {
    /// Short backend label used in logs.
    fn kind(&self) -> &'static str;

    /// Opens a connection. Failures are `ExtractError::Connection`.
    fn open(&self) -> Result<Box<dyn SourceConnection>>;

    /// Maps a backend-native type name to the canonical set.
    fn map_native_type(&self, native: &str) -> Result<CanonicalType>;
}

/// Lives on the read thread that opened it.
pub trait SourceConnection {
    /// Reads up to `batch_size` rows starting at `cursor`.
    ///
    /// Transient network problems are `TransientFetch`; bad queries and
    /// unsupported types are `Query`. Fetching again with the same cursor
    /// after a failure must return the same rows.
    fn fetch(&mut self, request: &SourceRequest<'_>, cursor: &Cursor, batch_size: usize) -> Result<FetchPage>;
}
