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

//! In-memory source and destination used by the engine tests.

use crate::domain::entities::{KeyFilter, PartitionKey};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::mapping::map_oracle_type_name;
use crate::domain::values::{CanonicalType, Column, Row, Value};
use crate::ports::destination_port::{DestinationWriter, PartitionArtifact, PartitionTarget};
use crate::ports::source_port::{Cursor, FetchPage, SourceAdapter, SourceConnection, SourceRequest};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Clone)]
pub struct MemoryTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// `ID` (integer) and `NAME` (text) rows numbered from `first`.
pub fn numbered_table(first: i64, count: usize) -> MemoryTable {
    MemoryTable {
        columns: vec![
            Column::new("ID", CanonicalType::Integer, "NUMBER(10,0)"),
            Column::new("NAME", CanonicalType::Text, "VARCHAR2(40)"),
        ],
        rows: (0..count as i64)
            .map(|i| vec![Value::Integer(first + i), Value::Text(format!("row-{}", first + i))])
            .collect(),
    }
}

#[derive(Default)]
struct SourceState {
    fetches: HashMap<String, usize>,
    transient_once: HashSet<(String, u64)>,
    failing: HashSet<String>,
    opens: usize,
    fetch_delay: Option<Duration>,
    active_fetches: usize,
    max_active_fetches: usize,
}

/// Serves per-unit tables, applying key filters like a database would.
#[derive(Clone, Default)]
pub struct MemorySource {
    tables: Arc<HashMap<String, MemoryTable>>,
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new(tables: Vec<(&str, MemoryTable)>) -> Self {
        Self {
            tables: Arc::new(tables.into_iter().map(|(n, t)| (n.to_string(), t)).collect()),
            state: Arc::default(),
        }
    }

    /// The first fetch of `unit` at `offset` fails with a transient error.
    pub fn fail_transient_once(&self, unit: &str, offset: u64) {
        self.lock().transient_once.insert((unit.to_string(), offset));
    }

    /// Every fetch of `unit` fails with a non-retryable query error.
    pub fn fail_always(&self, unit: &str) {
        self.lock().failing.insert(unit.to_string());
    }

    /// Every successful fetch takes at least `delay`, so readers overlap.
    pub fn slow_fetches(&self, delay: Duration) {
        self.lock().fetch_delay = Some(delay);
    }

    /// Most fetches seen in progress at the same time.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.lock().max_active_fetches
    }

    pub fn fetch_count(&self, unit: &str) -> usize {
        self.lock().fetches.get(unit).copied().unwrap_or(0)
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state.lock().unwrap()
    }
}

impl SourceAdapter for MemorySource {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn open(&self) -> Result<Box<dyn SourceConnection>> {
        self.lock().opens += 1;
        Ok(Box::new(self.clone()))
    }

    fn map_native_type(&self, native: &str) -> Result<CanonicalType> {
        map_oracle_type_name(native)
    }
}

fn matches_filter(row: &Row, columns: &[Column], filter: &KeyFilter) -> bool {
    let idx: Vec<Option<usize>> = filter
        .columns
        .iter()
        .map(|f| columns.iter().position(|c| c.name.eq_ignore_ascii_case(f)))
        .collect();
    let tuple: Option<Vec<String>> = idx
        .iter()
        .map(|&i| i.and_then(|i| row[i].key_literal()))
        .collect();
    match tuple {
        Some(t) => filter.keys.contains(&t),
        None => false,
    }
}

impl SourceConnection for MemorySource {
    fn fetch(&mut self, request: &SourceRequest<'_>, cursor: &Cursor, batch_size: usize) -> Result<FetchPage> {
        let unit = request.unit.name.clone();
        let delay = {
            let mut state = self.lock();
            *state.fetches.entry(unit.clone()).or_default() += 1;
            if state.failing.contains(&unit) {
                return Err(ExtractError::Query(format!("ORA-00942: {} does not exist", unit)));
            }
            if state.transient_once.remove(&(unit.clone(), cursor.offset)) {
                return Err(ExtractError::TransientFetch("ORA-03113: end-of-file on communication channel".into()));
            }
            state.active_fetches += 1;
            state.max_active_fetches = state.max_active_fetches.max(state.active_fetches);
            state.fetch_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.lock().active_fetches -= 1;

        let table = self
            .tables
            .get(&unit)
            .ok_or_else(|| ExtractError::Query(format!("no table for {}", unit)))?;
        let rows: Vec<&Row> = table
            .rows
            .iter()
            .filter(|r| request.filter.map_or(true, |f| matches_filter(r, &table.columns, f)))
            .collect();

        let start = (cursor.offset as usize).min(rows.len());
        let end = (start + batch_size).min(rows.len());
        Ok(FetchPage {
            columns: table.columns.clone(),
            rows: rows[start..end].iter().map(|r| (*r).clone()).collect(),
            next: (end < rows.len()).then_some(Cursor { offset: end as u64 }),
        })
    }
}

#[derive(Default)]
struct DestinationState {
    open: HashMap<PartitionKey, Vec<Row>>,
    published: HashMap<PartitionKey, (String, Vec<Row>)>,
    pending_tables: HashMap<PartitionKey, String>,
    active: usize,
    max_active: usize,
    threads: HashSet<ThreadId>,
    corrupt_unit: Option<String>,
    failing_unit: Option<String>,
}

/// Keeps published partitions in memory and records writer concurrency.
#[derive(Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// `end_partition` for this unit reports destination-wide corruption.
    pub fn corrupt_on(&self, unit: &str) {
        self.lock().corrupt_unit = Some(unit.to_string());
    }

    /// `write_chunk` for this unit fails with a plain write error.
    pub fn fail_writes_for(&self, unit: &str) {
        self.lock().failing_unit = Some(unit.to_string());
    }

    pub fn rows(&self, key: &PartitionKey) -> Option<usize> {
        self.lock().published.get(key).map(|(_, r)| r.len())
    }

    pub fn unit_rows(&self, unit: &str) -> usize {
        self.lock()
            .published
            .iter()
            .filter(|(k, _)| k.unit == unit)
            .map(|(_, (_, r))| r.len())
            .sum()
    }

    pub fn published_count(&self, unit: &str) -> usize {
        self.lock().published.keys().filter(|k| k.unit == unit).count()
    }

    pub fn forget(&self, key: &PartitionKey) {
        self.lock().published.remove(key);
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.lock().max_active
    }

    /// Number of distinct threads that called into the destination.
    pub fn writer_threads(&self) -> usize {
        self.lock().threads.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap()
    }

    /// Counts overlapping destination calls and the threads making them.
    fn tracked<T>(&self, f: impl FnOnce(&mut DestinationState) -> Result<T>) -> Result<T> {
        {
            let mut s = self.lock();
            s.active += 1;
            s.max_active = s.max_active.max(s.active);
            s.threads.insert(thread::current().id());
        }
        thread::yield_now();
        let mut s = self.lock();
        let out = f(&mut *s);
        s.active -= 1;
        out
    }
}

impl DestinationWriter for MemoryDestination {
    fn begin_partition(&mut self, target: &PartitionTarget<'_>) -> Result<()> {
        self.tracked(|s| {
            s.published.remove(target.key);
            s.open.insert(target.key.clone(), Vec::new());
            s.pending_tables
                .insert(target.key.clone(), target.target_table.to_string());
            Ok(())
        })
    }

    fn write_chunk(&mut self, key: &PartitionKey, rows: &[Row]) -> Result<()> {
        self.tracked(|s| {
            if s.failing_unit.as_deref() == Some(key.unit.as_str()) {
                return Err(ExtractError::SinkWrite("No space left on device".into()));
            }
            s.open
                .get_mut(key)
                .ok_or_else(|| ExtractError::SinkWrite(format!("{} was not begun", key)))?
                .extend_from_slice(rows);
            Ok(())
        })
    }

    fn end_partition(&mut self, key: &PartitionKey) -> Result<PartitionArtifact> {
        self.tracked(|s| {
            if s.corrupt_unit.as_deref() == Some(key.unit.as_str()) {
                return Err(ExtractError::DestinationCorrupt("data directory vanished".into()));
            }
            let rows = s
                .open
                .remove(key)
                .ok_or_else(|| ExtractError::SinkWrite(format!("{} was not begun", key)))?;
            let table = s.pending_tables.remove(key).unwrap_or_default();
            let count = rows.len() as u64;
            s.published.insert(key.clone(), (table, rows));
            Ok(PartitionArtifact {
                path: PathBuf::from(key.to_string()),
                rows: count,
                bytes: 0,
            })
        })
    }

    fn abort_partition(&mut self, key: &PartitionKey) -> Result<()> {
        self.tracked(|s| {
            s.open.remove(key);
            s.pending_tables.remove(key);
            Ok(())
        })
    }

    fn has_partition(&self, key: &PartitionKey, _target_table: &str) -> Result<bool> {
        Ok(self.lock().published.contains_key(key))
    }
}
