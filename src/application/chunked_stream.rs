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

//! # Chunked Stream
//!
//! Pulls one partition's rows from a source connection in chunks of at most
//! `chunk_size` rows. The sequence is lazy, finite and cannot be restarted:
//! after an error or the last chunk, `next()` returns `None`.

use crate::application::retry::RetryPolicy;
use crate::domain::entities::{Chunk, PartitionKey};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::events::{CancellationToken, EventSink, ProgressEvent};
use crate::domain::values::Column;
use crate::ports::source_port::{Cursor, SourceConnection, SourceRequest};
use log::{debug, warn};

/// Shared collaborators of every stream in a run.
#[derive(Clone, Copy)]
pub struct StreamContext<'a> {
    pub retry: &'a RetryPolicy,
    pub cancel: &'a CancellationToken,
    pub events: &'a EventSink,
}

pub struct ChunkedStream<'a> {
    conn: &'a mut dyn SourceConnection,
    request: SourceRequest<'a>,
    key: &'a PartitionKey,
    chunk_size: usize,
    ctx: StreamContext<'a>,
    /// `None` once the source is exhausted, the row limit is reached, or a
    /// fetch failed for good.
    cursor: Option<Cursor>,
    emitted: u64,
    sequence: u64,
    columns: Vec<Column>,
    retries: u32,
}

impl<'a> ChunkedStream<'a> {
    pub fn new(
        conn: &'a mut dyn SourceConnection,
        request: SourceRequest<'a>,
        key: &'a PartitionKey,
        chunk_size: usize,
        ctx: StreamContext<'a>,
    ) -> Self {
        Self {
            conn,
            request,
            key,
            chunk_size: chunk_size.max(1),
            ctx,
            cursor: Some(Cursor::default()),
            emitted: 0,
            sequence: 0,
            columns: Vec::new(),
            retries: 0,
        }
    }

    /// Columns reported by the source; empty until the first fetch returns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Fetch retries performed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn rows_emitted(&self) -> u64 {
        self.emitted
    }

    fn fetch_next(&mut self) -> Option<Result<Chunk>> {
        loop {
            let cursor = self.cursor?;
            if self.ctx.cancel.is_cancelled() {
                self.cursor = None;
                return Some(Err(ExtractError::Cancelled));
            }

            let want = match self.request.unit.row_limit {
                Some(limit) => {
                    let remaining = limit.saturating_sub(self.emitted);
                    if remaining == 0 {
                        self.cursor = None;
                        return None;
                    }
                    self.chunk_size.min(usize::try_from(remaining).unwrap_or(usize::MAX))
                }
                None => self.chunk_size,
            };

            let StreamContext { retry, cancel, events } = self.ctx;
            let key = self.key;
            let conn = &mut *self.conn;
            let request = &self.request;
            let retries = &mut self.retries;
            let fetched = retry.run(
                cancel,
                || conn.fetch(request, &cursor, want),
                |attempt, err| {
                    *retries += 1;
                    warn!(
                        "Retrying fetch for unit {} partition {} at row {} (attempt {} failed): {}",
                        key.unit, key.partition, cursor.offset, attempt, err
                    );
                    events.emit(ProgressEvent::FetchRetried {
                        key: key.clone(),
                        attempt,
                        cause: err.to_string(),
                    });
                },
            );

            let mut page = match fetched {
                Ok(p) => p,
                Err(e) => {
                    self.cursor = None;
                    return Some(Err(e));
                }
            };

            if !page.columns.is_empty() {
                self.columns = page.columns;
            }
            page.rows.truncate(want);
            self.emitted += page.rows.len() as u64;
            self.cursor = page.next;
            if self.request.unit.row_limit == Some(self.emitted) {
                self.cursor = None;
            }

            if page.rows.is_empty() {
                if self.cursor == Some(cursor) {
                    self.cursor = None;
                    return Some(Err(ExtractError::Query(format!(
                        "source returned no rows for {} at row {} but did not finish",
                        self.key, cursor.offset
                    ))));
                }
                continue;
            }

            let chunk = Chunk {
                partition: self.key.clone(),
                sequence: self.sequence,
                rows: page.rows,
            };
            debug!(
                "Chunk {} of {}: {} rows ({} so far)",
                chunk.sequence,
                self.key,
                chunk.rows.len(),
                self.emitted
            );
            self.sequence += 1;
            return Some(Ok(chunk));
        }
    }
}

impl Iterator for ChunkedStream<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetch_next()
    }
}
