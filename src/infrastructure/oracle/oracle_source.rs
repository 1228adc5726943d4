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

//! Infrastructure adapter that reads Oracle query results page by page.
//!
//! A connection keeps the last result set open between fetches, so paging
//! through a query costs one execution. When the requested cursor does not
//! match the live result set (first fetch, or a retry after a transient
//! failure) the statement is executed again and the rows already handed out
//! are skipped. A transient failure usually means the session itself is
//! gone, so a broken session is swapped for a fresh pooled one before the
//! retry runs.

use crate::domain::errors::{ExtractError, Result};
use crate::domain::mapping::{map_oracle_type, map_oracle_type_name};
use crate::domain::values::{CanonicalType, Column, Row, Value};
use crate::infrastructure::oracle::connection_manager::OracleConnectionManager;
use crate::infrastructure::oracle::sql_utils::build_select;
use crate::ports::source_port::{Cursor, FetchPage, SourceAdapter, SourceConnection, SourceRequest};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use oracle::sql_type::Timestamp;
use oracle::{ConnStatus, ResultSet};
use r2d2::{Pool, PooledConnection};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// ORA/DPI codes that mean "the network or the call timed out; try again".
const TRANSIENT_CODES: &[&str] = &[
    "ORA-01013", "ORA-03113", "ORA-03114", "ORA-03135", "ORA-03136", "ORA-12152", "ORA-12170",
    "ORA-12537", "ORA-12547", "ORA-12571", "ORA-25408", "DPI-1067", "DPI-1080",
];

/// Codes that mean "we could not log in or reach the listener".
const CONNECTION_CODES: &[&str] = &[
    "ORA-01017", "ORA-01005", "ORA-12154", "ORA-12514", "ORA-12505", "ORA-12541", "ORA-12560",
    "ORA-28000", "ORA-28001", "DPI-1047",
];

/// Classifies an Oracle error by the ORA/DPI code in its message.
pub fn classify_oracle_error(message: &str) -> ExtractError {
    if TRANSIENT_CODES.iter().any(|c| message.contains(c)) {
        ExtractError::TransientFetch(message.to_string())
    } else if CONNECTION_CODES.iter().any(|c| message.contains(c)) {
        ExtractError::Connection(message.to_string())
    } else {
        ExtractError::Query(message.to_string())
    }
}

fn ora_err(e: oracle::Error) -> ExtractError {
    classify_oracle_error(&e.to_string())
}

/// Parses Oracle's text form of a number without going through floats.
pub fn parse_decimal(raw: &str) -> Result<Decimal> {
    let s = raw.trim();
    let normalized = if let Some(rest) = s.strip_prefix("-.") {
        format!("-0.{}", rest)
    } else if let Some(rest) = s.strip_prefix('.') {
        format!("0.{}", rest)
    } else {
        s.to_string()
    };
    Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map_err(|e| ExtractError::Query(format!("number '{}' does not fit a decimal: {}", raw, e)))
}

/// Converts an Oracle timestamp to naive UTC.
fn timestamp_to_utc(ts: &Timestamp) -> Option<NaiveDateTime> {
    let local = NaiveDate::from_ymd_opt(ts.year(), ts.month(), ts.day())?.and_hms_nano_opt(
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.nanosecond(),
    )?;
    Some(local - ChronoDuration::seconds(i64::from(ts.tz_offset())))
}

pub struct OracleSource {
    pool: Arc<Pool<OracleConnectionManager>>,
    prefetch_rows: u32,
}

impl OracleSource {
    pub fn new(pool: Arc<Pool<OracleConnectionManager>>, prefetch_rows: u32) -> Self {
        Self {
            pool,
            prefetch_rows,
        }
    }
}

impl SourceAdapter for OracleSource {
    fn kind(&self) -> &'static str {
        "oracle"
    }

    fn open(&self) -> Result<Box<dyn SourceConnection>> {
        let conn = self.pool.get().map_err(|e| {
            ExtractError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;
        Ok(Box::new(OracleConnection {
            pool: self.pool.clone(),
            conn: Some(conn),
            prefetch_rows: self.prefetch_rows,
            live: None,
        }))
    }

    fn map_native_type(&self, native: &str) -> Result<CanonicalType> {
        map_oracle_type_name(native)
    }
}

struct LiveResult {
    sql: String,
    offset: u64,
    columns: Vec<Column>,
    rows: ResultSet<'static, oracle::Row>,
}

/// A source session that can report whether it survived an error.
trait SessionHealth {
    fn is_usable(&self) -> bool;

    fn reconnect(&mut self) -> Result<()>;
}

/// Replaces a broken session after a transient failure. When no
/// replacement is available yet, the next attempt tries again.
fn recover_session<S: SessionHealth>(session: &mut S, cause: &ExtractError) {
    if session.is_usable() {
        return;
    }
    match session.reconnect() {
        Ok(()) => info!("Replaced broken source session after: {}", cause),
        Err(e) => warn!("Source session is broken and could not be replaced yet: {}", e),
    }
}

pub struct OracleConnection {
    pool: Arc<Pool<OracleConnectionManager>>,
    /// `None` between releasing a broken session and getting its replacement.
    conn: Option<PooledConnection<OracleConnectionManager>>,
    prefetch_rows: u32,
    live: Option<LiveResult>,
}

impl OracleConnection {
    fn session(&self) -> Result<&PooledConnection<OracleConnectionManager>> {
        self.conn
            .as_ref()
            .ok_or_else(|| ExtractError::TransientFetch("no open session; reconnect pending".into()))
    }

    fn execute(&self, sql: &str, skip: u64, batch_size: usize) -> Result<LiveResult> {
        debug!("Executing (skip {}): {}", skip, sql);
        let stmt = self
            .session()?
            .statement(sql)
            .prefetch_rows(self.prefetch_rows)
            .fetch_array_size(batch_size.clamp(1, u32::MAX as usize) as u32)
            .build()
            .map_err(ora_err)?;
        let mut rows = stmt.into_result_set::<oracle::Row>(&[]).map_err(ora_err)?;

        let columns = rows
            .column_info()
            .iter()
            .map(|info| {
                let canonical = map_oracle_type(info.oracle_type())?;
                Ok(Column::new(info.name(), canonical, info.oracle_type().to_string()))
            })
            .collect::<Result<Vec<Column>>>()?;

        for _ in 0..skip {
            match rows.next() {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ora_err(e)),
                None => break,
            }
        }
        Ok(LiveResult {
            sql: sql.to_string(),
            offset: skip,
            columns,
            rows,
        })
    }

    fn fetch_page(&mut self, request: &SourceRequest<'_>, cursor: &Cursor, batch_size: usize) -> Result<FetchPage> {
        let sql = build_select(request)?;

        let reusable = matches!(&self.live, Some(l) if l.sql == sql && l.offset == cursor.offset);
        let mut live = match self.live.take() {
            Some(l) if reusable => l,
            _ => self.execute(&sql, cursor.offset, batch_size)?,
        };

        let mut rows = Vec::with_capacity(batch_size);
        let mut exhausted = false;
        while rows.len() < batch_size {
            match live.rows.next() {
                Some(Ok(row)) => rows.push(convert_row(&row, &live.columns)?),
                // `live` is dropped here, so a retry re-executes.
                Some(Err(e)) => return Err(ora_err(e)),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        live.offset += rows.len() as u64;
        let columns = live.columns.clone();
        let next = if exhausted {
            None
        } else {
            let next = Cursor { offset: live.offset };
            self.live = Some(live);
            Some(next)
        };
        Ok(FetchPage { columns, rows, next })
    }
}

fn convert_row(row: &oracle::Row, columns: &[Column]) -> Result<Row> {
    let mut out = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let value = match col.canonical_type {
            CanonicalType::Integer => row
                .get::<_, Option<i64>>(i)
                .map_err(ora_err)?
                .map_or(Value::Null, Value::Integer),
            CanonicalType::Decimal => match row.get::<_, Option<String>>(i).map_err(ora_err)? {
                Some(s) => Value::Decimal(parse_decimal(&s)?),
                None => Value::Null,
            },
            CanonicalType::Text => row
                .get::<_, Option<String>>(i)
                .map_err(ora_err)?
                .map_or(Value::Null, Value::Text),
            CanonicalType::DateTime => match row.get::<_, Option<Timestamp>>(i).map_err(ora_err)? {
                Some(ts) => Value::DateTime(timestamp_to_utc(&ts).ok_or_else(|| {
                    ExtractError::Query(format!("column {} holds an invalid date {}", col.name, ts))
                })?),
                None => Value::Null,
            },
            CanonicalType::Binary => row
                .get::<_, Option<Vec<u8>>>(i)
                .map_err(ora_err)?
                .map_or(Value::Null, Value::Binary),
        };
        out.push(value);
    }
    Ok(out)
}

impl SessionHealth for OracleConnection {
    fn is_usable(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| matches!(c.status(), Ok(ConnStatus::Normal)))
    }

    fn reconnect(&mut self) -> Result<()> {
        self.live = None;
        // Released first so the pool can discard it and free the slot.
        self.conn = None;
        let fresh = self.pool.get().map_err(|e| {
            ExtractError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;
        self.conn = Some(fresh);
        Ok(())
    }
}

impl SourceConnection for OracleConnection {
    fn fetch(&mut self, request: &SourceRequest<'_>, cursor: &Cursor, batch_size: usize) -> Result<FetchPage> {
        let result = self.fetch_page(request, cursor, batch_size);
        if let Err(e) = &result {
            if e.is_retryable() {
                self.live = None;
                recover_session(self, e);
            }
        }
        result
    }
}
