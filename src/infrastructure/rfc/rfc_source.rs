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

//! Infrastructure adapter for ERP tables reachable through a table-read
//! function module.
//!
//! Paging uses `ROWSKIPS`/`ROWCOUNT`, so the cursor is simply the number of
//! rows already read. Rows come back as one text line each, either split on
//! the delimiter or cut by the `OFFSET`/`LENGTH` of every field.

use crate::domain::entities::SourceQuery;
use crate::domain::errors::{ExtractError, Result};
use crate::domain::mapping::map_abap_type;
use crate::domain::values::{CanonicalType, Column, Row, Value};
use crate::infrastructure::rfc::options::build_options;
use crate::infrastructure::rfc::transport::{ReadTableCall, RfcField, RfcSession, RfcTransport};
use crate::ports::source_port::{Cursor, FetchPage, SourceAdapter, SourceConnection, SourceRequest};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_FUNCTION_MODULE: &str = "RFC_READ_TABLE";

pub struct RfcSource {
    transport: Arc<dyn RfcTransport>,
    function_module: String,
    delimiter: Option<char>,
}

impl RfcSource {
    pub fn new(transport: Arc<dyn RfcTransport>, function_module: &str, delimiter: Option<char>) -> Self {
        Self {
            transport,
            function_module: function_module.to_string(),
            delimiter,
        }
    }
}

impl SourceAdapter for RfcSource {
    fn kind(&self) -> &'static str {
        "rfc"
    }

    fn open(&self) -> Result<Box<dyn SourceConnection>> {
        let session = self.transport.connect().map_err(|e| match ExtractError::from(e) {
            // A logon that cannot even reach the host is still a connection problem.
            ExtractError::TransientFetch(m) => ExtractError::Connection(m),
            other => other,
        })?;
        Ok(Box::new(RfcConnection {
            session,
            function_module: self.function_module.clone(),
            delimiter: self.delimiter,
        }))
    }

    fn map_native_type(&self, native: &str) -> Result<CanonicalType> {
        map_abap_type(native, None)
    }
}

pub struct RfcConnection {
    session: Box<dyn RfcSession>,
    function_module: String,
    delimiter: Option<char>,
}

impl SourceConnection for RfcConnection {
    fn fetch(&mut self, request: &SourceRequest<'_>, cursor: &Cursor, batch_size: usize) -> Result<FetchPage> {
        let (table, fields, options) = match &request.unit.source {
            SourceQuery::Rfc {
                table,
                columns,
                options,
            } => (table, columns, options),
            SourceQuery::Sql { .. } => {
                return Err(ExtractError::Query(format!(
                    "unit '{}' is a SQL query and cannot run on an RFC source",
                    request.unit.name
                )))
            }
        };

        let call = ReadTableCall {
            function_module: self.function_module.clone(),
            query_table: table.clone(),
            delimiter: self.delimiter,
            fields: fields.clone(),
            options: build_options(options, request.filter)?,
            row_count: batch_size as u64,
            row_skips: cursor.offset,
        };
        let started = Instant::now();
        let response = self.session.read_table(&call)?;
        debug!(
            "{} returned {} rows from {} (skip {}) in {:.2}s",
            self.function_module,
            response.data.len(),
            table,
            cursor.offset,
            started.elapsed().as_secs_f64()
        );

        let columns = response
            .fields
            .iter()
            .map(|f| {
                let canonical = map_abap_type(&f.abap_type, f.dict_type.as_deref())
                    .map_err(|e| ExtractError::Query(format!("{}.{}: {}", table, f.name, e)))?;
                Ok(Column::new(f.name.clone(), canonical, f.abap_type.clone()))
            })
            .collect::<Result<Vec<Column>>>()?;

        let mut rows = Vec::with_capacity(response.data.len());
        for line in &response.data {
            let raw = match self.delimiter {
                Some(d) => split_delimited(line, d, response.fields.len())?,
                None => split_fixed_width(line, &response.fields),
            };
            let row = raw
                .iter()
                .zip(&columns)
                .map(|(text, col)| parse_abap_value(text, col))
                .collect::<Result<Row>>()?;
            rows.push(row);
        }

        let next = if rows.len() < batch_size {
            None
        } else {
            Some(Cursor {
                offset: cursor.offset + rows.len() as u64,
            })
        };
        Ok(FetchPage { columns, rows, next })
    }
}

fn split_delimited(line: &str, delimiter: char, expected: usize) -> Result<Vec<String>> {
    let parts: Vec<String> = line.split(delimiter).map(str::to_string).collect();
    if parts.len() != expected {
        return Err(ExtractError::Query(format!(
            "row has {} fields, expected {} (a value may contain the delimiter '{}')",
            parts.len(),
            expected,
            delimiter
        )));
    }
    Ok(parts)
}

fn split_fixed_width(line: &str, fields: &[RfcField]) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    fields
        .iter()
        .map(|f| {
            let start = f.offset.min(chars.len());
            let end = (f.offset + f.length).min(chars.len());
            chars[start..end].iter().collect()
        })
        .collect()
}

/// ABAP packed numbers put the sign at the end: `123.45-`.
fn move_trailing_sign(s: &str) -> String {
    match s.strip_suffix('-') {
        Some(body) => format!("-{}", body.trim()),
        None => s.to_string(),
    }
}

fn parse_abap_value(text: &str, column: &Column) -> Result<Value> {
    let trimmed = text.trim();
    let bad = |what: &str| {
        ExtractError::Query(format!(
            "column {} holds an invalid {} '{}'",
            column.name, what, trimmed
        ))
    };

    match column.canonical_type {
        CanonicalType::Text => Ok(Value::Text(text.trim_end().to_string())),
        CanonicalType::DateTime => {
            if trimmed.is_empty() || trimmed.chars().all(|c| c == '0') {
                return Ok(Value::Null);
            }
            NaiveDate::parse_from_str(trimmed, "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(Value::DateTime)
                .ok_or_else(|| bad("date"))
        }
        CanonicalType::Decimal => {
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            let signed = move_trailing_sign(trimmed);
            Decimal::from_str(&signed)
                .or_else(|_| Decimal::from_scientific(&signed))
                .map(Value::Decimal)
                .map_err(|_| bad("decimal"))
        }
        CanonicalType::Integer => {
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            move_trailing_sign(trimmed)
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| bad("integer"))
        }
        CanonicalType::Binary => {
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            decode_hex(trimmed).map(Value::Binary).ok_or_else(|| bad("hex value"))
        }
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ExtractionUnit, KeyFilter};
    use crate::infrastructure::rfc::transport::{ReadTableResponse, RfcError};
    use std::sync::Mutex;

    /// Serves a fixed table and remembers every call it received.
    struct FakeSession {
        fields: Vec<RfcField>,
        rows: Vec<String>,
        calls: Arc<Mutex<Vec<ReadTableCall>>>,
    }

    impl RfcSession for FakeSession {
        fn read_table(&mut self, call: &ReadTableCall) -> std::result::Result<ReadTableResponse, RfcError> {
            self.calls.lock().unwrap().push(call.clone());
            if call.query_table != "VBAK" {
                return Err(RfcError::Abap {
                    key: "TABLE_NOT_AVAILABLE".into(),
                    message: call.query_table.clone(),
                });
            }
            let data = self
                .rows
                .iter()
                .skip(call.row_skips as usize)
                .take(call.row_count as usize)
                .cloned()
                .collect();
            Ok(ReadTableResponse {
                fields: self.fields.clone(),
                data,
            })
        }
    }

    struct FakeTransport {
        rows: Vec<String>,
        calls: Arc<Mutex<Vec<ReadTableCall>>>,
    }

    impl RfcTransport for FakeTransport {
        fn connect(&self) -> std::result::Result<Box<dyn RfcSession>, RfcError> {
            Ok(Box::new(FakeSession {
                fields: vec![
                    field("VBELN", 0, 10, "C"),
                    field("ERDAT", 10, 8, "D"),
                    field("NETWR", 18, 9, "P"),
                ],
                rows: self.rows.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    fn field(name: &str, offset: usize, length: usize, abap_type: &str) -> RfcField {
        RfcField {
            name: name.into(),
            offset,
            length,
            abap_type: abap_type.into(),
            dict_type: None,
        }
    }

    fn vbak() -> ExtractionUnit {
        ExtractionUnit {
            name: "VBAK".into(),
            source: SourceQuery::Rfc {
                table: "VBAK".into(),
                columns: vec!["VBELN".into(), "ERDAT".into(), "NETWR".into()],
                options: vec!["AUART = 'ZOR'".into()],
            },
            row_limit: None,
            target_table: "VBAK".into(),
            children: vec![],
        }
    }

    #[test]
    fn test_fixed_width_pages() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = FakeTransport {
            rows: vec![
                "000000000120230115   100.50".into(),
                "000000000200000000   12.00-".into(),
                "000000000320230228  1000.00".into(),
            ],
            calls: calls.clone(),
        };
        let source = RfcSource::new(Arc::new(transport), DEFAULT_FUNCTION_MODULE, None);
        let mut conn = source.open().unwrap();
        let unit = vbak();
        let req = SourceRequest { unit: &unit, filter: None };

        let first = conn.fetch(&req, &Cursor::default(), 2).unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.next, Some(Cursor { offset: 2 }));
        assert_eq!(first.columns[1].canonical_type, CanonicalType::DateTime);
        assert_eq!(first.rows[0][0], Value::Text("0000000001".into()));
        assert_eq!(
            first.rows[0][1],
            Value::DateTime(NaiveDate::from_ymd_opt(2023, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(first.rows[1][1], Value::Null);
        assert_eq!(first.rows[1][2], Value::Decimal(Decimal::from_str("-12.00").unwrap()));

        let second = conn.fetch(&req, &first.next.unwrap(), 2).unwrap();
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.next, None);

        let calls = calls.lock().unwrap();
        assert_eq!(calls[1].row_skips, 2);
        assert_eq!(calls[1].row_count, 2);
        assert_eq!(calls[0].options, vec!["AUART = 'ZOR'"]);
    }

    #[test]
    fn test_filter_is_sent_as_options() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = FakeTransport {
            rows: vec![],
            calls: calls.clone(),
        };
        let source = RfcSource::new(Arc::new(transport), "/BODS/RFC_READ_TABLE2", Some('|'));
        let mut conn = source.open().unwrap();
        let unit = vbak();
        let filter = KeyFilter {
            columns: vec!["VBELN".into()],
            keys: vec![vec!["0000000001".into()]],
            types: Vec::new(),
        };
        let page = conn
            .fetch(&SourceRequest { unit: &unit, filter: Some(&filter) }, &Cursor::default(), 10)
            .unwrap();
        assert!(page.rows.is_empty());
        assert_eq!(page.next, None);

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].function_module, "/BODS/RFC_READ_TABLE2");
        assert_eq!(
            calls[0].options,
            vec!["(", "AUART = 'ZOR'", ") AND (", "VBELN IN (", "'0000000001' )", ")"]
        );
    }

    #[test]
    fn test_abap_exception_is_not_retryable() {
        let transport = FakeTransport {
            rows: vec![],
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let source = RfcSource::new(Arc::new(transport), DEFAULT_FUNCTION_MODULE, Some('|'));
        let mut conn = source.open().unwrap();
        let mut unit = vbak();
        unit.source = SourceQuery::Rfc {
            table: "NOPE".into(),
            columns: vec![],
            options: vec![],
        };
        let err = conn
            .fetch(&SourceRequest { unit: &unit, filter: None }, &Cursor::default(), 10)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Query(_)));
    }

    #[test]
    fn test_parse_values() {
        let int = Column::new("POSNR", CanonicalType::Integer, "I");
        assert_eq!(parse_abap_value("  42-", &int).unwrap(), Value::Integer(-42));
        let bin = Column::new("GUID", CanonicalType::Binary, "X");
        assert_eq!(parse_abap_value("DEAD", &bin).unwrap(), Value::Binary(vec![0xde, 0xad]));
        assert!(parse_abap_value("XYZ", &bin).is_err());
        let date = Column::new("ERDAT", CanonicalType::DateTime, "D");
        assert!(parse_abap_value("20231345", &date).is_err());
        assert_eq!(parse_abap_value("        ", &date).unwrap(), Value::Null);
    }

    #[test]
    fn test_split_delimited_detects_embedded_delimiter() {
        assert_eq!(split_delimited("a|b", '|', 2).unwrap(), vec!["a", "b"]);
        assert!(split_delimited("a|b|c", '|', 2).is_err());
    }
}
