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

//! SQL text helpers for the Oracle adapter.

use crate::domain::entities::{KeyFilter, SourceQuery};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::{key_hex, parse_key_datetime, CanonicalType};
use crate::ports::source_port::SourceRequest;

/// Oracle rejects IN-lists longer than this (ORA-01795).
pub const MAX_IN_LIST: usize = 1000;

/// Matches `values::DATETIME_FORMAT`.
const TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.FF6";

/// Quotes a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Leaves plain identifiers alone so Oracle upper-cases them as usual;
/// anything else is double-quoted.
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '#')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Oracle literal for one join-key value of the given canonical type.
///
/// Date-times carry an explicit format so the comparison does not depend on
/// the session's NLS settings.
pub fn key_literal(value: &str, ty: CanonicalType) -> Result<String> {
    match ty {
        CanonicalType::DateTime => {
            parse_key_datetime(value)?;
            Ok(format!("TO_TIMESTAMP({}, '{}')", quote_literal(value), TIMESTAMP_FORMAT))
        }
        CanonicalType::Binary => Ok(format!("HEXTORAW('{}')", key_hex(value)?)),
        _ => Ok(quote_literal(value)),
    }
}

/// Builds the membership predicate for a key batch.
///
/// One column: `COL IN ('a','b')`, split into OR-ed lists of at most
/// `MAX_IN_LIST` values. Several columns: an OR of AND-ed equality groups,
/// `((A = 'x' AND B = 'y') OR (...))`.
pub fn build_membership_predicate(filter: &KeyFilter) -> Result<String> {
    if filter.columns.is_empty() || filter.keys.is_empty() {
        return Err(ExtractError::Query("empty key filter".into()));
    }
    if filter.keys.iter().any(|k| k.len() != filter.columns.len()) {
        return Err(ExtractError::Query(format!(
            "key filter on {:?} has a tuple of the wrong width",
            filter.columns
        )));
    }

    if filter.columns.len() == 1 {
        let column = quote_ident(&filter.columns[0]);
        let ty = filter.column_type(0);
        let literals = filter
            .keys
            .iter()
            .map(|k| key_literal(&k[0], ty))
            .collect::<Result<Vec<String>>>()?;
        let mut lists: Vec<String> = literals
            .chunks(MAX_IN_LIST)
            .map(|group| format!("{} IN ({})", column, group.join(",")))
            .collect();
        return Ok(if lists.len() == 1 {
            lists.remove(0)
        } else {
            format!("({})", lists.join(" OR "))
        });
    }

    let groups = filter
        .keys
        .iter()
        .map(|tuple| {
            let terms = filter
                .columns
                .iter()
                .zip(tuple)
                .enumerate()
                .map(|(i, (c, v))| Ok(format!("{} = {}", quote_ident(c), key_literal(v, filter.column_type(i))?)))
                .collect::<Result<Vec<String>>>()?;
            Ok(format!("({})", terms.join(" AND ")))
        })
        .collect::<Result<Vec<String>>>()?;
    Ok(format!("({})", groups.join(" OR ")))
}

/// Final SQL for a request: the unit's query, wrapped when a key filter applies.
pub fn build_select(request: &SourceRequest<'_>) -> Result<String> {
    let query = match &request.unit.source {
        SourceQuery::Sql { query } => query.trim().trim_end_matches(';').to_string(),
        SourceQuery::Rfc { .. } => {
            return Err(ExtractError::Query(format!(
                "unit '{}' is an RFC call and cannot run on a SQL source",
                request.unit.name
            )))
        }
    };
    match request.filter {
        None => Ok(query),
        Some(filter) => Ok(format!(
            "SELECT * FROM ({}) q WHERE {}",
            query,
            build_membership_predicate(filter)?
        )),
    }
}
