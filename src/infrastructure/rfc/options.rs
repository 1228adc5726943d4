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

//! Builds the `OPTIONS` table of a table-read call.
//!
//! Each `OPTIONS` line is a CHAR72 field. A token (identifier, operator or
//! quoted literal) can never be split across lines, so anything longer than
//! a line is rejected up front.

use crate::domain::entities::KeyFilter;
use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::{key_hex, parse_key_datetime, CanonicalType};

pub const OPTION_LINE_WIDTH: usize = 72;

pub fn quote_abap_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// ABAP literal for one join-key value. Dates compare in their internal
/// `YYYYMMDD` form and raw fields as upper-case hex.
pub fn abap_key_literal(value: &str, ty: CanonicalType) -> Result<String> {
    match ty {
        CanonicalType::DateTime => Ok(quote_abap_literal(
            &parse_key_datetime(value)?.format("%Y%m%d").to_string(),
        )),
        CanonicalType::Binary => Ok(quote_abap_literal(&key_hex(value)?)),
        _ => Ok(quote_abap_literal(value)),
    }
}

/// Splits a where-clause into tokens: whitespace separates, quoted literals
/// stay whole, and a comma outside quotes ends the token it follows.
fn tokenize(clause: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = clause.chars().peekable();
    let mut in_quote = false;

    while let Some(c) = chars.next() {
        if in_quote {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_quote = false;
                }
            }
            continue;
        }
        match c {
            '\'' => {
                in_quote = true;
                current.push(c);
            }
            ',' => {
                current.push(c);
                tokens.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn check_line(line: &str) -> Result<()> {
    if line.chars().count() > OPTION_LINE_WIDTH {
        return Err(ExtractError::Query(format!(
            "where-clause token is longer than {} characters: {}",
            OPTION_LINE_WIDTH, line
        )));
    }
    Ok(())
}

/// Packs tokens greedily into lines of at most `OPTION_LINE_WIDTH` characters.
fn pack(tokens: &[String]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for token in tokens {
        check_line(token)?;
        let needed = if line.is_empty() {
            token.chars().count()
        } else {
            line.chars().count() + 1 + token.chars().count()
        };
        if needed > OPTION_LINE_WIDTH {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(token);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    Ok(lines)
}

/// Joins clauses with `AND` and wraps them into option lines.
pub fn format_where(clauses: &[String]) -> Result<Vec<String>> {
    let parts: Vec<&str> = clauses
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if parts.is_empty() {
        return Ok(Vec::new());
    }
    let joined = if parts.len() == 1 {
        parts[0].to_string()
    } else {
        parts
            .iter()
            .map(|p| format!("( {} )", p))
            .collect::<Vec<_>>()
            .join(" AND ")
    };
    pack(&tokenize(&joined))
}

/// Membership filter lines, one literal per line.
///
/// One column: `COL IN (` followed by `'a',` ... `'z' )`.
/// Several columns: a parenthesised OR of AND-ed equality groups.
pub fn membership_lines(filter: &KeyFilter) -> Result<Vec<String>> {
    if filter.columns.is_empty() || filter.keys.is_empty() {
        return Err(ExtractError::Query("empty key filter".into()));
    }
    let mut lines = Vec::new();

    if filter.columns.len() == 1 {
        lines.push(format!("{} IN (", filter.columns[0]));
        let ty = filter.column_type(0);
        let last = filter.keys.len() - 1;
        for (i, key) in filter.keys.iter().enumerate() {
            let literal = abap_key_literal(key.first().map(String::as_str).unwrap_or(""), ty)?;
            lines.push(if i == last { format!("{} )", literal) } else { format!("{},", literal) });
        }
    } else {
        lines.push("(".to_string());
        let last_key = filter.keys.len() - 1;
        let last_col = filter.columns.len() - 1;
        for (k, tuple) in filter.keys.iter().enumerate() {
            if tuple.len() != filter.columns.len() {
                return Err(ExtractError::Query(format!(
                    "key filter on {:?} has a tuple of the wrong width",
                    filter.columns
                )));
            }
            for (c, (column, value)) in filter.columns.iter().zip(tuple).enumerate() {
                let mut line = String::new();
                if c == 0 {
                    line.push_str("( ");
                }
                line.push_str(&format!("{} = {}", column, abap_key_literal(value, filter.column_type(c))?));
                if c == last_col {
                    line.push_str(" )");
                    if k != last_key {
                        line.push_str(" OR");
                    }
                } else {
                    line.push_str(" AND");
                }
                lines.push(line);
            }
        }
        lines.push(")".to_string());
    }

    for line in &lines {
        check_line(line)?;
    }
    Ok(lines)
}

/// Full `OPTIONS` table: the unit's own clauses AND-ed with the key filter.
pub fn build_options(base: &[String], filter: Option<&KeyFilter>) -> Result<Vec<String>> {
    let base_lines = format_where(base)?;
    let Some(filter) = filter else {
        return Ok(base_lines);
    };
    let filter_lines = membership_lines(filter)?;
    if base_lines.is_empty() {
        return Ok(filter_lines);
    }
    let mut lines = Vec::with_capacity(base_lines.len() + filter_lines.len() + 3);
    lines.push("(".to_string());
    lines.extend(base_lines);
    lines.push(") AND (".to_string());
    lines.extend(filter_lines);
    lines.push(")".to_string());
    Ok(lines)
}
