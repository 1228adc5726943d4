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

//! # Nested Extraction Planner
//!
//! Turns one parent chunk into child partitions: the distinct join-key
//! values of the chunk are sorted, split into batches of at most
//! `batch_size`, and every child gets one partition per batch. Children are
//! planned in declaration order, so the same parent data always produces
//! the same partition ids in the same order.

use crate::domain::entities::{ExtractionUnit, KeyFilter, PartitionId, PartitionKey, PartitionSpec};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::{CanonicalType, Column, Row};
use std::collections::BTreeSet;

fn column_index(columns: &[Column], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            ExtractError::Query(format!(
                "join column {} is not in the parent result ({})",
                name,
                columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            ))
        })
}

/// Distinct, sorted key tuples of `key_columns` in `rows`. Tuples with a
/// null member are dropped.
pub fn distinct_keys(rows: &[Row], columns: &[Column], key_columns: &[&str]) -> Result<Vec<Vec<String>>> {
    let idx = key_columns
        .iter()
        .map(|name| column_index(columns, name))
        .collect::<Result<Vec<usize>>>()?;

    let keys: BTreeSet<Vec<String>> = rows
        .iter()
        .filter_map(|row| {
            idx.iter()
                .map(|&i| row.get(i).and_then(|v| v.key_literal()))
                .collect::<Option<Vec<String>>>()
        })
        .collect();
    Ok(keys.into_iter().collect())
}

/// Canonical types of `key_columns` in the parent result.
fn key_types(columns: &[Column], key_columns: &[&str]) -> Result<Vec<CanonicalType>> {
    key_columns
        .iter()
        .map(|name| column_index(columns, name).map(|i| columns[i].canonical_type))
        .collect()
}

/// Child partitions for one chunk of `parent`'s rows.
pub fn plan_children(
    parent: &PartitionKey,
    parent_chunk: u64,
    rows: &[Row],
    columns: &[Column],
    unit: &ExtractionUnit,
    batch_size: usize,
) -> Result<Vec<PartitionSpec>> {
    let mut specs = Vec::new();
    for link in &unit.children {
        let parent_columns: Vec<&str> = link.join_keys.iter().map(|k| k.parent_column.as_str()).collect();
        let child_columns: Vec<String> = link.join_keys.iter().map(|k| k.child_column.clone()).collect();

        let keys = distinct_keys(rows, columns, &parent_columns)?;
        let types = key_types(columns, &parent_columns)?;
        for (batch, group) in keys.chunks(batch_size.max(1)).enumerate() {
            specs.push(PartitionSpec {
                key: PartitionKey::new(&link.unit.name, PartitionId::child(parent, parent_chunk, batch)),
                parent: Some(parent.clone()),
                filter: Some(KeyFilter {
                    columns: child_columns.clone(),
                    keys: group.to_vec(),
                    types: types.clone(),
                }),
            });
        }
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::values::Value;

    fn header_columns() -> Vec<Column> {
        vec![
            Column::new("VBELN", CanonicalType::Text, "C"),
            Column::new("BUKRS", CanonicalType::Text, "C"),
        ]
    }

    fn headers(range: std::ops::Range<usize>) -> Vec<Row> {
        range
            .map(|i| vec![Value::Text(format!("{:010}", i)), Value::Text("1000".into())])
            .collect()
    }

    fn sales_unit() -> ExtractionUnit {
        ExtractionUnit::sql("VBAK", "SELECT * FROM VBAK", "vbak").with_child(
            ExtractionUnit::sql("VBAP", "SELECT * FROM VBAP", "vbap"),
            &[("VBELN", "VBELN")],
        )
    }

    #[test]
    fn test_distinct_keys_sorted_and_nulls_dropped() {
        let rows = vec![
            vec![Value::Text("B".into()), Value::Null],
            vec![Value::Text("A".into()), Value::Null],
            vec![Value::Text("B".into()), Value::Null],
            vec![Value::Null, Value::Null],
        ];
        let keys = distinct_keys(&rows, &header_columns(), &["vbeln"]).unwrap();
        assert_eq!(keys, vec![vec!["A".to_string()], vec!["B".to_string()]]);
        assert!(distinct_keys(&rows, &header_columns(), &["VBELN", "BUKRS"]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_join_column_is_query_error() {
        let err = distinct_keys(&headers(0..3), &header_columns(), &["KUNNR"]).unwrap_err();
        assert!(matches!(err, ExtractError::Query(_)));
    }

    #[test]
    fn test_two_chunks_of_500_keys_batch_300_give_four_partitions() {
        let unit = sales_unit();
        let parent = PartitionKey::whole_table("VBAK");
        let mut specs = plan_children(&parent, 0, &headers(0..500), &header_columns(), &unit, 300).unwrap();
        specs.extend(plan_children(&parent, 1, &headers(500..1000), &header_columns(), &unit, 300).unwrap());

        assert_eq!(specs.len(), 4);
        let sizes: Vec<usize> = specs.iter().map(|s| s.filter.as_ref().unwrap().keys.len()).collect();
        assert_eq!(sizes, vec![300, 200, 300, 200]);
        assert!(specs.iter().all(|s| s.key.unit == "VBAP" && s.parent.as_ref() == Some(&parent)));
        assert_eq!(specs[0].key.partition.as_str(), "VBAK[whole-table]/c00000/b0000");
        assert_eq!(specs[3].key.partition.as_str(), "VBAK[whole-table]/c00001/b0001");
    }

    #[test]
    fn test_planning_ignores_row_order() {
        let unit = sales_unit();
        let parent = PartitionKey::whole_table("VBAK");
        let forward = plan_children(&parent, 0, &headers(0..700), &header_columns(), &unit, 300).unwrap();
        let mut reversed_rows = headers(0..700);
        reversed_rows.reverse();
        let backward = plan_children(&parent, 0, &reversed_rows, &header_columns(), &unit, 300).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_child_filters_carry_parent_key_types() {
        let unit = ExtractionUnit::sql("VBAK", "SELECT * FROM VBAK", "vbak").with_child(
            ExtractionUnit::sql("VBAP", "SELECT * FROM VBAP", "vbap"),
            &[("ERDAT", "ERDAT"), ("VBELN", "VBELN")],
        );
        let columns = vec![
            Column::new("VBELN", CanonicalType::Text, "C"),
            Column::new("ERDAT", CanonicalType::DateTime, "D"),
        ];
        let day = chrono::NaiveDate::from_ymd_opt(2023, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let rows = vec![vec![Value::Text("1".into()), Value::DateTime(day)]];

        let specs = plan_children(&PartitionKey::whole_table("VBAK"), 0, &rows, &columns, &unit, 10).unwrap();
        let filter = specs[0].filter.as_ref().unwrap();
        assert_eq!(filter.columns, vec!["ERDAT", "VBELN"]);
        assert_eq!(filter.types, vec![CanonicalType::DateTime, CanonicalType::Text]);
        assert_eq!(filter.keys, vec![vec!["2023-01-15 00:00:00.000000".to_string(), "1".to_string()]]);
    }

    #[test]
    fn test_chunk_without_keys_plans_nothing() {
        let rows = vec![vec![Value::Null, Value::Text("1000".into())]];
        let specs = plan_children(
            &PartitionKey::whole_table("VBAK"),
            0,
            &rows,
            &header_columns(),
            &sales_unit(),
            300,
        )
        .unwrap();
        assert!(specs.is_empty());
    }
}
