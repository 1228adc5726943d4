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

//! # Domain Entities
//!
//! The "nouns" of the engine: what to extract (`ExtractionUnit`), one run of
//! it (`Extraction`), the unit of progress tracking (`Partition*`), and the
//! batches of rows travelling between readers and the writer (`Chunk`).
//!
//! Everything that must survive a restart derives `Serialize`/`Deserialize`
//! so it can be stored in the progress ledger.

use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::{CanonicalType, Row};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How a unit's rows are obtained from the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceQuery {
    /// A SELECT statement run against a relational source.
    Sql { query: String },
    /// A table-read call against an RFC source.
    Rfc {
        table: String,
        #[serde(default)]
        columns: Vec<String>,
        /// Pre-formatted where-clause lines.
        #[serde(default)]
        options: Vec<String>,
    },
}

/// Links one parent column to the matching child column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinKey {
    pub parent_column: String,
    pub child_column: String,
}

/// A nested child unit and how it joins to its parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildLink {
    pub join_keys: Vec<JoinKey>,
    pub unit: ExtractionUnit,
}

/// One logical table or query to extract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionUnit {
    pub name: String,
    pub source: SourceQuery,
    #[serde(default)]
    pub row_limit: Option<u64>,
    pub target_table: String,
    /// Child units in declared order. Their processing order follows this list.
    #[serde(default)]
    pub children: Vec<ChildLink>,
}

impl ExtractionUnit {
    pub fn sql(name: &str, query: &str, target_table: &str) -> Self {
        Self {
            name: name.to_string(),
            source: SourceQuery::Sql {
                query: query.to_string(),
            },
            row_limit: None,
            target_table: target_table.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Adds a child joined on `(parent_column, child_column)` pairs.
    pub fn with_child(mut self, unit: ExtractionUnit, keys: &[(&str, &str)]) -> Self {
        self.children.push(ChildLink {
            join_keys: keys
                .iter()
                .map(|(p, c)| JoinKey {
                    parent_column: p.to_string(),
                    child_column: c.to_string(),
                })
                .collect(),
            unit,
        });
        self
    }
}

/// Fails fast when upstream validation did not hold.
///
/// Unit names must be unique across the whole tree, every child needs at
/// least one join key, and RFC column lists must not repeat a column.
pub fn validate_units(units: &[ExtractionUnit]) -> Result<()> {
    if units.is_empty() {
        return Err(ExtractError::Validation("no units to extract".into()));
    }
    let mut seen = HashSet::new();
    for unit in units {
        validate_unit(unit, &mut seen)?;
    }
    Ok(())
}

fn validate_unit(unit: &ExtractionUnit, seen: &mut HashSet<String>) -> Result<()> {
    if unit.name.trim().is_empty() {
        return Err(ExtractError::Validation("unit with an empty name".into()));
    }
    if !seen.insert(unit.name.clone()) {
        return Err(ExtractError::Validation(format!(
            "unit name '{}' is used more than once",
            unit.name
        )));
    }
    if unit.target_table.trim().is_empty() {
        return Err(ExtractError::Validation(format!(
            "unit '{}' has no target table",
            unit.name
        )));
    }
    if unit.row_limit == Some(0) {
        return Err(ExtractError::Validation(format!(
            "unit '{}' has a row limit of zero",
            unit.name
        )));
    }
    if let SourceQuery::Rfc { columns, .. } = &unit.source {
        let mut cols = HashSet::new();
        for c in columns {
            if !cols.insert(c.trim().to_uppercase()) {
                return Err(ExtractError::Validation(format!(
                    "unit '{}' lists column '{}' more than once",
                    unit.name, c
                )));
            }
        }
    }
    for child in &unit.children {
        if child.join_keys.is_empty() {
            return Err(ExtractError::Validation(format!(
                "child '{}' of '{}' has no join key",
                child.unit.name, unit.name
            )));
        }
        validate_unit(&child.unit, seen)?;
    }
    Ok(())
}

/// One run of a set of units. The id is generated once and kept across resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub id: String,
    pub units: Vec<ExtractionUnit>,
    pub work_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Extraction {
    /// Creates a brand-new extraction with a fresh id.
    pub fn new(units: Vec<ExtractionUnit>, work_dir: impl Into<PathBuf>) -> Result<Self> {
        validate_units(&units)?;
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Ok(Self {
            id,
            units,
            work_dir: work_dir.into(),
            created_at: Utc::now(),
        })
    }

    /// SHA-256 over the unit tree. Partition ids are only meaningful while
    /// this stays the same.
    pub fn fingerprint(&self) -> String {
        fingerprint_units(&self.units)
    }

    /// Directory holding this run's data and summary.
    pub fn run_dir(&self) -> PathBuf {
        self.work_dir.join(&self.id)
    }
}

pub fn fingerprint_units(units: &[ExtractionUnit]) -> String {
    let encoded = serde_json::to_vec(units).unwrap_or_default();
    format!("{:x}", Sha256::digest(&encoded))
}

/// Flat, name-indexed view of a unit tree.
#[derive(Debug, Clone, Default)]
pub struct UnitCatalog {
    units: HashMap<String, Arc<ExtractionUnit>>,
    parents: HashMap<String, String>,
    order: Vec<String>,
}

impl UnitCatalog {
    pub fn build(roots: &[ExtractionUnit]) -> Self {
        let mut catalog = UnitCatalog::default();
        for root in roots {
            catalog.insert(root, None);
        }
        catalog
    }

    fn insert(&mut self, unit: &ExtractionUnit, parent: Option<&str>) {
        self.units
            .insert(unit.name.clone(), Arc::new(unit.clone()));
        if let Some(p) = parent {
            self.parents.insert(unit.name.clone(), p.to_string());
        }
        self.order.push(unit.name.clone());
        for child in &unit.children {
            self.insert(&child.unit, Some(&unit.name));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ExtractionUnit>> {
        self.units.get(name)
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.parents.get(name).map(String::as_str)
    }

    /// Units in depth-first declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Identifies a partition within its unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub String);

pub const WHOLE_TABLE: &str = "whole-table";

impl PartitionId {
    pub fn whole_table() -> Self {
        PartitionId(WHOLE_TABLE.to_string())
    }

    /// Derived only from the parent's identity, the parent chunk's sequence
    /// number and the key-batch index, so identical input always yields
    /// identical ids.
    pub fn child(parent: &PartitionKey, parent_chunk: u64, batch: usize) -> Self {
        PartitionId(format!(
            "{}[{}]/c{:05}/b{:04}",
            parent.unit, parent.partition.0, parent_chunk, batch
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// (unit name, partition id). Unique within an extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub unit: String,
    pub partition: PartitionId,
}

impl PartitionKey {
    pub fn new(unit: &str, partition: PartitionId) -> Self {
        Self {
            unit: unit.to_string(),
            partition,
        }
    }

    pub fn whole_table(unit: &str) -> Self {
        Self::new(unit, PartitionId::whole_table())
    }

    /// Key under which the record is stored in the ledger.
    pub fn storage_key(&self) -> String {
        format!("{}\u{1f}{}", self.unit, self.partition.0)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.unit, self.partition)
    }
}

/// Partition state machine: `not_started -> in_progress -> {complete | error}`,
/// with `error -> in_progress` only on an explicit resume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    NotStarted,
    InProgress,
    Complete,
    Error,
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStatus::NotStarted => write!(f, "not_started"),
            PartitionStatus::InProgress => write!(f, "in_progress"),
            PartitionStatus::Complete => write!(f, "complete"),
            PartitionStatus::Error => write!(f, "error"),
        }
    }
}

/// A membership filter restricting a child query to a batch of parent keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyFilter {
    /// Child-side column names, one per join key.
    pub columns: Vec<String>,
    /// Each entry holds one value per column, in column order.
    pub keys: Vec<Vec<String>>,
    /// Canonical type of each key column, as read from the parent. Filters
    /// recorded without types treat every key as text.
    #[serde(default)]
    pub types: Vec<CanonicalType>,
}

impl KeyFilter {
    pub fn column_type(&self, index: usize) -> CanonicalType {
        self.types.get(index).copied().unwrap_or(CanonicalType::Text)
    }
}

/// Everything needed to (re)start reading one partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionSpec {
    pub key: PartitionKey,
    pub parent: Option<PartitionKey>,
    pub filter: Option<KeyFilter>,
}

impl PartitionSpec {
    pub fn root(unit: &str) -> Self {
        Self {
            key: PartitionKey::whole_table(unit),
            parent: None,
            filter: None,
        }
    }
}

/// Durable status of one partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionRecord {
    pub key: PartitionKey,
    pub status: PartitionStatus,
    pub rows_written: u64,
    pub error_detail: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub parent: Option<PartitionKey>,
    #[serde(default)]
    pub filter: Option<KeyFilter>,
}

impl PartitionRecord {
    pub fn planned(spec: &PartitionSpec) -> Self {
        Self {
            key: spec.key.clone(),
            status: PartitionStatus::NotStarted,
            rows_written: 0,
            error_detail: None,
            updated_at: Utc::now(),
            parent: spec.parent.clone(),
            filter: spec.filter.clone(),
        }
    }

    pub fn spec(&self) -> PartitionSpec {
        PartitionSpec {
            key: self.key.clone(),
            parent: self.parent.clone(),
            filter: self.filter.clone(),
        }
    }
}

/// Supported output formats for extracted partitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    /// Comma-separated values (CSV), compressed with Gzip.
    #[default]
    Csv,
    /// Apache Parquet format.
    Parquet,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv.gz",
            FileFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Csv => write!(f, "CSV"),
            FileFormat::Parquet => write!(f, "PARQUET"),
        }
    }
}

impl std::str::FromStr for FileFormat {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "parquet" => Ok(FileFormat::Parquet),
            other => Err(ExtractError::Config(format!("unknown file format '{}'", other))),
        }
    }
}

/// A batch of rows in flight between a read task and the writer.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub partition: PartitionKey,
    /// Strictly increasing within a partition, starting at 0.
    pub sequence: u64,
    pub rows: Vec<Row>,
}
