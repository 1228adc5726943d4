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

//! Per-unit outcome and the `summary.json` left next to the data.

use crate::domain::entities::{Extraction, PartitionKey, PartitionRecord, PartitionStatus, UnitCatalog};
use crate::domain::errors::{ExtractError, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Succeeded,
    FinishedWithErrors,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitOutcome {
    FullyExtracted,
    PartiallyExtracted,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PartitionReport {
    pub partition: String,
    pub status: PartitionStatus,
    pub rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnitSummary {
    pub unit: String,
    pub target_table: String,
    pub outcome: UnitOutcome,
    pub rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The target table's `schema.json`, relative to the run directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub partitions: Vec<PartitionReport>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub extraction_id: String,
    pub status: RunStatus,
    pub elapsed_secs: f64,
    pub total_rows: u64,
    pub units: Vec<UnitSummary>,
}

impl RunSummary {
    /// Derives every unit's outcome from the ledger records of one run.
    ///
    /// A child unit that never had a partition planned is fully extracted
    /// when its parent is (the parent simply had no keys), and failed
    /// otherwise.
    pub fn build(
        extraction: &Extraction,
        catalog: &UnitCatalog,
        records: &BTreeMap<PartitionKey, PartitionRecord>,
        elapsed: Duration,
        cancelled: bool,
    ) -> Self {
        let mut by_unit: HashMap<&str, Vec<&PartitionRecord>> = HashMap::new();
        for rec in records.values() {
            by_unit.entry(rec.key.unit.as_str()).or_default().push(rec);
        }

        let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();
        let mut units = Vec::new();
        // Depth-first order: a parent is always summarised before its children.
        for name in catalog.names() {
            let Some(unit) = catalog.get(name) else { continue };
            let parent = catalog.parent_of(name);
            let parent_outcome = parent.and_then(|p| outcomes.get(p).copied());
            let recs = by_unit.get(name).cloned().unwrap_or_default();

            let complete = recs
                .iter()
                .filter(|r| r.status == PartitionStatus::Complete)
                .count();
            let (outcome, detail) = if recs.is_empty() {
                match (parent, parent_outcome) {
                    (Some(_), Some(UnitOutcome::FullyExtracted)) => (UnitOutcome::FullyExtracted, None),
                    (Some(p), _) => (UnitOutcome::Failed, Some(format!("parent {} failed", p))),
                    (None, _) => (UnitOutcome::Failed, Some("not started".to_string())),
                }
            } else if complete == recs.len() {
                match parent_outcome {
                    Some(UnitOutcome::FullyExtracted) | None => (UnitOutcome::FullyExtracted, None),
                    Some(_) => (
                        UnitOutcome::PartiallyExtracted,
                        parent.map(|p| format!("parent {} was not fully extracted", p)),
                    ),
                }
            } else if complete > 0 {
                (UnitOutcome::PartiallyExtracted, None)
            } else {
                (UnitOutcome::Failed, None)
            };
            outcomes.insert(name.to_string(), outcome);

            let partitions: Vec<PartitionReport> = recs
                .iter()
                .map(|r| PartitionReport {
                    partition: r.key.partition.to_string(),
                    status: r.status,
                    rows: r.rows_written,
                    error: r.error_detail.clone(),
                })
                .collect();
            units.push(UnitSummary {
                unit: name.to_string(),
                target_table: unit.target_table.clone(),
                outcome,
                rows: partitions.iter().map(|p| p.rows).sum(),
                detail,
                schema: None,
                partitions,
            });
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if units.iter().all(|u| u.outcome == UnitOutcome::FullyExtracted) {
            RunStatus::Succeeded
        } else {
            RunStatus::FinishedWithErrors
        };

        Self {
            extraction_id: extraction.id.clone(),
            status,
            elapsed_secs: elapsed.as_secs_f64(),
            total_rows: units.iter().map(|u| u.rows).sum(),
            units,
        }
    }

    /// Points every unit at its table's schema file, when one was written.
    pub fn attach_schemas(&mut self, run_dir: &Path, schemas: &HashMap<String, PathBuf>) {
        for unit in &mut self.units {
            unit.schema = schemas
                .get(&unit.target_table)
                .filter(|p| p.is_file())
                .map(|p| p.strip_prefix(run_dir).unwrap_or(p.as_path()).display().to_string());
        }
    }

    pub fn unit(&self, name: &str) -> Option<&UnitSummary> {
        self.units.iter().find(|u| u.unit == name)
    }

    /// Writes `summary.json` into `run_dir`.
    pub fn write(&self, run_dir: &Path) -> Result<PathBuf> {
        let failed = self
            .units
            .iter()
            .filter(|u| u.outcome != UnitOutcome::FullyExtracted)
            .count();
        let report = json!({
            "summary": {
                "extraction_id": self.extraction_id,
                "status": self.status,
                "total_units": self.units.len(),
                "fully_extracted": self.units.len() - failed,
                "not_fully_extracted": failed,
                "total_rows": self.total_rows,
                "total_duration_seconds": self.elapsed_secs,
                "rows_per_sec": if self.elapsed_secs > 0.0 { self.total_rows as f64 / self.elapsed_secs } else { 0.0 },
            },
            "units": self.units,
        });

        std::fs::create_dir_all(run_dir)?;
        let path = run_dir.join(SUMMARY_FILE);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &report)
            .map_err(|e| ExtractError::SinkWrite(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ExtractionUnit, PartitionId, PartitionSpec};

    fn tree() -> Vec<ExtractionUnit> {
        vec![
            ExtractionUnit::sql("VBAK", "SELECT * FROM VBAK", "vbak").with_child(
                ExtractionUnit::sql("VBAP", "SELECT * FROM VBAP", "vbap"),
                &[("VBELN", "VBELN")],
            ),
            ExtractionUnit::sql("KNA1", "SELECT * FROM KNA1", "kna1"),
        ]
    }

    fn record(unit: &str, partition: PartitionId, status: PartitionStatus, rows: u64) -> (PartitionKey, PartitionRecord) {
        let spec = PartitionSpec {
            key: PartitionKey::new(unit, partition),
            parent: None,
            filter: None,
        };
        let mut rec = PartitionRecord::planned(&spec);
        rec.status = status;
        rec.rows_written = rows;
        if status == PartitionStatus::Error {
            rec.error_detail = Some("ORA-00942".into());
        }
        (spec.key, rec)
    }

    #[test]
    fn test_outcomes_follow_partition_status() {
        let dir = tempfile::tempdir().unwrap();
        let units = tree();
        let extraction = Extraction::new(units.clone(), dir.path()).unwrap();
        let catalog = UnitCatalog::build(&units);
        let parent = PartitionKey::whole_table("VBAK");
        let records: BTreeMap<_, _> = vec![
            record("VBAK", PartitionId::whole_table(), PartitionStatus::Complete, 1000),
            record("VBAP", PartitionId::child(&parent, 0, 0), PartitionStatus::Complete, 40),
            record("VBAP", PartitionId::child(&parent, 0, 1), PartitionStatus::Error, 0),
            record("KNA1", PartitionId::whole_table(), PartitionStatus::Error, 0),
        ]
        .into_iter()
        .collect();

        let summary = RunSummary::build(&extraction, &catalog, &records, Duration::from_secs(2), false);
        assert_eq!(summary.status, RunStatus::FinishedWithErrors);
        assert_eq!(summary.unit("VBAK").unwrap().outcome, UnitOutcome::FullyExtracted);
        assert_eq!(summary.unit("VBAP").unwrap().outcome, UnitOutcome::PartiallyExtracted);
        assert_eq!(summary.unit("KNA1").unwrap().outcome, UnitOutcome::Failed);
        assert_eq!(summary.total_rows, 1040);

        let path = summary.write(&extraction.run_dir()).unwrap();
        let written: serde_json::Value = serde_json::from_reader(std::fs::File::open(path).unwrap()).unwrap();
        assert_eq!(written["summary"]["status"], "FINISHED_WITH_ERRORS");
        assert_eq!(written["units"][1]["outcome"], "PARTIALLY_EXTRACTED");
        assert!(written["units"][0].get("schema").is_none());
    }

    #[test]
    fn test_summary_lists_written_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let units = tree();
        let extraction = Extraction::new(units.clone(), dir.path()).unwrap();
        let run_dir = extraction.run_dir();
        let vbak_schema = run_dir.join("data").join("vbak").join("schema.json");
        std::fs::create_dir_all(vbak_schema.parent().unwrap()).unwrap();
        std::fs::write(&vbak_schema, "{}").unwrap();
        let schemas: HashMap<String, PathBuf> = vec![
            ("vbak".to_string(), vbak_schema),
            ("vbap".to_string(), run_dir.join("data").join("vbap").join("schema.json")),
        ]
        .into_iter()
        .collect();

        let records: BTreeMap<_, _> =
            vec![record("VBAK", PartitionId::whole_table(), PartitionStatus::Complete, 3)].into_iter().collect();
        let mut summary =
            RunSummary::build(&extraction, &UnitCatalog::build(&units), &records, Duration::ZERO, false);
        summary.attach_schemas(&run_dir, &schemas);

        let expected = Path::new("data").join("vbak").join("schema.json").display().to_string();
        assert_eq!(summary.unit("VBAK").unwrap().schema.as_deref(), Some(expected.as_str()));
        assert_eq!(summary.unit("VBAP").unwrap().schema, None);
        assert_eq!(summary.unit("KNA1").unwrap().schema, None);
    }

    #[test]
    fn test_child_without_partitions_depends_on_parent() {
        let dir = tempfile::tempdir().unwrap();
        let units = tree();
        let extraction = Extraction::new(units.clone(), dir.path()).unwrap();
        let catalog = UnitCatalog::build(&units);

        let failed: BTreeMap<_, _> = vec![
            record("VBAK", PartitionId::whole_table(), PartitionStatus::Error, 0),
            record("KNA1", PartitionId::whole_table(), PartitionStatus::Complete, 5),
        ]
        .into_iter()
        .collect();
        let summary = RunSummary::build(&extraction, &catalog, &failed, Duration::ZERO, false);
        let vbap = summary.unit("VBAP").unwrap();
        assert_eq!(vbap.outcome, UnitOutcome::Failed);
        assert_eq!(vbap.detail.as_deref(), Some("parent VBAK failed"));

        let empty_parent: BTreeMap<_, _> = vec![
            record("VBAK", PartitionId::whole_table(), PartitionStatus::Complete, 0),
            record("KNA1", PartitionId::whole_table(), PartitionStatus::Complete, 5),
        ]
        .into_iter()
        .collect();
        let summary = RunSummary::build(&extraction, &catalog, &empty_parent, Duration::ZERO, false);
        assert_eq!(summary.unit("VBAP").unwrap().outcome, UnitOutcome::FullyExtracted);
        assert_eq!(summary.status, RunStatus::Succeeded);
    }
}
