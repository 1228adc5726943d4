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

//! # Progress Ledger
//!
//! Durable partition status, backed by a single `redb` file in the working
//! directory (`<work_dir>/ledger.redb`).
//!
//! Layout:
//! - `manifests`: extraction id -> JSON manifest (unit tree + fingerprint).
//! - `partitions/<extraction id>`: partition storage key -> JSON `PartitionRecord`.
//!
//! Every status change is one write transaction that reads the current
//! record, applies the transition rules and commits the whole record, so a
//! crash never leaves a half-updated status.

use crate::domain::entities::{
    fingerprint_units, Extraction, ExtractionUnit, PartitionKey, PartitionRecord, PartitionSpec,
    PartitionStatus,
};
use crate::domain::errors::{ExtractError, Result};
use chrono::Utc;
use log::{debug, warn};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

const MANIFESTS: TableDefinition<&str, &str> = TableDefinition::new("manifests");

pub const LEDGER_FILE: &str = "ledger.redb";

#[derive(Serialize, Deserialize)]
struct StoredManifest {
    extraction: Extraction,
    fingerprint: String,
}

/// Result of asking to move a partition to `in_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// The partition is `complete`; the request was ignored.
    AlreadyComplete,
    /// `error -> in_progress` outside of an explicit resume.
    Rejected,
}

pub struct ProgressLedger {
    db: Database,
    path: PathBuf,
}

fn ledger_err<E: Display>(context: &str, e: E) -> ExtractError {
    ExtractError::Ledger(format!("{}: {}", context, e))
}

fn partitions_table(extraction_id: &str) -> String {
    format!("partitions/{}", extraction_id)
}

impl ProgressLedger {
    /// Opens (or creates) the ledger in `work_dir`.
    pub fn open(work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let path = work_dir.join(LEDGER_FILE);
        let db = Database::create(&path).map_err(|e| ledger_err("open", e))?;
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores the manifest of a newly created extraction.
    pub fn save_manifest(&self, extraction: &Extraction) -> Result<()> {
        let stored = StoredManifest {
            extraction: extraction.clone(),
            fingerprint: extraction.fingerprint(),
        };
        let json = serde_json::to_string(&stored)?;
        let txn = self.db.begin_write().map_err(|e| ledger_err("begin", e))?;
        {
            let mut table = txn
                .open_table(MANIFESTS)
                .map_err(|e| ledger_err("manifests", e))?;
            if table
                .get(extraction.id.as_str())
                .map_err(|e| ledger_err("manifests", e))?
                .is_some()
            {
                return Err(ExtractError::Ledger(format!(
                    "extraction {} already exists",
                    extraction.id
                )));
            }
            table
                .insert(extraction.id.as_str(), json.as_str())
                .map_err(|e| ledger_err("manifests", e))?;
            // Create the partition table eagerly so load_status works on an empty run.
            let name = partitions_table(&extraction.id);
            let def: TableDefinition<&str, &str> = TableDefinition::new(&name);
            txn.open_table(def).map_err(|e| ledger_err("partitions", e))?;
        }
        txn.commit().map_err(|e| ledger_err("commit", e))?;
        Ok(())
    }

    /// Reloads an extraction by id.
    ///
    /// When `expected_units` is given, its fingerprint must match the stored
    /// one; otherwise stored partition ids would point at the wrong work.
    pub fn resume_extraction(
        &self,
        id: &str,
        expected_units: Option<&[ExtractionUnit]>,
    ) -> Result<Extraction> {
        let txn = self.db.begin_read().map_err(|e| ledger_err("begin", e))?;
        let table = match txn.open_table(MANIFESTS) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => {
                return Err(ExtractError::Ledger(format!("unknown extraction id {}", id)))
            }
            Err(e) => return Err(ledger_err("manifests", e)),
        };
        let raw = table
            .get(id)
            .map_err(|e| ledger_err("manifests", e))?
            .ok_or_else(|| ExtractError::Ledger(format!("unknown extraction id {}", id)))?;
        let stored: StoredManifest = serde_json::from_str(raw.value())?;

        if fingerprint_units(&stored.extraction.units) != stored.fingerprint {
            return Err(ExtractError::LedgerInconsistent(format!(
                "manifest for {} does not match its own fingerprint",
                id
            )));
        }
        if let Some(units) = expected_units {
            if fingerprint_units(units) != stored.fingerprint {
                return Err(ExtractError::LedgerInconsistent(format!(
                    "extraction definition changed since {} was created",
                    id
                )));
            }
        }
        Ok(stored.extraction)
    }

    /// Records a planned partition as `not_started` unless it is already known.
    ///
    /// Returns the stored record. A known, not yet complete partition has its
    /// filter refreshed; a complete one is left untouched.
    pub fn record_planned(&self, extraction_id: &str, spec: &PartitionSpec) -> Result<PartitionRecord> {
        self.transition(extraction_id, &spec.key, |current| match current {
            None => Ok(Some(PartitionRecord::planned(spec))),
            Some(rec) if rec.status == PartitionStatus::Complete => Ok(None),
            Some(rec) if rec.filter == spec.filter && rec.parent == spec.parent => Ok(None),
            Some(rec) => {
                debug!("Re-planned {} with a new key filter", spec.key);
                let mut updated = rec.clone();
                updated.filter = spec.filter.clone();
                updated.parent = spec.parent.clone();
                updated.updated_at = Utc::now();
                Ok(Some(updated))
            }
        })
    }

    /// `not_started | in_progress -> in_progress`, and `error -> in_progress`
    /// only when `allow_reentry` (explicit resume) is set.
    pub fn record_start(
        &self,
        extraction_id: &str,
        spec: &PartitionSpec,
        allow_reentry: bool,
    ) -> Result<StartOutcome> {
        let mut outcome = StartOutcome::Started;
        self.transition(extraction_id, &spec.key, |current| {
            let mut rec = match current {
                None => PartitionRecord::planned(spec),
                Some(rec) => match rec.status {
                    PartitionStatus::Complete => {
                        outcome = StartOutcome::AlreadyComplete;
                        return Ok(None);
                    }
                    PartitionStatus::Error if !allow_reentry => {
                        outcome = StartOutcome::Rejected;
                        return Ok(None);
                    }
                    _ => rec.clone(),
                },
            };
            rec.status = PartitionStatus::InProgress;
            rec.rows_written = 0;
            rec.error_detail = None;
            rec.updated_at = Utc::now();
            Ok(Some(rec))
        })?;
        if outcome != StartOutcome::Started {
            warn!(
                "Ignored start of {} in extraction {}: {:?}",
                spec.key, extraction_id, outcome
            );
        }
        Ok(outcome)
    }

    /// `in_progress -> complete`. Completing an already complete partition is a no-op.
    pub fn record_complete(&self, extraction_id: &str, key: &PartitionKey, rows_written: u64) -> Result<()> {
        self.transition(extraction_id, key, |current| match current {
            Some(rec) if rec.status == PartitionStatus::InProgress => {
                let mut rec = rec.clone();
                rec.status = PartitionStatus::Complete;
                rec.rows_written = rows_written;
                rec.error_detail = None;
                rec.updated_at = Utc::now();
                Ok(Some(rec))
            }
            Some(rec) if rec.status == PartitionStatus::Complete => Ok(None),
            Some(rec) => Err(ExtractError::LedgerInconsistent(format!(
                "{} completed while {}",
                key, rec.status
            ))),
            None => Err(ExtractError::LedgerInconsistent(format!(
                "{} completed but was never started",
                key
            ))),
        })
        .map(|_| ())
    }

    /// `* -> error`, except that a complete partition is never downgraded.
    pub fn record_error(&self, extraction_id: &str, spec: &PartitionSpec, detail: &str) -> Result<()> {
        self.transition(extraction_id, &spec.key, |current| {
            let mut rec = match current {
                Some(rec) if rec.status == PartitionStatus::Complete => {
                    warn!("Ignored error for completed partition {}: {}", spec.key, detail);
                    return Ok(None);
                }
                Some(rec) => rec.clone(),
                None => PartitionRecord::planned(spec),
            };
            rec.status = PartitionStatus::Error;
            rec.error_detail = Some(detail.to_string());
            rec.updated_at = Utc::now();
            Ok(Some(rec))
        })
        .map(|_| ())
    }

    pub fn get(&self, extraction_id: &str, key: &PartitionKey) -> Result<Option<PartitionRecord>> {
        let name = partitions_table(extraction_id);
        let def: TableDefinition<&str, &str> = TableDefinition::new(&name);
        let txn = self.db.begin_read().map_err(|e| ledger_err("begin", e))?;
        let table = match txn.open_table(def) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(ledger_err("partitions", e)),
        };
        let found = table
            .get(key.storage_key().as_str())
            .map_err(|e| ledger_err("partitions", e))?;
        match found {
            Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
            None => Ok(None),
        }
    }

    /// All partition records of an extraction, ordered by key.
    pub fn load_status(&self, extraction_id: &str) -> Result<BTreeMap<PartitionKey, PartitionRecord>> {
        let name = partitions_table(extraction_id);
        let def: TableDefinition<&str, &str> = TableDefinition::new(&name);
        let txn = self.db.begin_read().map_err(|e| ledger_err("begin", e))?;
        let table = match txn.open_table(def) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
            Err(e) => return Err(ledger_err("partitions", e)),
        };

        let mut out = BTreeMap::new();
        for entry in table.iter().map_err(|e| ledger_err("partitions", e))? {
            let (k, v) = entry.map_err(|e| ledger_err("partitions", e))?;
            let record: PartitionRecord = serde_json::from_str(v.value())?;
            if record.key.storage_key() != k.value() {
                return Err(ExtractError::LedgerInconsistent(format!(
                    "record stored under '{}' belongs to {}",
                    k.value(),
                    record.key
                )));
            }
            out.insert(record.key.clone(), record);
        }
        Ok(out)
    }

    /// Applies `f` to the current record inside one write transaction.
    /// `Ok(None)` from `f` leaves the record as it is.
    fn transition<F>(&self, extraction_id: &str, key: &PartitionKey, f: F) -> Result<PartitionRecord>
    where
        F: FnOnce(Option<&PartitionRecord>) -> Result<Option<PartitionRecord>>,
    {
        let name = partitions_table(extraction_id);
        let def: TableDefinition<&str, &str> = TableDefinition::new(&name);
        let storage_key = key.storage_key();

        let txn = self.db.begin_write().map_err(|e| ledger_err("begin", e))?;
        let result = {
            let mut table = txn.open_table(def).map_err(|e| ledger_err("partitions", e))?;
            let current: Option<PartitionRecord> = match table
                .get(storage_key.as_str())
                .map_err(|e| ledger_err("partitions", e))?
            {
                Some(raw) => Some(serde_json::from_str(raw.value())?),
                None => None,
            };
            match f(current.as_ref())? {
                Some(next) => {
                    let json = serde_json::to_string(&next)?;
                    table
                        .insert(storage_key.as_str(), json.as_str())
                        .map_err(|e| ledger_err("partitions", e))?;
                    next
                }
                None => match current {
                    Some(rec) => rec,
                    None => {
                        return Err(ExtractError::LedgerInconsistent(format!(
                            "no record for {}",
                            key
                        )))
                    }
                },
            }
        };
        txn.commit().map_err(|e| ledger_err("commit", e))?;
        Ok(result)
    }
}
