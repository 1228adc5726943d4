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

//! On-disk layout shared by the file-based destinations:
//! `<run_dir>/data/<target_table>/<unit>-<hash16>.<ext>`, with one
//! `schema.json` per target table describing its columns.

use crate::domain::entities::{FileFormat, PartitionKey};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::Column;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PARTIAL_SUFFIX: &str = ".partial";
pub const SCHEMA_FILE: &str = "schema.json";

#[derive(Debug, Clone)]
pub struct PartitionLayout {
    data_dir: PathBuf,
    format: FileFormat,
}

/// Keeps file names portable: anything outside `[A-Za-z0-9_.-]` becomes `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

impl PartitionLayout {
    pub fn new(run_dir: &Path, format: FileFormat) -> Self {
        Self {
            data_dir: run_dir.join("data"),
            format,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn final_path(&self, key: &PartitionKey, target_table: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(key.partition.as_str().as_bytes()));
        self.data_dir.join(sanitize(target_table)).join(format!(
            "{}-{}.{}",
            sanitize(&key.unit),
            &digest[..16],
            self.format.extension()
        ))
    }

    pub fn partial_path(&self, key: &PartitionKey, target_table: &str) -> PathBuf {
        let mut p = self.final_path(key, target_table).into_os_string();
        p.push(PARTIAL_SUFFIX);
        PathBuf::from(p)
    }

    /// Removes leftovers of earlier attempts and makes sure the table directory exists.
    pub fn prepare(&self, key: &PartitionKey, target_table: &str) -> Result<(PathBuf, PathBuf)> {
        let final_path = self.final_path(key, target_table);
        let partial = self.partial_path(key, target_table);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ExtractError::SinkWrite(format!("{}: {}", parent.display(), e)))?;
        }
        remove_if_exists(&final_path)?;
        remove_if_exists(&partial)?;
        Ok((partial, final_path))
    }

    /// Atomically moves a finished partial file into place.
    pub fn publish(&self, partial: &Path, final_path: &Path) -> Result<u64> {
        match fs::rename(partial, final_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ExtractError::DestinationCorrupt(format!(
                    "{} vanished before it could be published",
                    partial.display()
                )))
            }
            Err(e) => {
                return Err(ExtractError::SinkWrite(format!(
                    "publishing {}: {}",
                    final_path.display(),
                    e
                )))
            }
        }
        Ok(fs::metadata(final_path).map(|m| m.len()).unwrap_or(0))
    }

    pub fn exists(&self, key: &PartitionKey, target_table: &str) -> bool {
        self.final_path(key, target_table).is_file()
    }

    pub fn schema_path(&self, target_table: &str) -> PathBuf {
        self.data_dir.join(sanitize(target_table)).join(SCHEMA_FILE)
    }

    /// Writes the table's column metadata (name, canonical and native type),
    /// replacing any earlier copy atomically.
    pub fn write_schema(&self, target_table: &str, columns: &[Column]) -> Result<PathBuf> {
        let path = self.schema_path(target_table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
        }
        let schema = json!({
            "target_table": target_table,
            "format": self.format,
            "columns": columns,
        });
        let body = serde_json::to_string_pretty(&schema).map_err(|e| write_err(&path, e))?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(PARTIAL_SUFFIX);
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body).map_err(|e| write_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| write_err(&path, e))?;
        Ok(path)
    }
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ExtractError::SinkWrite(format!("removing {}: {}", path.display(), e))),
    }
}

/// Classifies an I/O error raised while writing partition data.
pub fn write_err(path: &Path, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::SinkWrite(format!("{}: {}", path.display(), e))
}
