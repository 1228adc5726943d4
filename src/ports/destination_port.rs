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

//! # Destination Port
//!
//! Implemented by every output format. All operations are idempotent under
//! re-application: beginning a partition again discards whatever an earlier
//! attempt left behind.

use crate::domain::entities::PartitionKey;
use crate::domain::errors::Result;
use crate::domain::values::{Column, Row};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PartitionTarget<'a> {
    pub key: &'a PartitionKey,
    pub target_table: &'a str,
    pub columns: &'a [Column],
}

/// What `end_partition` left on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionArtifact {
    pub path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
}

pub trait DestinationWriter: Send {
    fn begin_partition(&mut self, target: &PartitionTarget<'_>) -> Result<()>;

    fn write_chunk(&mut self, key: &PartitionKey, rows: &[Row]) -> Result<()>;

    /// Flushes and publishes the partition's output.
    fn end_partition(&mut self, key: &PartitionKey) -> Result<PartitionArtifact>;

    /// Drops a partially written partition.
    fn abort_partition(&mut self, key: &PartitionKey) -> Result<()>;

    /// True when a published artifact exists for the partition.
    fn has_partition(&self, key: &PartitionKey, target_table: &str) -> Result<bool>;

    /// Where the table's column metadata lives, for destinations that keep it.
    fn schema_path(&self, _target_table: &str) -> Option<PathBuf> {
        None
    }
}
