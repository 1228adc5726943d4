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

//! Gzip-compressed CSV destination.
//!
//! One file per partition, with a header row. Binary values are base64,
//! nulls are empty fields.

use crate::domain::entities::{FileFormat, PartitionKey};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::values::Row;
use crate::infrastructure::local_storage::layout::{remove_if_exists, write_err, PartitionLayout};
use crate::ports::destination_port::{DestinationWriter, PartitionArtifact, PartitionTarget};
use csv::{QuoteStyle, Writer, WriterBuilder};
use flate2::write::GzEncoder;
use flate2::Compression as GzipCompression;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

struct OpenCsv {
    writer: Writer<GzEncoder<BufWriter<File>>>,
    partial: PathBuf,
    final_path: PathBuf,
    rows: u64,
}

pub struct CsvDestination {
    layout: PartitionLayout,
    delimiter: u8,
    open: HashMap<PartitionKey, OpenCsv>,
    /// Target tables whose `schema.json` this run has written.
    schemas: HashSet<String>,
}

impl CsvDestination {
    pub fn new(run_dir: &Path, delimiter: u8) -> Self {
        Self {
            layout: PartitionLayout::new(run_dir, FileFormat::Csv),
            delimiter,
            open: HashMap::new(),
            schemas: HashSet::new(),
        }
    }

    fn open_entry(&mut self, key: &PartitionKey) -> Result<&mut OpenCsv> {
        self.open
            .get_mut(key)
            .ok_or_else(|| ExtractError::SinkWrite(format!("partition {} was not begun", key)))
    }
}

impl DestinationWriter for CsvDestination {
    fn begin_partition(&mut self, target: &PartitionTarget<'_>) -> Result<()> {
        if let Some(stale) = self.open.remove(target.key) {
            drop(stale.writer);
            remove_if_exists(&stale.partial)?;
        }
        let (partial, final_path) = self.layout.prepare(target.key, target.target_table)?;
        if !target.columns.is_empty() && !self.schemas.contains(target.target_table) {
            self.layout.write_schema(target.target_table, target.columns)?;
            self.schemas.insert(target.target_table.to_string());
        }

        let file = File::create(&partial).map_err(|e| write_err(&partial, e))?;
        let buf_writer = BufWriter::with_capacity(128 * 1024, file);
        let encoder = GzEncoder::new(buf_writer, GzipCompression::fast());
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::NonNumeric)
            .from_writer(encoder);

        writer
            .write_record(target.columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| write_err(&partial, e))?;

        debug!("Opened {} for {}", partial.display(), target.key);
        self.open.insert(
            target.key.clone(),
            OpenCsv {
                writer,
                partial,
                final_path,
                rows: 0,
            },
        );
        Ok(())
    }

    fn write_chunk(&mut self, key: &PartitionKey, rows: &[Row]) -> Result<()> {
        let entry = self.open_entry(key)?;
        for row in rows {
            entry
                .writer
                .write_record(row.iter().map(|v| v.to_field()))
                .map_err(|e| write_err(&entry.partial, e))?;
        }
        entry.rows += rows.len() as u64;
        Ok(())
    }

    fn end_partition(&mut self, key: &PartitionKey) -> Result<PartitionArtifact> {
        let entry = self
            .open
            .remove(key)
            .ok_or_else(|| ExtractError::SinkWrite(format!("partition {} was not begun", key)))?;

        let encoder = entry
            .writer
            .into_inner()
            .map_err(|e| write_err(&entry.partial, e))?;
        let buf_writer = encoder.finish().map_err(|e| write_err(&entry.partial, e))?;
        let file = buf_writer
            .into_inner()
            .map_err(|e| write_err(&entry.partial, e))?;
        file.sync_all().map_err(|e| write_err(&entry.partial, e))?;
        drop(file);

        let bytes = self.layout.publish(&entry.partial, &entry.final_path)?;
        Ok(PartitionArtifact {
            path: entry.final_path,
            rows: entry.rows,
            bytes,
        })
    }

    fn abort_partition(&mut self, key: &PartitionKey) -> Result<()> {
        if let Some(entry) = self.open.remove(key) {
            drop(entry.writer);
            remove_if_exists(&entry.partial)?;
        }
        Ok(())
    }

    fn has_partition(&self, key: &PartitionKey, target_table: &str) -> Result<bool> {
        Ok(self.layout.exists(key, target_table))
    }

    fn schema_path(&self, target_table: &str) -> Option<PathBuf> {
        Some(self.layout.schema_path(target_table))
    }
}
