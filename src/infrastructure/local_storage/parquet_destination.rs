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

//! Apache Parquet destination.
//!
//! Each chunk becomes one Arrow `RecordBatch` appended to the partition's
//! `ArrowWriter`. Decimals are stored as exact strings.

use crate::domain::entities::{FileFormat, PartitionKey};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::mapping::map_canonical_to_arrow;
use crate::domain::values::{CanonicalType, Column, Row, Value};
use crate::infrastructure::local_storage::layout::{remove_if_exists, write_err, PartitionLayout};
use crate::ports::destination_port::{DestinationWriter, PartitionArtifact, PartitionTarget};
use arrow_array::builder::{BinaryBuilder, Int64Builder, StringBuilder, TimestampMicrosecondBuilder};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Helper enum to manage different Arrow array builders for Parquet export.
enum BoxedBuilder {
    Int64(Int64Builder),
    String(StringBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Binary(BinaryBuilder),
}

impl BoxedBuilder {
    fn new(canonical: CanonicalType, capacity: usize) -> Self {
        match canonical {
            CanonicalType::Integer => BoxedBuilder::Int64(Int64Builder::with_capacity(capacity)),
            CanonicalType::DateTime => {
                BoxedBuilder::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            CanonicalType::Binary => {
                BoxedBuilder::Binary(BinaryBuilder::with_capacity(capacity, capacity * 100))
            }
            CanonicalType::Text | CanonicalType::Decimal => {
                BoxedBuilder::String(StringBuilder::with_capacity(capacity, capacity * 20))
            }
        }
    }

    fn append(&mut self, value: &Value, column: &Column) -> Result<()> {
        match (self, value) {
            (BoxedBuilder::Int64(b), Value::Null) => b.append_null(),
            (BoxedBuilder::String(b), Value::Null) => b.append_null(),
            (BoxedBuilder::Timestamp(b), Value::Null) => b.append_null(),
            (BoxedBuilder::Binary(b), Value::Null) => b.append_null(),
            (BoxedBuilder::Int64(b), Value::Integer(i)) => b.append_value(*i),
            (BoxedBuilder::String(b), Value::Text(s)) => b.append_value(s),
            (BoxedBuilder::String(b), Value::Decimal(d)) => b.append_value(d.normalize().to_string()),
            (BoxedBuilder::Timestamp(b), Value::DateTime(dt)) => {
                b.append_value(dt.and_utc().timestamp_micros())
            }
            (BoxedBuilder::Binary(b), Value::Binary(bytes)) => b.append_value(bytes),
            (_, other) => {
                return Err(ExtractError::SinkWrite(format!(
                    "column {} is {} but received {:?}",
                    column.name, column.canonical_type, other
                )))
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            BoxedBuilder::Int64(b) => Arc::new(b.finish()) as ArrayRef,
            BoxedBuilder::String(b) => Arc::new(b.finish()) as ArrayRef,
            BoxedBuilder::Timestamp(b) => Arc::new(b.finish()) as ArrayRef,
            BoxedBuilder::Binary(b) => Arc::new(b.finish()) as ArrayRef,
        }
    }
}

struct OpenParquet {
    writer: ArrowWriter<File>,
    schema: Arc<Schema>,
    columns: Vec<Column>,
    partial: PathBuf,
    final_path: PathBuf,
    rows: u64,
}

pub struct ParquetDestination {
    layout: PartitionLayout,
    compression: Option<String>,
    open: HashMap<PartitionKey, OpenParquet>,
    /// Target tables whose `schema.json` this run has written.
    schemas: HashSet<String>,
}

impl ParquetDestination {
    pub fn new(run_dir: &Path, compression: Option<String>) -> Self {
        Self {
            layout: PartitionLayout::new(run_dir, FileFormat::Parquet),
            compression,
            open: HashMap::new(),
            schemas: HashSet::new(),
        }
    }

    /// Maps a compression string to the corresponding Parquet compression codec.
    fn map_parquet_compression(c: &Option<String>) -> ParquetCompression {
        match c.as_deref().unwrap_or("zstd").to_lowercase().as_str() {
            "snappy" => ParquetCompression::SNAPPY,
            "gzip" => ParquetCompression::GZIP(Default::default()),
            "brotli" => ParquetCompression::BROTLI(Default::default()),
            "lz4" => ParquetCompression::LZ4,
            "zstd" => ParquetCompression::ZSTD(Default::default()),
            "none" => ParquetCompression::UNCOMPRESSED,
            _ => ParquetCompression::ZSTD(Default::default()),
        }
    }
}

impl DestinationWriter for ParquetDestination {
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

        let fields: Vec<Field> = target
            .columns
            .iter()
            .map(|c| Field::new(&c.name, map_canonical_to_arrow(c.canonical_type), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let file = File::create(&partial).map_err(|e| write_err(&partial, e))?;
        let props = WriterProperties::builder()
            .set_compression(Self::map_parquet_compression(&self.compression))
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(|e| write_err(&partial, e))?;

        self.open.insert(
            target.key.clone(),
            OpenParquet {
                writer,
                schema,
                columns: target.columns.to_vec(),
                partial,
                final_path,
                rows: 0,
            },
        );
        Ok(())
    }

    fn write_chunk(&mut self, key: &PartitionKey, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let entry = self
            .open
            .get_mut(key)
            .ok_or_else(|| ExtractError::SinkWrite(format!("partition {} was not begun", key)))?;

        let mut builders: Vec<BoxedBuilder> = entry
            .columns
            .iter()
            .map(|c| BoxedBuilder::new(c.canonical_type, rows.len()))
            .collect();
        for row in rows {
            if row.len() != builders.len() {
                return Err(ExtractError::SinkWrite(format!(
                    "row has {} values, {} expects {}",
                    row.len(),
                    key,
                    builders.len()
                )));
            }
            for ((builder, value), column) in builders.iter_mut().zip(row).zip(&entry.columns) {
                builder.append(value, column)?;
            }
        }

        let arrays: Vec<ArrayRef> = builders.iter_mut().map(|b| b.finish()).collect();
        let batch = RecordBatch::try_new(entry.schema.clone(), arrays)
            .map_err(|e| write_err(&entry.partial, e))?;
        entry
            .writer
            .write(&batch)
            .map_err(|e| write_err(&entry.partial, e))?;
        entry.rows += rows.len() as u64;
        Ok(())
    }

    fn end_partition(&mut self, key: &PartitionKey) -> Result<PartitionArtifact> {
        let entry = self
            .open
            .remove(key)
            .ok_or_else(|| ExtractError::SinkWrite(format!("partition {} was not begun", key)))?;
        entry
            .writer
            .close()
            .map_err(|e| write_err(&entry.partial, e))?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Array, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tempfile::tempdir;

    #[test]
    fn test_write_parquet_partition() {
        let dir = tempdir().unwrap();
        let mut dest = ParquetDestination::new(dir.path(), Some("snappy".into()));
        let key = PartitionKey::whole_table("BSEG");
        let cols = vec![
            Column::new("BELNR", CanonicalType::Integer, "I"),
            Column::new("DMBTR", CanonicalType::Decimal, "P"),
        ];
        dest.begin_partition(&PartitionTarget { key: &key, target_table: "BSEG", columns: &cols })
            .unwrap();
        dest.write_chunk(
            &key,
            &[
                vec![Value::Integer(1), Value::Decimal(Decimal::from_str("10.50").unwrap())],
                vec![Value::Integer(2), Value::Null],
            ],
        )
        .unwrap();
        let artifact = dest.end_partition(&key).unwrap();
        assert_eq!(artifact.rows, 2);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&artifact.path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        let batch = &batches[0];
        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        let amounts = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(ids.value(1), 2);
        assert_eq!(amounts.value(0), "10.5");
        assert!(amounts.is_null(1));
    }

    #[test]
    fn test_type_mismatch_is_a_sink_error() {
        let dir = tempdir().unwrap();
        let mut dest = ParquetDestination::new(dir.path(), None);
        let key = PartitionKey::whole_table("T");
        let cols = vec![Column::new("N", CanonicalType::Integer, "NUMBER(5,0)")];
        dest.begin_partition(&PartitionTarget { key: &key, target_table: "T", columns: &cols })
            .unwrap();
        let err = dest
            .write_chunk(&key, &[vec![Value::Text("x".into())]])
            .unwrap_err();
        assert!(matches!(err, ExtractError::SinkWrite(_)));
        dest.abort_partition(&key).unwrap();
    }
}
