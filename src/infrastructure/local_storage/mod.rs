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

//! File-based destinations under the extraction's run directory.

pub mod csv_destination;
pub mod layout;
pub mod parquet_destination;

use crate::domain::entities::FileFormat;
use crate::ports::destination_port::DestinationWriter;
use std::path::Path;

/// Picks the destination once, at extraction construction time.
pub fn build_destination(
    format: FileFormat,
    run_dir: &Path,
    delimiter: u8,
    parquet_compression: Option<String>,
) -> Box<dyn DestinationWriter> {
    match format {
        FileFormat::Csv => Box::new(csv_destination::CsvDestination::new(run_dir, delimiter)),
        FileFormat::Parquet => Box::new(parquet_destination::ParquetDestination::new(
            run_dir,
            parquet_compression,
        )),
    }
}
