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

use clap::Parser;
use erp_extract::application::coordinator::ExtractionCoordinator;
use erp_extract::application::report::{RunStatus, RunSummary, UnitOutcome};
use erp_extract::application::runtime::RuntimeContext;
use erp_extract::config::{load_units, AppConfig, CliArgs};
use erp_extract::domain::entities::Extraction;
use erp_extract::domain::errors::{ExtractError, Result};
use erp_extract::infrastructure::ledger::redb_ledger::ProgressLedger;
use erp_extract::infrastructure::local_storage::build_destination;
use log::{error, info};
use std::process;
use std::sync::Arc;

fn main() {
    // 1. Initialize Logging
    env_logger::init();

    // 2. Parse Arguments
    let args = CliArgs::parse();

    // 3. Load Config
    let mut config = match AppConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            process::exit(1);
        }
    };

    // Merge CLI overrides
    if let Err(e) = config.merge_cli(&args).and_then(|_| config.validate()) {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }

    // 4. Run
    match run(&config, &args) {
        Ok(summary) => {
            let done = summary
                .units
                .iter()
                .filter(|u| u.outcome == UnitOutcome::FullyExtracted)
                .count();
            info!(
                "Extraction {} {:?}. {}/{} units fully extracted.",
                summary.extraction_id,
                summary.status,
                done,
                summary.units.len()
            );
            if summary.status != RunStatus::Succeeded {
                process::exit(2);
            }
        }
        Err(e) => {
            if e.is_run_fatal() {
                error!("Extraction aborted: {}", e);
            } else {
                error!("Extraction failed to start: {}", e);
            }
            process::exit(1);
        }
    }
}

fn run(config: &AppConfig, args: &CliArgs) -> Result<RunSummary> {
    let runtime = RuntimeContext::init(config, None)?;
    let work_dir = config.output.work_dir();
    let ledger = Arc::new(ProgressLedger::open(&work_dir)?);

    let (extraction, resume) = match &args.resume {
        Some(id) => {
            let expected = args.definition.as_deref().map(load_units).transpose()?;
            let extraction = ledger.resume_extraction(id, expected.as_deref())?;
            info!("Resuming extraction {} created {}", extraction.id, extraction.created_at);
            (extraction, true)
        }
        None => {
            let path = args.definition.as_deref().ok_or_else(|| {
                ExtractError::Config("--definition is required to start a new extraction".into())
            })?;
            let extraction = Extraction::new(load_units(path)?, &work_dir)?;
            ledger.save_manifest(&extraction)?;
            info!(
                "Created extraction {} (resume with --resume {})",
                extraction.id, extraction.id
            );
            (extraction, false)
        }
    };

    let destination = build_destination(
        config.output.file_format.unwrap_or_default(),
        &extraction.run_dir(),
        config.output.delimiter_byte()?,
        config.output.parquet_compression.clone(),
    );

    ExtractionCoordinator::new(runtime.source, destination, ledger, runtime.settings).run(&extraction, resume)
}
