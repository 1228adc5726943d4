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

//! # Configuration
//!
//! `AppConfig` is read from YAML or JSON (by file extension), overridden by
//! command-line flags, then validated. The engine receives explicit values
//! derived from it; nothing here is global.

use crate::application::coordinator::CoordinatorSettings;
use crate::application::retry::RetryPolicy;
use crate::domain::entities::{validate_units, ExtractionUnit, FileFormat};
use crate::domain::errors::{ExtractError, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_CPU_PERCENT: u8 = 50;
pub const DEFAULT_FIELD_DELIMITER: u8 = b',';

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which backend to read from. Chosen once, when the run is built.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Oracle(OracleConfig),
    Rfc(RfcConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    pub username: String,
    pub password: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_oracle_port")]
    pub port: u16,
    #[serde(default)]
    pub service: String,
    /// Full connect string; wins over host/port/service.
    pub connection_string: Option<String>,
    pub prefetch_rows: Option<u32>,
}

fn default_oracle_port() -> u16 {
    1521
}

impl OracleConfig {
    pub fn get_connection_string(&self) -> String {
        match &self.connection_string {
            Some(cs) => cs.clone(),
            None => format!("//{}:{}/{}", self.host, self.port, self.service),
        }
    }

    /// Password from the file, else `ORACLE_PASSWORD`.
    pub fn resolve_password(&self) -> String {
        self.password
            .clone()
            .or_else(|| std::env::var("ORACLE_PASSWORD").ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RfcConfig {
    /// Application server host (`ASHOST`).
    pub host: String,
    /// System number (`SYSNR`).
    pub sysnr: String,
    pub client: String,
    pub user: String,
    pub password: Option<String>,
    pub lang: Option<String>,
    /// Table-read function module; `RFC_READ_TABLE` when unset.
    pub function_module: Option<String>,
    /// Field delimiter requested from the function module. Unset means
    /// fixed-width rows.
    pub delimiter: Option<String>,
}

impl RfcConfig {
    /// Password from the file, else `RFC_PASSWORD`.
    pub fn resolve_password(&self) -> String {
        self.password
            .clone()
            .or_else(|| std::env::var("RFC_PASSWORD").ok())
            .unwrap_or_default()
    }

    pub fn delimiter_char(&self) -> Result<Option<char>> {
        match self.delimiter.as_deref() {
            None | Some("") => Ok(None),
            Some(d) => {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Some(c)),
                    _ => Err(ExtractError::Config(format!(
                        "rfc delimiter must be one character, got '{}'",
                        d
                    ))),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    pub chunk_size: Option<usize>,
    pub min_chunk_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_readers: Option<usize>,
    pub cpu_percent: Option<u8>,
    /// Accepted for clarity only; anything other than 1 is rejected.
    pub max_writers: Option<usize>,
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub fetch_timeout_secs: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            fetch_timeout: self
                .fetch_timeout_secs
                .map_or(defaults.fetch_timeout, Duration::from_secs),
            initial_backoff: self
                .initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
        }
    }
}

impl EngineConfig {
    /// Configured chunk size, never below the minimum.
    pub fn effective_chunk_size(&self) -> usize {
        let min = self.min_chunk_size.unwrap_or(DEFAULT_MIN_CHUNK_SIZE);
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(min)
    }

    /// Explicit `max_readers`, else `cpu_percent` of the available cores.
    pub fn resolve_max_readers(&self) -> usize {
        let cpu_percent = self.cpu_percent.unwrap_or(DEFAULT_CPU_PERCENT);
        let total_cpus = num_cpus::get();
        let readers = self
            .max_readers
            .unwrap_or_else(|| (total_cpus as f64 * (cpu_percent as f64 / 100.0)).ceil() as usize);
        std::cmp::max(1, readers)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            chunk_size: self.effective_chunk_size(),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            max_readers: self.resolve_max_readers(),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            retry: self.retry.policy(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    pub file_format: Option<FileFormat>,
    pub parquet_compression: Option<String>,
    pub field_delimiter: Option<String>,
}

fn default_work_dir() -> String {
    "./extractions".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            file_format: None,
            parquet_compression: None,
            field_delimiter: None,
        }
    }
}

impl OutputConfig {
    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir)
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.field_delimiter.as_deref() {
            None | Some("") => Ok(DEFAULT_FIELD_DELIMITER),
            Some("\\t") => Ok(b'\t'),
            Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
            Some(d) => Err(ExtractError::Config(format!(
                "field_delimiter must be a single ASCII character, got '{}'",
                d
            ))),
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable table extraction from Oracle and ERP sources", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: String,

    /// Extraction definition (YAML or JSON list of units)
    #[arg(short, long)]
    pub definition: Option<String>,

    /// Resume the extraction with this id
    #[arg(long)]
    pub resume: Option<String>,

    #[arg(long)]
    pub work_dir: Option<String>,
    #[arg(long)]
    pub max_readers: Option<usize>,
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// CSV or PARQUET
    #[arg(long)]
    pub format: Option<String>,
}

fn read_to_string(path: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ExtractError::Config(format!("cannot read {}: {}", path, e)))
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(path: &str, contents: &str) -> Result<T> {
    if path.ends_with(".json") {
        serde_json::from_str(contents).map_err(|e| ExtractError::Config(format!("{}: {}", path, e)))
    } else {
        serde_yaml::from_str(contents).map_err(|e| ExtractError::Config(format!("{}: {}", path, e)))
    }
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        parse_by_extension(path, &read_to_string(path)?)
    }

    pub fn merge_cli(&mut self, args: &CliArgs) -> Result<()> {
        if let Some(w) = &args.work_dir {
            self.output.work_dir = w.clone();
        }
        if let Some(r) = args.max_readers {
            self.engine.max_readers = Some(r);
        }
        if let Some(c) = args.chunk_size {
            self.engine.chunk_size = Some(c);
        }
        if let Some(f) = &args.format {
            self.output.file_format = Some(FileFormat::from_str(f)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if let Some(w) = engine.max_writers {
            if w != 1 {
                return Err(ExtractError::Config(format!(
                    "max_writers is {} but the destination accepts exactly one writer",
                    w
                )));
            }
        }
        if engine.cpu_percent.is_some_and(|p| p == 0 || p > 100) {
            return Err(ExtractError::Config("cpu_percent must be within 1..=100".into()));
        }
        if engine.max_readers == Some(0) {
            return Err(ExtractError::Config("max_readers must be at least 1".into()));
        }
        if engine.batch_size == Some(0) {
            return Err(ExtractError::Config("batch_size must be at least 1".into()));
        }
        if engine.queue_capacity == Some(0) {
            return Err(ExtractError::Config("queue_capacity must be at least 1".into()));
        }
        if engine.retry.max_attempts == Some(0) {
            return Err(ExtractError::Config("retry.max_attempts must be at least 1".into()));
        }
        self.output.delimiter_byte()?;

        match &self.source {
            SourceConfig::Oracle(o) => {
                if o.username.is_empty() {
                    return Err(ExtractError::Config("oracle username is required".into()));
                }
                if o.connection_string.is_none() && (o.host.is_empty() || o.service.is_empty()) {
                    return Err(ExtractError::Config(
                        "oracle needs either connection_string or host and service".into(),
                    ));
                }
            }
            SourceConfig::Rfc(r) => {
                if r.host.is_empty() || r.client.is_empty() || r.user.is_empty() {
                    return Err(ExtractError::Config("rfc needs host, client and user".into()));
                }
                r.delimiter_char()?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    units: Vec<ExtractionUnit>,
}

/// Loads and validates the units of an extraction definition.
pub fn load_units(path: &str) -> Result<Vec<ExtractionUnit>> {
    let def: DefinitionFile = parse_by_extension(path, &read_to_string(path)?)?;
    validate_units(&def.units)?;
    Ok(def.units)
}
