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

//! # Sink Writer
//!
//! The only task that touches the destination. It drains one bounded queue
//! fed by every read task, keeps partitions apart by key, and records each
//! partition's status in the ledger as its data is published.
//!
//! Once a run-fatal error has been seen the writer stops writing to the
//! ledger, reports the error to the coordinator, raises the halt token, and
//! only cleans up partial output for whatever is still arriving.

use crate::domain::entities::{Chunk, PartitionKey, PartitionSpec, PartitionStatus};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::events::{CancellationToken, EventSink, ProgressEvent};
use crate::domain::values::Column;
use crate::infrastructure::ledger::redb_ledger::{ProgressLedger, StartOutcome};
use crate::ports::destination_port::{DestinationWriter, PartitionTarget};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Sent by read tasks, in order, for one partition:
/// `Start`, then `Begin`, `Chunk`s and `Plan`s, then one of `End`, `Fail`
/// or `Cancelled`.
#[derive(Debug)]
pub enum WriteCommand {
    Start(PartitionSpec),
    Begin {
        key: PartitionKey,
        target_table: String,
        columns: Vec<Column>,
    },
    Chunk(Chunk),
    Plan {
        parent: PartitionKey,
        children: Vec<PartitionSpec>,
    },
    End {
        key: PartitionKey,
    },
    Fail {
        spec: PartitionSpec,
        detail: String,
    },
    Cancelled {
        key: PartitionKey,
    },
}

/// What the writer and the read tasks report back to the coordinator.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A read task finished with a partition and is free again.
    ReaderExited { key: PartitionKey },
    /// The writer has handled the partition's last command.
    Settled {
        key: PartitionKey,
        status: PartitionStatus,
    },
    /// Child partitions recorded in the ledger and ready to schedule.
    Planned(Vec<PartitionSpec>),
    Fatal(ExtractError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Writing,
    /// The ledger refused the start; chunks are dropped.
    Discard(PartitionStatus),
    /// A write failed; the partition is already recorded as `error`.
    Failed,
}

struct OpenPartition {
    spec: PartitionSpec,
    started: Instant,
    rows: u64,
    last_sequence: Option<u64>,
    begun: bool,
    disposition: Disposition,
}

pub struct SinkWriter {
    destination: Box<dyn DestinationWriter>,
    ledger: Arc<ProgressLedger>,
    extraction_id: String,
    /// Explicit resume: `error` partitions may go back to `in_progress`.
    resume: bool,
    events: EventSink,
    coordinator: Sender<CoordinatorEvent>,
    halt: CancellationToken,
    open: HashMap<PartitionKey, OpenPartition>,
    halted: bool,
}

impl SinkWriter {
    pub fn new(
        destination: Box<dyn DestinationWriter>,
        ledger: Arc<ProgressLedger>,
        extraction_id: String,
        resume: bool,
        events: EventSink,
        coordinator: Sender<CoordinatorEvent>,
        halt: CancellationToken,
    ) -> Self {
        Self {
            destination,
            ledger,
            extraction_id,
            resume,
            events,
            coordinator,
            halt,
            open: HashMap::new(),
            halted: false,
        }
    }

    /// Runs until every sender of `rx` is gone.
    pub fn run(mut self, rx: Receiver<WriteCommand>) {
        info!("Sink writer started for extraction {}", self.extraction_id);
        while let Ok(cmd) = rx.recv() {
            if self.halted {
                self.discard_after_halt(cmd);
                continue;
            }
            if let Err(e) = self.handle(cmd) {
                // Only run-fatal errors escape `handle`.
                error!("Sink writer halting extraction {}: {}", self.extraction_id, e);
                self.halted = true;
                self.halt.cancel();
                let _ = self.coordinator.send(CoordinatorEvent::Fatal(e));
            }
        }
        for (key, part) in std::mem::take(&mut self.open) {
            if part.begun {
                let _ = self.destination.abort_partition(&key);
            }
        }
        info!("Sink writer finished for extraction {}", self.extraction_id);
    }

    fn handle(&mut self, cmd: WriteCommand) -> Result<()> {
        match cmd {
            WriteCommand::Start(spec) => self.start(spec),
            WriteCommand::Begin {
                key,
                target_table,
                columns,
            } => self.begin(&key, &target_table, &columns),
            WriteCommand::Chunk(chunk) => self.write(chunk),
            WriteCommand::Plan { parent, children } => self.plan(&parent, children),
            WriteCommand::End { key } => self.end(&key),
            WriteCommand::Fail { spec, detail } => self.fail(spec, &detail),
            WriteCommand::Cancelled { key } => {
                if let Some(part) = self.open.remove(&key) {
                    if part.begun {
                        self.destination.abort_partition(&key).or_else(escalate)?;
                    }
                }
                info!("Partition {} left in_progress after cancellation", key);
                self.settle(key, PartitionStatus::InProgress);
                Ok(())
            }
        }
    }

    fn start(&mut self, spec: PartitionSpec) -> Result<()> {
        let outcome = self.ledger.record_start(&self.extraction_id, &spec, self.resume)?;
        let disposition = match outcome {
            StartOutcome::Started => {
                self.events.emit(ProgressEvent::PartitionStarted { key: spec.key.clone() });
                Disposition::Writing
            }
            StartOutcome::AlreadyComplete => {
                self.events.emit(ProgressEvent::PartitionSkipped { key: spec.key.clone() });
                Disposition::Discard(PartitionStatus::Complete)
            }
            StartOutcome::Rejected => Disposition::Discard(PartitionStatus::Error),
        };
        self.open.insert(
            spec.key.clone(),
            OpenPartition {
                spec,
                started: Instant::now(),
                rows: 0,
                last_sequence: None,
                begun: false,
                disposition,
            },
        );
        Ok(())
    }

    fn begin(&mut self, key: &PartitionKey, target_table: &str, columns: &[Column]) -> Result<()> {
        let Some(part) = self.open.get_mut(key) else {
            warn!("Begin for unknown partition {}", key);
            return Ok(());
        };
        if part.disposition != Disposition::Writing || part.begun {
            return Ok(());
        }
        let target = PartitionTarget {
            key,
            target_table,
            columns,
        };
        match self.destination.begin_partition(&target) {
            Ok(()) => {
                part.begun = true;
                Ok(())
            }
            Err(e) => self.write_failed(key, e),
        }
    }

    fn write(&mut self, chunk: Chunk) -> Result<()> {
        let Some(part) = self.open.get_mut(&chunk.partition) else {
            warn!("Chunk for unknown partition {}", chunk.partition);
            return Ok(());
        };
        if part.disposition != Disposition::Writing {
            debug!("Discarding chunk {} of {}", chunk.sequence, chunk.partition);
            return Ok(());
        }
        if part.last_sequence.is_some_and(|last| chunk.sequence <= last) {
            debug!("Ignoring duplicate chunk {} of {}", chunk.sequence, chunk.partition);
            return Ok(());
        }
        if !part.begun {
            return self.write_failed(
                &chunk.partition,
                ExtractError::SinkWrite("chunk arrived before the partition was begun".into()),
            );
        }
        match self.destination.write_chunk(&chunk.partition, &chunk.rows) {
            Ok(()) => {
                part.rows += chunk.rows.len() as u64;
                part.last_sequence = Some(chunk.sequence);
                self.events.emit(ProgressEvent::ChunkWritten {
                    key: chunk.partition.clone(),
                    sequence: chunk.sequence,
                    rows: chunk.rows.len(),
                });
                Ok(())
            }
            Err(e) => self.write_failed(&chunk.partition, e),
        }
    }

    fn plan(&mut self, parent: &PartitionKey, children: Vec<PartitionSpec>) -> Result<()> {
        let writing = self
            .open
            .get(parent)
            .is_some_and(|p| p.disposition == Disposition::Writing);
        if !writing {
            return Ok(());
        }
        for child in &children {
            self.ledger.record_planned(&self.extraction_id, child)?;
        }
        debug!("Planned {} child partition(s) of {}", children.len(), parent);
        let _ = self.coordinator.send(CoordinatorEvent::Planned(children));
        Ok(())
    }

    fn end(&mut self, key: &PartitionKey) -> Result<()> {
        let Some(part) = self.open.remove(key) else {
            warn!("End for unknown partition {}", key);
            return Ok(());
        };
        match part.disposition {
            Disposition::Discard(status) => {
                self.settle(key.clone(), status);
                return Ok(());
            }
            Disposition::Failed => {
                self.settle(key.clone(), PartitionStatus::Error);
                return Ok(());
            }
            Disposition::Writing => {}
        }

        let published = if part.begun {
            self.destination.end_partition(key)
        } else {
            Err(ExtractError::SinkWrite("partition ended before it was begun".into()))
        };
        match published {
            Ok(artifact) => {
                self.ledger.record_complete(&self.extraction_id, key, part.rows)?;
                let elapsed = part.started.elapsed();
                info!(
                    "Partition {} complete: {} rows in {:.2?} -> {}",
                    key,
                    part.rows,
                    elapsed,
                    artifact.path.display()
                );
                self.events.emit(ProgressEvent::PartitionCompleted {
                    key: key.clone(),
                    rows: part.rows,
                    elapsed,
                });
                self.settle(key.clone(), PartitionStatus::Complete);
                Ok(())
            }
            Err(e) if e.is_run_fatal() => Err(e),
            Err(e) => {
                if part.begun {
                    self.destination.abort_partition(key).or_else(escalate)?;
                }
                self.record_failure(&part.spec, &e.to_string())?;
                self.settle(key.clone(), PartitionStatus::Error);
                Ok(())
            }
        }
    }

    fn fail(&mut self, spec: PartitionSpec, detail: &str) -> Result<()> {
        let part = self.open.remove(&spec.key);
        if let Some(part) = &part {
            if part.begun {
                self.destination.abort_partition(&spec.key).or_else(escalate)?;
            }
        }
        let disposition = part.map_or(Disposition::Writing, |p| p.disposition);
        let status = match disposition {
            Disposition::Writing => {
                self.record_failure(&spec, detail)?;
                PartitionStatus::Error
            }
            Disposition::Failed => PartitionStatus::Error,
            Disposition::Discard(status) => status,
        };
        self.settle(spec.key, status);
        Ok(())
    }

    /// A destination error while the partition is open: run-fatal errors
    /// escape, anything else fails just this partition.
    fn write_failed(&mut self, key: &PartitionKey, e: ExtractError) -> Result<()> {
        if e.is_run_fatal() {
            return Err(e);
        }
        let Some(part) = self.open.get_mut(key) else {
            return Ok(());
        };
        let begun = part.begun;
        part.disposition = Disposition::Failed;
        let spec = part.spec.clone();
        if begun {
            self.destination.abort_partition(key).or_else(escalate)?;
        }
        self.record_failure(&spec, &e.to_string())
    }

    fn record_failure(&mut self, spec: &PartitionSpec, detail: &str) -> Result<()> {
        error!(
            "Partition {} of unit {} failed: {}",
            spec.key.partition, spec.key.unit, detail
        );
        self.ledger.record_error(&self.extraction_id, spec, detail)?;
        self.events.emit(ProgressEvent::PartitionErrored {
            key: spec.key.clone(),
            detail: detail.to_string(),
        });
        Ok(())
    }

    fn settle(&self, key: PartitionKey, status: PartitionStatus) {
        let _ = self.coordinator.send(CoordinatorEvent::Settled { key, status });
    }

    fn discard_after_halt(&mut self, cmd: WriteCommand) {
        let key = match cmd {
            WriteCommand::End { key } | WriteCommand::Cancelled { key } => key,
            WriteCommand::Fail { spec, .. } => spec.key,
            _ => return,
        };
        if let Some(part) = self.open.remove(&key) {
            if part.begun {
                if let Err(e) = self.destination.abort_partition(&key) {
                    warn!("Could not clean up {} after halt: {}", key, e);
                }
            }
        }
    }
}

/// Abort failures only matter when they mean the destination is gone.
fn escalate(e: ExtractError) -> Result<()> {
    if e.is_run_fatal() {
        Err(e)
    } else {
        warn!("Could not remove partial output: {}", e);
        Ok(())
    }
}
