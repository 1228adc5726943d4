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

//! # Extraction Coordinator
//!
//! Runs one extraction: a pool of `max_readers` read threads, each driving
//! one partition's chunked stream at a time, feeding a single sink writer
//! through one bounded queue. Reads block when the queue is full, so the
//! destination sets the pace.
//!
//! Child partitions discovered by the planner come back to the coordinator
//! through the writer (after they are recorded in the ledger) and are
//! scheduled like any other partition. A partition failure never stops the
//! run; only run-fatal errors do, and those are returned as `Err`.

use crate::application::chunked_stream::{ChunkedStream, StreamContext};
use crate::application::planner::plan_children;
use crate::application::report::RunSummary;
use crate::application::retry::RetryPolicy;
use crate::application::writer::{CoordinatorEvent, SinkWriter, WriteCommand};
use crate::domain::entities::{Extraction, ExtractionUnit, PartitionKey, PartitionRecord, PartitionSpec, PartitionStatus, UnitCatalog};
use crate::domain::errors::{ExtractError, Result};
use crate::domain::events::{CancellationToken, EventSink, ProgressEvent};
use crate::domain::values::Column;
use crate::infrastructure::ledger::redb_ledger::ProgressLedger;
use crate::ports::destination_port::DestinationWriter;
use crate::ports::source_port::{SourceAdapter, SourceConnection, SourceRequest};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub chunk_size: usize,
    /// Upper bound on the number of parent keys in one child filter.
    pub batch_size: usize,
    pub max_readers: usize,
    /// Capacity of the chunk queue in front of the writer.
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            batch_size: 1000,
            max_readers: 1,
            queue_capacity: 10,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ExtractionCoordinator {
    source: Arc<dyn SourceAdapter>,
    destination: Box<dyn DestinationWriter>,
    ledger: Arc<ProgressLedger>,
    settings: CoordinatorSettings,
    events: EventSink,
    cancel: CancellationToken,
}

/// Everything a read thread needs, shared by all of them.
struct ReaderContext {
    source: Arc<dyn SourceAdapter>,
    catalog: Arc<UnitCatalog>,
    settings: CoordinatorSettings,
    events: EventSink,
    halt: CancellationToken,
    writer: Sender<WriteCommand>,
}

impl ExtractionCoordinator {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        destination: Box<dyn DestinationWriter>,
        ledger: Arc<ProgressLedger>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            source,
            destination,
            ledger,
            settings,
            events: EventSink::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extracts every partition not yet `complete` in the ledger.
    ///
    /// `resume` marks an explicit resume: only then may partitions recorded
    /// as `error` be attempted again.
    pub fn run(self, extraction: &Extraction, resume: bool) -> Result<RunSummary> {
        let started = Instant::now();
        let catalog = Arc::new(UnitCatalog::build(&extraction.units));
        let records = self.ledger.load_status(&extraction.id)?;
        self.check_ledger_against_destination(&catalog, &records)?;

        info!(
            "Starting extraction {} ({} unit(s), {} reader(s), source {}){}",
            extraction.id,
            catalog.names().count(),
            self.settings.max_readers,
            self.source.kind(),
            if resume { ", resuming" } else { "" }
        );
        self.events.emit(ProgressEvent::RunStarted {
            extraction_id: extraction.id.clone(),
            units: catalog.names().count(),
        });

        let mut scheduler = Scheduler::new(&records, resume, self.events.clone());
        for unit in &extraction.units {
            scheduler.enqueue(PartitionSpec::root(&unit.name));
        }

        let schemas: HashMap<String, PathBuf> = catalog
            .names()
            .filter_map(|name| catalog.get(name))
            .filter_map(|unit| {
                self.destination
                    .schema_path(&unit.target_table)
                    .map(|p| (unit.target_table.clone(), p))
            })
            .collect();

        let halt = self.cancel.child_token();
        let (write_tx, write_rx) = bounded::<WriteCommand>(self.settings.queue_capacity.max(1));
        let (coord_tx, coord_rx) = unbounded::<CoordinatorEvent>();
        let (work_tx, work_rx) = unbounded::<PartitionSpec>();

        let writer = SinkWriter::new(
            self.destination,
            self.ledger.clone(),
            extraction.id.clone(),
            resume,
            self.events.clone(),
            coord_tx.clone(),
            halt.clone(),
        );
        let writer_handle = thread::spawn(move || writer.run(write_rx));

        let max_readers = self.settings.max_readers.max(1);
        let ctx = Arc::new(ReaderContext {
            source: self.source.clone(),
            catalog: catalog.clone(),
            settings: self.settings.clone(),
            events: self.events.clone(),
            halt: halt.clone(),
            writer: write_tx,
        });
        let mut handles = Vec::with_capacity(max_readers);
        for i in 0..max_readers {
            let rx_worker = work_rx.clone();
            let ctx = ctx.clone();
            let done = coord_tx.clone();
            handles.push(thread::spawn(move || {
                debug!("Reader {} started", i);
                let mut conn: Option<Box<dyn SourceConnection>> = None;
                while let Ok(spec) = rx_worker.recv() {
                    read_partition(&ctx, &mut conn, &spec);
                    let _ = done.send(CoordinatorEvent::ReaderExited { key: spec.key });
                }
                debug!("Reader {} finished", i);
            }));
        }
        // Only the readers and the writer keep these open from here on.
        drop(ctx);
        drop(work_rx);
        drop(coord_tx);

        let mut in_flight = 0usize;
        let mut unsettled: HashSet<PartitionKey> = HashSet::new();
        let mut fatal: Option<ExtractError> = None;
        let mut halted = false;

        loop {
            if !halted {
                while in_flight < max_readers {
                    let Some(spec) = scheduler.pending.pop_front() else { break };
                    unsettled.insert(spec.key.clone());
                    if work_tx.send(spec).is_err() {
                        break;
                    }
                    in_flight += 1;
                }
            }
            if in_flight == 0 && (halted || (scheduler.pending.is_empty() && unsettled.is_empty())) {
                break;
            }

            match coord_rx.recv_timeout(POLL_INTERVAL) {
                Ok(CoordinatorEvent::ReaderExited { .. }) => in_flight = in_flight.saturating_sub(1),
                Ok(CoordinatorEvent::Settled { key, status }) => {
                    debug!("{} settled as {}", key, status);
                    unsettled.remove(&key);
                }
                Ok(CoordinatorEvent::Planned(children)) => {
                    if !halted {
                        for child in children {
                            scheduler.enqueue(child);
                        }
                    }
                }
                Ok(CoordinatorEvent::Fatal(e)) => {
                    error!("Extraction {} aborted: {}", extraction.id, e);
                    fatal.get_or_insert(e);
                    halt.cancel();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if !halted && halt.is_cancelled() {
                halted = true;
                if fatal.is_none() {
                    info!(
                        "Cancellation requested; {} partition(s) in flight stay in_progress",
                        in_flight
                    );
                }
            }
        }

        drop(work_tx);
        for h in handles {
            if h.join().is_err() {
                error!("A reader thread panicked");
            }
        }
        if writer_handle.join().is_err() {
            fatal.get_or_insert(ExtractError::DestinationCorrupt("sink writer panicked".into()));
        }
        for event in coord_rx.try_iter() {
            if let CoordinatorEvent::Fatal(e) = event {
                fatal.get_or_insert(e);
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let records = self.ledger.load_status(&extraction.id)?;
        let elapsed = started.elapsed();
        let run_dir = extraction.run_dir();
        let mut summary = RunSummary::build(extraction, &catalog, &records, elapsed, self.cancel.is_cancelled());
        summary.attach_schemas(&run_dir, &schemas);
        let path = summary.write(&run_dir)?;
        info!(
            "Extraction {} finished {:?}: {} rows in {:.2?}, summary at {}",
            extraction.id,
            summary.status,
            summary.total_rows,
            elapsed,
            path.display()
        );
        self.events.emit(ProgressEvent::RunFinished {
            extraction_id: extraction.id.clone(),
            total_rows: summary.total_rows,
            elapsed,
        });
        Ok(summary)
    }

    /// Every `complete` record must belong to a known unit and have its
    /// artifact in the destination; otherwise the skip-set cannot be trusted.
    fn check_ledger_against_destination(
        &self,
        catalog: &UnitCatalog,
        records: &BTreeMap<PartitionKey, PartitionRecord>,
    ) -> Result<()> {
        for (key, rec) in records {
            let unit = catalog.get(&key.unit).ok_or_else(|| {
                ExtractError::LedgerInconsistent(format!("ledger holds {} of an unknown unit", key))
            })?;
            if rec.status == PartitionStatus::Complete && !self.destination.has_partition(key, &unit.target_table)? {
                return Err(ExtractError::LedgerInconsistent(format!(
                    "{} is complete in the ledger but its output is missing",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Decides what gets read. Keys are scheduled at most once per run.
struct Scheduler {
    complete: HashSet<PartitionKey>,
    /// Partitions recorded as `error`; only an explicit resume reads them again.
    errored: HashSet<PartitionKey>,
    resume: bool,
    /// Recorded children of each partition, for parents that will be skipped.
    recorded_children: HashMap<PartitionKey, Vec<PartitionSpec>>,
    known: HashSet<PartitionKey>,
    pending: VecDeque<PartitionSpec>,
    events: EventSink,
}

impl Scheduler {
    fn new(records: &BTreeMap<PartitionKey, PartitionRecord>, resume: bool, events: EventSink) -> Self {
        let mut recorded_children: HashMap<PartitionKey, Vec<PartitionSpec>> = HashMap::new();
        for rec in records.values() {
            if let Some(parent) = &rec.parent {
                recorded_children
                    .entry(parent.clone())
                    .or_default()
                    .push(rec.spec());
            }
        }
        Self {
            complete: records
                .values()
                .filter(|r| r.status == PartitionStatus::Complete)
                .map(|r| r.key.clone())
                .collect(),
            errored: records
                .values()
                .filter(|r| r.status == PartitionStatus::Error)
                .map(|r| r.key.clone())
                .collect(),
            resume,
            recorded_children,
            known: HashSet::new(),
            pending: VecDeque::new(),
            events,
        }
    }

    /// Queues `spec` unless already seen. A `complete` partition is skipped,
    /// and the children it planned earlier are queued in its place. Outside
    /// a resume, `error` partitions are left alone.
    fn enqueue(&mut self, spec: PartitionSpec) {
        let mut stack = vec![spec];
        while let Some(spec) = stack.pop() {
            if !self.known.insert(spec.key.clone()) {
                continue;
            }
            if self.complete.contains(&spec.key) {
                info!("Skipping {}: already complete", spec.key);
                self.events.emit(ProgressEvent::PartitionSkipped { key: spec.key.clone() });
                if let Some(children) = self.recorded_children.get(&spec.key) {
                    stack.extend(children.iter().rev().cloned());
                }
                continue;
            }
            if !self.resume && self.errored.contains(&spec.key) {
                info!("Skipping {}: recorded as error, retried only on resume", spec.key);
                continue;
            }
            self.pending.push_back(spec);
        }
    }
}

/// Reads one partition and hands everything to the writer. Always ends the
/// partition's command sequence with `End`, `Fail` or `Cancelled`.
fn read_partition(ctx: &ReaderContext, conn_slot: &mut Option<Box<dyn SourceConnection>>, spec: &PartitionSpec) {
    if ctx.writer.send(WriteCommand::Start(spec.clone())).is_err() {
        return;
    }
    let result = match ctx.catalog.get(&spec.key.unit) {
        Some(unit) => stream_partition(ctx, conn_slot, unit, spec),
        None => Err(ExtractError::Validation(format!("unknown unit {}", spec.key.unit))),
    };

    let terminal = match result {
        Ok(()) => WriteCommand::End { key: spec.key.clone() },
        Err(ExtractError::Cancelled) => WriteCommand::Cancelled { key: spec.key.clone() },
        Err(e) => {
            error!(
                "Reading partition {} of unit {} failed: {}",
                spec.key.partition, spec.key.unit, e
            );
            WriteCommand::Fail {
                spec: spec.clone(),
                detail: e.to_string(),
            }
        }
    };
    let _ = ctx.writer.send(terminal);
}

/// Errors after which a pooled connection is not worth keeping.
fn drops_connection(e: &ExtractError) -> bool {
    matches!(
        e,
        ExtractError::Connection(_) | ExtractError::TransientFetch(_) | ExtractError::RetryExhausted { .. }
    )
}

fn stream_partition(
    ctx: &ReaderContext,
    conn_slot: &mut Option<Box<dyn SourceConnection>>,
    unit: &ExtractionUnit,
    spec: &PartitionSpec,
) -> Result<()> {
    if ctx.halt.is_cancelled() {
        return Err(ExtractError::Cancelled);
    }
    let mut conn = match conn_slot.take() {
        Some(c) => c,
        None => ctx.source.open()?,
    };
    let result = stream_with(ctx, conn.as_mut(), unit, spec);
    match &result {
        Err(e) if drops_connection(e) => warn!("Dropping source connection after: {}", e),
        _ => *conn_slot = Some(conn),
    }
    result
}

fn stream_with(
    ctx: &ReaderContext,
    conn: &mut dyn SourceConnection,
    unit: &ExtractionUnit,
    spec: &PartitionSpec,
) -> Result<()> {
    let send = |cmd: WriteCommand| ctx.writer.send(cmd).map_err(|_| ExtractError::Cancelled);
    let begin = |columns: &[Column]| {
        send(WriteCommand::Begin {
            key: spec.key.clone(),
            target_table: unit.target_table.clone(),
            columns: columns.to_vec(),
        })
    };

    let request = SourceRequest {
        unit,
        filter: spec.filter.as_ref(),
    };
    let stream_ctx = StreamContext {
        retry: &ctx.settings.retry,
        cancel: &ctx.halt,
        events: &ctx.events,
    };
    let mut stream = ChunkedStream::new(conn, request, &spec.key, ctx.settings.chunk_size, stream_ctx);
    let mut begun = false;

    while let Some(chunk) = stream.next() {
        let chunk = chunk?;
        if !begun {
            begin(stream.columns())?;
            begun = true;
        }
        let children = if unit.children.is_empty() {
            Vec::new()
        } else {
            plan_children(
                &spec.key,
                chunk.sequence,
                &chunk.rows,
                stream.columns(),
                unit,
                ctx.settings.batch_size,
            )?
        };
        send(WriteCommand::Chunk(chunk))?;
        if !children.is_empty() {
            send(WriteCommand::Plan {
                parent: spec.key.clone(),
                children,
            })?;
        }
    }
    if !begun {
        begin(stream.columns())?;
    }
    debug!(
        "Read {} rows for {} ({} retries)",
        stream.rows_emitted(),
        spec.key,
        stream.retries()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::report::{RunStatus, UnitOutcome};
    use crate::application::testing::{numbered_table, MemoryDestination, MemorySource, MemoryTable};
    use crate::domain::values::{CanonicalType, Value};
    use crate::ports::source_port::{Cursor, FetchPage};

    struct Fixture {
        dir: tempfile::TempDir,
        ledger: Arc<ProgressLedger>,
        dest: MemoryDestination,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(ProgressLedger::open(dir.path()).unwrap());
        Fixture {
            dir,
            ledger,
            dest: MemoryDestination::new(),
        }
    }

    fn settings(max_readers: usize) -> CoordinatorSettings {
        CoordinatorSettings {
            chunk_size: 1000,
            batch_size: 300,
            max_readers,
            queue_capacity: 4,
            retry: RetryPolicy::immediate(3),
        }
    }

    fn create(fx: &Fixture, units: Vec<ExtractionUnit>) -> Extraction {
        let extraction = Extraction::new(units, fx.dir.path()).unwrap();
        fx.ledger.save_manifest(&extraction).unwrap();
        extraction
    }

    fn coordinator(fx: &Fixture, source: Arc<dyn SourceAdapter>, settings: CoordinatorSettings) -> ExtractionCoordinator {
        ExtractionCoordinator::new(source, Box::new(fx.dest.clone()), fx.ledger.clone(), settings)
    }

    fn status(fx: &Fixture, extraction: &Extraction, key: &PartitionKey) -> PartitionStatus {
        fx.ledger.get(&extraction.id, key).unwrap().unwrap().status
    }

    fn flat(name: &str) -> ExtractionUnit {
        ExtractionUnit::sql(name, &format!("SELECT * FROM {}", name), &name.to_lowercase())
    }

    fn sales_tables() -> (MemoryTable, MemoryTable) {
        let headers = MemoryTable {
            columns: vec![Column::new("VBELN", CanonicalType::Text, "VARCHAR2(10)")],
            rows: (0..1000).map(|i| vec![Value::Text(format!("{:010}", i))]).collect(),
        };
        let items = MemoryTable {
            columns: vec![
                Column::new("VBELN", CanonicalType::Text, "VARCHAR2(10)"),
                Column::new("POSNR", CanonicalType::Integer, "NUMBER(6,0)"),
            ],
            rows: (0..1000)
                .flat_map(|i| {
                    [10, 20]
                        .into_iter()
                        .map(move |p| vec![Value::Text(format!("{:010}", i)), Value::Integer(p)])
                })
                .collect(),
        };
        (headers, items)
    }

    fn sales_unit() -> ExtractionUnit {
        flat("VBAK").with_child(flat("VBAP"), &[("VBELN", "VBELN")])
    }

    #[test]
    fn test_flat_unit_recovers_from_one_transient_failure() {
        let fx = fixture();
        let source = MemorySource::new(vec![("ORDERS", numbered_table(1, 3000))]);
        source.fail_transient_once("ORDERS", 1000);
        let extraction = create(&fx, vec![flat("ORDERS")]);
        let (tx, rx) = unbounded();

        let summary = coordinator(&fx, Arc::new(source.clone()), settings(2))
            .with_events(EventSink::new(tx))
            .run(&extraction, false)
            .unwrap();

        let key = PartitionKey::whole_table("ORDERS");
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(fx.dest.rows(&key), Some(3000));
        let rec = fx.ledger.get(&extraction.id, &key).unwrap().unwrap();
        assert_eq!(rec.status, PartitionStatus::Complete);
        assert_eq!(rec.rows_written, 3000);

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        let retries = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::FetchRetried { key: k, .. } if *k == key))
            .count();
        assert_eq!(retries, 1);
        assert!(matches!(events.last(), Some(ProgressEvent::RunFinished { total_rows: 3000, .. })));
        assert!(extraction.run_dir().join("summary.json").exists());
    }

    #[test]
    fn test_nested_unit_plans_four_child_partitions() {
        let fx = fixture();
        let (headers, items) = sales_tables();
        let source = MemorySource::new(vec![("VBAK", headers), ("VBAP", items)]);
        let extraction = create(&fx, vec![sales_unit()]);
        let mut cfg = settings(3);
        cfg.chunk_size = 500;

        let summary = coordinator(&fx, Arc::new(source), cfg).run(&extraction, false).unwrap();

        assert_eq!(summary.status, RunStatus::Succeeded);
        let vbap = summary.unit("VBAP").unwrap();
        assert_eq!(vbap.partitions.len(), 4);
        assert!(vbap.partitions.iter().all(|p| p.status == PartitionStatus::Complete));
        assert_eq!(fx.dest.published_count("VBAP"), 4);
        assert_eq!(fx.dest.unit_rows("VBAP"), 2000);
        assert_eq!(fx.dest.unit_rows("VBAK"), 1000);
    }

    #[test]
    fn test_failing_unit_does_not_block_others() {
        let fx = fixture();
        let source = MemorySource::new(vec![("BAD", numbered_table(1, 10)), ("GOOD", numbered_table(1, 2500))]);
        source.fail_always("BAD");
        let extraction = create(&fx, vec![flat("BAD"), flat("GOOD")]);

        let summary = coordinator(&fx, Arc::new(source), settings(2)).run(&extraction, false).unwrap();

        assert_eq!(summary.status, RunStatus::FinishedWithErrors);
        assert_eq!(status(&fx, &extraction, &PartitionKey::whole_table("BAD")), PartitionStatus::Error);
        assert_eq!(status(&fx, &extraction, &PartitionKey::whole_table("GOOD")), PartitionStatus::Complete);
        assert_eq!(summary.unit("BAD").unwrap().outcome, UnitOutcome::Failed);
        let bad = &summary.unit("BAD").unwrap().partitions[0];
        assert!(bad.error.as_deref().unwrap().contains("ORA-00942"));
    }

    #[test]
    fn test_writes_stay_single_with_many_readers() {
        let fx = fixture();
        let names = ["A", "B", "C", "D", "E", "F"];
        let source = MemorySource::new(names.iter().map(|n| (*n, numbered_table(1, 2200))).collect());
        source.slow_fetches(Duration::from_millis(30));
        let extraction = create(&fx, names.iter().map(|n| flat(n)).collect());

        let summary = coordinator(&fx, Arc::new(source.clone()), settings(4)).run(&extraction, false).unwrap();

        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.total_rows, 6 * 2200);
        assert!(source.max_concurrent_fetches() > 1);
        assert!(source.max_concurrent_fetches() <= 4);
        assert_eq!(fx.dest.max_concurrent_writes(), 1);
        assert_eq!(fx.dest.writer_threads(), 1);
    }

    #[test]
    fn test_resume_skips_complete_partitions() {
        let fx = fixture();
        let source = MemorySource::new(vec![("A", numbered_table(1, 1500)), ("B", numbered_table(1, 1500))]);
        source.fail_always("B");
        let extraction = create(&fx, vec![flat("A"), flat("B")]);
        let first = coordinator(&fx, Arc::new(source), settings(2)).run(&extraction, false).unwrap();
        assert_eq!(first.status, RunStatus::FinishedWithErrors);

        let resumed = fx.ledger.resume_extraction(&extraction.id, Some(extraction.units.as_slice())).unwrap();
        let healthy = MemorySource::new(vec![("A", numbered_table(1, 1500)), ("B", numbered_table(1, 1500))]);
        let second = coordinator(&fx, Arc::new(healthy.clone()), settings(2)).run(&resumed, true).unwrap();

        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(healthy.fetch_count("A"), 0);
        assert!(healthy.fetch_count("B") > 0);
        assert_eq!(fx.dest.unit_rows("A"), 1500);
        assert_eq!(fx.dest.unit_rows("B"), 1500);
    }

    #[test]
    fn test_resume_requeues_recorded_children_of_complete_parent() {
        let fx = fixture();
        let (headers, items) = sales_tables();
        let source = MemorySource::new(vec![("VBAK", headers.clone()), ("VBAP", items.clone())]);
        source.fail_always("VBAP");
        let extraction = create(&fx, vec![sales_unit()]);
        let mut cfg = settings(2);
        cfg.chunk_size = 500;
        let first = coordinator(&fx, Arc::new(source), cfg.clone()).run(&extraction, false).unwrap();
        assert_eq!(first.unit("VBAP").unwrap().outcome, UnitOutcome::Failed);
        assert_eq!(first.unit("VBAK").unwrap().outcome, UnitOutcome::FullyExtracted);

        let healthy = MemorySource::new(vec![("VBAK", headers), ("VBAP", items)]);
        let second = coordinator(&fx, Arc::new(healthy.clone()), cfg).run(&extraction, true).unwrap();

        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(healthy.fetch_count("VBAK"), 0);
        assert_eq!(fx.dest.published_count("VBAP"), 4);
        assert_eq!(fx.dest.unit_rows("VBAP"), 2000);
    }

    fn delivery_tables() -> Vec<(&'static str, MemoryTable)> {
        let orders = numbered_table(1, 10);
        let deliveries = MemoryTable {
            columns: vec![
                Column::new("ORDER_ID", CanonicalType::Integer, "NUMBER(10,0)"),
                Column::new("DELIVERY_ID", CanonicalType::Integer, "NUMBER(10,0)"),
            ],
            rows: (1..=10)
                .flat_map(|o| (0..3).map(move |d| vec![Value::Integer(o), Value::Integer(o * 100 + d)]))
                .collect(),
        };
        let packages = MemoryTable {
            columns: vec![
                Column::new("DELIVERY_ID", CanonicalType::Integer, "NUMBER(10,0)"),
                Column::new("WEIGHT", CanonicalType::Integer, "NUMBER(6,0)"),
            ],
            rows: (1..=10)
                .flat_map(|o| (0..3).map(move |d| vec![Value::Integer(o * 100 + d), Value::Integer(d + 1)]))
                .collect(),
        };
        vec![("ORDERS", orders), ("DELIVERIES", deliveries), ("PACKAGES", packages)]
    }

    fn delivery_unit() -> ExtractionUnit {
        flat("ORDERS").with_child(
            flat("DELIVERIES").with_child(flat("PACKAGES"), &[("DELIVERY_ID", "DELIVERY_ID")]),
            &[("ID", "ORDER_ID")],
        )
    }

    fn small_batches() -> CoordinatorSettings {
        let mut cfg = settings(3);
        cfg.batch_size = 4;
        cfg
    }

    #[test]
    fn test_grandchildren_are_planned_from_child_partitions() {
        let fx = fixture();
        let source = MemorySource::new(delivery_tables());
        let extraction = create(&fx, vec![delivery_unit()]);

        let summary = coordinator(&fx, Arc::new(source), small_batches()).run(&extraction, false).unwrap();

        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(fx.dest.unit_rows("ORDERS"), 10);
        // 10 order keys in batches of 4.
        assert_eq!(fx.dest.published_count("DELIVERIES"), 3);
        assert_eq!(fx.dest.unit_rows("DELIVERIES"), 30);
        // 12, 12 and 6 delivery keys in batches of 4.
        assert_eq!(fx.dest.published_count("PACKAGES"), 8);
        assert_eq!(fx.dest.unit_rows("PACKAGES"), 30);
        let packages = summary.unit("PACKAGES").unwrap();
        assert!(packages
            .partitions
            .iter()
            .all(|p| p.partition.starts_with("DELIVERIES[ORDERS[whole-table]/c00000/b000")));
    }

    #[test]
    fn test_resume_reaches_grandchildren_through_complete_parents() {
        let fx = fixture();
        let broken = MemorySource::new(delivery_tables());
        broken.fail_always("PACKAGES");
        let extraction = create(&fx, vec![delivery_unit()]);
        let first = coordinator(&fx, Arc::new(broken), small_batches()).run(&extraction, false).unwrap();
        assert_eq!(first.unit("ORDERS").unwrap().outcome, UnitOutcome::FullyExtracted);
        assert_eq!(first.unit("DELIVERIES").unwrap().outcome, UnitOutcome::FullyExtracted);
        assert_eq!(first.unit("PACKAGES").unwrap().outcome, UnitOutcome::Failed);

        let healthy = MemorySource::new(delivery_tables());
        let second = coordinator(&fx, Arc::new(healthy.clone()), small_batches())
            .run(&extraction, true)
            .unwrap();

        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(healthy.fetch_count("ORDERS"), 0);
        assert_eq!(healthy.fetch_count("DELIVERIES"), 0);
        assert_eq!(fx.dest.published_count("PACKAGES"), 8);
        assert_eq!(fx.dest.unit_rows("PACKAGES"), 30);
    }

    #[test]
    fn test_errored_partition_is_not_read_without_resume() {
        let fx = fixture();
        let source = MemorySource::new(vec![("A", numbered_table(1, 10)), ("B", numbered_table(1, 10))]);
        source.fail_always("B");
        let extraction = create(&fx, vec![flat("A"), flat("B")]);
        coordinator(&fx, Arc::new(source), settings(2)).run(&extraction, false).unwrap();

        let healthy = MemorySource::new(vec![("A", numbered_table(1, 10)), ("B", numbered_table(1, 10))]);
        let again = coordinator(&fx, Arc::new(healthy.clone()), settings(2)).run(&extraction, false).unwrap();

        assert_eq!(again.status, RunStatus::FinishedWithErrors);
        assert_eq!(healthy.fetch_count("A"), 0);
        assert_eq!(healthy.fetch_count("B"), 0);
        assert_eq!(status(&fx, &extraction, &PartitionKey::whole_table("B")), PartitionStatus::Error);
    }

    #[test]
    fn test_missing_output_for_complete_partition_is_fatal() {
        let fx = fixture();
        let source = MemorySource::new(vec![("A", numbered_table(1, 10))]);
        let extraction = create(&fx, vec![flat("A")]);
        coordinator(&fx, Arc::new(source.clone()), settings(1)).run(&extraction, false).unwrap();

        fx.dest.forget(&PartitionKey::whole_table("A"));
        let err = coordinator(&fx, Arc::new(source), settings(1)).run(&extraction, true).unwrap_err();
        assert!(matches!(err, ExtractError::LedgerInconsistent(_)));
        assert!(err.is_run_fatal());
    }

    #[test]
    fn test_destination_corruption_aborts_run() {
        let fx = fixture();
        fx.dest.corrupt_on("A");
        let source = MemorySource::new(vec![("A", numbered_table(1, 10)), ("B", numbered_table(1, 10))]);
        let extraction = create(&fx, vec![flat("A"), flat("B")]);
        let err = coordinator(&fx, Arc::new(source), settings(1)).run(&extraction, false).unwrap_err();
        assert!(matches!(err, ExtractError::DestinationCorrupt(_)));
    }

    /// Cancels the run from inside the second fetch.
    struct CancellingSource {
        inner: MemorySource,
        cancel: CancellationToken,
    }

    impl SourceAdapter for CancellingSource {
        fn kind(&self) -> &'static str {
            "cancelling"
        }

        fn open(&self) -> Result<Box<dyn SourceConnection>> {
            Ok(Box::new(CancellingSource {
                inner: self.inner.clone(),
                cancel: self.cancel.clone(),
            }))
        }

        fn map_native_type(&self, native: &str) -> Result<CanonicalType> {
            self.inner.map_native_type(native)
        }
    }

    impl SourceConnection for CancellingSource {
        fn fetch(&mut self, request: &SourceRequest<'_>, cursor: &Cursor, batch_size: usize) -> Result<FetchPage> {
            if cursor.offset > 0 {
                self.cancel.cancel();
            }
            self.inner.fetch(request, cursor, batch_size)
        }
    }

    #[test]
    fn test_cancel_leaves_partition_in_progress() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let source = CancellingSource {
            inner: MemorySource::new(vec![("ORDERS", numbered_table(1, 5000))]),
            cancel: cancel.clone(),
        };
        let extraction = create(&fx, vec![flat("ORDERS")]);

        let summary = coordinator(&fx, Arc::new(source), settings(1))
            .with_cancellation(cancel)
            .run(&extraction, false)
            .unwrap();

        let key = PartitionKey::whole_table("ORDERS");
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(status(&fx, &extraction, &key), PartitionStatus::InProgress);
        assert_eq!(fx.dest.rows(&key), None);
    }
}
