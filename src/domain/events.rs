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

//! Progress events and cancellation.
//!
//! Observers (a UI, a test) subscribe with a channel receiver. The engine
//! never waits on them: a full or disconnected channel just drops the event.

use crate::domain::entities::PartitionKey;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted {
        extraction_id: String,
        units: usize,
    },
    PartitionStarted {
        key: PartitionKey,
    },
    /// Already `complete` in the ledger; no read task was scheduled.
    PartitionSkipped {
        key: PartitionKey,
    },
    FetchRetried {
        key: PartitionKey,
        attempt: u32,
        cause: String,
    },
    ChunkWritten {
        key: PartitionKey,
        sequence: u64,
        rows: usize,
    },
    PartitionCompleted {
        key: PartitionKey,
        rows: u64,
        elapsed: Duration,
    },
    PartitionErrored {
        key: PartitionKey,
        detail: String,
    },
    RunFinished {
        extraction_id: String,
        total_rows: u64,
        elapsed: Duration,
    },
}

/// Cloneable publisher. `EventSink::default()` publishes nowhere.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<ProgressEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            match tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(ev)) => {
                    log::debug!("Progress subscriber is lagging, dropped {:?}", ev);
                }
            }
        }
    }
}

/// Shared stop flag, checked at chunk boundaries.
///
/// A child token also reports cancelled once its parent is; cancelling the
/// child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_token(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }
}
