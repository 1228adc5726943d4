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

//! One retry primitive shared by every chunked stream.
//!
//! A fetch is retried with the same cursor while it fails with a retryable
//! error, up to `max_attempts` attempts and `fetch_timeout` of wall-clock
//! time. Backoff doubles from `initial_backoff` up to `max_backoff`.

use crate::domain::errors::{ExtractError, Result};
use crate::domain::events::CancellationToken;
use std::time::{Duration, Instant};

/// Granularity of cancellation checks while sleeping between attempts.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub fetch_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            fetch_timeout: Duration::from_secs(1500),
            initial_backoff: Duration::from_millis(2000),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy used by tests: several attempts, no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            fetch_timeout: Duration::from_secs(60),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt/time budget is spent.
    ///
    /// `on_retry(attempt, err)` is called once before each re-attempt, with
    /// the number of the attempt that just failed.
    pub fn run<T, F, R>(&self, cancel: &CancellationToken, mut op: F, mut on_retry: R) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        R: FnMut(u32, &ExtractError),
    {
        let started = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            attempt += 1;
            let err = match op() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let elapsed = started.elapsed();
            if attempt >= self.max_attempts.max(1) || elapsed + backoff > self.fetch_timeout {
                return Err(ExtractError::RetryExhausted {
                    attempts: attempt,
                    elapsed,
                    last: err.to_string(),
                });
            }

            on_retry(attempt, &err);
            sleep_unless_cancelled(backoff, cancel)?;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &CancellationToken) -> Result<()> {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
