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

//! Resumable, chunked extraction of relational and ERP tables.
//!
//! Units of work are read in parallel through a `SourceAdapter`, funnelled
//! through one bounded queue into a single `DestinationWriter`, and tracked
//! per partition in a durable `ProgressLedger` so an interrupted run can be
//! resumed without re-reading finished work.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ports;
