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

//! # Runtime Context
//!
//! Builds the long-lived resources of a run from the configuration: the
//! reader count, the source adapter (with its connection pool), and the
//! coordinator settings.

use crate::application::coordinator::CoordinatorSettings;
use crate::config::{AppConfig, SourceConfig};
use crate::domain::errors::{ExtractError, Result};
use crate::infrastructure::oracle::connection_manager::OracleConnectionManager;
use crate::infrastructure::oracle::oracle_source::OracleSource;
use crate::infrastructure::rfc::rfc_source::{RfcSource, DEFAULT_FUNCTION_MODULE};
use crate::infrastructure::rfc::transport::RfcTransport;
use crate::ports::source_port::SourceAdapter;
use log::info;
use r2d2::Pool;
use std::sync::Arc;

const DEFAULT_PREFETCH_ROWS: u32 = 5000;

pub struct RuntimeContext {
    pub source: Arc<dyn SourceAdapter>,
    pub settings: CoordinatorSettings,
}

impl RuntimeContext {
    /// Sets up the source selected in the configuration.
    ///
    /// RFC sources need a vendor binding; pass it as `rfc_transport`.
    pub fn init(config: &AppConfig, rfc_transport: Option<Arc<dyn RfcTransport>>) -> Result<Self> {
        let settings = config.engine.coordinator_settings();
        info!(
            "Initializing {} reader(s) (Target CPU: {}%), chunk size {}, key batch {}",
            settings.max_readers,
            config.engine.cpu_percent.unwrap_or(crate::config::DEFAULT_CPU_PERCENT),
            settings.chunk_size,
            settings.batch_size
        );

        let source: Arc<dyn SourceAdapter> = match &config.source {
            SourceConfig::Oracle(db) => {
                let conn_str = db.get_connection_string();
                info!("Initializing connection pool for {}...", conn_str);
                let manager = OracleConnectionManager::new(
                    &db.username,
                    &db.resolve_password(),
                    &conn_str,
                    Some(settings.retry.fetch_timeout),
                );
                // One spare connection beyond the readers.
                let pool_size = (settings.max_readers + 1) as u32;
                let pool = Pool::builder()
                    .max_size(pool_size)
                    .build(manager)
                    .map_err(|e| ExtractError::Connection(format!("Failed to create connection pool: {}", e)))?;
                Arc::new(OracleSource::new(
                    Arc::new(pool),
                    db.prefetch_rows.unwrap_or(DEFAULT_PREFETCH_ROWS),
                ))
            }
            SourceConfig::Rfc(rfc) => {
                let transport = rfc_transport.ok_or_else(|| {
                    ExtractError::Config(format!(
                        "no RFC transport linked into this build (host {}, client {})",
                        rfc.host, rfc.client
                    ))
                })?;
                let function_module = rfc.function_module.as_deref().unwrap_or(DEFAULT_FUNCTION_MODULE);
                info!("Reading {} via {}", rfc.host, function_module);
                Arc::new(RfcSource::new(transport, function_module, rfc.delimiter_char()?))
            }
        };

        Ok(Self { source, settings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::rfc::transport::{RfcError, RfcSession};

    struct NoTransport;

    impl RfcTransport for NoTransport {
        fn connect(&self) -> std::result::Result<Box<dyn RfcSession>, RfcError> {
            Err(RfcError::Logon("not reachable".into()))
        }
    }

    fn rfc_config() -> AppConfig {
        serde_yaml::from_str(
            "source: {kind: rfc, host: erp01, sysnr: '00', client: '100', user: X}\nengine: {max_readers: 2}\n",
        )
        .unwrap()
    }

    #[test]
    fn test_rfc_without_transport_is_config_error() {
        assert!(matches!(
            RuntimeContext::init(&rfc_config(), None),
            Err(ExtractError::Config(_))
        ));
    }

    #[test]
    fn test_rfc_with_transport_builds_source() {
        let ctx = RuntimeContext::init(&rfc_config(), Some(Arc::new(NoTransport))).unwrap();
        assert_eq!(ctx.source.kind(), "rfc");
        assert_eq!(ctx.settings.max_readers, 2);
        assert!(matches!(ctx.source.open(), Err(ExtractError::Connection(_))));
    }
}
