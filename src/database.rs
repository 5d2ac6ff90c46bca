//! Database lifecycle
//!
//! Owns the process-wide engine handle: opened once at startup, shared by
//! the service adapter and the sweeper, flushed once at shutdown.
//!
//! Open sequence:
//! 1. Prepare the data directory
//! 2. Open the engine and check the format marker
//! 3. Load the namespace catalog
//! 4. Create configured namespaces that do not exist yet

use std::sync::Arc;

use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, TideConfig};
use crate::kv::{KvError, VersionedStore};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::storage::Storage;
use crate::sweeper::{ExpirySource, ExpirySweeper};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] KvError),
}

impl DatabaseError {
    pub fn code(&self) -> &'static str {
        match self {
            DatabaseError::Config(e) => e.code(),
            DatabaseError::Store(e) => e.code(),
        }
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub struct Database {
    config: TideConfig,
    storage: Arc<Storage>,
    store: Arc<VersionedStore>,
    metrics: Arc<MetricsRegistry>,
}

impl Database {
    /// Open with the system clock.
    pub fn open(config: TideConfig) -> DatabaseResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn open_with_clock(config: TideConfig, clock: Arc<dyn Clock>) -> DatabaseResult<Self> {
        config.prepare_data_dir()?;

        let storage = Storage::open(&config.data_dir, config.durability).map_err(KvError::from)?;
        let storage = Arc::new(storage);
        log_event_with_fields(
            Event::EngineOpen,
            &[
                ("data_dir", &config.data_dir.display().to_string()),
                ("durability", config.durability.as_str()),
            ],
        );

        let metrics = Arc::new(MetricsRegistry::new());
        let store = VersionedStore::open(Arc::clone(&storage), clock, Arc::clone(&metrics))?;
        for namespace in &config.namespaces {
            store.ensure_namespace(namespace)?;
        }

        Ok(Self {
            config,
            storage,
            store: Arc::new(store),
            metrics,
        })
    }

    pub fn config(&self) -> &TideConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// A sweeper over this database's store, sized from config.
    pub fn sweeper(&self) -> ExpirySweeper {
        let source: Arc<dyn ExpirySource> = self.store.clone();
        ExpirySweeper::new(source, self.config.sweep_batch_size, Arc::clone(&self.metrics))
    }

    /// Flush the journal. The engine itself is released once the last
    /// handle to the store is dropped.
    pub fn close(self) -> DatabaseResult<()> {
        self.storage.flush().map_err(KvError::from)?;
        log_event_with_fields(
            Event::EngineClose,
            &[("data_dir", &self.config.data_dir.display().to_string())],
        );
        Ok(())
    }
}
