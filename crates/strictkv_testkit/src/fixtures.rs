//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use crate::faults::FaultInjectingBackend;
use std::sync::Arc;
use std::time::Duration;
use strictkv_backend::{Delivery, InMemoryBackend};
use strictkv_core::{Database, DatabaseConfig, Result};

/// A test database together with the engine behind it.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The backend, kept for inspection and fault scripting.
    pub backend: Arc<FaultInjectingBackend>,
}

impl TestDatabase {
    /// Creates a database on an in-memory engine with immediate delivery.
    pub fn memory() -> Self {
        Self::with_backend(FaultInjectingBackend::new(), DatabaseConfig::default())
    }

    /// Creates a database whose completions arrive from worker threads.
    pub fn threaded(delay: Duration) -> Self {
        Self::with_backend(
            FaultInjectingBackend::with_delivery(Delivery::Threaded(delay)),
            DatabaseConfig::default(),
        )
    }

    /// Creates an in-memory database with a custom configuration.
    pub fn with_config(config: DatabaseConfig) -> Self {
        Self::with_backend(FaultInjectingBackend::new(), config)
    }

    fn with_backend(backend: FaultInjectingBackend, config: DatabaseConfig) -> Self {
        let backend = Arc::new(backend);
        let db = Database::open_with_config(backend.clone(), config)
            .expect("Failed to open in-memory database");
        Self { db, backend }
    }

    /// The engine behind the fault injector.
    pub fn engine(&self) -> &InMemoryBackend {
        self.backend.inner()
    }

    /// Writes `count` rows `"{prefix}{i:04}" => i` in one transaction.
    pub fn seed(&self, prefix: &str, count: usize) -> Result<()> {
        self.db.transact(|tr| -> Result<()> {
            for i in 0..count {
                tr.set(format!("{prefix}{i:04}"), i.to_le_bytes());
            }
            Ok(())
        })
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with an in-memory database.
pub fn with_test_db<F, R>(f: F) -> R
where
    F: FnOnce(&TestDatabase) -> R,
{
    let db = TestDatabase::memory();
    f(&db)
}

/// Reads a little-endian `u64` counter, treating a missing key as zero.
pub fn read_counter(db: &Database, key: &[u8]) -> Result<u64> {
    Ok(db.get(key)?.map_or(0, |v| decode_u64(&v)))
}

/// Decodes up to eight little-endian bytes.
pub fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    u64::from_le_bytes(buf)
}
