//! SQLite backed provenance store.
//!
//! Every operation that writes runs in one IMMEDIATE transaction: either
//! the process, its inputs, outputs and side records are all committed, or
//! nothing is. Concurrent writers on the same database file are serialized
//! by SQLite and wait up to [`BUSY_TIMEOUT`] for each other.

// Warning groups
#![deny(future_incompatible, nonstandard_style, rust_2018_idioms)]

mod errors;
mod exports;
mod graph;
mod labware;
mod schema;
mod steps;

pub use errors::{StoreError, StoreResult};
pub use graph::PlatingCheck;
pub use labware::{IndexCombination, IndexPrimer};
pub use steps::{
    NormalizationReport, PlatedWell, PlatingReport, PoolingReport, QuantificationReport,
    StepReport,
};

use log::debug;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// How long a writer waits for a competing writer to commit.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LimsStore {
    conn: Connection,
}

impl LimsStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!("opening store {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::migrate(&conn)?;
        Ok(LimsStore { conn })
    }

    /// Start a write transaction, taking the database write lock up front.
    fn immediate(&mut self) -> StoreResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lims.sqlite");
        drop(LimsStore::open(&path).unwrap());
        let store = LimsStore::open(&path).unwrap();
        let kinds: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM process_type", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kinds, 11);
    }
}
