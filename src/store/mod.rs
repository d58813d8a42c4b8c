//! Persistence seam for cumulative snapshots and the audit log.
//!
//! A [`LedgerStore`] hands out transactions; every read and write goes through a
//! [`StoreTransaction`], which is the execution context the engine threads through one
//! submission. Nothing is visible to other transactions until [`StoreTransaction::commit`],
//! and a transaction dropped without committing is rolled back.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryStore, MemoryTransaction};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteTransaction};

use crate::error::Result;
use crate::schema::{AuditEntry, DimensionKey, SeriesKind, SnapshotId, Snapshot, SubstationId};
use crate::series::StoredValue;
use chrono::NaiveDate;

pub trait StoreTransaction {
    /// Snapshot recorded exactly on `date`.
    fn get(&mut self, kind: SeriesKind, key: &DimensionKey, date: NaiveDate) -> Result<Option<Snapshot<StoredValue>>>;

    fn get_by_id(&mut self, kind: SeriesKind, id: SnapshotId) -> Result<Option<Snapshot<StoredValue>>>;

    /// Inserts a snapshot on `date`, or overwrites the value of the one already there.
    /// An overwritten snapshot keeps its id and `created_at`.
    fn upsert(
        &mut self,
        kind: SeriesKind,
        key: &DimensionKey,
        date: NaiveDate,
        value: StoredValue,
    ) -> Result<Snapshot<StoredValue>>;

    /// Snapshots of the same dimension dated strictly after `date`, oldest first.
    fn list_after(&mut self, kind: SeriesKind, key: &DimensionKey, date: NaiveDate) -> Result<Vec<Snapshot<StoredValue>>>;

    /// Latest snapshot dated before `date`, or on it when `inclusive`.
    fn latest_before(
        &mut self,
        kind: SeriesKind,
        key: &DimensionKey,
        date: NaiveDate,
        inclusive: bool,
    ) -> Result<Option<Snapshot<StoredValue>>>;

    fn history(&mut self, kind: SeriesKind, key: &DimensionKey) -> Result<Vec<Snapshot<StoredValue>>>;

    fn append_audit(&mut self, substation_id: SubstationId, message: &str) -> Result<AuditEntry>;

    /// Audit entries in append order, optionally for one substation.
    fn audit_entries(&mut self, substation_id: Option<SubstationId>) -> Result<Vec<AuditEntry>>;

    fn commit(self) -> Result<()>
    where
        Self: Sized;

    fn rollback(self) -> Result<()>
    where
        Self: Sized;
}

pub trait LedgerStore: Send + Sync {
    type Tx<'a>: StoreTransaction
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>>;

    /// Opens a transaction that will only read. Backends with a separate write lock can start it
    /// without taking that lock.
    fn begin_read(&self) -> Result<Self::Tx<'_>> {
        self.begin()
    }
}
