//! Value shapes and the generic series handle shared by all four series kinds.

use crate::error::{LedgerError, Result};
use crate::schema::{DimensionKey, SeriesKind, SnapshotId, Snapshot};
use crate::store::StoreTransaction;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;

/// Installed meters versus the subset registered in the metering system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Installation {
    pub total_installed: i64,
    pub registered_count: i64,
}

impl Installation {
    pub fn new(total_installed: i64, registered_count: i64) -> Self {
        Self {
            total_installed,
            registered_count,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.registered_count <= self.total_installed
    }

    /// Fieldwise sum, `None` when either count overflows.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Some(Self::new(
            self.total_installed.checked_add(rhs.total_installed)?,
            self.registered_count.checked_add(rhs.registered_count)?,
        ))
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        Some(Self::new(
            self.total_installed.checked_sub(rhs.total_installed)?,
            self.registered_count.checked_sub(rhs.registered_count)?,
        ))
    }
}

impl Display for Installation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} installed / {} registered",
            self.total_installed, self.registered_count
        )
    }
}

/// Shape-erased value as the store persists it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum StoredValue {
    Count { value: i64 },
    Installation(Installation),
}

/// A cumulative value that can be shifted by a delta. Arithmetic is checked; an overflow is
/// reported to the caller instead of wrapping.
pub trait SeriesValue: Copy + Default + PartialEq + Debug + Display + Send + 'static {
    fn checked_add(self, rhs: Self) -> Option<Self>;

    fn checked_sub(self, rhs: Self) -> Option<Self>;

    fn into_stored(self) -> StoredValue;

    fn from_stored(stored: StoredValue) -> Option<Self>;

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl SeriesValue for i64 {
    fn checked_add(self, rhs: Self) -> Option<Self> {
        i64::checked_add(self, rhs)
    }

    fn checked_sub(self, rhs: Self) -> Option<Self> {
        i64::checked_sub(self, rhs)
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::Count { value: self }
    }

    fn from_stored(stored: StoredValue) -> Option<Self> {
        match stored {
            StoredValue::Count { value } => Some(value),
            StoredValue::Installation(_) => None,
        }
    }
}

impl SeriesValue for Installation {
    fn checked_add(self, rhs: Self) -> Option<Self> {
        Installation::checked_add(self, rhs)
    }

    fn checked_sub(self, rhs: Self) -> Option<Self> {
        Installation::checked_sub(self, rhs)
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::Installation(self)
    }

    fn from_stored(stored: StoredValue) -> Option<Self> {
        match stored {
            StoredValue::Installation(value) => Some(value),
            StoredValue::Count { .. } => None,
        }
    }
}

/// Typed handle on one series kind. The value shape is fixed by `V`.
#[derive(Debug)]
pub struct Series<V> {
    kind: SeriesKind,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for Series<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Series<V> {}

pub const REGISTERED: Series<i64> = Series::new(SeriesKind::Registered);
pub const UNREGISTERED: Series<i64> = Series::new(SeriesKind::Unregistered);
pub const YEARLY_INSTALLATION: Series<Installation> = Series::new(SeriesKind::YearlyInstallation);
pub const MONTHLY_INSTALLATION: Series<Installation> = Series::new(SeriesKind::MonthlyInstallation);

impl<V> Series<V> {
    const fn new(kind: SeriesKind) -> Self {
        Self {
            kind,
            _value: PhantomData,
        }
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn validate_key(&self, key: &DimensionKey) -> Result<()> {
        self.kind.validate_key(key)
    }
}

impl<V: SeriesValue> Series<V> {
    /// Snapshot recorded exactly on `date`.
    pub fn get<T: StoreTransaction>(&self, tx: &mut T, key: &DimensionKey, date: NaiveDate) -> Result<Option<Snapshot<V>>> {
        self.validate_key(key)?;
        tx.get(self.kind, key, date)?.map(|s| self.decode(s)).transpose()
    }

    pub fn get_by_id<T: StoreTransaction>(&self, tx: &mut T, id: SnapshotId) -> Result<Option<Snapshot<V>>> {
        tx.get_by_id(self.kind, id)?.map(|s| self.decode(s)).transpose()
    }

    pub fn upsert<T: StoreTransaction>(&self, tx: &mut T, key: &DimensionKey, date: NaiveDate, value: V) -> Result<Snapshot<V>> {
        self.validate_key(key)?;
        let stored = tx.upsert(self.kind, key, date, value.into_stored())?;
        self.decode(stored)
    }

    /// Snapshots dated strictly after `date`, oldest first.
    pub fn list_after<T: StoreTransaction>(&self, tx: &mut T, key: &DimensionKey, date: NaiveDate) -> Result<Vec<Snapshot<V>>> {
        self.validate_key(key)?;
        self.decode_all(tx.list_after(self.kind, key, date)?)
    }

    /// Cumulative value before `date` (or on it, when `inclusive`). Zero for an untouched
    /// dimension.
    pub fn latest_before<T: StoreTransaction>(
        &self,
        tx: &mut T,
        key: &DimensionKey,
        date: NaiveDate,
        inclusive: bool,
    ) -> Result<V> {
        self.validate_key(key)?;
        match tx.latest_before(self.kind, key, date, inclusive)? {
            Some(snapshot) => Ok(self.decode(snapshot)?.value),
            None => Ok(V::default()),
        }
    }

    pub fn history<T: StoreTransaction>(&self, tx: &mut T, key: &DimensionKey) -> Result<Vec<Snapshot<V>>> {
        self.validate_key(key)?;
        self.decode_all(tx.history(self.kind, key)?)
    }

    pub(crate) fn decode(&self, snapshot: Snapshot<StoredValue>) -> Result<Snapshot<V>> {
        let id = snapshot.id;
        let value = V::from_stored(snapshot.value).ok_or(LedgerError::CorruptValue { kind: self.kind, id })?;
        Ok(snapshot.map_value(|_| value))
    }

    pub(crate) fn decode_all(&self, snapshots: Vec<Snapshot<StoredValue>>) -> Result<Vec<Snapshot<V>>> {
        snapshots.into_iter().map(|s| self.decode(s)).collect()
    }
}
