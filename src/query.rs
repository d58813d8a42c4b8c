//! As-of, before and period-delta reads.

use crate::coordinator::Ledger;
use crate::error::{LedgerError, Result};
use crate::schema::{DimensionKey, Snapshot};
use crate::series::{Series, SeriesValue};
use crate::store::{LedgerStore, StoreTransaction};
use chrono::NaiveDate;

/// Cumulative value on `date`, counting observations dated on it.
pub fn as_of<V: SeriesValue, T: StoreTransaction>(
    tx: &mut T,
    series: Series<V>,
    key: &DimensionKey,
    date: NaiveDate,
) -> Result<V> {
    series.latest_before(tx, key, date, true)
}

/// Cumulative value strictly before `date`.
pub fn before<V: SeriesValue, T: StoreTransaction>(
    tx: &mut T,
    series: Series<V>,
    key: &DimensionKey,
    date: NaiveDate,
) -> Result<V> {
    series.latest_before(tx, key, date, false)
}

/// Net change observed within `[start, end]`, both inclusive.
pub fn period_delta<V: SeriesValue, T: StoreTransaction>(
    tx: &mut T,
    series: Series<V>,
    key: &DimensionKey,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<V> {
    if end < start {
        return Err(LedgerError::invalid(
            "end",
            format!("period end {} is before its start {}", end, start),
        ));
    }
    let closing = as_of(tx, series, key, end)?;
    let opening = before(tx, series, key, start)?;
    closing.checked_sub(opening).ok_or(LedgerError::CountOverflow {
        kind: series.kind(),
        key: *key,
        date: end,
    })
}

impl<S: LedgerStore> Ledger<S> {
    pub fn as_of<V: SeriesValue>(&self, series: Series<V>, key: &DimensionKey, date: NaiveDate) -> Result<V> {
        self.read(|tx| as_of(tx, series, key, date))
    }

    pub fn before<V: SeriesValue>(&self, series: Series<V>, key: &DimensionKey, date: NaiveDate) -> Result<V> {
        self.read(|tx| before(tx, series, key, date))
    }

    pub fn period_delta<V: SeriesValue>(
        &self,
        series: Series<V>,
        key: &DimensionKey,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<V> {
        self.read(|tx| period_delta(tx, series, key, start, end))
    }

    /// Every snapshot of one dimension, oldest first.
    pub fn history<V: SeriesValue>(&self, series: Series<V>, key: &DimensionKey) -> Result<Vec<Snapshot<V>>> {
        self.read(|tx| series.history(tx, key))
    }
}
