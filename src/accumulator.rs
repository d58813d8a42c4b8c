use crate::error::{LedgerError, Result};
use crate::schema::{DimensionKey, SeriesKind, Snapshot};
use crate::series::{Series, SeriesValue};
use crate::store::StoreTransaction;
use chrono::NaiveDate;
use log::debug;
use serde::Serialize;

/// Snapshots written while merging one delta into one series.
#[derive(Debug, Clone, Serialize)]
pub struct Accumulation<V> {
    pub kind: SeriesKind,
    /// The snapshot on the submitted date, created or updated in place.
    pub anchor: Option<Snapshot<V>>,
    /// Later snapshots shifted by the same delta, oldest first.
    pub propagated: Vec<Snapshot<V>>,
}

impl<V> Accumulation<V> {
    fn empty(kind: SeriesKind) -> Self {
        Self {
            kind,
            anchor: None,
            propagated: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor.is_none() && self.propagated.is_empty()
    }

    pub fn touched(&self) -> impl Iterator<Item = &Snapshot<V>> {
        self.anchor.iter().chain(self.propagated.iter())
    }

    pub fn into_touched(self) -> Vec<Snapshot<V>> {
        self.anchor.into_iter().chain(self.propagated).collect()
    }
}

/// Merges `delta`, observed on `date`, into the series for `key`.
///
/// The snapshot on `date` becomes its previous value (or the latest earlier cumulative value
/// when none exists yet) plus `delta`. Every snapshot after `date` is cumulative as of its own
/// date, so each of them is shifted by `delta` as well. A zero delta writes nothing.
pub fn accumulate<V, T>(
    tx: &mut T,
    series: Series<V>,
    key: &DimensionKey,
    date: NaiveDate,
    delta: V,
) -> Result<Accumulation<V>>
where
    V: SeriesValue,
    T: StoreTransaction,
{
    series.validate_key(key)?;

    if delta.is_zero() {
        debug!("Skipping zero delta for {} series {} on {}", series.kind(), key, date);
        return Ok(Accumulation::empty(series.kind()));
    }

    let shift = |value: V, at: NaiveDate| {
        value.checked_add(delta).ok_or(LedgerError::CountOverflow {
            kind: series.kind(),
            key: *key,
            date: at,
        })
    };

    let baseline = match series.get(tx, key, date)? {
        Some(existing) => existing.value,
        None => series.latest_before(tx, key, date, false)?,
    };
    let anchor = series.upsert(tx, key, date, shift(baseline, date)?)?;

    let later = series.list_after(tx, key, date)?;
    let mut propagated = Vec::with_capacity(later.len());
    for snapshot in later {
        let shifted = shift(snapshot.value, snapshot.date)?;
        propagated.push(series.upsert(tx, key, snapshot.date, shifted)?);
    }

    debug!(
        "Accumulated {} into {} series {} on {} ({} later snapshots shifted)",
        delta,
        series.kind(),
        key,
        date,
        propagated.len()
    );

    Ok(Accumulation {
        kind: series.kind(),
        anchor: Some(anchor),
        propagated,
    })
}
