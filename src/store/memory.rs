use crate::error::Result;
use crate::schema::{AuditEntry, DimensionKey, SeriesKind, SnapshotId, Snapshot, SubstationId};
use crate::series::StoredValue;
use crate::store::{LedgerStore, StoreTransaction};
use chrono::{NaiveDate, Utc};
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

type SeriesRows = BTreeMap<NaiveDate, Snapshot<StoredValue>>;

#[derive(Default)]
struct MemoryState {
    series: BTreeMap<(SeriesKind, DimensionKey), SeriesRows>,
    ids: HashMap<SnapshotId, (SeriesKind, DimensionKey, NaiveDate)>,
    audit: Vec<AuditEntry>,
    next_snapshot_id: i64,
    next_audit_id: i64,
}

impl MemoryState {
    fn rows(&self, kind: SeriesKind, key: &DimensionKey) -> Option<&SeriesRows> {
        self.series.get(&(kind, *key))
    }
}

enum Undo {
    Upsert {
        kind: SeriesKind,
        key: DimensionKey,
        date: NaiveDate,
        previous: Option<Snapshot<StoredValue>>,
    },
    Audit,
}

/// Ordered in-memory backend. A transaction holds the state lock until it finishes, so
/// writers are fully serialized.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    type Tx<'a> = MemoryTransaction<'a>;

    fn begin(&self) -> Result<MemoryTransaction<'_>> {
        // A writer that panicked has already been undone by its transaction's drop.
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Memory store lock poisoned by a panicked writer, recovering");
                self.state.clear_poison();
                poisoned.into_inner()
            }
        };
        let start_ids = (state.next_snapshot_id, state.next_audit_id);

        Ok(MemoryTransaction {
            state,
            journal: Vec::new(),
            start_ids,
            finished: false,
        })
    }
}

pub struct MemoryTransaction<'a> {
    state: MutexGuard<'a, MemoryState>,
    journal: Vec<Undo>,
    start_ids: (i64, i64),
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn undo_all(&mut self) {
        let state = &mut *self.state;
        while let Some(entry) = self.journal.pop() {
            match entry {
                Undo::Upsert {
                    kind,
                    key,
                    date,
                    previous: Some(previous),
                } => {
                    state.series.entry((kind, key)).or_default().insert(date, previous);
                }
                Undo::Upsert {
                    kind,
                    key,
                    date,
                    previous: None,
                } => {
                    if let Some(rows) = state.series.get_mut(&(kind, key)) {
                        if let Some(removed) = rows.remove(&date) {
                            state.ids.remove(&removed.id);
                        }
                        if rows.is_empty() {
                            state.series.remove(&(kind, key));
                        }
                    }
                }
                Undo::Audit => {
                    state.audit.pop();
                }
            }
        }

        let (next_snapshot_id, next_audit_id) = self.start_ids;
        state.next_snapshot_id = next_snapshot_id;
        state.next_audit_id = next_audit_id;
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn get(&mut self, kind: SeriesKind, key: &DimensionKey, date: NaiveDate) -> Result<Option<Snapshot<StoredValue>>> {
        Ok(self.state.rows(kind, key).and_then(|rows| rows.get(&date)).cloned())
    }

    fn get_by_id(&mut self, kind: SeriesKind, id: SnapshotId) -> Result<Option<Snapshot<StoredValue>>> {
        let Some((stored_kind, key, date)) = self.state.ids.get(&id).copied() else {
            return Ok(None);
        };
        if stored_kind != kind {
            return Ok(None);
        }
        self.get(kind, &key, date)
    }

    fn upsert(
        &mut self,
        kind: SeriesKind,
        key: &DimensionKey,
        date: NaiveDate,
        value: StoredValue,
    ) -> Result<Snapshot<StoredValue>> {
        let now = Utc::now();
        let previous = self.get(kind, key, date)?;

        let snapshot = match &previous {
            Some(existing) => Snapshot {
                value,
                updated_at: now,
                ..existing.clone()
            },
            None => {
                self.state.next_snapshot_id += 1;
                let id = SnapshotId(self.state.next_snapshot_id);
                self.state.ids.insert(id, (kind, *key, date));
                Snapshot {
                    id,
                    key: *key,
                    date,
                    value,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        self.state
            .series
            .entry((kind, *key))
            .or_default()
            .insert(date, snapshot.clone());
        self.journal.push(Undo::Upsert {
            kind,
            key: *key,
            date,
            previous,
        });

        Ok(snapshot)
    }

    fn list_after(&mut self, kind: SeriesKind, key: &DimensionKey, date: NaiveDate) -> Result<Vec<Snapshot<StoredValue>>> {
        Ok(self
            .state
            .rows(kind, key)
            .map(|rows| {
                rows.range((Bound::Excluded(date), Bound::Unbounded))
                    .map(|(_, snapshot)| snapshot.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn latest_before(
        &mut self,
        kind: SeriesKind,
        key: &DimensionKey,
        date: NaiveDate,
        inclusive: bool,
    ) -> Result<Option<Snapshot<StoredValue>>> {
        let upper = if inclusive {
            Bound::Included(date)
        } else {
            Bound::Excluded(date)
        };

        Ok(self.state.rows(kind, key).and_then(|rows| {
            rows.range((Bound::Unbounded, upper))
                .next_back()
                .map(|(_, snapshot)| snapshot.clone())
        }))
    }

    fn history(&mut self, kind: SeriesKind, key: &DimensionKey) -> Result<Vec<Snapshot<StoredValue>>> {
        Ok(self
            .state
            .rows(kind, key)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn append_audit(&mut self, substation_id: SubstationId, message: &str) -> Result<AuditEntry> {
        self.state.next_audit_id += 1;
        let entry = AuditEntry {
            id: self.state.next_audit_id,
            substation_id,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        self.state.audit.push(entry.clone());
        self.journal.push(Undo::Audit);
        Ok(entry)
    }

    fn audit_entries(&mut self, substation_id: Option<SubstationId>) -> Result<Vec<AuditEntry>> {
        Ok(self
            .state
            .audit
            .iter()
            .filter(|entry| substation_id.map_or(true, |id| entry.substation_id == id))
            .cloned()
            .collect())
    }

    fn commit(mut self) -> Result<()> {
        self.journal.clear();
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) -> Result<()> {
        self.undo_all();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if !self.journal.is_empty() {
                warn!(
                    "Memory transaction dropped without commit, undoing {} writes",
                    self.journal.len()
                );
            }
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BalanceGroup;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn count(value: i64) -> StoredValue {
        StoredValue::Count { value }
    }

    #[test]
    fn test_upsert_keeps_identity_on_same_date() {
        let store = MemoryStore::new();
        let key = DimensionKey::substation(BalanceGroup::Private, 1);

        let mut tx = store.begin().unwrap();
        let first = tx.upsert(SeriesKind::Registered, &key, date(2025, 3, 10), count(8)).unwrap();
        let second = tx.upsert(SeriesKind::Registered, &key, date(2025, 3, 10), count(13)).unwrap();
        tx.commit().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.value, count(13));
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_ordered_range_reads() {
        let store = MemoryStore::new();
        let key = DimensionKey::substation(BalanceGroup::Private, 1);
        let mut tx = store.begin().unwrap();
        for (day, value) in [(5, 5), (10, 13), (20, 15)] {
            tx.upsert(SeriesKind::Registered, &key, date(2025, 3, day), count(value)).unwrap();
        }

        let after: Vec<_> = tx
            .list_after(SeriesKind::Registered, &key, date(2025, 3, 5))
            .unwrap()
            .into_iter()
            .map(|s| s.date)
            .collect();
        assert_eq!(after, vec![date(2025, 3, 10), date(2025, 3, 20)]);

        let exclusive = tx
            .latest_before(SeriesKind::Registered, &key, date(2025, 3, 10), false)
            .unwrap()
            .unwrap();
        assert_eq!(exclusive.value, count(5));

        let inclusive = tx
            .latest_before(SeriesKind::Registered, &key, date(2025, 3, 10), true)
            .unwrap()
            .unwrap();
        assert_eq!(inclusive.value, count(13));

        assert!(tx
            .latest_before(SeriesKind::Registered, &key, date(2025, 3, 5), false)
            .unwrap()
            .is_none());
        assert!(tx
            .latest_before(SeriesKind::Unregistered, &key, date(2025, 3, 31), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let store = MemoryStore::new();
        let key = DimensionKey::substation(BalanceGroup::LegalEntity, 2);

        let mut tx = store.begin().unwrap();
        tx.upsert(SeriesKind::Registered, &key, date(2025, 1, 1), count(4)).unwrap();
        tx.append_audit(2, "first").unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        tx.upsert(SeriesKind::Registered, &key, date(2025, 1, 1), count(9)).unwrap();
        tx.upsert(SeriesKind::Registered, &key, date(2025, 2, 1), count(11)).unwrap();
        tx.append_audit(2, "second").unwrap();
        tx.rollback().unwrap();

        let mut tx = store.begin().unwrap();
        let history = tx.history(SeriesKind::Registered, &key).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, count(4));
        assert_eq!(tx.audit_entries(None).unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let key = DimensionKey::substation(BalanceGroup::Private, 1);
        {
            let mut tx = store.begin().unwrap();
            tx.upsert(SeriesKind::Unregistered, &key, date(2025, 1, 1), count(2)).unwrap();
        }

        let mut tx = store.begin().unwrap();
        assert!(tx.history(SeriesKind::Unregistered, &key).unwrap().is_empty());
    }

    #[test]
    fn test_panicked_writer_does_not_wedge_the_store() {
        let store = MemoryStore::new();
        let key = DimensionKey::substation(BalanceGroup::Private, 1);

        let outcome = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let mut tx = store.begin().unwrap();
                    tx.upsert(SeriesKind::Registered, &key, date(2025, 1, 1), count(5)).unwrap();
                    panic!("writer died mid-transaction");
                })
                .join()
        });
        assert!(outcome.is_err());

        let mut tx = store.begin().unwrap();
        assert!(tx.history(SeriesKind::Registered, &key).unwrap().is_empty());
        let snapshot = tx.upsert(SeriesKind::Registered, &key, date(2025, 1, 2), count(1)).unwrap();
        assert_eq!(snapshot.id, SnapshotId(1));
        tx.commit().unwrap();
    }

    #[test]
    fn test_get_by_id_checks_kind() {
        let store = MemoryStore::new();
        let key = DimensionKey::substation(BalanceGroup::Private, 1);
        let mut tx = store.begin().unwrap();
        let snapshot = tx.upsert(SeriesKind::Registered, &key, date(2025, 1, 1), count(1)).unwrap();

        assert!(tx.get_by_id(SeriesKind::Registered, snapshot.id).unwrap().is_some());
        assert!(tx.get_by_id(SeriesKind::Unregistered, snapshot.id).unwrap().is_none());
        assert!(tx.get_by_id(SeriesKind::Registered, SnapshotId(999)).unwrap().is_none());
    }

    #[test]
    fn test_audit_filter_by_substation() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.append_audit(1, "a").unwrap();
        tx.append_audit(2, "b").unwrap();
        tx.append_audit(1, "c").unwrap();

        let messages: Vec<_> = tx
            .audit_entries(Some(1))
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["a", "c"]);
    }
}
