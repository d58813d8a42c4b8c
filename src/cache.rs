//! Explicit cache for cross-sectional reports.
//!
//! Entries are keyed by the report parameters. A write on date `D` can only change cumulative
//! values dated `D` or later, so an accepted write evicts exactly the entries for its balance
//! group and substation whose report date (or period end) is on or after `D`.
//!
//! Every invalidation also bumps a generation counter. A report built from a read that started
//! before an invalidation is not stored, since it may predate the write.

use crate::aggregator::{BalanceGroupReport, PeriodReport, SubstationReport};
use crate::schema::{BalanceGroup, SubstationId};
use chrono::NaiveDate;
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReportKey {
    Substations {
        balance_group: BalanceGroup,
        substations: Vec<SubstationId>,
        date: NaiveDate,
    },
    BalanceGroups {
        substation_id: SubstationId,
        date: NaiveDate,
    },
    Period {
        balance_group: BalanceGroup,
        substations: Vec<SubstationId>,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl ReportKey {
    fn is_affected_by(&self, group: BalanceGroup, substation_id: SubstationId, date: NaiveDate) -> bool {
        match self {
            Self::Substations {
                balance_group,
                substations,
                date: report_date,
            } => *balance_group == group && substations.contains(&substation_id) && *report_date >= date,
            Self::BalanceGroups {
                substation_id: report_substation,
                date: report_date,
            } => *report_substation == substation_id && *report_date >= date,
            Self::Period {
                balance_group,
                substations,
                end,
                ..
            } => *balance_group == group && substations.contains(&substation_id) && *end >= date,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CachedReport {
    Substations(SubstationReport),
    BalanceGroups(BalanceGroupReport),
    Period(PeriodReport),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ReportKey, (u64, CachedReport)>,
    sequence: u64,
    generation: u64,
}

pub struct ReportCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ReportCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current invalidation generation. Take it before reading the data a report is built from.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn get(&self, key: &ReportKey) -> Option<CachedReport> {
        let state = self.lock();
        let hit = state.entries.get(key).map(|(_, report)| report.clone());
        if hit.is_some() {
            debug!("Report cache hit for {:?}", key);
        }
        hit
    }

    /// Stores a report built from data read at `generation`, evicting the oldest entry when
    /// full. Nothing is stored if an invalidation has happened since.
    pub fn insert(&self, key: ReportKey, report: CachedReport, generation: u64) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.lock();
        if state.generation != generation {
            debug!("Dropping report for {:?}, invalidated while it was built", key);
            return;
        }

        if state.entries.len() >= self.capacity && !state.entries.contains_key(&key) {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, (sequence, _))| *sequence)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
            }
        }

        state.sequence += 1;
        let sequence = state.sequence;
        state.entries.insert(key, (sequence, report));
    }

    /// Drops every entry a write for `(group, substation_id)` on `date` can change.
    pub fn invalidate(&self, group: BalanceGroup, substation_id: SubstationId, date: NaiveDate) {
        let mut state = self.lock();
        state.generation += 1;
        let before = state.entries.len();
        state
            .entries
            .retain(|key, _| !key.is_affected_by(group, substation_id, date));
        let evicted = before - state.entries.len();
        if evicted > 0 {
            debug!(
                "Invalidated {} cached reports for {} substation {} from {}",
                evicted, group, substation_id, date
            );
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SeriesTotals;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn report(group: BalanceGroup, day: NaiveDate) -> CachedReport {
        CachedReport::Substations(SubstationReport {
            balance_group: group,
            date: day,
            rows: vec![],
            total: SeriesTotals::default(),
        })
    }

    fn substations_key(group: BalanceGroup, substations: Vec<SubstationId>, day: NaiveDate) -> ReportKey {
        ReportKey::Substations {
            balance_group: group,
            substations,
            date: day,
        }
    }

    #[test]
    fn test_invalidation_spares_earlier_reports() {
        let cache = ReportCache::new(8);
        let early = substations_key(BalanceGroup::Private, vec![1, 2], date(2025, 2, 28));
        let late = substations_key(BalanceGroup::Private, vec![1, 2], date(2025, 3, 31));
        cache.insert(
            early.clone(),
            report(BalanceGroup::Private, date(2025, 2, 28)),
            cache.generation(),
        );
        cache.insert(
            late.clone(),
            report(BalanceGroup::Private, date(2025, 3, 31)),
            cache.generation(),
        );

        cache.invalidate(BalanceGroup::Private, 2, date(2025, 3, 5));

        assert!(cache.get(&early).is_some());
        assert!(cache.get(&late).is_none());
    }

    #[test]
    fn test_invalidation_spares_other_dimensions() {
        let cache = ReportCache::new(8);
        let other_group = substations_key(BalanceGroup::LegalEntity, vec![1], date(2025, 3, 31));
        let other_substation = substations_key(BalanceGroup::Private, vec![7], date(2025, 3, 31));
        let by_group = ReportKey::BalanceGroups {
            substation_id: 1,
            date: date(2025, 3, 31),
        };
        cache.insert(
            other_group.clone(),
            report(BalanceGroup::LegalEntity, date(2025, 3, 31)),
            cache.generation(),
        );
        cache.insert(
            other_substation.clone(),
            report(BalanceGroup::Private, date(2025, 3, 31)),
            cache.generation(),
        );
        cache.insert(
            by_group.clone(),
            report(BalanceGroup::Private, date(2025, 3, 31)),
            cache.generation(),
        );

        cache.invalidate(BalanceGroup::Private, 1, date(2025, 3, 1));

        assert!(cache.get(&other_group).is_some());
        assert!(cache.get(&other_substation).is_some());
        assert!(cache.get(&by_group).is_none());
    }

    #[test]
    fn test_period_entries_keyed_by_end() {
        let cache = ReportCache::new(8);
        let period = ReportKey::Period {
            balance_group: BalanceGroup::Private,
            substations: vec![1],
            start: date(2025, 3, 1),
            end: date(2025, 3, 31),
        };
        cache.insert(
            period.clone(),
            report(BalanceGroup::Private, date(2025, 3, 31)),
            cache.generation(),
        );

        cache.invalidate(BalanceGroup::Private, 1, date(2025, 4, 2));
        assert!(cache.get(&period).is_some());

        cache.invalidate(BalanceGroup::Private, 1, date(2025, 2, 2));
        assert!(cache.get(&period).is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ReportCache::new(2);
        let keys: Vec<_> = (1..=3)
            .map(|day| substations_key(BalanceGroup::Private, vec![1], date(2025, 1, day)))
            .collect();
        for key in &keys {
            cache.insert(
                key.clone(),
                report(BalanceGroup::Private, date(2025, 1, 1)),
                cache.generation(),
            );
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&keys[0]).is_none());
        assert!(cache.get(&keys[2]).is_some());
    }

    #[test]
    fn test_report_read_before_invalidation_is_not_stored() {
        let cache = ReportCache::new(8);
        let key = substations_key(BalanceGroup::Private, vec![1], date(2025, 12, 31));

        let generation = cache.generation();
        cache.invalidate(BalanceGroup::Private, 1, date(2025, 3, 10));
        cache.insert(key.clone(), report(BalanceGroup::Private, date(2025, 12, 31)), generation);
        assert!(cache.get(&key).is_none());

        let generation = cache.generation();
        cache.insert(key.clone(), report(BalanceGroup::Private, date(2025, 12, 31)), generation);
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ReportCache::new(0);
        let key = substations_key(BalanceGroup::Private, vec![1], date(2025, 1, 1));
        cache.insert(
            key.clone(),
            report(BalanceGroup::Private, date(2025, 1, 1)),
            cache.generation(),
        );
        assert!(cache.is_empty());
        assert!(cache.get(&key).is_none());
    }
}
