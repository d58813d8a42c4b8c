//! Cross-sectional reports over many dimensions.
//!
//! Every figure is an as-of (or period-delta) read of one dimension, so a substation or balance
//! group that never received a submission simply reports zeros.

use crate::cache::{CachedReport, ReportKey};
use crate::coordinator::Ledger;
use crate::error::{LedgerError, Result};
use crate::query::{as_of, period_delta};
use crate::schema::{BalanceGroup, SeriesKind, SubstationId};
use crate::series::{Installation, MONTHLY_INSTALLATION, REGISTERED, UNREGISTERED, YEARLY_INSTALLATION};
use crate::store::{LedgerStore, StoreTransaction};
use crate::utils::parse_period_string;
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

/// The four series values for one dimension (or the sum over several).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTotals {
    pub registered: i64,
    pub unregistered: i64,
    pub yearly_installation: Installation,
    pub monthly_installation: Installation,
}

impl SeriesTotals {
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Some(Self {
            registered: self.registered.checked_add(rhs.registered)?,
            unregistered: self.unregistered.checked_add(rhs.unregistered)?,
            yearly_installation: self.yearly_installation.checked_add(rhs.yearly_installation)?,
            monthly_installation: self.monthly_installation.checked_add(rhs.monthly_installation)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstationRow {
    pub substation_id: SubstationId,
    pub totals: SeriesTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceGroupRow {
    pub balance_group: BalanceGroup,
    pub totals: SeriesTotals,
}

/// One balance group across substations, as of `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstationReport {
    pub balance_group: BalanceGroup,
    pub date: NaiveDate,
    pub rows: Vec<SubstationRow>,
    pub total: SeriesTotals,
}

/// One substation across balance groups, as of `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceGroupReport {
    pub substation_id: SubstationId,
    pub date: NaiveDate,
    pub rows: Vec<BalanceGroupRow>,
    pub total: SeriesTotals,
}

/// Net change per substation within `[start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub balance_group: BalanceGroup,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Vec<SubstationRow>,
    pub total: SeriesTotals,
}

/// All four series for one balance group and substation as of `date`. Installation series are
/// read from the year and month containing `date`.
pub fn totals_as_of<T: StoreTransaction>(
    tx: &mut T,
    balance_group: BalanceGroup,
    substation_id: SubstationId,
    date: NaiveDate,
) -> Result<SeriesTotals> {
    let key = |kind: SeriesKind| kind.key_for(balance_group, substation_id, date);

    Ok(SeriesTotals {
        registered: as_of(tx, REGISTERED, &key(SeriesKind::Registered), date)?,
        unregistered: as_of(tx, UNREGISTERED, &key(SeriesKind::Unregistered), date)?,
        yearly_installation: as_of(tx, YEARLY_INSTALLATION, &key(SeriesKind::YearlyInstallation), date)?,
        monthly_installation: as_of(
            tx,
            MONTHLY_INSTALLATION,
            &key(SeriesKind::MonthlyInstallation),
            date,
        )?,
    })
}

/// Period deltas of all four series over `[start, end]`. Installation series are read from the
/// year and month containing `end`.
pub fn totals_for_period<T: StoreTransaction>(
    tx: &mut T,
    balance_group: BalanceGroup,
    substation_id: SubstationId,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<SeriesTotals> {
    let key = |kind: SeriesKind| kind.key_for(balance_group, substation_id, end);

    Ok(SeriesTotals {
        registered: period_delta(tx, REGISTERED, &key(SeriesKind::Registered), start, end)?,
        unregistered: period_delta(tx, UNREGISTERED, &key(SeriesKind::Unregistered), start, end)?,
        yearly_installation: period_delta(
            tx,
            YEARLY_INSTALLATION,
            &key(SeriesKind::YearlyInstallation),
            start,
            end,
        )?,
        monthly_installation: period_delta(
            tx,
            MONTHLY_INSTALLATION,
            &key(SeriesKind::MonthlyInstallation),
            start,
            end,
        )?,
    })
}

fn sum_totals<'a>(mut totals: impl Iterator<Item = &'a SeriesTotals>) -> Result<SeriesTotals> {
    totals.try_fold(SeriesTotals::default(), |acc, t| {
        acc.checked_add(*t)
            .ok_or_else(|| LedgerError::ReportOverflow(format!("adding {:?} to {:?}", t, acc)))
    })
}

impl<S: LedgerStore> Ledger<S> {
    pub fn substation_report(
        &self,
        balance_group: BalanceGroup,
        substations: &[SubstationId],
        date: NaiveDate,
    ) -> Result<SubstationReport> {
        let cache_key = ReportKey::Substations {
            balance_group,
            substations: substations.to_vec(),
            date,
        };
        if let Some(CachedReport::Substations(report)) = self.cache().get(&cache_key) {
            return Ok(report);
        }

        let generation = self.cache().generation();
        let rows = self.read(|tx| {
            substations
                .iter()
                .map(|&substation_id| -> Result<SubstationRow> {
                    Ok(SubstationRow {
                        substation_id,
                        totals: totals_as_of(tx, balance_group, substation_id, date)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let report = SubstationReport {
            balance_group,
            date,
            total: sum_totals(rows.iter().map(|row| &row.totals))?,
            rows,
        };
        debug!(
            "Built substation report for {} on {} over {} substations",
            balance_group,
            date,
            substations.len()
        );
        self.cache()
            .insert(cache_key, CachedReport::Substations(report.clone()), generation);
        Ok(report)
    }

    /// Every balance group for one substation, as of `date`.
    pub fn balance_group_report(
        &self,
        substation_id: SubstationId,
        date: NaiveDate,
    ) -> Result<BalanceGroupReport> {
        let cache_key = ReportKey::BalanceGroups { substation_id, date };
        if let Some(CachedReport::BalanceGroups(report)) = self.cache().get(&cache_key) {
            return Ok(report);
        }

        let generation = self.cache().generation();
        let rows = self.read(|tx| {
            BalanceGroup::ALL
                .into_iter()
                .map(|balance_group| -> Result<BalanceGroupRow> {
                    Ok(BalanceGroupRow {
                        balance_group,
                        totals: totals_as_of(tx, balance_group, substation_id, date)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let report = BalanceGroupReport {
            substation_id,
            date,
            total: sum_totals(rows.iter().map(|row| &row.totals))?,
            rows,
        };
        self.cache()
            .insert(cache_key, CachedReport::BalanceGroups(report.clone()), generation);
        Ok(report)
    }

    /// Per-substation net change within `[start, end]`. Passing the previous month's first day
    /// as `start` reclassifies late entries into the month they belong to.
    pub fn period_report(
        &self,
        balance_group: BalanceGroup,
        substations: &[SubstationId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PeriodReport> {
        let cache_key = ReportKey::Period {
            balance_group,
            substations: substations.to_vec(),
            start,
            end,
        };
        if let Some(CachedReport::Period(report)) = self.cache().get(&cache_key) {
            return Ok(report);
        }

        let generation = self.cache().generation();
        let rows = self.read(|tx| {
            substations
                .iter()
                .map(|&substation_id| -> Result<SubstationRow> {
                    Ok(SubstationRow {
                        substation_id,
                        totals: totals_for_period(tx, balance_group, substation_id, start, end)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let report = PeriodReport {
            balance_group,
            start,
            end,
            total: sum_totals(rows.iter().map(|row| &row.totals))?,
            rows,
        };
        self.cache()
            .insert(cache_key, CachedReport::Period(report.clone()), generation);
        Ok(report)
    }

    /// [`Ledger::period_report`] for a "YYYY-MM" or "YYYY-MM:YYYY-MM" period.
    pub fn month_report(
        &self,
        balance_group: BalanceGroup,
        substations: &[SubstationId],
        period: &str,
    ) -> Result<PeriodReport> {
        let (start, end) = parse_period_string(period)?;
        self.period_report(balance_group, substations, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::schema::Submission;
    use crate::store::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn submit(
        ledger: &Ledger<MemoryStore>,
        balance_group: BalanceGroup,
        substation_id: SubstationId,
        day: NaiveDate,
        total_count: i64,
        registered_count: i64,
    ) {
        ledger
            .submit(&Submission {
                balance_group,
                substation_id,
                date: day,
                total_count,
                registered_count,
            })
            .unwrap();
    }

    fn seeded() -> Ledger<MemoryStore> {
        let ledger = Ledger::in_memory(&LedgerConfig::default()).unwrap();
        submit(&ledger, BalanceGroup::Private, 1, date(2025, 2, 25), 4, 4);
        submit(&ledger, BalanceGroup::Private, 1, date(2025, 3, 10), 10, 8);
        submit(&ledger, BalanceGroup::Private, 2, date(2025, 3, 12), 3, 1);
        submit(&ledger, BalanceGroup::LegalEntity, 1, date(2025, 3, 3), 6, 6);
        ledger
    }

    #[test]
    fn test_substation_report_sums_rows() {
        let ledger = seeded();
        let report = ledger
            .substation_report(BalanceGroup::Private, &[1, 2, 3], date(2025, 3, 31))
            .unwrap();

        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0].totals.registered, 12);
        assert_eq!(report.rows[0].totals.unregistered, 2);
        assert_eq!(report.rows[0].totals.yearly_installation, Installation::new(14, 12));
        assert_eq!(report.rows[0].totals.monthly_installation, Installation::new(10, 8));
        assert_eq!(report.rows[2].totals, SeriesTotals::default());

        assert_eq!(report.total.registered, 13);
        assert_eq!(report.total.unregistered, 4);
        assert_eq!(report.total.monthly_installation, Installation::new(13, 9));
    }

    #[test]
    fn test_balance_group_report_covers_every_group() {
        let ledger = seeded();
        let report = ledger.balance_group_report(1, date(2025, 3, 31)).unwrap();

        assert_eq!(report.rows.len(), BalanceGroup::ALL.len());
        assert_eq!(report.total.registered, 18);
        assert_eq!(report.total.yearly_installation, Installation::new(20, 18));

        let legal = report
            .rows
            .iter()
            .find(|row| row.balance_group == BalanceGroup::LegalEntity)
            .unwrap();
        assert_eq!(legal.totals.registered, 6);
    }

    #[test]
    fn test_period_report_isolates_the_month() {
        let ledger = seeded();
        let march = ledger.month_report(BalanceGroup::Private, &[1], "2025-03").unwrap();
        assert_eq!(march.rows[0].totals.registered, 8);
        assert_eq!(march.rows[0].totals.yearly_installation, Installation::new(10, 8));

        let both = ledger
            .month_report(BalanceGroup::Private, &[1], "2025-02:2025-03")
            .unwrap();
        assert_eq!(both.rows[0].totals.registered, 12);
    }

    #[test]
    fn test_reports_are_cached_until_a_write_lands() {
        let ledger = seeded();
        let first = ledger
            .substation_report(BalanceGroup::Private, &[1], date(2025, 3, 31))
            .unwrap();
        assert_eq!(ledger.cache().len(), 1);

        let cached = ledger
            .substation_report(BalanceGroup::Private, &[1], date(2025, 3, 31))
            .unwrap();
        assert_eq!(first, cached);

        submit(&ledger, BalanceGroup::Private, 1, date(2025, 3, 20), 2, 2);
        assert!(ledger.cache().is_empty());

        let fresh = ledger
            .substation_report(BalanceGroup::Private, &[1], date(2025, 3, 31))
            .unwrap();
        assert_eq!(fresh.total.registered, first.total.registered + 2);
    }
}
