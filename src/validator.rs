use crate::accumulator::Accumulation;
use crate::error::{LedgerError, Result};
use crate::schema::{SeriesKind, Snapshot};
use crate::series::{Installation, SeriesValue};
use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationResult {
    /// Advisory findings that did not block the write.
    pub warnings: Vec<String>,
}

/// Per-shape invariant applied to every snapshot a write touched.
pub trait SeriesInvariant: SeriesValue {
    fn check(kind: SeriesKind, snapshot: &Snapshot<Self>, result: &mut VerificationResult) -> Result<()>;
}

impl SeriesInvariant for i64 {
    fn check(kind: SeriesKind, snapshot: &Snapshot<Self>, result: &mut VerificationResult) -> Result<()> {
        if snapshot.value < 0 {
            let warning = format!(
                "{} snapshot #{} ({} on {}) is negative: {}",
                kind, snapshot.id, snapshot.key, snapshot.date, snapshot.value
            );
            warn!("{}", warning);
            result.warnings.push(warning);
        }
        Ok(())
    }
}

impl SeriesInvariant for Installation {
    fn check(kind: SeriesKind, snapshot: &Snapshot<Self>, _result: &mut VerificationResult) -> Result<()> {
        if snapshot.value.is_consistent() {
            return Ok(());
        }

        Err(LedgerError::InvariantViolation {
            snapshot_id: snapshot.id,
            kind,
            key: snapshot.key,
            date: snapshot.date,
            registered_count: snapshot.value.registered_count,
            total_installed: snapshot.value.total_installed,
        })
    }
}

/// Checks the snapshots touched by one transaction before it commits. The first hard
/// violation is returned as an error; advisory findings are collected.
#[derive(Debug, Default)]
pub struct InvariantValidator {
    result: VerificationResult,
}

impl InvariantValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check<V: SeriesInvariant>(&mut self, accumulation: &Accumulation<V>) -> Result<()> {
        for snapshot in accumulation.touched() {
            V::check(accumulation.kind, snapshot, &mut self.result)?;
        }
        Ok(())
    }

    pub fn finish(self) -> VerificationResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BalanceGroup, DimensionKey, SnapshotId};
    use chrono::{NaiveDate, Utc};

    fn snapshot<V>(id: i64, value: V) -> Snapshot<V> {
        Snapshot {
            id: SnapshotId(id),
            key: DimensionKey::monthly(BalanceGroup::Private, 1, 2025, 3),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            value,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_offending_snapshot_is_named() {
        let accumulation = Accumulation {
            kind: SeriesKind::MonthlyInstallation,
            anchor: Some(snapshot(1, Installation::new(10, 8))),
            propagated: vec![
                snapshot(2, Installation::new(4, 6)),
                snapshot(3, Installation::new(1, 9)),
            ],
        };

        let mut validator = InvariantValidator::new();
        match validator.check(&accumulation) {
            Err(LedgerError::InvariantViolation {
                snapshot_id,
                registered_count,
                total_installed,
                ..
            }) => {
                assert_eq!(snapshot_id, SnapshotId(2));
                assert_eq!(registered_count, 6);
                assert_eq!(total_installed, 4);
            }
            other => panic!("expected invariant violation, got {:?}", other),
        }
    }

    #[test]
    fn test_equal_counts_are_consistent() {
        let accumulation = Accumulation {
            kind: SeriesKind::YearlyInstallation,
            anchor: Some(snapshot(1, Installation::new(5, 5))),
            propagated: vec![],
        };
        let mut validator = InvariantValidator::new();
        assert!(validator.check(&accumulation).is_ok());
    }

    #[test]
    fn test_negative_counts_are_advisory() {
        let accumulation = Accumulation {
            kind: SeriesKind::Unregistered,
            anchor: Some(snapshot(1, -3i64)),
            propagated: vec![snapshot(2, 4i64)],
        };

        let mut validator = InvariantValidator::new();
        assert!(validator.check(&accumulation).is_ok());
        let result = validator.finish();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("#1"));
    }
}
