use crate::accumulator::{accumulate, Accumulation};
use crate::cache::ReportCache;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::schema::{AuditEntry, SeriesKind, SnapshotId, Snapshot, Submission, SubstationId};
use crate::series::{
    Installation, Series, MONTHLY_INSTALLATION, REGISTERED, UNREGISTERED, YEARLY_INSTALLATION,
};
use crate::store::{LedgerStore, MemoryStore, StoreTransaction};
use crate::validator::{InvariantValidator, SeriesInvariant};
use log::{debug, info, warn};
use serde::Serialize;

/// Everything one accepted submission wrote.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub audit_entry: AuditEntry,
    pub registered: Vec<Snapshot<i64>>,
    pub unregistered: Vec<Snapshot<i64>>,
    pub yearly_installation: Vec<Snapshot<Installation>>,
    pub monthly_installation: Vec<Snapshot<Installation>>,
    /// Later-dated snapshots shifted by forward propagation, across all four series.
    pub propagated: usize,
    /// Advisory findings from validation.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CorrectionOutcome<V> {
    /// The snapshot already holds the requested value; nothing was written.
    Unchanged { snapshot: Snapshot<V> },
    Applied {
        delta: V,
        touched: Vec<Snapshot<V>>,
        audit_entry: AuditEntry,
    },
}

/// Runs submissions and corrections as single transactions against a [`LedgerStore`] and
/// serves the read paths built on top of it.
pub struct Ledger<S: LedgerStore> {
    store: S,
    cache: ReportCache,
}

impl Ledger<MemoryStore> {
    pub fn in_memory(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(MemoryStore::new(), config))
    }
}

#[cfg(feature = "sqlite")]
impl Ledger<crate::store::SqliteStore> {
    /// Opens the database named by `database_path`, or a private in-memory database when unset.
    pub fn open_sqlite(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.database_path {
            Some(path) => crate::store::SqliteStore::open(path, config.busy_timeout())?,
            None => crate::store::SqliteStore::open_in_memory()?,
        };
        Ok(Self::new(store, config))
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            cache: ReportCache::new(config.report_cache_capacity),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn cache(&self) -> &ReportCache {
        &self.cache
    }

    /// Runs `f` in its own transaction, committing on success and rolling back on error.
    pub(crate) fn transact<'s, R>(&'s self, f: impl FnOnce(&mut S::Tx<'s>) -> Result<R>) -> Result<R> {
        finish(self.store.begin()?, f)
    }

    pub(crate) fn read<'s, R>(&'s self, f: impl FnOnce(&mut S::Tx<'s>) -> Result<R>) -> Result<R> {
        finish(self.store.begin_read()?, f)
    }


    /// Merges one data-entry submission into all four series and appends its audit entry,
    /// atomically.
    pub fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt> {
        if let Err(e) = submission.validate() {
            warn!(
                "Rejected submission for {} substation {} on {}: {}",
                submission.balance_group, submission.substation_id, submission.date, e
            );
            return Err(e);
        }

        let receipt = self
            .transact(|tx| apply_submission(tx, submission))
            .map_err(|e| {
                warn!(
                    "Submission for {} substation {} on {} rolled back: {}",
                    submission.balance_group, submission.substation_id, submission.date, e
                );
                e
            })?;

        self.cache
            .invalidate(submission.balance_group, submission.substation_id, submission.date);
        info!(
            "Accepted submission #{} for {} substation {} on {} ({} snapshots shifted)",
            receipt.audit_entry.id,
            submission.balance_group,
            submission.substation_id,
            submission.date,
            receipt.propagated
        );

        Ok(receipt)
    }

    /// Sets the snapshot `id` to `value` as of its own date. The difference is propagated to
    /// every later snapshot of the same dimension.
    pub fn correct<V: SeriesInvariant>(
        &self,
        series: Series<V>,
        id: SnapshotId,
        value: V,
    ) -> Result<CorrectionOutcome<V>> {
        let outcome = self.transact(|tx| apply_correction(tx, series, id, value))?;

        if let CorrectionOutcome::Applied { touched, delta, .. } = &outcome {
            if let Some(first) = touched.first() {
                self.cache
                    .invalidate(first.key.balance_group, first.key.substation_id, first.date);
                info!(
                    "Corrected {} snapshot #{} by {} ({} snapshots touched)",
                    series.kind(),
                    id,
                    delta,
                    touched.len()
                );
            }
        } else {
            debug!("Correction of {} snapshot #{} left it unchanged", series.kind(), id);
        }

        Ok(outcome)
    }

    /// Audit entries in append order, optionally for one substation.
    pub fn audit_log(&self, substation_id: Option<SubstationId>) -> Result<Vec<AuditEntry>> {
        self.read(|tx| tx.audit_entries(substation_id))
    }
}

fn finish<T: StoreTransaction, R>(mut tx: T, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
    match f(&mut tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback() {
                warn!("Rollback failed after '{}': {}", e, rollback_error);
            }
            Err(e)
        }
    }
}

pub(crate) fn apply_submission<T: StoreTransaction>(
    tx: &mut T,
    submission: &Submission,
) -> Result<SubmissionReceipt> {
    let group = submission.balance_group;
    let substation_id = submission.substation_id;
    let date = submission.date;
    let installed = Installation::new(submission.total_count, submission.registered_count);

    let registered = accumulate(
        tx,
        REGISTERED,
        &SeriesKind::Registered.key_for(group, substation_id, date),
        date,
        submission.registered_count,
    )?;
    let unregistered = accumulate(
        tx,
        UNREGISTERED,
        &SeriesKind::Unregistered.key_for(group, substation_id, date),
        date,
        submission.unregistered_count(),
    )?;
    let yearly = accumulate(
        tx,
        YEARLY_INSTALLATION,
        &SeriesKind::YearlyInstallation.key_for(group, substation_id, date),
        date,
        installed,
    )?;
    let monthly = accumulate(
        tx,
        MONTHLY_INSTALLATION,
        &SeriesKind::MonthlyInstallation.key_for(group, substation_id, date),
        date,
        installed,
    )?;

    let mut validator = InvariantValidator::new();
    validator.check(&registered)?;
    validator.check(&unregistered)?;
    validator.check(&yearly)?;
    validator.check(&monthly)?;
    let verification = validator.finish();

    let audit_entry = tx.append_audit(substation_id, &submission_message(submission))?;
    let propagated = propagated_count(&registered)
        + propagated_count(&unregistered)
        + propagated_count(&yearly)
        + propagated_count(&monthly);

    Ok(SubmissionReceipt {
        audit_entry,
        registered: registered.into_touched(),
        unregistered: unregistered.into_touched(),
        yearly_installation: yearly.into_touched(),
        monthly_installation: monthly.into_touched(),
        propagated,
        warnings: verification.warnings,
    })
}

fn apply_correction<V: SeriesInvariant, T: StoreTransaction>(
    tx: &mut T,
    series: Series<V>,
    id: SnapshotId,
    value: V,
) -> Result<CorrectionOutcome<V>> {
    let existing = series
        .get_by_id(tx, id)?
        .ok_or(LedgerError::SnapshotNotFound { kind: series.kind(), id })?;

    let delta = value
        .checked_sub(existing.value)
        .ok_or(LedgerError::CountOverflow {
            kind: series.kind(),
            key: existing.key,
            date: existing.date,
        })?;
    if delta.is_zero() {
        return Ok(CorrectionOutcome::Unchanged { snapshot: existing });
    }

    let accumulation = accumulate(tx, series, &existing.key, existing.date, delta)?;
    let mut validator = InvariantValidator::new();
    validator.check(&accumulation)?;

    let message = format!(
        "Correction of {} snapshot #{} ({}) on {}: {} -> {}",
        series.kind(),
        id,
        existing.key,
        existing.date,
        existing.value,
        value
    );
    let audit_entry = tx.append_audit(existing.key.substation_id, &message)?;

    Ok(CorrectionOutcome::Applied {
        delta,
        touched: accumulation.into_touched(),
        audit_entry,
    })
}

fn submission_message(submission: &Submission) -> String {
    format!(
        "Submission for {} substation {} on {}: {} installed, {} registered, {} unregistered",
        submission.balance_group,
        submission.substation_id,
        submission.date,
        submission.total_count,
        submission.registered_count,
        submission.unregistered_count()
    )
}

fn propagated_count<V>(accumulation: &Accumulation<V>) -> usize {
    accumulation.propagated.len()
}
