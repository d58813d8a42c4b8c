//! Async facade over [`Ledger`]. Each call runs the synchronous engine on tokio's blocking pool.

use crate::aggregator::SubstationReport;
use crate::coordinator::{CorrectionOutcome, Ledger, SubmissionReceipt};
use crate::error::{LedgerError, Result};
use crate::schema::{AuditEntry, BalanceGroup, DimensionKey, SnapshotId, Submission, SubstationId};
use crate::series::{Series, SeriesValue};
use crate::store::LedgerStore;
use crate::validator::SeriesInvariant;
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::sync::Arc;

pub struct AsyncLedger<S: LedgerStore> {
    inner: Arc<Ledger<S>>,
}

impl<S: LedgerStore> Clone for AsyncLedger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: LedgerStore + 'static> AsyncLedger<S> {
    pub fn new(ledger: Ledger<S>) -> Self {
        Self {
            inner: Arc::new(ledger),
        }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.inner
    }

    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Ledger<S>) -> Result<R> + Send + 'static,
    {
        let ledger = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&*ledger))
            .await
            .map_err(|e| LedgerError::TaskFailed(e.to_string()))?
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt> {
        self.run(move |ledger| ledger.submit(&submission)).await
    }

    pub async fn correct<V: SeriesInvariant>(
        &self,
        series: Series<V>,
        id: SnapshotId,
        value: V,
    ) -> Result<CorrectionOutcome<V>> {
        self.run(move |ledger| ledger.correct(series, id, value)).await
    }

    pub async fn as_of<V: SeriesValue>(&self, series: Series<V>, key: DimensionKey, date: NaiveDate) -> Result<V> {
        self.run(move |ledger| ledger.as_of(series, &key, date)).await
    }

    pub async fn audit_log(&self, substation_id: Option<SubstationId>) -> Result<Vec<AuditEntry>> {
        self.run(move |ledger| ledger.audit_log(substation_id)).await
    }

    pub async fn substation_report(
        &self,
        balance_group: BalanceGroup,
        substations: Vec<SubstationId>,
        date: NaiveDate,
    ) -> Result<SubstationReport> {
        self.run(move |ledger| ledger.substation_report(balance_group, &substations, date))
            .await
    }

    /// One substation report per date, built concurrently. Fails with the first error.
    pub async fn substation_reports(
        &self,
        balance_group: BalanceGroup,
        substations: Vec<SubstationId>,
        dates: &[NaiveDate],
    ) -> Result<Vec<SubstationReport>> {
        let reports = dates
            .iter()
            .map(|&date| self.substation_report(balance_group, substations.clone(), date));
        try_join_all(reports).await
    }
}
