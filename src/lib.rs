//! # Meter Ledger
//!
//! A ledger of meter counts per substation and balance group, kept as cumulative time series
//! that accept late, out-of-order submissions.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: the cumulative value of one series as of one date
//! - **Dimension key**: balance group and substation, plus the year (and month) for the
//!   installation series
//! - **Retroactive accumulation**: a submission dated before existing snapshots is merged at its
//!   own date and shifts every later snapshot of the same dimension by the same delta
//! - **Atomic submissions**: one submission updates all four series and appends an audit entry in
//!   a single transaction, or changes nothing
//! - **Registered ≤ total**: enforced on every installation snapshot a write touches
//!
//! ## Example
//!
//! ```rust,ignore
//! use meter_ledger::*;
//! use chrono::NaiveDate;
//!
//! let ledger = Ledger::in_memory(&LedgerConfig::default())?;
//!
//! ledger.submit(&Submission {
//!     balance_group: BalanceGroup::Private,
//!     substation_id: 1,
//!     date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
//!     total_count: 10,
//!     registered_count: 8,
//! })?;
//!
//! // A late entry for an earlier date is propagated forward.
//! ledger.submit(&Submission {
//!     balance_group: BalanceGroup::Private,
//!     substation_id: 1,
//!     date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
//!     total_count: 5,
//!     registered_count: 5,
//! })?;
//!
//! let key = DimensionKey::substation(BalanceGroup::Private, 1);
//! let registered = ledger.as_of(REGISTERED, &key, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())?;
//! assert_eq!(registered, 13);
//!
//! let report = ledger.month_report(BalanceGroup::Private, &[1, 2], "2025-03")?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod accumulator;
pub mod aggregator;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod query;
pub mod schema;
pub mod series;
pub mod store;
pub mod utils;
pub mod validator;

#[cfg(feature = "async")]
pub mod service;

pub use accumulator::{accumulate, Accumulation};
pub use aggregator::{
    totals_as_of, totals_for_period, BalanceGroupReport, BalanceGroupRow, PeriodReport,
    SeriesTotals, SubstationReport, SubstationRow,
};
pub use cache::{CachedReport, ReportCache, ReportKey};
pub use config::LedgerConfig;
pub use coordinator::{CorrectionOutcome, Ledger, SubmissionReceipt};
pub use error::{LedgerError, Result};
pub use schema::*;
pub use series::{
    Installation, Series, SeriesValue, StoredValue, MONTHLY_INSTALLATION, REGISTERED,
    UNREGISTERED, YEARLY_INSTALLATION,
};
pub use store::{LedgerStore, MemoryStore, StoreTransaction};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use utils::*;
pub use validator::{InvariantValidator, SeriesInvariant, VerificationResult};

#[cfg(feature = "async")]
pub use service::AsyncLedger;
