use crate::schema::{DimensionKey, SeriesKind, SnapshotId};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid submission field '{field}': {details}")]
    InvalidSubmission { field: String, details: String },

    #[error("Malformed dimension key for {kind} series: {details}")]
    MalformedKey { kind: SeriesKind, details: String },

    #[error("Invariant violation in {kind} snapshot #{snapshot_id} ({key} on {date}): registered count {registered_count} exceeds total installed {total_installed}")]
    InvariantViolation {
        snapshot_id: SnapshotId,
        kind: SeriesKind,
        key: DimensionKey,
        date: NaiveDate,
        registered_count: i64,
        total_installed: i64,
    },

    #[error("Count overflow in {kind} series {key} on {date}")]
    CountOverflow {
        kind: SeriesKind,
        key: DimensionKey,
        date: NaiveDate,
    },

    #[error("Report totals overflow: {0}")]
    ReportOverflow(String),

    #[error("No {kind} snapshot with id #{id}")]
    SnapshotNotFound { kind: SeriesKind, id: SnapshotId },

    #[error("Stored value of {kind} snapshot #{id} does not match the series shape")]
    CorruptValue { kind: SeriesKind, id: SnapshotId },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "async")]
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl LedgerError {
    /// Rejections caused by the submitted data. The transaction never commits.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidSubmission { .. }
                | Self::MalformedKey { .. }
                | Self::InvariantViolation { .. }
                | Self::CountOverflow { .. }
                | Self::ReportOverflow(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SnapshotNotFound { .. })
    }

    /// Storage-side failures, surfaced as-is for the caller to resubmit.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Storage(_) | Self::CorruptValue { .. } | Self::IoError(_) => true,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => true,
            #[cfg(feature = "async")]
            Self::TaskFailed(_) => true,
            _ => false,
        }
    }

    pub(crate) fn invalid(field: &str, details: impl Into<String>) -> Self {
        Self::InvalidSubmission {
            field: field.to_string(),
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
