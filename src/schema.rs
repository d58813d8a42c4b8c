use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type SubstationId = i64;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "PascalCase")]
pub enum BalanceGroup {
    #[schemars(description = "Meters of private households")]
    Private,

    #[schemars(description = "Meters of legal entities")]
    LegalEntity,

    #[schemars(description = "Technical metering points of legal entities")]
    LegalEntityTechnical,

    #[schemars(description = "Bulk metering of residential buildings")]
    BulkMeteringResidential,

    #[schemars(description = "Bulk metering of commercial buildings")]
    BulkMeteringCommercial,
}

impl BalanceGroup {
    pub const ALL: [BalanceGroup; 5] = [
        BalanceGroup::Private,
        BalanceGroup::LegalEntity,
        BalanceGroup::LegalEntityTechnical,
        BalanceGroup::BulkMeteringResidential,
        BalanceGroup::BulkMeteringCommercial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "Private",
            Self::LegalEntity => "LegalEntity",
            Self::LegalEntityTechnical => "LegalEntityTechnical",
            Self::BulkMeteringResidential => "BulkMeteringResidential",
            Self::BulkMeteringCommercial => "BulkMeteringCommercial",
        }
    }
}

impl fmt::Display for BalanceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceGroup {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|group| group.as_str() == s)
            .ok_or_else(|| LedgerError::invalid("balance_group", format!("unknown balance group '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum SeriesKind {
    /// Meters registered in the metering system, per substation.
    Registered,
    /// Installed meters not yet registered, per substation.
    Unregistered,
    /// Installation totals for one calendar year.
    YearlyInstallation,
    /// Installation totals for one calendar month.
    MonthlyInstallation,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 4] = [
        SeriesKind::Registered,
        SeriesKind::Unregistered,
        SeriesKind::YearlyInstallation,
        SeriesKind::MonthlyInstallation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "Registered",
            Self::Unregistered => "Unregistered",
            Self::YearlyInstallation => "YearlyInstallation",
            Self::MonthlyInstallation => "MonthlyInstallation",
        }
    }

    pub fn is_installation(&self) -> bool {
        matches!(self, Self::YearlyInstallation | Self::MonthlyInstallation)
    }

    /// Builds the dimension key this series uses for an observation on `date`.
    pub fn key_for(&self, balance_group: BalanceGroup, substation_id: SubstationId, date: NaiveDate) -> DimensionKey {
        match self {
            Self::Registered | Self::Unregistered => DimensionKey::substation(balance_group, substation_id),
            Self::YearlyInstallation => DimensionKey::yearly(balance_group, substation_id, date.year()),
            Self::MonthlyInstallation => {
                DimensionKey::monthly(balance_group, substation_id, date.year(), date.month())
            }
        }
    }

    /// Rejects keys whose year/month shape does not belong to this series.
    pub fn validate_key(&self, key: &DimensionKey) -> Result<()> {
        let malformed = |details: &str| LedgerError::MalformedKey {
            kind: *self,
            details: format!("{} ({})", details, key),
        };

        // Year 0 is the storage placeholder for "no year".
        if key.year == Some(0) {
            return Err(malformed("year 0 is not supported"));
        }

        match (self, key.year, key.month) {
            (Self::Registered | Self::Unregistered, None, None) => Ok(()),
            (Self::Registered | Self::Unregistered, _, _) => {
                Err(malformed("substation series take no year or month"))
            }
            (Self::YearlyInstallation, Some(_), None) => Ok(()),
            (Self::YearlyInstallation, _, _) => Err(malformed("yearly series need a year and no month")),
            (Self::MonthlyInstallation, Some(_), Some(month)) if (1..=12).contains(&month) => Ok(()),
            (Self::MonthlyInstallation, Some(_), Some(_)) => Err(malformed("month must be between 1 and 12")),
            (Self::MonthlyInstallation, _, _) => Err(malformed("monthly series need a year and a month")),
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LedgerError::Storage(format!("unknown series kind '{}'", s)))
    }
}

/// Identifies one independent cumulative series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DimensionKey {
    pub balance_group: BalanceGroup,
    pub substation_id: SubstationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
}

impl DimensionKey {
    pub fn substation(balance_group: BalanceGroup, substation_id: SubstationId) -> Self {
        Self {
            balance_group,
            substation_id,
            year: None,
            month: None,
        }
    }

    pub fn yearly(balance_group: BalanceGroup, substation_id: SubstationId, year: i32) -> Self {
        Self {
            year: Some(year),
            ..Self::substation(balance_group, substation_id)
        }
    }

    pub fn monthly(balance_group: BalanceGroup, substation_id: SubstationId, year: i32, month: u32) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            ..Self::substation(balance_group, substation_id)
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/substation {}", self.balance_group, self.substation_id)?;
        match (self.year, self.month) {
            (Some(year), Some(month)) => write!(f, "/{:04}-{:02}", year, month),
            (Some(year), None) => write!(f, "/{:04}", year),
            (None, Some(month)) => write!(f, "/month {}", month),
            (None, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct SnapshotId(pub i64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cumulative value of one series as of `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<V> {
    pub id: SnapshotId,
    pub key: DimensionKey,
    pub date: NaiveDate,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<V> Snapshot<V> {
    pub fn map_value<W>(self, f: impl FnOnce(V) -> W) -> Snapshot<W> {
        Snapshot {
            id: self.id,
            key: self.key,
            date: self.date,
            value: f(self.value),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub substation_id: SubstationId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Submission {
    #[schemars(description = "Balance group the counted meters belong to")]
    pub balance_group: BalanceGroup,

    #[schemars(description = "Identifier of the substation, as listed in the substation directory")]
    pub substation_id: SubstationId,

    #[schemars(
        description = "Date in YYYY-MM-DD format the counts were observed on. May be earlier than already recorded dates."
    )]
    pub date: NaiveDate,

    #[schemars(description = "Number of meters installed. Must be zero or positive.")]
    pub total_count: i64,

    #[schemars(
        description = "Number of the installed meters that are registered in the metering system. Must not exceed total_count."
    )]
    pub registered_count: i64,
}

impl Submission {
    pub fn validate(&self) -> Result<()> {
        if self.total_count < 0 {
            return Err(LedgerError::invalid(
                "total_count",
                format!("must be zero or positive, got {}", self.total_count),
            ));
        }
        if self.registered_count < 0 {
            return Err(LedgerError::invalid(
                "registered_count",
                format!("must be zero or positive, got {}", self.registered_count),
            ));
        }
        if self.date.year() == 0 {
            return Err(LedgerError::invalid("date", "year 0 is not supported"));
        }
        if self.registered_count > self.total_count {
            return Err(LedgerError::invalid(
                "registered_count",
                format!(
                    "registered count {} exceeds total count {}",
                    self.registered_count, self.total_count
                ),
            ));
        }
        Ok(())
    }

    pub fn unregistered_count(&self) -> i64 {
        self.total_count - self.registered_count
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Submission)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(total_count: i64, registered_count: i64) -> Submission {
        Submission {
            balance_group: BalanceGroup::Private,
            substation_id: 1,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            total_count,
            registered_count,
        }
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = Submission::schema_as_json().unwrap();
        assert!(schema_json.contains("balance_group"));
        assert!(schema_json.contains("registered_count"));
        assert!(schema_json.contains("BulkMeteringCommercial"));
    }

    #[test]
    fn test_submission_validation() {
        assert!(submission(10, 8).validate().is_ok());
        assert!(submission(0, 0).validate().is_ok());

        match submission(10, 12).validate() {
            Err(LedgerError::InvalidSubmission { field, .. }) => assert_eq!(field, "registered_count"),
            other => panic!("expected registered_count rejection, got {:?}", other),
        }
        match submission(-1, 0).validate() {
            Err(LedgerError::InvalidSubmission { field, .. }) => assert_eq!(field, "total_count"),
            other => panic!("expected total_count rejection, got {:?}", other),
        }

        let mut year_zero = submission(1, 1);
        year_zero.date = NaiveDate::from_ymd_opt(0, 6, 1).unwrap();
        match year_zero.validate() {
            Err(LedgerError::InvalidSubmission { field, .. }) => assert_eq!(field, "date"),
            other => panic!("expected date rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_key_for_kind() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let group = BalanceGroup::LegalEntity;

        let key = SeriesKind::Registered.key_for(group, 4, date);
        assert_eq!(key, DimensionKey::substation(group, 4));

        let key = SeriesKind::YearlyInstallation.key_for(group, 4, date);
        assert_eq!(key, DimensionKey::yearly(group, 4, 2025));

        let key = SeriesKind::MonthlyInstallation.key_for(group, 4, date);
        assert_eq!(key, DimensionKey::monthly(group, 4, 2025, 3));

        for kind in SeriesKind::ALL {
            assert!(kind.validate_key(&kind.key_for(group, 4, date)).is_ok());
        }
    }

    #[test]
    fn test_malformed_keys_rejected() {
        let group = BalanceGroup::Private;
        assert!(SeriesKind::Registered
            .validate_key(&DimensionKey::yearly(group, 1, 2025))
            .is_err());
        assert!(SeriesKind::YearlyInstallation
            .validate_key(&DimensionKey::monthly(group, 1, 2025, 2))
            .is_err());
        assert!(SeriesKind::MonthlyInstallation
            .validate_key(&DimensionKey::monthly(group, 1, 2025, 13))
            .is_err());
        assert!(SeriesKind::MonthlyInstallation
            .validate_key(&DimensionKey::substation(group, 1))
            .is_err());
        assert!(SeriesKind::YearlyInstallation
            .validate_key(&DimensionKey::yearly(group, 1, 0))
            .is_err());
        assert!(SeriesKind::MonthlyInstallation
            .validate_key(&DimensionKey::monthly(group, 1, 0, 6))
            .is_err());
    }

    #[test]
    fn test_enum_round_trip_through_strings() {
        for group in BalanceGroup::ALL {
            assert_eq!(group.as_str().parse::<BalanceGroup>().unwrap(), group);
        }
        for kind in SeriesKind::ALL {
            assert_eq!(kind.as_str().parse::<SeriesKind>().unwrap(), kind);
        }
        assert!("Corporate".parse::<BalanceGroup>().is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&submission(10, 8)).unwrap();
        assert!(json.contains("\"Private\""));
        assert!(json.contains("\"2025-03-10\""));

        let deserialized: Submission = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, submission(10, 8));
    }
}
