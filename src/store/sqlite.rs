//! SQLite backend.
//!
//! All four series share one table; the year/month columns hold 0 for series that are not
//! keyed by them so the natural key stays unique; year 0 is rejected at validation. Write
//! transactions are opened with `BEGIN IMMEDIATE`, which takes the write lock up front and
//! serializes concurrent writers. Read transactions use a deferred `BEGIN` and never take it.

use crate::error::{LedgerError, Result};
use crate::schema::{
    AuditEntry, BalanceGroup, DimensionKey, SeriesKind, SnapshotId, Snapshot, SubstationId,
};
use crate::series::{Installation, StoredValue};
use crate::store::{LedgerStore, StoreTransaction};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;
const DATE_FORMAT: &str = "%Y-%m-%d";

const SNAPSHOT_COLUMNS: &str = "id, kind, balance_group, substation_id, year, month, date, \
                                value, registered_count, created_at, updated_at";

pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let connection = Connection::open(path)?;
        connection.busy_timeout(busy_timeout)?;
        connection.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrate(&connection)?;
        info!("Opened meter ledger database at {}", path.display());

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Opens a private in-memory database (used in tests).
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        migrate(&connection)?;

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

fn migrate(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);

         CREATE TABLE IF NOT EXISTS series_snapshots (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             kind TEXT NOT NULL,
             balance_group TEXT NOT NULL,
             substation_id INTEGER NOT NULL,
             year INTEGER NOT NULL DEFAULT 0,
             month INTEGER NOT NULL DEFAULT 0,
             date TEXT NOT NULL,
             value INTEGER NOT NULL,
             registered_count INTEGER,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             UNIQUE (kind, balance_group, substation_id, year, month, date)
         );

         CREATE TABLE IF NOT EXISTS audit_log (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             substation_id INTEGER NOT NULL,
             message TEXT NOT NULL,
             created_at TEXT NOT NULL
         );

         CREATE INDEX IF NOT EXISTS idx_audit_log_substation ON audit_log (substation_id, id);",
    )?;

    let version: Option<i64> = connection
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;

    match version {
        None => {
            connection.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(LedgerError::Storage(format!(
                "unsupported ledger schema version {} (expected {})",
                other, SCHEMA_VERSION
            )));
        }
    }

    Ok(())
}

impl LedgerStore for SqliteStore {
    type Tx<'a> = SqliteTransaction<'a>;

    fn begin(&self) -> Result<SqliteTransaction<'_>> {
        self.start("BEGIN IMMEDIATE")
    }

    fn begin_read(&self) -> Result<SqliteTransaction<'_>> {
        self.start("BEGIN")
    }
}

impl SqliteStore {
    fn start(&self, statement: &str) -> Result<SqliteTransaction<'_>> {
        // A panicked holder rolled back in its transaction's drop.
        let connection = match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("SQLite connection lock poisoned by a panicked writer, recovering");
                self.connection.clear_poison();
                poisoned.into_inner()
            }
        };
        connection.execute_batch(statement)?;

        Ok(SqliteTransaction {
            connection,
            finished: false,
        })
    }
}

pub struct SqliteTransaction<'a> {
    connection: MutexGuard<'a, Connection>,
    finished: bool,
}

/// Columns as read, before they are checked and converted.
struct RawSnapshot {
    id: i64,
    kind: String,
    balance_group: String,
    substation_id: i64,
    year: i64,
    month: i64,
    date: String,
    value: i64,
    registered_count: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl RawSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            balance_group: row.get(2)?,
            substation_id: row.get(3)?,
            year: row.get(4)?,
            month: row.get(5)?,
            date: row.get(6)?,
            value: row.get(7)?,
            registered_count: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_snapshot(self) -> Result<Snapshot<StoredValue>> {
        let kind: SeriesKind = self.kind.parse()?;
        let id = SnapshotId(self.id);
        let balance_group: BalanceGroup = self
            .balance_group
            .parse()
            .map_err(|_| LedgerError::Storage(format!("unknown balance group '{}'", self.balance_group)))?;

        let value = if kind.is_installation() {
            let registered_count = self
                .registered_count
                .ok_or(LedgerError::CorruptValue { kind, id })?;
            StoredValue::Installation(Installation::new(self.value, registered_count))
        } else {
            StoredValue::Count { value: self.value }
        };

        let month = match self.month {
            0 => None,
            m => Some(u32::try_from(m).map_err(|_| LedgerError::CorruptValue { kind, id })?),
        };
        let year = match self.year {
            0 => None,
            y => Some(i32::try_from(y).map_err(|_| LedgerError::CorruptValue { kind, id })?),
        };

        Ok(Snapshot {
            id,
            key: DimensionKey {
                balance_group,
                substation_id: self.substation_id,
                year,
                month,
            },
            date: parse_date(&self.date)?,
            value,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| LedgerError::Storage(format!("invalid stored date '{}': {}", text, e)))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("invalid stored timestamp '{}': {}", text, e)))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn key_columns(key: &DimensionKey) -> (i64, i64) {
    (
        key.year.map(i64::from).unwrap_or(0),
        key.month.map(i64::from).unwrap_or(0),
    )
}

fn value_columns(value: StoredValue) -> (i64, Option<i64>) {
    match value {
        StoredValue::Count { value } => (value, None),
        StoredValue::Installation(installation) => {
            (installation.total_installed, Some(installation.registered_count))
        }
    }
}

impl SqliteTransaction<'_> {
    fn query_snapshots(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Snapshot<StoredValue>>> {
        let mut stmt = self.connection.prepare(sql)?;
        let raw = stmt
            .query_map(args, RawSnapshot::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawSnapshot::into_snapshot).collect()
    }

    fn query_snapshot(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<Snapshot<StoredValue>>> {
        let raw = self
            .connection
            .query_row(sql, args, RawSnapshot::from_row)
            .optional()?;
        raw.map(RawSnapshot::into_snapshot).transpose()
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn get(&mut self, kind: SeriesKind, key: &DimensionKey, date: NaiveDate) -> Result<Option<Snapshot<StoredValue>>> {
        let (year, month) = key_columns(key);
        let sql = format!(
            "SELECT {} FROM series_snapshots
             WHERE kind = ?1 AND balance_group = ?2 AND substation_id = ?3
               AND year = ?4 AND month = ?5 AND date = ?6",
            SNAPSHOT_COLUMNS
        );
        self.query_snapshot(
            &sql,
            params![
                kind.as_str(),
                key.balance_group.as_str(),
                key.substation_id,
                year,
                month,
                format_date(date)
            ],
        )
    }

    fn get_by_id(&mut self, kind: SeriesKind, id: SnapshotId) -> Result<Option<Snapshot<StoredValue>>> {
        let sql = format!(
            "SELECT {} FROM series_snapshots WHERE id = ?1 AND kind = ?2",
            SNAPSHOT_COLUMNS
        );
        self.query_snapshot(&sql, params![id.0, kind.as_str()])
    }

    fn upsert(
        &mut self,
        kind: SeriesKind,
        key: &DimensionKey,
        date: NaiveDate,
        value: StoredValue,
    ) -> Result<Snapshot<StoredValue>> {
        let (year, month) = key_columns(key);
        let (amount, registered_count) = value_columns(value);
        let now = Utc::now().to_rfc3339();

        self.connection.execute(
            "INSERT INTO series_snapshots
                 (kind, balance_group, substation_id, year, month, date,
                  value, registered_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (kind, balance_group, substation_id, year, month, date)
             DO UPDATE SET value = excluded.value,
                           registered_count = excluded.registered_count,
                           updated_at = excluded.updated_at",
            params![
                kind.as_str(),
                key.balance_group.as_str(),
                key.substation_id,
                year,
                month,
                format_date(date),
                amount,
                registered_count,
                now
            ],
        )?;

        self.get(kind, key, date)?
            .ok_or_else(|| LedgerError::Storage(format!("upserted {} snapshot for {} on {} vanished", kind, key, date)))
    }

    fn list_after(&mut self, kind: SeriesKind, key: &DimensionKey, date: NaiveDate) -> Result<Vec<Snapshot<StoredValue>>> {
        let (year, month) = key_columns(key);
        let sql = format!(
            "SELECT {} FROM series_snapshots
             WHERE kind = ?1 AND balance_group = ?2 AND substation_id = ?3
               AND year = ?4 AND month = ?5 AND date > ?6
             ORDER BY date ASC",
            SNAPSHOT_COLUMNS
        );
        self.query_snapshots(
            &sql,
            params![
                kind.as_str(),
                key.balance_group.as_str(),
                key.substation_id,
                year,
                month,
                format_date(date)
            ],
        )
    }

    fn latest_before(
        &mut self,
        kind: SeriesKind,
        key: &DimensionKey,
        date: NaiveDate,
        inclusive: bool,
    ) -> Result<Option<Snapshot<StoredValue>>> {
        let (year, month) = key_columns(key);
        let comparison = if inclusive { "<=" } else { "<" };
        let sql = format!(
            "SELECT {} FROM series_snapshots
             WHERE kind = ?1 AND balance_group = ?2 AND substation_id = ?3
               AND year = ?4 AND month = ?5 AND date {} ?6
             ORDER BY date DESC LIMIT 1",
            SNAPSHOT_COLUMNS, comparison
        );
        self.query_snapshot(
            &sql,
            params![
                kind.as_str(),
                key.balance_group.as_str(),
                key.substation_id,
                year,
                month,
                format_date(date)
            ],
        )
    }

    fn history(&mut self, kind: SeriesKind, key: &DimensionKey) -> Result<Vec<Snapshot<StoredValue>>> {
        let (year, month) = key_columns(key);
        let sql = format!(
            "SELECT {} FROM series_snapshots
             WHERE kind = ?1 AND balance_group = ?2 AND substation_id = ?3
               AND year = ?4 AND month = ?5
             ORDER BY date ASC",
            SNAPSHOT_COLUMNS
        );
        self.query_snapshots(
            &sql,
            params![
                kind.as_str(),
                key.balance_group.as_str(),
                key.substation_id,
                year,
                month
            ],
        )
    }

    fn append_audit(&mut self, substation_id: SubstationId, message: &str) -> Result<AuditEntry> {
        let created_at = Utc::now();
        self.connection.execute(
            "INSERT INTO audit_log (substation_id, message, created_at) VALUES (?1, ?2, ?3)",
            params![substation_id, message, created_at.to_rfc3339()],
        )?;

        Ok(AuditEntry {
            id: self.connection.last_insert_rowid(),
            substation_id,
            message: message.to_string(),
            created_at,
        })
    }

    fn audit_entries(&mut self, substation_id: Option<SubstationId>) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, substation_id, message, created_at FROM audit_log
             WHERE ?1 IS NULL OR substation_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![substation_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, substation_id, message, created_at)| {
                Ok(AuditEntry {
                    id,
                    substation_id,
                    message,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    fn commit(mut self) -> Result<()> {
        self.connection.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.connection.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.connection.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned sqlite transaction: {}", e);
            }
        }
    }
}
