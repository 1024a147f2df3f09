//! Durable SQLite engine.
//!
//! Conditional writes map directly onto single statements:
//! creation is `INSERT … ON CONFLICT(id) DO NOTHING`, update is
//! `UPDATE … WHERE id = ? AND lock = ?`, and a statement that touches no row
//! is the lock-conflict signal. Timestamps are stored as integer nanoseconds
//! so a replayed record is bit-identical to the one written.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};

use super::{GLOBAL_COUNTERS_ID, OperationStore};
use crate::error::StoreError;
use crate::lock::LockGenerator;
use crate::operation::{Counters, Operation, OperationStatus};

const CREATE_OPERATIONS: &str = "CREATE TABLE IF NOT EXISTS operations (
    id                 TEXT    PRIMARY KEY NOT NULL,
    lock               TEXT    NOT NULL,
    created_ns         INTEGER NOT NULL,
    updated_ns         INTEGER NOT NULL,
    before_ns          INTEGER,
    completed_ns       INTEGER,
    status             INTEGER NOT NULL,
    result             INTEGER NOT NULL,
    source_description TEXT    NOT NULL
)";

const CREATE_COUNTERS: &str = "CREATE TABLE IF NOT EXISTS counters (
    id    TEXT    NOT NULL,
    name  TEXT    NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (id, name)
)";

const INSERT_OPERATION: &str = "INSERT INTO operations
    (id, lock, created_ns, updated_ns, before_ns, completed_ns, status, result, source_description)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(id) DO NOTHING";

const UPDATE_OPERATION: &str = "UPDATE operations SET
    lock = ?2, created_ns = ?3, updated_ns = ?4, before_ns = ?5, completed_ns = ?6,
    status = ?7, result = ?8, source_description = ?9
    WHERE id = ?1 AND lock = ?10";

const SELECT_OPERATION: &str = "SELECT
    id, lock, created_ns, updated_ns, before_ns, completed_ns, status, result, source_description
    FROM operations WHERE id = ?1";

const INCREMENT_COUNTER: &str = "INSERT INTO counters (id, name, value) VALUES (?1, ?2, ?3)
    ON CONFLICT(id, name) DO UPDATE SET value = value + excluded.value";

const SELECT_COUNTERS: &str = "SELECT name, value FROM counters WHERE id = ?1";

/// SQLite-backed operation store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    locks: LockGenerator,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        debug!("opening operation store at {}", path.display());
        Self::connect(opts).await
    }

    /// Private in-memory database; gone when the store is dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn connect(opts: SqliteConnectOptions) -> Result<Self, StoreError> {
        // One long-lived connection: writers are serialised, and an in-memory
        // database lives exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self {
            pool,
            locks: LockGenerator::new(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Replace the lock generator (deterministic locks in tests).
    pub fn with_locks(mut self, locks: LockGenerator) -> Self {
        self.locks = locks;
        self
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_OPERATIONS).execute(&self.pool).await?;
        sqlx::query(CREATE_COUNTERS).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OperationStore for SqliteStore {
    async fn save(&self, op: &mut Operation) -> Result<(), StoreError> {
        let row = EncodedOperation::from_operation(op)?;
        let new_lock = self.locks.next_lock();

        let statement = if op.lock.is_empty() {
            INSERT_OPERATION
        } else {
            UPDATE_OPERATION
        };
        let mut query = sqlx::query(statement)
            .bind(&op.id)
            .bind(&new_lock)
            .bind(row.created_ns)
            .bind(row.updated_ns)
            .bind(row.before_ns)
            .bind(row.completed_ns)
            .bind(row.status)
            .bind(op.result)
            .bind(&op.source_description);
        if !op.lock.is_empty() {
            query = query.bind(&op.lock);
        }
        let affected = query.execute(&self.pool).await?.rows_affected();

        if affected == 1 {
            op.lock = new_lock;
            return Ok(());
        }

        // The reload is not atomic with the rejected write; the copy may
        // already reflect a later save.
        match self.load(&op.id).await? {
            Some(current) => {
                *op = current;
                Err(StoreError::LockConflict { id: op.id.clone() })
            }
            None => Err(StoreError::NotFound { id: op.id.clone() }),
        }
    }

    async fn load(&self, id: &str) -> Result<Option<Operation>, StoreError> {
        let row = sqlx::query(SELECT_OPERATION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_operation).transpose()
    }

    async fn increment_counters(&self, deltas: &Counters) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (name, delta) in deltas.iter() {
            sqlx::query(INCREMENT_COUNTER)
                .bind(GLOBAL_COUNTERS_ID)
                .bind(name)
                .bind(i64::try_from(delta).unwrap_or(i64::MAX))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_counters(&self) -> Result<Counters, StoreError> {
        let rows = sqlx::query(SELECT_COUNTERS)
            .bind(GLOBAL_COUNTERS_ID)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, u64), StoreError> {
                let name: String = row.try_get("name")?;
                let value: i64 = row.try_get("value")?;
                Ok((name, u64::try_from(value).unwrap_or(0)))
            })
            .collect()
    }
}

/// Column values of an operation that need conversion.
struct EncodedOperation {
    created_ns: i64,
    updated_ns: i64,
    before_ns: Option<i64>,
    completed_ns: Option<i64>,
    status: i64,
}

impl EncodedOperation {
    fn from_operation(op: &Operation) -> Result<Self, StoreError> {
        let nanos = |t: DateTime<Utc>, field: &str| {
            t.timestamp_nanos_opt().ok_or_else(|| StoreError::Corrupt {
                id: op.id.clone(),
                reason: format!("{field} {t} is outside the storable range"),
            })
        };
        Ok(Self {
            created_ns: nanos(op.created, "created")?,
            updated_ns: nanos(op.updated, "updated")?,
            before_ns: op.before.map(|t| nanos(t, "before")).transpose()?,
            completed_ns: op.completed.map(|t| nanos(t, "completed")).transpose()?,
            status: op.status.as_i64(),
        })
    }
}

fn decode_operation(row: &SqliteRow) -> Result<Operation, StoreError> {
    let id: String = row.try_get("id")?;
    let raw_status: i64 = row.try_get("status")?;
    let status = OperationStatus::from_i64(raw_status).ok_or_else(|| StoreError::Corrupt {
        id: id.clone(),
        reason: format!("unknown status {raw_status}"),
    })?;
    Ok(Operation {
        lock: row.try_get("lock")?,
        created: DateTime::from_timestamp_nanos(row.try_get("created_ns")?),
        updated: DateTime::from_timestamp_nanos(row.try_get("updated_ns")?),
        before: row
            .try_get::<Option<i64>, _>("before_ns")?
            .map(DateTime::from_timestamp_nanos),
        completed: row
            .try_get::<Option<i64>, _>("completed_ns")?
            .map(DateTime::from_timestamp_nanos),
        status,
        result: row.try_get("result")?,
        source_description: row.try_get("source_description")?,
        id,
    })
}
