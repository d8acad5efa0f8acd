//! SQLite persistence: pool setup, schema and row mapping.
//!
//! Timestamps are stored as integer milliseconds since the Unix epoch so that
//! ordering in SQL matches chronological ordering.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::courier::{Courier, CourierId, GeoPoint, VerifiedPosition};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS couriers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        last_lat REAL,
        last_lon REAL,
        verified_at INTEGER,
        registered_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        courier_id INTEGER NOT NULL UNIQUE
            REFERENCES couriers(id) ON DELETE CASCADE,
        join_time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        courier_id INTEGER NOT NULL
            REFERENCES couriers(id) ON DELETE CASCADE,
        assigned_at INTEGER NOT NULL,
        completed_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS orders_courier_assigned
        ON orders (courier_id, assigned_at)",
];

/// Opens a pool against `url` (e.g. `sqlite://couriers.db`) and applies the schema.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!(url, "store ready");
    Ok(pool)
}

/// Single-connection in-memory pool; every connection to `:memory:` is a
/// separate database, so the pool must never open a second one.
pub async fn connect_in_memory() -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Write transaction holding the database write lock from the start.
///
/// Use for any transaction that reads before it writes: SQLite fails a
/// deferred read-to-write lock upgrade with `SQLITE_BUSY` without waiting on
/// the busy timeout.
pub async fn begin_immediate(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, AppError> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::Internal(format!("timestamp out of range: {millis}")))
}

#[derive(Debug, FromRow)]
pub struct CourierRow {
    pub id: i64,
    pub name: String,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub verified_at: Option<i64>,
    pub registered_at: i64,
}

impl TryFrom<CourierRow> for Courier {
    type Error = AppError;

    fn try_from(row: CourierRow) -> Result<Self, Self::Error> {
        let position = match (row.last_lat, row.last_lon, row.verified_at) {
            (Some(lat), Some(lon), Some(verified_at)) => Some(VerifiedPosition {
                point: GeoPoint { lat, lon },
                verified_at: from_millis(verified_at)?,
            }),
            _ => None,
        };

        Ok(Courier {
            id: row.id,
            name: row.name,
            position,
            registered_at: from_millis(row.registered_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub courier_id: i64,
    pub assigned_at: i64,
    pub completed_at: Option<i64>,
}

impl TryFrom<OrderRow> for Assignment {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Assignment {
            order_id: row.id,
            courier_id: row.courier_id,
            assigned_at: from_millis(row.assigned_at)?,
            completed_at: row.completed_at.map(from_millis).transpose()?,
        })
    }
}

pub const SELECT_COURIER: &str = "SELECT id, name, last_lat, last_lon, verified_at, registered_at \
     FROM couriers WHERE id = ?";

/// Loads a courier using any executor, so callers can read inside a transaction.
pub async fn fetch_courier<'e, E>(executor: E, id: CourierId) -> Result<Option<Courier>, AppError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as::<_, CourierRow>(SELECT_COURIER)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(Courier::try_from)
        .transpose()
}

pub async fn queue_length(pool: &SqlitePool) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{connect_in_memory, fetch_courier, from_millis, migrate, to_millis};

    #[test]
    fn millis_round_trip_preserves_instant() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(from_millis(to_millis(at)).unwrap(), at);
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        assert!(fetch_courier(&pool, 42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_courier_cascades_to_queue_and_orders() {
        let pool = connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO couriers (id, name, registered_at) VALUES (1, 'Ivan Zateev', 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO queue (courier_id, join_time) VALUES (1, 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO orders (courier_id, assigned_at) VALUES (1, 0)")
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM couriers WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();

        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((queued, orders), (0, 0));
    }
}
