use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, Statement, TransactionTrait, Value,
};

use crate::entity::measurements;
use crate::error::AppResult;

/// Rows per INSERT statement; 4 bound values each keeps us well under
/// SQLite's host parameter limit.
const ROWS_PER_STATEMENT: usize = 200;

/// Result of committing one page of measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCommit {
    /// Rows inserted or changed; identical re-deliveries are not counted.
    pub stored: u64,
    /// The station's `last_updated` after the commit.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Insert measurements; on a key collision overwrite only if the value differs.
///
/// Returns the number of rows inserted or changed.
///
/// # Errors
///
/// Returns `AppError::Database` on any statement failure, including a row
/// whose sensor is not registered.
pub async fn upsert_measurements<C: ConnectionTrait>(
    db: &C,
    rows: &[measurements::Model],
) -> AppResult<u64> {
    let backend = db.get_database_backend();
    let mut stored = 0;

    for chunk in rows.chunks(ROWS_PER_STATEMENT) {
        let placeholders = vec!["(?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO measurements (station_id, sensor_key, timestamp, value) \
             VALUES {placeholders} \
             ON CONFLICT (station_id, sensor_key, timestamp) \
             DO UPDATE SET value = excluded.value \
             WHERE measurements.value IS NOT excluded.value"
        );

        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * 4);
        for row in chunk {
            values.push(row.station_id.clone().into());
            values.push(row.sensor_key.clone().into());
            values.push(row.timestamp.into());
            values.push(row.value.into());
        }

        let result = db
            .execute(Statement::from_sql_and_values(backend, sql, values))
            .await?;
        stored += result.rows_affected();
    }

    Ok(stored)
}

/// Move `last_updated` forward to `ts`; never moves it back.
///
/// Returns whether the stored value changed.
///
/// # Errors
///
/// Returns `AppError::Database` if the update fails.
pub async fn update_station_timestamp<C: ConnectionTrait>(
    db: &C,
    station_id: &str,
    ts: DateTime<Utc>,
) -> AppResult<bool> {
    let result = db
        .execute(Statement::from_sql_and_values(
            db.get_database_backend(),
            "UPDATE stations SET last_updated = ? \
             WHERE id = ? AND (last_updated IS NULL OR last_updated < ?)",
            [ts.into(), station_id.into(), ts.into()],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Store a page and advance the station's `last_updated` in one transaction.
///
/// # Errors
///
/// Returns `AppError::Database`, also when the stored `last_updated` cannot
/// be decoded; nothing from the page is kept in that case.
pub async fn commit_batch(
    db: &DatabaseConnection,
    station_id: &str,
    rows: &[measurements::Model],
) -> AppResult<BatchCommit> {
    let txn = db.begin().await?;

    let stored = upsert_measurements(&txn, rows).await?;
    if let Some(newest) = rows.iter().map(|r| r.timestamp).max() {
        update_station_timestamp(&txn, station_id, newest).await?;
    }

    let last_updated = match txn
        .query_one(Statement::from_sql_and_values(
            txn.get_database_backend(),
            "SELECT last_updated FROM stations WHERE id = ?",
            [station_id.into()],
        ))
        .await?
    {
        Some(row) => row.try_get::<Option<DateTime<Utc>>>("", "last_updated")?,
        None => None,
    };

    txn.commit().await?;

    tracing::debug!(
        station_id,
        rows = rows.len(),
        stored,
        "Committed measurement batch"
    );

    Ok(BatchCommit {
        stored,
        last_updated,
    })
}

/// Reclaim free pages. Runs on the bare connection; SQLite refuses VACUUM
/// inside a transaction.
///
/// # Errors
///
/// Returns `AppError::Database` if VACUUM fails.
pub async fn optimize(db: &DatabaseConnection) -> AppResult<()> {
    tracing::info!("Running VACUUM");
    db.execute_unprepared("VACUUM").await?;
    Ok(())
}
