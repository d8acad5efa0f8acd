use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::engine::geofence::rejection_label;
use crate::error::AppError;
use crate::models::courier::{Courier, CourierId};
use crate::models::queue::{JoinOutcome, JoinStatus, QueueEntry, QueueEvent};
use crate::state::AppState;
use crate::store::{self, fetch_courier, from_millis, to_millis};

const MAX_NAME_CHARS: usize = 64;

/// Collapses whitespace and requires a first and last name.
pub fn normalize_name(raw: &str) -> Result<String, AppError> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    if words.len() < 2 {
        return Err(AppError::InvalidName(
            "expected first and last name".to_string(),
        ));
    }

    let name = words.join(" ");
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::InvalidName(format!(
            "name longer than {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name)
}

/// Creates the courier or renames an existing one. Position and
/// registration time survive re-registration.
pub async fn register(
    state: &AppState,
    courier_id: CourierId,
    raw_name: &str,
    now: DateTime<Utc>,
) -> Result<Courier, AppError> {
    let name = normalize_name(raw_name)?;

    let mut tx = store::begin_immediate(&state.pool).await?;
    sqlx::query(
        "INSERT INTO couriers (id, name, registered_at) VALUES (?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET name = excluded.name",
    )
    .bind(courier_id)
    .bind(&name)
    .bind(to_millis(now))
    .execute(&mut *tx)
    .await?;

    let courier = fetch_courier(&mut *tx, courier_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("courier {courier_id} vanished after upsert")))?;
    tx.commit().await?;

    info!(courier_id, name = %courier.name, "courier registered");
    Ok(courier)
}

pub async fn courier(state: &AppState, courier_id: CourierId) -> Result<Courier, AppError> {
    fetch_courier(&state.pool, courier_id)
        .await?
        .ok_or(AppError::NotRegistered(courier_id))
}

/// Rank under the (join_time, id) total order, or `None` when not queued.
async fn rank_of(
    conn: &mut SqliteConnection,
    courier_id: CourierId,
) -> Result<Option<u32>, AppError> {
    let own: Option<(i64, i64)> =
        sqlx::query_as("SELECT id, join_time FROM queue WHERE courier_id = ?")
            .bind(courier_id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some((seq, join_time)) = own else {
        return Ok(None);
    };

    let ahead: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM queue WHERE join_time < ? OR (join_time = ? AND id < ?)",
    )
    .bind(join_time)
    .bind(join_time)
    .bind(seq)
    .fetch_one(&mut *conn)
    .await?;

    let rank = u32::try_from(ahead + 1)
        .map_err(|err| AppError::Internal(format!("queue rank out of range: {err}")))?;
    Ok(Some(rank))
}

pub async fn join(
    state: &AppState,
    courier_id: CourierId,
    now: DateTime<Utc>,
) -> Result<JoinOutcome, AppError> {
    let start = Instant::now();
    let result = try_join(state, courier_id, now).await;

    let outcome = match &result {
        Ok(JoinOutcome {
            status: JoinStatus::Joined,
            ..
        }) => "joined",
        Ok(_) => "already_queued",
        Err(err) => err.code(),
    };
    state
        .metrics
        .record_operation("join", outcome, start.elapsed().as_secs_f64());

    result
}

async fn try_join(
    state: &AppState,
    courier_id: CourierId,
    now: DateTime<Utc>,
) -> Result<JoinOutcome, AppError> {
    let mut tx = store::begin_immediate(&state.pool).await?;

    let courier = fetch_courier(&mut *tx, courier_id)
        .await?
        .ok_or(AppError::NotRegistered(courier_id))?;

    // A queued courier keeps their place even once their position goes stale.
    if let Some(position) = rank_of(&mut tx, courier_id).await? {
        tx.commit().await?;
        debug!(courier_id, position, "courier already queued");
        return Ok(JoinOutcome {
            status: JoinStatus::AlreadyQueued,
            position,
        });
    }

    if let Some(geofence) = &state.geofence {
        match geofence.admission(courier.position.as_ref(), now) {
            Ok(distance_m) => {
                state
                    .metrics
                    .geofence_checks_total
                    .with_label_values(&["admitted"])
                    .inc();
                debug!(courier_id, distance_m, "geofence admitted join");
            }
            Err(reason) => {
                state
                    .metrics
                    .geofence_checks_total
                    .with_label_values(&[rejection_label(&reason)])
                    .inc();
                info!(courier_id, %reason, "join refused by geofence");
                return Err(AppError::GeofenceRejected(reason));
            }
        }
    }

    let inserted = sqlx::query(
        "INSERT INTO queue (courier_id, join_time) VALUES (?, ?) \
         ON CONFLICT (courier_id) DO NOTHING",
    )
    .bind(courier_id)
    .bind(to_millis(now))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let position = rank_of(&mut tx, courier_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("courier {courier_id} missing after join")))?;
    tx.commit().await?;

    let status = if inserted == 0 {
        debug!(courier_id, position, "courier already queued");
        JoinStatus::AlreadyQueued
    } else {
        info!(courier_id, position, "courier joined queue");
        state.publish(QueueEvent::Joined {
            courier_id,
            position,
        });
        refresh_queue_length(state).await;
        JoinStatus::Joined
    };

    Ok(JoinOutcome { status, position })
}

/// Returns whether an entry was removed; not being queued is not an error.
pub async fn leave(state: &AppState, courier_id: CourierId) -> Result<bool, AppError> {
    let start = Instant::now();

    let removed = sqlx::query("DELETE FROM queue WHERE courier_id = ?")
        .bind(courier_id)
        .execute(&state.pool)
        .await?
        .rows_affected()
        > 0;

    let outcome = if removed { "removed" } else { "not_queued" };
    state
        .metrics
        .record_operation("leave", outcome, start.elapsed().as_secs_f64());

    if removed {
        info!(courier_id, "courier left queue");
        state.publish(QueueEvent::Left { courier_id });
        refresh_queue_length(state).await;
    }

    Ok(removed)
}

pub async fn position(state: &AppState, courier_id: CourierId) -> Result<u32, AppError> {
    let mut conn = state.pool.acquire().await?;
    rank_of(&mut conn, courier_id)
        .await?
        .ok_or(AppError::NotQueued(courier_id))
}

pub async fn list(state: &AppState) -> Result<Vec<QueueEntry>, AppError> {
    let rows: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT q.courier_id, c.name, q.join_time \
         FROM queue q JOIN couriers c ON c.id = q.courier_id \
         ORDER BY q.join_time, q.id",
    )
    .fetch_all(&state.pool)
    .await?;

    rows.into_iter()
        .zip(1u32..)
        .map(|((courier_id, name, join_time), position)| {
            Ok(QueueEntry {
                position,
                courier_id,
                name,
                joined_at: from_millis(join_time)?,
            })
        })
        .collect()
}

/// Empties the queue and returns how many entries were dropped.
pub async fn clear(state: &AppState) -> Result<u64, AppError> {
    let start = Instant::now();

    let removed = sqlx::query("DELETE FROM queue")
        .execute(&state.pool)
        .await?
        .rows_affected();

    state
        .metrics
        .record_operation("clear", "cleared", start.elapsed().as_secs_f64());
    state.publish(QueueEvent::Cleared { removed });
    refresh_queue_length(state).await;

    info!(removed, "queue cleared");
    Ok(removed)
}

pub async fn refresh_queue_length(state: &AppState) {
    match store::queue_length(&state.pool).await {
        Ok(length) => state.metrics.queue_length.set(length),
        Err(err) => warn!(error = %err, "failed to refresh queue length"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::{clear, join, leave, list, normalize_name, position, register};
    use crate::config::Config;
    use crate::error::AppError;
    use crate::models::queue::JoinStatus;
    use crate::state::AppState;
    use crate::store::connect_in_memory;

    async fn state() -> AppState {
        let pool = connect_in_memory().await.unwrap();
        AppState::new(pool, &Config::default())
    }

    #[test]
    fn name_requires_two_words_and_collapses_spaces() {
        assert_eq!(normalize_name("  Ivan   Zateev ").unwrap(), "Ivan Zateev");
        assert!(matches!(normalize_name("Ivan"), Err(AppError::InvalidName(_))));
        assert!(matches!(normalize_name("   "), Err(AppError::InvalidName(_))));
        assert!(normalize_name(&format!("A {}", "b".repeat(80))).is_err());
    }

    #[tokio::test]
    async fn join_requires_registration() {
        let state = state().await;
        let err = join(&state, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotRegistered(1)));
    }

    #[tokio::test]
    async fn reregistration_renames_without_touching_queue() {
        let state = state().await;
        let now = Utc::now();
        register(&state, 1, "Ivan Zateev", now).await.unwrap();
        join(&state, 1, now).await.unwrap();

        let renamed = register(&state, 1, "Ivan Petrov", now + TimeDelta::hours(1))
            .await
            .unwrap();
        assert_eq!(renamed.name, "Ivan Petrov");
        assert_eq!(renamed.registered_at.timestamp_millis(), now.timestamp_millis());
        assert_eq!(list(&state).await.unwrap()[0].name, "Ivan Petrov");
    }

    #[tokio::test]
    async fn duplicate_join_is_an_informational_no_op() {
        let state = state().await;
        let now = Utc::now();
        register(&state, 1, "Ivan Zateev", now).await.unwrap();

        let first = join(&state, 1, now).await.unwrap();
        let second = join(&state, 1, now + TimeDelta::seconds(5)).await.unwrap();

        assert_eq!(first.status, JoinStatus::Joined);
        assert_eq!(second.status, JoinStatus::AlreadyQueued);
        assert_eq!(second.position, 1);
        assert_eq!(list(&state).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_timestamps_get_distinct_ranks() {
        let state = state().await;
        let same_instant = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        for (id, name) in [(1, "Anna Ivanova"), (2, "Boris Sokolov"), (3, "Vera Orlova")] {
            register(&state, id, name, same_instant).await.unwrap();
            join(&state, id, same_instant).await.unwrap();
        }

        assert_eq!(position(&state, 1).await.unwrap(), 1);
        assert_eq!(position(&state, 2).await.unwrap(), 2);
        assert_eq!(position(&state, 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_orders_by_join_time_not_insertion() {
        let state = state().await;
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        register(&state, 1, "Anna Ivanova", base).await.unwrap();
        register(&state, 2, "Boris Sokolov", base).await.unwrap();

        join(&state, 1, base + TimeDelta::seconds(10)).await.unwrap();
        join(&state, 2, base).await.unwrap();

        let queue = list(&state).await.unwrap();
        let order: Vec<(u32, i64)> = queue.iter().map(|e| (e.position, e.courier_id)).collect();
        assert_eq!(order, vec![(1, 2), (2, 1)]);
        assert_eq!(position(&state, 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn leave_reports_whether_anything_was_removed() {
        let state = state().await;
        register(&state, 1, "Ivan Zateev", Utc::now()).await.unwrap();
        join(&state, 1, Utc::now()).await.unwrap();

        assert!(leave(&state, 1).await.unwrap());
        assert!(!leave(&state, 1).await.unwrap());
        assert!(!leave(&state, 999).await.unwrap());
        assert!(matches!(
            position(&state, 1).await,
            Err(AppError::NotQueued(1))
        ));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let state = state().await;
        let now = Utc::now();
        register(&state, 1, "Anna Ivanova", now).await.unwrap();
        register(&state, 2, "Boris Sokolov", now).await.unwrap();
        join(&state, 1, now).await.unwrap();
        join(&state, 2, now).await.unwrap();

        assert_eq!(clear(&state).await.unwrap(), 2);
        assert_eq!(clear(&state).await.unwrap(), 0);
        assert!(list(&state).await.unwrap().is_empty());
        assert_eq!(state.metrics.queue_length.get(), 0);
    }
}
