use std::time::Instant;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use tracing::info;

use crate::engine::local_to_utc;
use crate::engine::queue::refresh_queue_length;
use crate::error::AppError;
use crate::models::assignment::{AssignOutcome, Assignment, CourierStats};
use crate::models::courier::CourierId;
use crate::models::queue::QueueEvent;
use crate::state::AppState;
use crate::store::{begin_immediate, fetch_courier, from_millis, to_millis, OrderRow};

/// Records an order for the courier and takes them off the queue, atomically.
/// Assigning a courier who is not queued is allowed.
pub async fn assign(
    state: &AppState,
    courier_id: CourierId,
    now: DateTime<Utc>,
) -> Result<AssignOutcome, AppError> {
    let start = Instant::now();
    let assigned_at = to_millis(now);

    let mut tx = begin_immediate(&state.pool).await?;

    fetch_courier(&mut *tx, courier_id)
        .await?
        .ok_or(AppError::NotRegistered(courier_id))?;

    let order_id = sqlx::query("INSERT INTO orders (courier_id, assigned_at) VALUES (?, ?)")
        .bind(courier_id)
        .bind(assigned_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    let removed_from_queue = sqlx::query("DELETE FROM queue WHERE courier_id = ?")
        .bind(courier_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
        > 0;

    tx.commit().await?;

    state.metrics.assignments_total.inc();
    let outcome = if removed_from_queue {
        "dequeued"
    } else {
        "not_queued"
    };
    state
        .metrics
        .record_operation("assign", outcome, start.elapsed().as_secs_f64());

    info!(courier_id, order_id, removed_from_queue, "order assigned");

    state.publish(QueueEvent::Assigned {
        courier_id,
        order_id,
    });
    if removed_from_queue {
        refresh_queue_length(state).await;
    }

    Ok(AssignOutcome {
        assignment: Assignment {
            order_id,
            courier_id,
            assigned_at: from_millis(assigned_at)?,
            completed_at: None,
        },
        removed_from_queue,
    })
}

/// Start (inclusive) and end (exclusive) of the local calendar day containing `now`.
pub fn local_day_bounds(now: DateTime<Utc>, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = now.with_timezone(&offset).date_naive();
    let start = local_to_utc(local_date.and_time(NaiveTime::MIN), offset);
    (start, start + TimeDelta::days(1))
}

/// Totals per registered courier, busiest first. "Today" is the local day at `state.utc_offset`.
pub async fn stats(state: &AppState, now: DateTime<Utc>) -> Result<Vec<CourierStats>, AppError> {
    let (day_start, day_end) = local_day_bounds(now, state.utc_offset);

    let rows: Vec<(i64, String, i64, i64)> = sqlx::query_as(
        "SELECT c.id, c.name, COUNT(o.id), \
                COALESCE(SUM(CASE WHEN o.assigned_at >= ? AND o.assigned_at < ? THEN 1 ELSE 0 END), 0) \
         FROM couriers c LEFT JOIN orders o ON o.courier_id = c.id \
         GROUP BY c.id, c.name \
         ORDER BY COUNT(o.id) DESC, c.name",
    )
    .bind(to_millis(day_start))
    .bind(to_millis(day_end))
    .fetch_all(&state.pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(courier_id, name, total, today)| CourierStats {
            courier_id,
            name,
            total,
            today,
        })
        .collect())
}

/// Assignment history for one courier, newest first.
pub async fn history(state: &AppState, courier_id: CourierId) -> Result<Vec<Assignment>, AppError> {
    fetch_courier(&state.pool, courier_id)
        .await?
        .ok_or(AppError::NotRegistered(courier_id))?;

    let rows: Vec<OrderRow> = sqlx::query_as(
        "SELECT id, courier_id, assigned_at, completed_at FROM orders \
         WHERE courier_id = ? ORDER BY assigned_at DESC, id DESC",
    )
    .bind(courier_id)
    .fetch_all(&state.pool)
    .await?;

    rows.into_iter().map(Assignment::try_from).collect()
}

/// Operator removal of a courier; queue entry and history go with it.
pub async fn delete_courier(state: &AppState, courier_id: CourierId) -> Result<bool, AppError> {
    let deleted = sqlx::query("DELETE FROM couriers WHERE id = ?")
        .bind(courier_id)
        .execute(&state.pool)
        .await?
        .rows_affected()
        > 0;

    if deleted {
        info!(courier_id, "courier deleted");
        state.display.forget(courier_id);
        state.publish(QueueEvent::Left { courier_id });
        refresh_queue_length(state).await;
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeDelta, TimeZone, Utc};

    use super::{assign, delete_courier, history, local_day_bounds, stats};
    use crate::config::Config;
    use crate::engine::queue::{join, list, register};
    use crate::error::AppError;
    use crate::state::AppState;
    use crate::store::connect_in_memory;

    async fn state_at_offset(hours: i32) -> AppState {
        let pool = connect_in_memory().await.unwrap();
        let config = Config {
            utc_offset: FixedOffset::east_opt(hours * 3600).unwrap(),
            ..Config::default()
        };
        AppState::new(pool, &config)
    }

    #[test]
    fn day_bounds_follow_the_offset() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        // 22:30 UTC is already the next day at +03:00.
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 22, 30, 0).unwrap();
        let (start, end) = local_day_bounds(now, offset);

        assert_eq!(start, Utc.with_ymd_and_hms(2025, 1, 31, 21, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 2, 1, 21, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn assign_dequeues_and_records_history() {
        let state = state_at_offset(0).await;
        let now = Utc::now();
        register(&state, 1, "Ivan Zateev", now).await.unwrap();
        join(&state, 1, now).await.unwrap();

        let first = assign(&state, 1, now).await.unwrap();
        let second = assign(&state, 1, now + TimeDelta::seconds(1)).await.unwrap();

        assert!(first.removed_from_queue);
        assert!(!second.removed_from_queue);
        assert_ne!(first.assignment.order_id, second.assignment.order_id);
        assert!(list(&state).await.unwrap().is_empty());

        let orders = history(&state, 1).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].order_id, second.assignment.order_id);
        assert!(orders.iter().all(|order| order.completed_at.is_none()));
        assert_eq!(state.metrics.assignments_total.get(), 2);
    }

    #[tokio::test]
    async fn assign_unknown_courier_writes_nothing() {
        let state = state_at_offset(0).await;
        let err = assign(&state, 404, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotRegistered(404)));

        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&state.pool)
            .await
            .unwrap();
        assert_eq!(orders, 0);
    }

    #[tokio::test]
    async fn stats_count_today_in_operator_timezone() {
        let state = state_at_offset(3).await;
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        register(&state, 1, "Anna Ivanova", now).await.unwrap();
        register(&state, 2, "Boris Sokolov", now).await.unwrap();
        register(&state, 3, "Vera Orlova", now).await.unwrap();

        // 20:30 UTC on Jan 31 is 23:30 local: yesterday.
        assign(&state, 1, Utc.with_ymd_and_hms(2025, 1, 31, 20, 30, 0).unwrap())
            .await
            .unwrap();
        // 21:30 UTC on Jan 31 is 00:30 local on Feb 1: today.
        assign(&state, 1, Utc.with_ymd_and_hms(2025, 1, 31, 21, 30, 0).unwrap())
            .await
            .unwrap();
        assign(&state, 2, now).await.unwrap();

        let rows = stats(&state, now).await.unwrap();
        let summary: Vec<(i64, i64, i64)> = rows
            .iter()
            .map(|row| (row.courier_id, row.total, row.today))
            .collect();
        assert_eq!(summary, vec![(1, 2, 1), (2, 1, 1), (3, 0, 0)]);
    }

    #[tokio::test]
    async fn deleting_courier_drops_queue_entry_and_history() {
        let state = state_at_offset(0).await;
        let now = Utc::now();
        register(&state, 1, "Ivan Zateev", now).await.unwrap();
        assign(&state, 1, now).await.unwrap();
        join(&state, 1, now).await.unwrap();
        state.display.remember(1, 55, now);

        assert!(delete_courier(&state, 1).await.unwrap());
        assert!(!delete_courier(&state, 1).await.unwrap());
        assert!(list(&state).await.unwrap().is_empty());
        assert!(state.display.current(1).is_none());
        assert!(matches!(
            history(&state, 1).await,
            Err(AppError::NotRegistered(1))
        ));
        assert!(stats(&state, now).await.unwrap().is_empty());
    }
}
