use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::engine::local_to_utc;
use crate::engine::queue::clear;
use crate::state::AppState;

/// Daily trigger at a wall-clock time in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetSchedule {
    pub at: NaiveTime,
    pub offset: FixedOffset,
}

impl ResetSchedule {
    pub fn new(at: NaiveTime, offset: FixedOffset) -> Self {
        Self { at, offset }
    }

    /// First trigger strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_now = now.with_timezone(&self.offset).naive_local();
        let mut candidate = local_now.date().and_time(self.at);
        if candidate <= local_now {
            candidate += TimeDelta::days(1);
        }
        local_to_utc(candidate, self.offset)
    }
}

/// Clears the queue once a day. A missed trigger is not replayed.
pub async fn run_daily_reset(state: Arc<AppState>, schedule: ResetSchedule) {
    info!(at = %schedule.at, offset = %schedule.offset, "daily reset scheduled");

    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(next = %next, "waiting for next queue reset");

        sleep(wait).await;

        match clear(&state).await {
            Ok(removed) => info!(removed, "scheduled queue reset completed"),
            Err(err) => error!(error = %err, "scheduled queue reset failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, NaiveTime, TimeZone, Utc};

    use super::ResetSchedule;

    fn schedule(hour: u32, minute: u32, offset_hours: i32) -> ResetSchedule {
        ResetSchedule::new(
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            FixedOffset::east_opt(offset_hours * 3600).unwrap(),
        )
    }

    #[test]
    fn later_today_when_trigger_not_yet_passed() {
        let s = schedule(4, 0, 3);
        // 00:00 UTC = 03:00 local.
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn tomorrow_when_trigger_already_passed() {
        let s = schedule(4, 0, 3);
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 5, 0, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Utc.with_ymd_and_hms(2025, 3, 11, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn exact_trigger_instant_schedules_the_following_day() {
        let s = schedule(0, 0, 0);
        let now = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn negative_offset_crosses_utc_midnight() {
        let s = schedule(23, 30, -5);
        // 12:00 UTC = 07:00 local; 23:30 local = 04:30 UTC next day.
        let now = Utc.with_ymd_and_hms(2025, 7, 4, 12, 0, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Utc.with_ymd_and_hms(2025, 7, 5, 4, 30, 0).unwrap()
        );
    }
}
