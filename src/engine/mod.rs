pub mod assignment;
pub mod geofence;
pub mod queue;
pub mod reset;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, TimeZone, Utc};

/// Interprets a wall-clock time at a fixed offset as a UTC instant.
pub(crate) fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc)
}
