use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::GeofenceConfig;
use crate::error::AppError;
use crate::geo::haversine_m;
use crate::models::courier::{CourierId, GeoPoint, VerifiedPosition};
use crate::models::geofence::{GeofenceRejection, PositionCheck};
use crate::state::AppState;
use crate::store::{begin_immediate, fetch_courier, to_millis};

/// Admission rule around the pickup point.
#[derive(Debug, Clone)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_m: f64,
    pub freshness: Duration,
}

impl Geofence {
    pub fn from_config(config: &GeofenceConfig) -> Self {
        Self {
            center: config.center,
            radius_m: config.radius_m,
            freshness: config.freshness,
        }
    }

    pub fn check(&self, point: &GeoPoint) -> PositionCheck {
        let distance_m = haversine_m(&self.center, point);
        PositionCheck {
            admitted: distance_m <= self.radius_m,
            distance_m,
        }
    }

    /// Evaluates a stored position at `now`. Returns the distance on success.
    pub fn admission(
        &self,
        position: Option<&VerifiedPosition>,
        now: DateTime<Utc>,
    ) -> Result<f64, GeofenceRejection> {
        let position = position.ok_or(GeofenceRejection::NoPosition)?;

        // A timestamp from the future counts as fresh.
        let age = (now - position.verified_at).to_std().unwrap_or_default();
        if age > self.freshness {
            return Err(GeofenceRejection::Expired);
        }

        let check = self.check(&position.point);
        if !check.admitted {
            return Err(GeofenceRejection::TooFar {
                distance_m: check.distance_m,
            });
        }

        Ok(check.distance_m)
    }
}

pub fn rejection_label(reason: &GeofenceRejection) -> &'static str {
    match reason {
        GeofenceRejection::NoPosition => "no_position",
        GeofenceRejection::Expired => "expired",
        GeofenceRejection::TooFar { .. } => "too_far",
    }
}

/// Records a location report. Only admitted reports overwrite the stored position.
pub async fn verify_position(
    state: &AppState,
    geofence: &Geofence,
    courier_id: CourierId,
    point: GeoPoint,
    now: DateTime<Utc>,
) -> Result<PositionCheck, AppError> {
    if !point.is_valid() {
        return Err(AppError::InvalidCoordinates {
            lat: point.lat,
            lon: point.lon,
        });
    }

    let start = Instant::now();
    let mut tx = begin_immediate(&state.pool).await?;

    fetch_courier(&mut *tx, courier_id)
        .await?
        .ok_or(AppError::NotRegistered(courier_id))?;

    let check = geofence.check(&point);
    if check.admitted {
        sqlx::query("UPDATE couriers SET last_lat = ?, last_lon = ?, verified_at = ? WHERE id = ?")
            .bind(point.lat)
            .bind(point.lon)
            .bind(to_millis(now))
            .bind(courier_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let outcome = if check.admitted { "admitted" } else { "too_far" };
    state
        .metrics
        .geofence_checks_total
        .with_label_values(&[outcome])
        .inc();
    state
        .metrics
        .record_operation("verify_position", outcome, start.elapsed().as_secs_f64());

    info!(
        courier_id,
        distance_m = check.distance_m,
        admitted = check.admitted,
        "location report evaluated"
    );

    Ok(check)
}
