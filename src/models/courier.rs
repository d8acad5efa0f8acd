use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque stable identity issued by the chat platform.
pub type CourierId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Last position that passed the geofence, with the moment it was checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VerifiedPosition {
    pub point: GeoPoint,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: CourierId,
    pub name: String,
    pub position: Option<VerifiedPosition>,
    pub registered_at: DateTime<Utc>,
}
