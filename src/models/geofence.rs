use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a courier may not join while the geofence is enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeofenceRejection {
    NoPosition,
    Expired,
    TooFar { distance_m: f64 },
}

impl fmt::Display for GeofenceRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeofenceRejection::NoPosition => write!(f, "no verified position"),
            GeofenceRejection::Expired => write!(f, "verified position expired"),
            GeofenceRejection::TooFar { distance_m } => {
                write!(f, "too far from pickup point ({distance_m:.0} m)")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionCheck {
    pub admitted: bool,
    pub distance_m: f64,
}
