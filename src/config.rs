use std::env;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};

use crate::error::AppError;
use crate::models::courier::{CourierId, GeoPoint};

const DEFAULT_UTC_OFFSET_SECS: i32 = 3 * 3600;

#[derive(Debug, Clone)]
pub struct GeofenceConfig {
    pub center: GeoPoint,
    pub radius_m: f64,
    pub freshness: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: String,
    pub log_json: bool,
    pub event_buffer_size: usize,
    pub operator_id: Option<CourierId>,
    pub bot_secret: Option<String>,
    pub public_base_url: Option<String>,
    pub static_dir: String,
    pub utc_offset: FixedOffset,
    pub reset_time: NaiveTime,
    pub geofence: Option<GeofenceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            database_url: "sqlite://couriers.db".to_string(),
            database_max_connections: 5,
            log_level: "info".to_string(),
            log_json: false,
            event_buffer_size: 256,
            operator_id: None,
            bot_secret: None,
            public_base_url: None,
            static_dir: "static".to_string(),
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            reset_time: NaiveTime::MIN,
            geofence: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parse_or_default(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            operator_id: parse_optional("OPERATOR_ID")?,
            bot_secret: non_empty_var("BOT_SECRET"),
            public_base_url: non_empty_var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            static_dir: env::var("STATIC_DIR").unwrap_or(defaults.static_dir),
            utc_offset: match non_empty_var("UTC_OFFSET") {
                Some(raw) => parse_utc_offset(&raw)
                    .map_err(|err| AppError::Internal(format!("invalid UTC_OFFSET: {err}")))?,
                None => defaults.utc_offset,
            },
            reset_time: parse_time_or_default("RESET_TIME", defaults.reset_time)?,
            geofence: geofence_from_env()?,
        })
    }
}

/// The gate is enabled only when both reference coordinates are set.
fn geofence_from_env() -> Result<Option<GeofenceConfig>, AppError> {
    let (Some(lat), Some(lon)) = (
        parse_optional::<f64>("GEOFENCE_LAT")?,
        parse_optional::<f64>("GEOFENCE_LON")?,
    )
    else {
        return Ok(None);
    };

    let center = GeoPoint { lat, lon };
    if !center.is_valid() {
        return Err(AppError::Internal(format!(
            "invalid geofence center: {lat}, {lon}"
        )));
    }

    let radius_m: f64 = parse_or_default("GEOFENCE_RADIUS_M", 150.0)?;
    if !(radius_m.is_finite() && radius_m > 0.0) {
        return Err(AppError::Internal(format!(
            "invalid GEOFENCE_RADIUS_M: {radius_m}"
        )));
    }
    let freshness = freshness_from_minutes(parse_or_default("GEOFENCE_FRESHNESS_MIN", 30)?)?;

    Ok(Some(GeofenceConfig {
        center,
        radius_m,
        freshness,
    }))
}

fn freshness_from_minutes(minutes: u64) -> Result<Duration, AppError> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::Internal(format!("GEOFENCE_FRESHNESS_MIN out of range: {minutes}")))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(None),
    }
}

fn parse_time_or_default(key: &str, default: NaiveTime) -> Result<NaiveTime, AppError> {
    match non_empty_var(key) {
        Some(raw) => parse_time_of_day(&raw)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S").or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
}

/// Accepts `+HH:MM`, `-HHMM` or `+HH`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let raw = raw.trim();
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(format!("{raw:?} must start with + or -")),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("{raw:?} is not an offset like +03:00"));
    }
    let (hours, minutes) = match digits.len() {
        2 => (&digits[..2], "0"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(format!("{raw:?} is not an offset like +03:00")),
    };
    let hours: i32 = hours.parse().map_err(|err| format!("{raw:?}: {err}"))?;
    let minutes: i32 = minutes.parse().map_err(|err| format!("{raw:?}: {err}"))?;
    if minutes >= 60 {
        return Err(format!("{raw:?} has more than 59 minutes"));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("{raw:?} is out of range"))
}
