use chrono::FixedOffset;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::display::DisplayCache;
use crate::engine::geofence::Geofence;
use crate::models::courier::CourierId;
use crate::models::queue::QueueEvent;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub pool: SqlitePool,
    pub geofence: Option<Geofence>,
    pub utc_offset: FixedOffset,
    pub operator_id: Option<CourierId>,
    pub bot_secret: Option<String>,
    pub queue_events_tx: broadcast::Sender<QueueEvent>,
    pub display: DisplayCache,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &Config) -> Self {
        let (queue_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));

        Self {
            pool,
            geofence: config.geofence.as_ref().map(Geofence::from_config),
            utc_offset: config.utc_offset,
            operator_id: config.operator_id,
            bot_secret: config.bot_secret.clone(),
            queue_events_tx,
            display: DisplayCache::new(),
            metrics: Metrics::new(),
        }
    }

    /// Fire-and-forget; having no subscribers is not an error.
    pub fn publish(&self, event: QueueEvent) {
        let _ = self.queue_events_tx.send(event);
    }
}
