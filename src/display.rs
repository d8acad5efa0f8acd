//! Per-courier display sessions for the chat adapter.
//!
//! The chat adapter edits its last queue message in place instead of sending
//! a new one. It records the handle of that message here; once the queue list
//! changes through an assignment or a reset the handles are dropped so the
//! next view is rendered fresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::models::courier::CourierId;
use crate::models::queue::QueueEvent;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DisplayHandle {
    pub message_id: i64,
    pub rendered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DisplayCache {
    sessions: DashMap<CourierId, DisplayHandle>,
}

impl DisplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, courier_id: CourierId, message_id: i64, rendered_at: DateTime<Utc>) {
        self.sessions.insert(
            courier_id,
            DisplayHandle {
                message_id,
                rendered_at,
            },
        );
    }

    pub fn current(&self, courier_id: CourierId) -> Option<DisplayHandle> {
        self.sessions.get(&courier_id).map(|entry| *entry.value())
    }

    pub fn forget(&self, courier_id: CourierId) -> bool {
        self.sessions.remove(&courier_id).is_some()
    }

    pub fn invalidate_all(&self) -> usize {
        let dropped = self.sessions.len();
        self.sessions.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn invalidates_display(event: &QueueEvent) -> bool {
    matches!(
        event,
        QueueEvent::Assigned { .. } | QueueEvent::Cleared { .. }
    )
}

pub async fn run_display_invalidator(state: Arc<AppState>) {
    let mut rx = state.queue_events_tx.subscribe();
    info!("display invalidator started");

    loop {
        match rx.recv().await {
            Ok(event) if invalidates_display(&event) => {
                let dropped = state.display.invalidate_all();
                debug!(?event, dropped, "display sessions invalidated");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                // Missed events may have included an assignment.
                let dropped = state.display.invalidate_all();
                warn!(skipped, dropped, "display invalidator lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    warn!("display invalidator stopped: event channel closed");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{invalidates_display, DisplayCache};
    use crate::models::queue::QueueEvent;

    #[test]
    fn remember_replaces_previous_handle() {
        let cache = DisplayCache::new();
        let now = Utc::now();
        cache.remember(7, 100, now);
        cache.remember(7, 101, now);

        assert_eq!(cache.current(7).map(|h| h.message_id), Some(101));
        assert_eq!(cache.len(), 1);
        assert!(cache.forget(7));
        assert!(!cache.forget(7));
        assert!(cache.is_empty());
    }

    #[test]
    fn only_assignment_and_reset_invalidate() {
        assert!(invalidates_display(&QueueEvent::Assigned {
            courier_id: 1,
            order_id: 1
        }));
        assert!(invalidates_display(&QueueEvent::Cleared { removed: 0 }));
        assert!(!invalidates_display(&QueueEvent::Joined {
            courier_id: 1,
            position: 1
        }));
        assert!(!invalidates_display(&QueueEvent::Left { courier_id: 1 }));
    }
}
