use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::courier::CourierId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub position: u32,
    pub courier_id: CourierId,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Joined,
    AlreadyQueued,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JoinOutcome {
    pub status: JoinStatus,
    pub position: u32,
}

/// Published on every change to the queue contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Joined {
        courier_id: CourierId,
        position: u32,
    },
    Left {
        courier_id: CourierId,
    },
    Assigned {
        courier_id: CourierId,
        order_id: i64,
    },
    Cleared {
        removed: u64,
    },
}
