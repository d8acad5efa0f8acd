use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::courier::CourierId;

/// Immutable record of a courier being pulled off the queue for an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub order_id: i64,
    pub courier_id: CourierId,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignOutcome {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub removed_from_queue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierStats {
    pub courier_id: CourierId,
    pub name: String,
    pub total: i64,
    pub today: i64,
}
