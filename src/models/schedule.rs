use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One on-call window for one user. Active iff `start_time <= t < end_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_primary: bool,
    pub is_secondary: bool,

    /// Eligible for the rotating after-hours pool
    pub pool_eligible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEntry {
    pub fn new(user_id: i64, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            start_time,
            end_time,
            is_primary: false,
            is_secondary: false,
            pool_eligible: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Inclusive start, exclusive end
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at < self.end_time
    }
}

/// Singleton pointer into the rotating pool, persisted across incidents
/// so no single pool member is always rung first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationState {
    pub pointer_index: usize,

    /// Most recently dispatched pool members, kept for observability
    pub last_used_user_ids: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            pointer_index: 0,
            last_used_user_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
