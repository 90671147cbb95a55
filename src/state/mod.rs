pub mod factory;
pub mod sled_store;
pub mod store;

pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledStore;
pub use store::InMemoryStore;

use crate::error::Result;
use crate::models::{
    CallAttempt, Incident, IncidentEvent, IncidentStatus, RotationState, RoutingProgress,
    ScheduleEntry, Site, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage collaborator for the dispatch engine.
///
/// Every record type is keyed by an integer id assigned on create. Each
/// implementation serializes writes internally; callers rely on the
/// engine's per-incident critical section for cross-record consistency.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    // Incidents

    /// Persist a new incident and return its assigned id
    async fn create_incident(&self, incident: &Incident) -> Result<i64>;

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>>;

    async fn find_incident_by_external_id(&self, external_id: &str) -> Result<Option<Incident>>;

    async fn update_incident(&self, incident: &Incident) -> Result<()>;

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>>;

    // Call attempts

    async fn create_attempt(&self, attempt: &CallAttempt) -> Result<i64>;

    async fn update_attempt(&self, attempt: &CallAttempt) -> Result<()>;

    async fn attempts_for_incident(&self, incident_id: i64) -> Result<Vec<CallAttempt>>;

    /// The in-flight attempt for (incident, user), if any.
    /// At most one exists at a time.
    async fn find_ringing_attempt(
        &self,
        incident_id: i64,
        user_id: i64,
    ) -> Result<Option<CallAttempt>>;

    // Incident events (append-only)

    async fn append_event(&self, event: &IncidentEvent) -> Result<i64>;

    async fn events_for_incident(&self, incident_id: i64) -> Result<Vec<IncidentEvent>>;

    // Users

    async fn create_user(&self, user: &User) -> Result<i64>;

    async fn get_user(&self, id: i64) -> Result<Option<User>>;

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn update_user(&self, user: &User) -> Result<()>;

    // Sites

    async fn create_site(&self, site: &Site) -> Result<i64>;

    async fn list_sites(&self) -> Result<Vec<Site>>;

    // On-call schedule

    async fn create_schedule_entry(&self, entry: &ScheduleEntry) -> Result<i64>;

    /// Entries whose [start, end) window contains `at`
    async fn schedule_entries_active_at(&self, at: DateTime<Utc>) -> Result<Vec<ScheduleEntry>>;

    // Rotation state (singleton)

    async fn get_rotation_state(&self) -> Result<RotationState>;

    async fn set_rotation_state(&self, state: &RotationState) -> Result<()>;

    // Routing progress

    async fn get_routing_progress(&self, incident_id: i64) -> Result<Option<RoutingProgress>>;

    async fn set_routing_progress(&self, progress: &RoutingProgress) -> Result<()>;

    // Runtime configuration records

    async fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set_config(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Filter for querying incidents
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub statuses: Vec<IncidentStatus>,
    pub assigned_user_id: Option<i64>,
    pub unclaimed_only: bool,
    pub critical_only: bool,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &Incident) -> bool {
        let status_match = self.statuses.is_empty() || self.statuses.contains(&incident.status);

        let assignee_match = self
            .assigned_user_id
            .map_or(true, |id| incident.assigned_user_id == Some(id));

        let unclaimed_match = !self.unclaimed_only || incident.assigned_user_id.is_none();

        let critical_match = !self.critical_only || incident.critical;

        status_match && assignee_match && unclaimed_match && critical_match
    }
}
