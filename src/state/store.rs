use crate::error::{AppError, Result};
use crate::models::{
    CallAttempt, Incident, IncidentEvent, RotationState, RoutingProgress, ScheduleEntry, Site,
    User,
};
use crate::state::{DispatchStore, IncidentFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// In-memory dispatch store (for tests and single-node development)
#[derive(Clone)]
pub struct InMemoryStore {
    incidents: Arc<DashMap<i64, Incident>>,
    external_id_index: Arc<DashMap<String, i64>>,
    attempts: Arc<DashMap<i64, CallAttempt>>,
    events: Arc<DashMap<i64, IncidentEvent>>,
    users: Arc<DashMap<i64, User>>,
    sites: Arc<DashMap<i64, Site>>,
    schedule: Arc<DashMap<i64, ScheduleEntry>>,
    routing_progress: Arc<DashMap<i64, RoutingProgress>>,
    rotation: Arc<RwLock<RotationState>>,
    config: Arc<DashMap<String, serde_json::Value>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            incidents: Arc::new(DashMap::new()),
            external_id_index: Arc::new(DashMap::new()),
            attempts: Arc::new(DashMap::new()),
            events: Arc::new(DashMap::new()),
            users: Arc::new(DashMap::new()),
            sites: Arc::new(DashMap::new()),
            schedule: Arc::new(DashMap::new()),
            routing_progress: Arc::new(DashMap::new()),
            rotation: Arc::new(RwLock::new(RotationState::default())),
            config: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchStore for InMemoryStore {
    async fn create_incident(&self, incident: &Incident) -> Result<i64> {
        let id = self.allocate_id();
        let mut incident = incident.clone();
        incident.id = id;

        if let Some(ref external_id) = incident.external_id {
            self.external_id_index.insert(external_id.clone(), id);
        }

        self.incidents.insert(id, incident);
        tracing::debug!(incident_id = id, "Incident created");
        Ok(id)
    }

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>> {
        Ok(self.incidents.get(&id).map(|entry| entry.clone()))
    }

    async fn find_incident_by_external_id(&self, external_id: &str) -> Result<Option<Incident>> {
        match self.external_id_index.get(external_id) {
            Some(id) => Ok(self.incidents.get(&id).map(|entry| entry.clone())),
            None => Ok(None),
        }
    }

    async fn update_incident(&self, incident: &Incident) -> Result<()> {
        if self.incidents.contains_key(&incident.id) {
            self.incidents.insert(incident.id, incident.clone());
            tracing::debug!(incident_id = incident.id, "Incident updated");
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Incident {} not found",
                incident.id
            )))
        }
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|incident| filter.matches(incident))
            .collect();

        // Newest first
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(incidents)
    }

    async fn create_attempt(&self, attempt: &CallAttempt) -> Result<i64> {
        let id = self.allocate_id();
        let mut attempt = attempt.clone();
        attempt.id = id;
        self.attempts.insert(id, attempt);
        Ok(id)
    }

    async fn update_attempt(&self, attempt: &CallAttempt) -> Result<()> {
        if self.attempts.contains_key(&attempt.id) {
            self.attempts.insert(attempt.id, attempt.clone());
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Call attempt {} not found",
                attempt.id
            )))
        }
    }

    async fn attempts_for_incident(&self, incident_id: i64) -> Result<Vec<CallAttempt>> {
        let mut attempts: Vec<CallAttempt> = self
            .attempts
            .iter()
            .filter(|entry| entry.value().incident_id == incident_id)
            .map(|entry| entry.value().clone())
            .collect();

        attempts.sort_by_key(|a| a.id);
        Ok(attempts)
    }

    async fn find_ringing_attempt(
        &self,
        incident_id: i64,
        user_id: i64,
    ) -> Result<Option<CallAttempt>> {
        Ok(self
            .attempts
            .iter()
            .find(|entry| {
                let attempt = entry.value();
                attempt.incident_id == incident_id
                    && attempt.target_user_id == user_id
                    && attempt.is_in_flight()
            })
            .map(|entry| entry.value().clone()))
    }

    async fn append_event(&self, event: &IncidentEvent) -> Result<i64> {
        let id = self.allocate_id();
        let mut event = event.clone();
        event.id = id;
        self.events.insert(id, event);
        Ok(id)
    }

    async fn events_for_incident(&self, incident_id: i64) -> Result<Vec<IncidentEvent>> {
        let mut events: Vec<IncidentEvent> = self
            .events
            .iter()
            .filter(|entry| entry.value().incident_id == incident_id)
            .map(|entry| entry.value().clone())
            .collect();

        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn create_user(&self, user: &User) -> Result<i64> {
        let id = self.allocate_id();
        let mut user = user.clone();
        user.id = id;
        self.users.insert(id, user);
        Ok(id)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|entry| entry.clone()))
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.value().phone.as_deref() == Some(phone))
            .map(|entry| entry.value().clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|entry| entry.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        if self.users.contains_key(&user.id) {
            self.users.insert(user.id, user.clone());
            Ok(())
        } else {
            Err(AppError::NotFound(format!("User {} not found", user.id)))
        }
    }

    async fn create_site(&self, site: &Site) -> Result<i64> {
        let id = self.allocate_id();
        let mut site = site.clone();
        site.id = id;
        self.sites.insert(id, site);
        Ok(id)
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        let mut sites: Vec<Site> = self.sites.iter().map(|entry| entry.value().clone()).collect();
        sites.sort_by_key(|s| s.id);
        Ok(sites)
    }

    async fn create_schedule_entry(&self, entry: &ScheduleEntry) -> Result<i64> {
        let id = self.allocate_id();
        let mut entry = entry.clone();
        entry.id = id;
        self.schedule.insert(id, entry);
        Ok(id)
    }

    async fn schedule_entries_active_at(&self, at: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        let mut entries: Vec<ScheduleEntry> = self
            .schedule
            .iter()
            .filter(|entry| entry.value().is_active_at(at))
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn get_rotation_state(&self) -> Result<RotationState> {
        Ok(self.rotation.read().clone())
    }

    async fn set_rotation_state(&self, state: &RotationState) -> Result<()> {
        *self.rotation.write() = state.clone();
        Ok(())
    }

    async fn get_routing_progress(&self, incident_id: i64) -> Result<Option<RoutingProgress>> {
        Ok(self
            .routing_progress
            .get(&incident_id)
            .map(|entry| entry.clone()))
    }

    async fn set_routing_progress(&self, progress: &RoutingProgress) -> Result<()> {
        self.routing_progress
            .insert(progress.incident_id, progress.clone());
        Ok(())
    }

    async fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.config.get(key).map(|entry| entry.clone()))
    }

    async fn set_config(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.config.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, Period, Role};

    fn sample_incident() -> Incident {
        Incident::new(
            "+14155550100".to_string(),
            Some("CA100".to_string()),
            None,
            Period::BusinessHours,
        )
    }

    #[tokio::test]
    async fn test_create_and_get_incident() {
        let store = InMemoryStore::new();

        let id = store.create_incident(&sample_incident()).await.unwrap();
        let retrieved = store.get_incident(id).await.unwrap();
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_external_id_lookup() {
        let store = InMemoryStore::new();

        let id = store.create_incident(&sample_incident()).await.unwrap();
        let found = store.find_incident_by_external_id("CA100").await.unwrap();
        assert_eq!(found.map(|i| i.id), Some(id));

        let missing = store.find_incident_by_external_id("CA999").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_incident_fails() {
        let store = InMemoryStore::new();

        let mut incident = sample_incident();
        incident.id = 999;
        let result = store.update_incident(&incident).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_incidents_with_filter() {
        let store = InMemoryStore::new();

        for i in 0..4 {
            let mut incident = sample_incident();
            incident.external_id = Some(format!("CA{}", i));
            if i % 2 == 0 {
                incident.status = IncidentStatus::EnRoute;
                incident.assigned_user_id = Some(7);
            }
            store.create_incident(&incident).await.unwrap();
        }

        let filter = IncidentFilter {
            statuses: vec![IncidentStatus::EnRoute],
            ..Default::default()
        };
        let en_route = store.list_incidents(&filter).await.unwrap();
        assert_eq!(en_route.len(), 2);

        let unclaimed = store
            .list_incidents(&IncidentFilter {
                unclaimed_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unclaimed.len(), 2);
        assert!(unclaimed.iter().all(|i| i.assigned_user_id.is_none()));
    }

    #[tokio::test]
    async fn test_ringing_attempt_lookup() {
        let store = InMemoryStore::new();

        let incident_id = store.create_incident(&sample_incident()).await.unwrap();
        let attempt = CallAttempt::ringing(incident_id, 0, 3);
        let attempt_id = store.create_attempt(&attempt).await.unwrap();

        let found = store
            .find_ringing_attempt(incident_id, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, attempt_id);

        let mut finished = found.clone();
        finished.finish(crate::models::CallResult::Missed, None, None);
        store.update_attempt(&finished).await.unwrap();

        assert!(store
            .find_ringing_attempt(incident_id, 3)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_events_ordered_by_id() {
        let store = InMemoryStore::new();

        let incident_id = store.create_incident(&sample_incident()).await.unwrap();
        for tag in ["incident_created", "call_initiated", "call_answered"] {
            let event =
                IncidentEvent::new(incident_id, tag, None, serde_json::json!({}));
            store.append_event(&event).await.unwrap();
        }

        let events = store.events_for_incident(incident_id).await.unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["incident_created", "call_initiated", "call_answered"]
        );
    }

    #[tokio::test]
    async fn test_rotation_state_round_trip() {
        let store = InMemoryStore::new();

        let initial = store.get_rotation_state().await.unwrap();
        assert_eq!(initial.pointer_index, 0);

        let updated = RotationState {
            pointer_index: 3,
            last_used_user_ids: vec![1, 2, 3],
            updated_at: Utc::now(),
        };
        store.set_rotation_state(&updated).await.unwrap();

        let read_back = store.get_rotation_state().await.unwrap();
        assert_eq!(read_back.pointer_index, 3);
        assert_eq!(read_back.last_used_user_ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_user_phone_lookup() {
        let store = InMemoryStore::new();

        let user = User::new("Ana", Some("+14155550100".to_string()), Role::Tech);
        let id = store.create_user(&user).await.unwrap();

        let found = store.find_user_by_phone("+14155550100").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(id));
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let store = InMemoryStore::new();

        assert!(store.get_config("ring_duration").await.unwrap().is_none());
        store
            .set_config("ring_duration", serde_json::json!({ "seconds": 45 }))
            .await
            .unwrap();
        let value = store.get_config("ring_duration").await.unwrap().unwrap();
        assert_eq!(value["seconds"], 45);
    }
}
