use crate::error::{AppError, Result};
use crate::models::{
    CallAttempt, Incident, IncidentEvent, RotationState, RoutingProgress, ScheduleEntry, Site,
    User,
};
use crate::state::{DispatchStore, IncidentFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

const ROTATION_KEY: &[u8] = b"rotation";

/// Persistent dispatch store using the Sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    incidents: Tree,
    external_ids: Tree,
    attempts: Tree,
    events: Tree,
    users: Tree,
    sites: Tree,
    schedule: Tree,
    routing_progress: Tree,
    rotation: Tree,
    config: Tree,
}

impl SledStore {
    /// Open (or create) a Sled store at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)
            .map_err(|e| AppError::Storage(format!("Failed to open sled database: {}", e)))?;

        let open = |name: &str| -> Result<Tree> {
            db.open_tree(name)
                .map_err(|e| AppError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };

        let store = Self {
            incidents: open("incidents")?,
            external_ids: open("external_ids")?,
            attempts: open("attempts")?,
            events: open("events")?,
            users: open("users")?,
            sites: open("sites")?,
            schedule: open("schedule")?,
            routing_progress: open("routing_progress")?,
            rotation: open("rotation")?,
            config: open("config")?,
            db: Arc::new(db),
        };

        tracing::info!(path = %path.as_ref().display(), "Initialized sled store");
        Ok(store)
    }

    fn allocate_id(&self) -> Result<i64> {
        let id = self
            .db
            .generate_id()
            .map_err(|e| AppError::Storage(format!("Failed to generate id: {}", e)))?;
        Ok(id as i64 + 1)
    }

    fn key(id: i64) -> [u8; 8] {
        id.to_be_bytes()
    }

    // Records without arbitrary JSON payloads go through bincode.
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| AppError::Serialization(format!("Failed to encode record: {}", e)))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| AppError::Serialization(format!("Failed to decode record: {}", e)))
    }

    // Events and config records carry serde_json::Value payloads, which
    // bincode cannot round-trip, so they are stored as JSON bytes.
    fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| AppError::Serialization(format!("Failed to encode record: {}", e)))
    }

    fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::Serialization(format!("Failed to decode record: {}", e)))
    }

    fn put(tree: &Tree, key: impl AsRef<[u8]>, bytes: Vec<u8>) -> Result<()> {
        tree.insert(key, bytes)
            .map_err(|e| AppError::Storage(format!("Failed to write record: {}", e)))?;
        Ok(())
    }

    fn get_raw(tree: &Tree, key: impl AsRef<[u8]>) -> Result<Option<sled::IVec>> {
        tree.get(key)
            .map_err(|e| AppError::Storage(format!("Failed to read record: {}", e)))
    }

    fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in tree.iter() {
            let (_, bytes) =
                item.map_err(|e| AppError::Storage(format!("Failed to scan tree: {}", e)))?;
            records.push(Self::decode(&bytes)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl DispatchStore for SledStore {
    async fn create_incident(&self, incident: &Incident) -> Result<i64> {
        let id = self.allocate_id()?;
        let mut incident = incident.clone();
        incident.id = id;

        Self::put(&self.incidents, Self::key(id), Self::encode(&incident)?)?;
        if let Some(ref external_id) = incident.external_id {
            Self::put(
                &self.external_ids,
                external_id.as_bytes(),
                Self::key(id).to_vec(),
            )?;
        }

        tracing::debug!(incident_id = id, "Incident created");
        Ok(id)
    }

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>> {
        match Self::get_raw(&self.incidents, Self::key(id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_incident_by_external_id(&self, external_id: &str) -> Result<Option<Incident>> {
        match Self::get_raw(&self.external_ids, external_id.as_bytes())? {
            Some(key) => match Self::get_raw(&self.incidents, key)? {
                Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn update_incident(&self, incident: &Incident) -> Result<()> {
        let key = Self::key(incident.id);
        if Self::get_raw(&self.incidents, key)?.is_none() {
            return Err(AppError::NotFound(format!(
                "Incident {} not found",
                incident.id
            )));
        }
        Self::put(&self.incidents, key, Self::encode(incident)?)?;
        tracing::debug!(incident_id = incident.id, "Incident updated");
        Ok(())
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = Self::scan::<Incident>(&self.incidents)?
            .into_iter()
            .filter(|incident| filter.matches(incident))
            .collect();

        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(incidents)
    }

    async fn create_attempt(&self, attempt: &CallAttempt) -> Result<i64> {
        let id = self.allocate_id()?;
        let mut attempt = attempt.clone();
        attempt.id = id;
        Self::put(&self.attempts, Self::key(id), Self::encode(&attempt)?)?;
        Ok(id)
    }

    async fn update_attempt(&self, attempt: &CallAttempt) -> Result<()> {
        let key = Self::key(attempt.id);
        if Self::get_raw(&self.attempts, key)?.is_none() {
            return Err(AppError::NotFound(format!(
                "Call attempt {} not found",
                attempt.id
            )));
        }
        Self::put(&self.attempts, key, Self::encode(attempt)?)?;
        Ok(())
    }

    async fn attempts_for_incident(&self, incident_id: i64) -> Result<Vec<CallAttempt>> {
        let mut attempts: Vec<CallAttempt> = Self::scan::<CallAttempt>(&self.attempts)?
            .into_iter()
            .filter(|a| a.incident_id == incident_id)
            .collect();

        attempts.sort_by_key(|a| a.id);
        Ok(attempts)
    }

    async fn find_ringing_attempt(
        &self,
        incident_id: i64,
        user_id: i64,
    ) -> Result<Option<CallAttempt>> {
        Ok(Self::scan::<CallAttempt>(&self.attempts)?
            .into_iter()
            .find(|a| {
                a.incident_id == incident_id && a.target_user_id == user_id && a.is_in_flight()
            }))
    }

    async fn append_event(&self, event: &IncidentEvent) -> Result<i64> {
        let id = self.allocate_id()?;
        let mut event = event.clone();
        event.id = id;
        Self::put(&self.events, Self::key(id), Self::encode_json(&event)?)?;
        Ok(id)
    }

    async fn events_for_incident(&self, incident_id: i64) -> Result<Vec<IncidentEvent>> {
        let mut events = Vec::new();
        for item in self.events.iter() {
            let (_, bytes) =
                item.map_err(|e| AppError::Storage(format!("Failed to scan events: {}", e)))?;
            let event: IncidentEvent = Self::decode_json(&bytes)?;
            if event.incident_id == incident_id {
                events.push(event);
            }
        }
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn create_user(&self, user: &User) -> Result<i64> {
        let id = self.allocate_id()?;
        let mut user = user.clone();
        user.id = id;
        Self::put(&self.users, Self::key(id), Self::encode(&user)?)?;
        Ok(id)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        match Self::get_raw(&self.users, Self::key(id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        Ok(Self::scan::<User>(&self.users)?
            .into_iter()
            .find(|u| u.phone.as_deref() == Some(phone)))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users = Self::scan::<User>(&self.users)?;
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let key = Self::key(user.id);
        if Self::get_raw(&self.users, key)?.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", user.id)));
        }
        Self::put(&self.users, key, Self::encode(user)?)?;
        Ok(())
    }

    async fn create_site(&self, site: &Site) -> Result<i64> {
        let id = self.allocate_id()?;
        let mut site = site.clone();
        site.id = id;
        Self::put(&self.sites, Self::key(id), Self::encode(&site)?)?;
        Ok(id)
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        let mut sites = Self::scan::<Site>(&self.sites)?;
        sites.sort_by_key(|s| s.id);
        Ok(sites)
    }

    async fn create_schedule_entry(&self, entry: &ScheduleEntry) -> Result<i64> {
        let id = self.allocate_id()?;
        let mut entry = entry.clone();
        entry.id = id;
        Self::put(&self.schedule, Self::key(id), Self::encode(&entry)?)?;
        Ok(id)
    }

    async fn schedule_entries_active_at(&self, at: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        let mut entries: Vec<ScheduleEntry> = Self::scan::<ScheduleEntry>(&self.schedule)?
            .into_iter()
            .filter(|e| e.is_active_at(at))
            .collect();

        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn get_rotation_state(&self) -> Result<RotationState> {
        match Self::get_raw(&self.rotation, ROTATION_KEY)? {
            Some(bytes) => Self::decode(&bytes),
            None => Ok(RotationState::default()),
        }
    }

    async fn set_rotation_state(&self, state: &RotationState) -> Result<()> {
        Self::put(&self.rotation, ROTATION_KEY, Self::encode(state)?)
    }

    async fn get_routing_progress(&self, incident_id: i64) -> Result<Option<RoutingProgress>> {
        match Self::get_raw(&self.routing_progress, Self::key(incident_id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_routing_progress(&self, progress: &RoutingProgress) -> Result<()> {
        Self::put(
            &self.routing_progress,
            Self::key(progress.incident_id),
            Self::encode(progress)?,
        )
    }

    async fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match Self::get_raw(&self.config, key.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_json(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_config(&self, key: &str, value: serde_json::Value) -> Result<()> {
        Self::put(&self.config, key.as_bytes(), Self::encode_json(&value)?)
    }
}
