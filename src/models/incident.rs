use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// An inbound emergency call tracked to resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Unique identifier
    pub id: i64,

    /// Call identifier from the telephony provider (unique when present)
    pub external_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Business-hours vs after-hours, fixed at creation and never recomputed
    pub period: Period,

    /// Caller identity as reported by telephony (free text, usually a phone)
    pub caller_id: String,

    /// Matched site, if the caller id matched a site rule
    pub site_id: Option<i64>,

    /// Current visible status
    pub status: IncidentStatus,

    /// Assigned technician, set by answer binding or explicit claim
    pub assigned_user_id: Option<i64>,

    /// Set exactly once, when the entire ladder is exhausted unanswered
    pub critical: bool,

    /// A call was answered but nobody claimed within the claim window
    pub answered_unclaimed: bool,

    /// Outcome recorded at close
    pub outcome: Option<Outcome>,

    /// Free-text outcome notes
    pub outcome_notes: Option<String>,

    /// Whether follow-up work remains after close
    pub follow_up_required: bool,

    /// Resolution timestamp
    pub resolved_at: Option<DateTime<Utc>>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Create a new open incident. The id is assigned by the store.
    pub fn new(
        caller_id: String,
        external_id: Option<String>,
        site_id: Option<i64>,
        period: Period,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            external_id,
            created_at: now,
            period,
            caller_id,
            site_id,
            status: IncidentStatus::Open,
            assigned_user_id: None,
            critical: false,
            answered_unclaimed: false,
            outcome: None,
            outcome_notes: None,
            follow_up_required: false,
            resolved_at: None,
            updated_at: now,
        }
    }

    pub fn is_business_hours(&self) -> bool {
        self.period == Period::BusinessHours
    }

    /// Whether the incident has reached a terminal status
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            IncidentStatus::Resolved | IncidentStatus::FollowUpRequired
        ) && self.resolved_at.is_some()
    }

    /// Mark critical. Monotonic: once set it is never cleared.
    pub fn mark_critical(&mut self) {
        self.critical = true;
        self.updated_at = Utc::now();
    }

    pub fn assign(&mut self, user_id: i64) {
        self.assigned_user_id = Some(user_id);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: IncidentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Period {
    BusinessHours,
    AfterHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    EnRoute,
    OnSite,
    Resolved,
    FollowUpRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Nuisance,
    DeviceIssue,
    PanelTrouble,
    Unknown,
    Other,
}

/// One call placed to one candidate for one incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAttempt {
    pub id: i64,
    pub incident_id: i64,

    /// Ladder step index at the time of the attempt, 0-based
    pub step: u32,
    pub target_user_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Ringing while in flight, terminal otherwise
    pub result: CallResult,
    pub decline_reason: Option<DeclineReason>,
    pub decline_reason_text: Option<String>,
}

impl CallAttempt {
    /// Create an in-flight (ringing) attempt. The id is assigned by the store.
    pub fn ringing(incident_id: i64, step: u32, target_user_id: i64) -> Self {
        Self {
            id: 0,
            incident_id,
            step,
            target_user_id,
            started_at: Utc::now(),
            ended_at: None,
            result: CallResult::Ringing,
            decline_reason: None,
            decline_reason_text: None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.result == CallResult::Ringing
    }

    /// Finalize with a terminal result
    pub fn finish(
        &mut self,
        result: CallResult,
        decline_reason: Option<DeclineReason>,
        decline_reason_text: Option<String>,
    ) {
        self.result = result;
        self.decline_reason = decline_reason;
        self.decline_reason_text = decline_reason_text;
        self.ended_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallResult {
    Ringing,
    Answered,
    Missed,
    Declined,
    Timeout,
}

impl CallResult {
    pub fn is_terminal(&self) -> bool {
        *self != CallResult::Ringing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeclineReason {
    Busy,
    AlreadyOnCall,
    OutOfArea,
    Other,
}

/// Append-only audit entry for an incident timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: i64,
    pub incident_id: i64,

    /// Free-form type tag, e.g. "incident_created", "call_initiated"
    pub event_type: String,

    /// Acting user, None for system events
    pub user_id: Option<i64>,
    pub at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl IncidentEvent {
    pub fn new(
        incident_id: i64,
        event_type: impl Into<String>,
        user_id: Option<i64>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            incident_id,
            event_type: event_type.into(),
            user_id,
            at: Utc::now(),
            payload,
        }
    }
}

/// Persisted routing progress so a restart can resume or be audited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingProgress {
    pub incident_id: i64,

    /// Current ladder step index
    pub current_step: u32,

    /// Everyone rung so far for this incident
    pub attempted_user_ids: Vec<i64>,
    pub updated_at: DateTime<Utc>,
}

impl RoutingProgress {
    pub fn start(incident_id: i64) -> Self {
        Self {
            incident_id,
            current_step: 0,
            attempted_user_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
