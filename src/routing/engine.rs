use crate::error::{AppError, Result};
use crate::models::{
    CallAttempt, CallResult, DeclineReason, Incident, IncidentEvent, IncidentStatus, LadderStep,
    Outcome, RoutingProgress, User,
};
use crate::routing::hours;
use crate::routing::schedule::ScheduleResolver;
use crate::routing::settings::RuntimeSettings;
use crate::state::DispatchStore;
use crate::telephony::{PlacedCall, TelephonyGateway};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Drives an incident through the escalation ladder.
///
/// Every read-modify-write on an incident happens under that incident's
/// mutex, so concurrent telephony callbacks and client mutations are
/// serialized per incident. Ladder advancement is an explicit bounded loop
/// over step indices; exhaustion marks the incident critical exactly once
/// and leaves it Open.
pub struct EscalationEngine {
    store: Arc<dyn DispatchStore>,
    gateway: Arc<dyn TelephonyGateway>,
    resolver: ScheduleResolver,
    settings: RuntimeSettings,
    incident_locks: DashMap<i64, Arc<Mutex<()>>>,
    intake_locks: DashMap<String, Arc<Mutex<()>>>,
    claim_timers: DashMap<i64, JoinHandle<()>>,
    claim_window: Duration,

    // back-reference for the claim-timer tasks
    self_ref: std::sync::Weak<Self>,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        gateway: Arc<dyn TelephonyGateway>,
        claim_window: Duration,
    ) -> Arc<Self> {
        let rotation = Arc::new(crate::routing::rotation::RotationTracker::new(store.clone()));
        let resolver = ScheduleResolver::new(store.clone(), rotation);
        let settings = RuntimeSettings::new(store.clone());
        Arc::new_cyclic(|self_ref| Self {
            store,
            gateway,
            resolver,
            settings,
            incident_locks: DashMap::new(),
            intake_locks: DashMap::new(),
            claim_timers: DashMap::new(),
            claim_window,
            self_ref: self_ref.clone(),
        })
    }

    async fn lock_incident(&self, incident_id: i64) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .incident_locks
            .entry(incident_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Serializes the lookup-then-create window for retried webhooks
    /// carrying the same external call id.
    async fn lock_intake(&self, external_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .intake_locks
            .entry(external_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn require_incident(&self, incident_id: i64) -> Result<Incident> {
        self.store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("incident {}", incident_id)))
    }

    async fn require_progress(&self, incident_id: i64) -> Result<RoutingProgress> {
        Ok(self
            .store
            .get_routing_progress(incident_id)
            .await?
            .unwrap_or_else(|| RoutingProgress::start(incident_id)))
    }

    async fn record_event(
        &self,
        incident_id: i64,
        event_type: &str,
        user_id: Option<i64>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let event = IncidentEvent::new(incident_id, event_type, user_id, payload);
        self.store.append_event(&event).await?;
        Ok(())
    }

    async fn has_ringing_attempts(&self, incident_id: i64) -> Result<bool> {
        Ok(self
            .store
            .attempts_for_incident(incident_id)
            .await?
            .iter()
            .any(|a| a.is_in_flight()))
    }

    fn cancel_claim_timer(&self, incident_id: i64) {
        if let Some((_, handle)) = self.claim_timers.remove(&incident_id) {
            handle.abort();
        }
    }

    // ----- inbound telephony -----

    /// Register an inbound emergency call and start routing it.
    ///
    /// Idempotent on `external_id`: a retried webhook for a call already
    /// registered returns the existing incident without ringing anyone
    /// again.
    pub async fn on_incoming_call(
        &self,
        caller_id: String,
        external_id: Option<String>,
    ) -> Result<Incident> {
        let _intake_guard = match external_id {
            Some(ref ext) => Some(self.lock_intake(ext).await),
            None => None,
        };

        if let Some(ref ext) = external_id {
            if let Some(existing) = self.store.find_incident_by_external_id(ext).await? {
                info!(
                    incident_id = existing.id,
                    external_id = %ext,
                    "Duplicate incoming-call webhook, returning existing incident"
                );
                return Ok(existing);
            }
        }

        let site_id = self.match_site(&caller_id).await?;

        let window = self.settings.business_hours().await?;
        let period = hours::classify_period(&window, Utc::now());

        let mut incident = Incident::new(caller_id.clone(), external_id, site_id, period);
        let incident_id = self.store.create_incident(&incident).await?;
        incident.id = incident_id;

        info!(
            incident_id,
            caller_id = %caller_id,
            period = %period,
            site_id = ?site_id,
            "Incident created from incoming call"
        );

        self.record_event(
            incident_id,
            "incident_created",
            None,
            json!({ "caller_id": caller_id, "period": period, "site_id": site_id }),
        )
        .await?;

        let _guard = self.lock_incident(incident_id).await;
        let mut progress = RoutingProgress::start(incident_id);
        self.advance(&mut incident, &mut progress, 0).await?;

        Ok(incident)
    }

    /// First matching site rule wins; unmatched callers route site-less.
    async fn match_site(&self, caller_id: &str) -> Result<Option<i64>> {
        for site in self.store.list_sites().await? {
            if site.matches_caller(caller_id) {
                return Ok(Some(site.id));
            }
        }
        Ok(None)
    }

    /// A rung target picked up. First answer wins the assignment; later
    /// answers in a fan-out step only close out their own attempt.
    pub async fn on_answered(&self, incident_id: i64, user_id: i64) -> Result<Incident> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        let mut attempt = self
            .store
            .find_ringing_attempt(incident_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no ringing attempt for user {} on incident {}",
                    user_id, incident_id
                ))
            })?;
        attempt.finish(CallResult::Answered, None, None);
        self.store.update_attempt(&attempt).await?;

        if incident.assigned_user_id.is_some() {
            info!(
                incident_id,
                user_id, "Late answer on already-assigned incident"
            );
            self.record_event(
                incident_id,
                "call_answered",
                Some(user_id),
                json!({ "attempt_id": attempt.id, "assigned": false }),
            )
            .await?;
            return Ok(incident);
        }

        incident.assign(user_id);
        incident.set_status(IncidentStatus::EnRoute);
        self.store.update_incident(&incident).await?;

        info!(incident_id, user_id, "Call answered, incident assigned");
        self.record_event(
            incident_id,
            "call_answered",
            Some(user_id),
            json!({ "attempt_id": attempt.id, "assigned": true }),
        )
        .await?;

        self.start_claim_timer(incident_id, user_id);
        Ok(incident)
    }

    /// A rung target's call ended without an answer (missed, declined at
    /// the handset, or timed out). Finalizes the attempt; advancement only
    /// resumes once no attempt for the incident is still ringing.
    pub async fn on_terminal_result(
        &self,
        incident_id: i64,
        user_id: i64,
        result: CallResult,
        decline_reason: Option<DeclineReason>,
        decline_reason_text: Option<String>,
    ) -> Result<()> {
        if !result.is_terminal() || result == CallResult::Answered {
            return Err(AppError::Validation(format!(
                "attempt result must be a terminal non-answer, got {}",
                result
            )));
        }

        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        let mut attempt = self
            .store
            .find_ringing_attempt(incident_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no ringing attempt for user {} on incident {}",
                    user_id, incident_id
                ))
            })?;
        attempt.finish(result, decline_reason, decline_reason_text.clone());
        self.store.update_attempt(&attempt).await?;

        info!(
            incident_id,
            user_id,
            result = %result,
            "Call attempt finished without answer"
        );
        self.record_event(
            incident_id,
            "call_attempt_failed",
            Some(user_id),
            json!({
                "attempt_id": attempt.id,
                "result": result,
                "decline_reason": decline_reason,
                "decline_reason_text": decline_reason_text,
            }),
        )
        .await?;

        if incident.is_closed() || incident.assigned_user_id.is_some() {
            return Ok(());
        }
        if self.has_ringing_attempts(incident_id).await? {
            return Ok(());
        }

        let mut progress = self.require_progress(incident_id).await?;
        let step = progress.current_step;
        self.advance(&mut incident, &mut progress, step).await
    }

    // ----- client mutations -----

    /// Claim the incident. Re-invocation by a different user reassigns.
    pub async fn accept(&self, incident_id: i64, user_id: i64) -> Result<Incident> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        let previous = incident.assigned_user_id;
        incident.assign(user_id);
        self.store.update_incident(&incident).await?;
        self.cancel_claim_timer(incident_id);

        info!(incident_id, user_id, previous = ?previous, "Incident accepted");
        self.record_event(
            incident_id,
            "incident_accepted",
            Some(user_id),
            json!({ "previous_user_id": previous }),
        )
        .await?;

        Ok(incident)
    }

    /// Turn the incident down. Releases the assignment if the actor held
    /// it, then pushes routing onward so the emergency is not left parked.
    pub async fn decline(
        &self,
        incident_id: i64,
        user_id: i64,
        reason: Option<DeclineReason>,
        reason_text: Option<String>,
    ) -> Result<Incident> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        if let Some(mut attempt) = self.store.find_ringing_attempt(incident_id, user_id).await? {
            attempt.finish(CallResult::Declined, reason, reason_text.clone());
            self.store.update_attempt(&attempt).await?;
        }

        if incident.assigned_user_id == Some(user_id) {
            incident.assigned_user_id = None;
            incident.set_status(IncidentStatus::Open);
            self.store.update_incident(&incident).await?;
            self.cancel_claim_timer(incident_id);
        }

        info!(incident_id, user_id, reason = ?reason, "Incident declined");
        self.record_event(
            incident_id,
            "incident_declined",
            Some(user_id),
            json!({ "reason": reason, "reason_text": reason_text }),
        )
        .await?;

        // Same resume condition as a terminal telephony result: another
        // assignee or an attempt still ringing means routing is not stalled.
        if incident.assigned_user_id.is_some() || self.has_ringing_attempts(incident_id).await? {
            return Ok(incident);
        }

        let mut progress = self.require_progress(incident_id).await?;
        if !progress.attempted_user_ids.contains(&user_id) {
            progress.attempted_user_ids.push(user_id);
        }
        let step = progress.current_step;
        self.advance(&mut incident, &mut progress, step).await?;

        Ok(incident)
    }

    /// Dispatcher override: hand the incident to a specific user.
    pub async fn manual_assign(
        &self,
        incident_id: i64,
        target_user_id: i64,
        acting_user_id: i64,
    ) -> Result<Incident> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        self.store
            .get_user(target_user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", target_user_id)))?;

        incident.assign(target_user_id);
        self.store.update_incident(&incident).await?;
        self.cancel_claim_timer(incident_id);

        info!(
            incident_id,
            target_user_id, acting_user_id, "Incident manually assigned"
        );
        self.record_event(
            incident_id,
            "manual_assignment",
            Some(acting_user_id),
            json!({ "assigned_user_id": target_user_id }),
        )
        .await?;

        Ok(incident)
    }

    /// Dispatcher override: rerun the ladder from the top. The attempted
    /// set is reset, so users rung earlier may ring again.
    pub async fn manual_escalate(
        &self,
        incident_id: i64,
        acting_user_id: i64,
    ) -> Result<Incident> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        info!(incident_id, acting_user_id, "Manual escalation requested");
        self.record_event(incident_id, "manual_escalation", Some(acting_user_id), json!({}))
            .await?;

        let mut progress = RoutingProgress::start(incident_id);
        self.advance(&mut incident, &mut progress, 0).await?;

        Ok(incident)
    }

    /// Field status updates from the assigned tech. Resolution goes
    /// through `close`, not here.
    pub async fn update_status(
        &self,
        incident_id: i64,
        user_id: i64,
        status: IncidentStatus,
    ) -> Result<Incident> {
        if matches!(
            status,
            IncidentStatus::Resolved | IncidentStatus::FollowUpRequired
        ) {
            return Err(AppError::InvalidTransition(
                "close the incident to resolve it".to_string(),
            ));
        }

        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        let from = incident.status;
        incident.set_status(status);
        self.store.update_incident(&incident).await?;

        info!(incident_id, user_id, from = %from, to = %status, "Incident status updated");
        self.record_event(
            incident_id,
            "status_changed",
            Some(user_id),
            json!({ "from": from, "to": status }),
        )
        .await?;

        Ok(incident)
    }

    /// Close the incident with an outcome. Re-closing is rejected.
    pub async fn close(
        &self,
        incident_id: i64,
        user_id: i64,
        outcome: Outcome,
        outcome_notes: Option<String>,
        follow_up_required: bool,
    ) -> Result<Incident> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self.require_incident(incident_id).await?;

        if incident.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "incident {} is already closed",
                incident_id
            )));
        }

        incident.outcome = Some(outcome);
        incident.outcome_notes = outcome_notes.clone();
        incident.follow_up_required = follow_up_required;
        incident.resolved_at = Some(Utc::now());
        incident.set_status(if follow_up_required {
            IncidentStatus::FollowUpRequired
        } else {
            IncidentStatus::Resolved
        });
        self.store.update_incident(&incident).await?;
        self.cancel_claim_timer(incident_id);

        info!(
            incident_id,
            user_id,
            outcome = %outcome,
            follow_up_required,
            "Incident closed"
        );
        self.record_event(
            incident_id,
            "incident_closed",
            Some(user_id),
            json!({
                "outcome": outcome,
                "notes": outcome_notes,
                "follow_up_required": follow_up_required,
            }),
        )
        .await?;

        Ok(incident)
    }

    // ----- ladder advancement -----

    /// Walk the ladder from `start_step` until a step yields at least one
    /// dispatchable target or the ladder runs out. Callers must hold the
    /// incident lock.
    async fn advance(
        &self,
        incident: &mut Incident,
        progress: &mut RoutingProgress,
        start_step: u32,
    ) -> Result<()> {
        let ladder = self.settings.ladder(incident.period).await?;
        let steps = ladder.resolved_steps();
        let ring_seconds = self.settings.ring_duration().await?.seconds;

        let mut step = start_step;
        while (step as usize) < steps.len() {
            let step_kind = &steps[step as usize];
            let candidate_ids = self
                .resolver
                .resolve_candidates(step_kind, Utc::now(), &progress.attempted_user_ids)
                .await?;

            let mut targets: Vec<User> = Vec::new();
            for id in candidate_ids {
                match self.store.get_user(id).await? {
                    Some(user) if user.is_dispatchable() => targets.push(user),
                    Some(user) => {
                        info!(
                            incident_id = incident.id,
                            user_id = user.id,
                            step = step,
                            "Skipping non-dispatchable candidate"
                        );
                    }
                    None => {
                        warn!(
                            incident_id = incident.id,
                            user_id = id,
                            "Candidate user no longer exists"
                        );
                    }
                }
            }
            if !step_kind.is_fan_out() {
                targets.truncate(1);
            }

            if targets.is_empty() {
                step += 1;
                continue;
            }

            progress.current_step = step;
            for user in &targets {
                progress.attempted_user_ids.push(user.id);
            }
            progress.updated_at = Utc::now();
            self.store.set_routing_progress(progress).await?;

            for user in targets {
                self.dispatch_call(incident, step, step_kind, &user, ring_seconds)
                    .await?;
            }
            return Ok(());
        }

        progress.current_step = step;
        progress.updated_at = Utc::now();
        self.store.set_routing_progress(progress).await?;

        if !incident.critical {
            incident.mark_critical();
            self.store.update_incident(incident).await?;
            warn!(
                incident_id = incident.id,
                attempted = progress.attempted_user_ids.len(),
                "Escalation ladder exhausted with no answer"
            );
            self.record_event(
                incident.id,
                "unanswered_emergency",
                None,
                json!({ "attempted_user_ids": progress.attempted_user_ids }),
            )
            .await?;
        }
        Ok(())
    }

    /// Ring one target: record the attempt, then hand the call to the
    /// gateway without waiting on it.
    async fn dispatch_call(
        &self,
        incident: &Incident,
        step: u32,
        step_kind: &LadderStep,
        user: &User,
        ring_seconds: u32,
    ) -> Result<()> {
        let phone = match user.phone.clone() {
            Some(phone) => phone,
            None => {
                warn!(
                    incident_id = incident.id,
                    user_id = user.id,
                    "Dispatch target has no phone, skipping"
                );
                return Ok(());
            }
        };

        let mut attempt = CallAttempt::ringing(incident.id, step, user.id);
        let attempt_id = self.store.create_attempt(&attempt).await?;
        attempt.id = attempt_id;

        self.record_event(
            incident.id,
            "call_initiated",
            None,
            json!({
                "attempt_id": attempt_id,
                "step": step,
                "step_name": step_kind.name(),
                "user_id": user.id,
            }),
        )
        .await?;

        let call = PlacedCall {
            incident_id: incident.id,
            attempt_id,
            step,
            step_name: step_kind.name().to_string(),
            user_id: user.id,
            user_name: user.name.clone(),
            phone,
            ring_seconds,
        };

        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.place_call(&call).await {
                error!(
                    incident_id = call.incident_id,
                    attempt_id = call.attempt_id,
                    error = %e,
                    "Failed to place outbound call"
                );
            }
        });
        Ok(())
    }

    // ----- claim window -----

    fn start_claim_timer(&self, incident_id: i64, user_id: i64) {
        self.cancel_claim_timer(incident_id);

        let engine = match self.self_ref.upgrade() {
            Some(engine) => engine,
            None => return,
        };
        let window = self.claim_window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(e) = engine.expire_claim_window(incident_id, user_id).await {
                error!(incident_id, error = %e, "Claim-window expiry handling failed");
            }
        });
        self.claim_timers.insert(incident_id, handle);
    }

    async fn expire_claim_window(&self, incident_id: i64, user_id: i64) -> Result<()> {
        let _guard = self.lock_incident(incident_id).await;
        self.claim_timers.remove(&incident_id);

        let mut incident = self.require_incident(incident_id).await?;
        if incident.is_closed() || incident.assigned_user_id != Some(user_id) {
            return Ok(());
        }

        incident.answered_unclaimed = true;
        incident.updated_at = Utc::now();
        self.store.update_incident(&incident).await?;

        warn!(
            incident_id,
            user_id, "Answered call never claimed within the window"
        );
        self.record_event(
            incident_id,
            "answered_unclaimed",
            Some(user_id),
            json!({ "claim_window_secs": self.claim_window.as_secs() }),
        )
        .await?;
        Ok(())
    }
}
