//! End-to-end escalation scenarios driven through the engine against the
//! in-memory store and a recording telephony gateway.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use oncall_dispatch::error::Result;
use oncall_dispatch::models::{
    keys, CallResult, IncidentStatus, LadderConfig, Outcome, Role, ScheduleEntry, User,
};
use oncall_dispatch::routing::EscalationEngine;
use oncall_dispatch::state::{DispatchStore, InMemoryStore};
use oncall_dispatch::telephony::{PlacedCall, TelephonyGateway};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Gateway that records every placed call instead of dialing
struct RecordingGateway {
    calls: Mutex<Vec<PlacedCall>>,
}

impl RecordingGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn placed(&self) -> Vec<PlacedCall> {
        self.calls.lock().clone()
    }

    fn placed_user_ids(&self) -> Vec<i64> {
        self.calls.lock().iter().map(|c| c.user_id).collect()
    }
}

#[async_trait]
impl TelephonyGateway for RecordingGateway {
    async fn place_call(&self, call: &PlacedCall) -> Result<()> {
        self.calls.lock().push(call.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<RecordingGateway>,
    engine: Arc<EscalationEngine>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = RecordingGateway::new();
    let engine = EscalationEngine::new(store.clone(), gateway.clone(), Duration::from_secs(90));
    Harness {
        store,
        gateway,
        engine,
    }
}

async fn add_user(store: &InMemoryStore, name: &str, phone: &str, role: Role) -> i64 {
    let user = User::new(name, Some(phone.to_string()), role);
    store.create_user(&user).await.unwrap()
}

async fn add_schedule(
    store: &InMemoryStore,
    user_id: i64,
    primary: bool,
    secondary: bool,
    pool: bool,
) {
    let now = Utc::now();
    let mut entry = ScheduleEntry::new(
        user_id,
        now - ChronoDuration::hours(1),
        now + ChronoDuration::hours(12),
    );
    entry.is_primary = primary;
    entry.is_secondary = secondary;
    entry.pool_eligible = pool;
    store.create_schedule_entry(&entry).await.unwrap();
}

/// Pin both ladders so the scenario does not depend on the wall clock.
async fn set_both_ladders(store: &InMemoryStore, steps: &[&str]) {
    let ladder = LadderConfig {
        steps: steps.iter().map(|s| s.to_string()).collect(),
    };
    let value = serde_json::to_value(&ladder).unwrap();
    store
        .set_config(keys::BUSINESS_HOURS_LADDER, value.clone())
        .await
        .unwrap();
    store
        .set_config(keys::AFTER_HOURS_LADDER, value)
        .await
        .unwrap();
}

async fn settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_full_ladder_walk_ends_at_broadcast() {
    let h = harness();
    set_both_ladders(
        &h.store,
        &["primary_oncall", "secondary", "admin", "manager", "broadcast"],
    )
    .await;

    let primary = add_user(&h.store, "Primary", "+14155550001", Role::Tech).await;
    let secondary = add_user(&h.store, "Secondary", "+14155550002", Role::Tech).await;
    let admin = add_user(&h.store, "Admin", "+14155550003", Role::Admin).await;
    let manager_a = add_user(&h.store, "Manager A", "+14155550004", Role::Manager).await;
    let manager_b = add_user(&h.store, "Manager B", "+14155550005", Role::Manager).await;
    add_schedule(&h.store, primary, true, false, false).await;
    add_schedule(&h.store, secondary, false, true, false).await;

    let incident = h
        .engine
        .on_incoming_call("+14155559999".to_string(), Some("CA100".to_string()))
        .await
        .unwrap();
    settle().await;

    for user in [primary, secondary, admin, manager_a] {
        h.engine
            .on_terminal_result(incident.id, user, CallResult::Missed, None, None)
            .await
            .unwrap();
        settle().await;
    }

    // broadcast reaches the one admin/manager not yet attempted
    assert_eq!(
        h.gateway.placed_user_ids(),
        vec![primary, secondary, admin, manager_a, manager_b]
    );

    let updated = h.engine.on_answered(incident.id, manager_b).await.unwrap();
    assert_eq!(updated.assigned_user_id, Some(manager_b));
    assert_eq!(updated.status, IncidentStatus::EnRoute);

    let after = h.store.get_incident(incident.id).await.unwrap().unwrap();
    assert!(!after.critical);
}

#[tokio::test]
async fn test_exhaustion_is_flagged_exactly_once() {
    let h = harness();
    set_both_ladders(&h.store, &["primary_oncall", "admin"]).await;

    let primary = add_user(&h.store, "Primary", "+14155550001", Role::Tech).await;
    let admin = add_user(&h.store, "Admin", "+14155550002", Role::Admin).await;
    add_schedule(&h.store, primary, true, false, false).await;

    let incident = h
        .engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;

    h.engine
        .on_terminal_result(incident.id, primary, CallResult::Timeout, None, None)
        .await
        .unwrap();
    settle().await;
    h.engine
        .on_terminal_result(incident.id, admin, CallResult::Missed, None, None)
        .await
        .unwrap();

    let after = h.store.get_incident(incident.id).await.unwrap().unwrap();
    assert!(after.critical);
    assert_eq!(after.status, IncidentStatus::Open);
    assert_eq!(after.assigned_user_id, None);

    let events = h.store.events_for_incident(incident.id).await.unwrap();
    let unanswered = events
        .iter()
        .filter(|e| e.event_type == "unanswered_emergency")
        .count();
    assert_eq!(unanswered, 1);

    // nobody was rung twice
    let ids = h.gateway.placed_user_ids();
    assert_eq!(ids, vec![primary, admin]);
}

#[tokio::test]
async fn test_rotating_pool_wraps_across_incidents() {
    let h = harness();
    set_both_ladders(&h.store, &["rotating_pool"]).await;

    let mut pool = Vec::new();
    for i in 0..5 {
        let id = add_user(
            &h.store,
            &format!("Pool {}", i),
            &format!("+1415555010{}", i),
            Role::Tech,
        )
        .await;
        add_schedule(&h.store, id, false, false, true).await;
        pool.push(id);
    }

    let first = h
        .engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;
    assert_eq!(
        h.gateway.placed_user_ids(),
        vec![pool[0], pool[1], pool[2]],
        "first incident takes the first three pool members"
    );

    // stop the first incident so its attempts do not interfere
    h.engine
        .close(first.id, pool[0], Outcome::Nuisance, None, false)
        .await
        .unwrap();

    h.engine
        .on_incoming_call("+14155558888".to_string(), None)
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        h.gateway.placed_user_ids(),
        vec![pool[0], pool[1], pool[2], pool[3], pool[4], pool[0]],
        "second incident wraps the pointer past the end of the pool"
    );
}

#[tokio::test]
async fn test_decline_during_fanout_waits_for_ringing_attempts() {
    let h = harness();
    set_both_ladders(&h.store, &["rotating_pool"]).await;

    let mut pool = Vec::new();
    for i in 0..3 {
        let id = add_user(
            &h.store,
            &format!("Pool {}", i),
            &format!("+1415555020{}", i),
            Role::Tech,
        )
        .await;
        add_schedule(&h.store, id, false, false, true).await;
        pool.push(id);
    }

    let incident = h
        .engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.gateway.placed_user_ids(), vec![pool[0], pool[1], pool[2]]);

    // one pool member turns it down while the other two phones still ring
    h.engine
        .decline(incident.id, pool[0], None, None)
        .await
        .unwrap();
    settle().await;

    let after = h.store.get_incident(incident.id).await.unwrap().unwrap();
    assert!(!after.critical, "ladder must not exhaust mid fan-out");
    assert_eq!(
        h.gateway.placed_user_ids().len(),
        3,
        "no extra dispatches while the step is still ringing"
    );
    let ringing = h
        .store
        .attempts_for_incident(incident.id)
        .await
        .unwrap()
        .iter()
        .filter(|a| a.is_in_flight())
        .count();
    assert_eq!(ringing, 2);

    // a late answer still claims the incident cleanly
    let answered = h.engine.on_answered(incident.id, pool[1]).await.unwrap();
    assert_eq!(answered.assigned_user_id, Some(pool[1]));
    assert!(!answered.critical);

    // the final terminal result arrives after assignment; nothing advances
    h.engine
        .on_terminal_result(incident.id, pool[2], CallResult::Missed, None, None)
        .await
        .unwrap();
    let settled = h.store.get_incident(incident.id).await.unwrap().unwrap();
    assert!(!settled.critical);
    assert_eq!(settled.status, IncidentStatus::EnRoute);
}

#[tokio::test]
async fn test_decline_of_last_ringing_attempt_exhausts_ladder() {
    let h = harness();
    set_both_ladders(&h.store, &["primary_oncall"]).await;

    let primary = add_user(&h.store, "Primary", "+14155550001", Role::Tech).await;
    add_schedule(&h.store, primary, true, false, false).await;

    let incident = h
        .engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;

    // nothing else is ringing, so the decline resumes the walk immediately
    h.engine
        .decline(incident.id, primary, None, None)
        .await
        .unwrap();

    let after = h.store.get_incident(incident.id).await.unwrap().unwrap();
    assert!(after.critical);
    assert_eq!(after.status, IncidentStatus::Open);
}

#[tokio::test]
async fn test_accept_onsite_close_lifecycle() {
    let h = harness();
    set_both_ladders(&h.store, &["primary_oncall"]).await;

    let primary = add_user(&h.store, "Primary", "+14155550001", Role::Tech).await;
    add_schedule(&h.store, primary, true, false, false).await;

    let incident = h
        .engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;

    h.engine.on_answered(incident.id, primary).await.unwrap();
    h.engine.accept(incident.id, primary).await.unwrap();
    h.engine
        .update_status(incident.id, primary, IncidentStatus::OnSite)
        .await
        .unwrap();
    let closed = h
        .engine
        .close(
            incident.id,
            primary,
            Outcome::DeviceIssue,
            Some("replaced the sensor".to_string()),
            false,
        )
        .await
        .unwrap();

    assert_eq!(closed.status, IncidentStatus::Resolved);
    assert!(closed.resolved_at.is_some());
    assert!(!closed.answered_unclaimed);

    let events = h.store.events_for_incident(incident.id).await.unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "incident_created",
            "call_initiated",
            "call_answered",
            "incident_accepted",
            "status_changed",
            "incident_closed",
        ]
    );

    // the ledger survives closing; re-close is rejected
    let err = h
        .engine
        .close(incident.id, primary, Outcome::Other, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.status_code().as_u16(), 409);
}

#[tokio::test]
async fn test_ring_duration_clamp_reaches_gateway() {
    let h = harness();
    set_both_ladders(&h.store, &["primary_oncall"]).await;
    h.store
        .set_config(keys::RING_DURATION, serde_json::json!({ "seconds": 5 }))
        .await
        .unwrap();

    let primary = add_user(&h.store, "Primary", "+14155550001", Role::Tech).await;
    add_schedule(&h.store, primary, true, false, false).await;

    h.engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;

    let calls = h.gateway.placed();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ring_seconds, 10, "below-range values clamp up");
    assert_eq!(calls[0].step_name, "primary_oncall");
}

#[tokio::test]
async fn test_unavailable_users_are_skipped_at_dispatch() {
    let h = harness();
    set_both_ladders(&h.store, &["primary_oncall", "admin"]).await;

    let primary = add_user(&h.store, "Primary", "+14155550001", Role::Tech).await;
    add_schedule(&h.store, primary, true, false, false).await;
    let mut user = h.store.get_user(primary).await.unwrap().unwrap();
    user.available = false;
    h.store.update_user(&user).await.unwrap();

    let admin = add_user(&h.store, "Admin", "+14155550002", Role::Admin).await;

    h.engine
        .on_incoming_call("+14155559999".to_string(), None)
        .await
        .unwrap();
    settle().await;

    assert_eq!(h.gateway.placed_user_ids(), vec![admin]);
}
