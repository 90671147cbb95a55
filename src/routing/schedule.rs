use crate::error::Result;
use crate::models::{LadderStep, Role, ScheduleEntry, User};
use crate::routing::rotation::RotationTracker;
use crate::state::DispatchStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Resolves a ladder step into the ordered candidate user ids for a
/// point in time.
///
/// Every query excludes users already rung for the incident. Ordering is
/// deterministic (ascending user id; schedule-backed steps by entry id)
/// so routing decisions are reproducible. An unknown step name resolves
/// to zero candidates; the engine treats that as a skippable step, not an
/// error.
pub struct ScheduleResolver {
    store: Arc<dyn DispatchStore>,
    rotation: Arc<RotationTracker>,
}

impl ScheduleResolver {
    pub fn new(store: Arc<dyn DispatchStore>, rotation: Arc<RotationTracker>) -> Self {
        Self { store, rotation }
    }

    pub async fn resolve_candidates(
        &self,
        step: &LadderStep,
        at: DateTime<Utc>,
        excluded_user_ids: &[i64],
    ) -> Result<Vec<i64>> {
        let candidates = match step {
            LadderStep::Primary => {
                self.scheduled_user(at, |entry| entry.is_primary, excluded_user_ids)
                    .await?
            }
            LadderStep::Secondary => {
                self.scheduled_user(at, |entry| entry.is_secondary, excluded_user_ids)
                    .await?
            }
            LadderStep::Admin => {
                let mut admins = self
                    .active_users_with_roles(&[Role::Admin], excluded_user_ids)
                    .await?;
                admins.truncate(1);
                admins
            }
            LadderStep::Manager => {
                self.active_users_with_roles(&[Role::Manager], excluded_user_ids)
                    .await?
            }
            LadderStep::Broadcast => {
                self.active_users_with_roles(&[Role::Admin, Role::Manager], excluded_user_ids)
                    .await?
            }
            LadderStep::RotatingPool => {
                self.rotation.next_from_pool(excluded_user_ids, at).await?
            }
            LadderStep::Unknown(name) => {
                tracing::warn!(step = %name, "Unknown ladder step, resolving to no candidates");
                Vec::new()
            }
        };

        Ok(candidates)
    }

    /// At most one user from the schedule entry active at `at` with the
    /// matching role flag, lowest entry id first.
    async fn scheduled_user(
        &self,
        at: DateTime<Utc>,
        flag: impl Fn(&ScheduleEntry) -> bool,
        excluded_user_ids: &[i64],
    ) -> Result<Vec<i64>> {
        let user = self
            .store
            .schedule_entries_active_at(at)
            .await?
            .into_iter()
            .filter(|entry| flag(entry) && !excluded_user_ids.contains(&entry.user_id))
            .map(|entry| entry.user_id)
            .next();

        Ok(user.into_iter().collect())
    }

    /// All active users holding one of the given roles, ascending user id
    async fn active_users_with_roles(
        &self,
        roles: &[Role],
        excluded_user_ids: &[i64],
    ) -> Result<Vec<i64>> {
        let users: Vec<i64> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|user: &User| {
                user.active
                    && roles.contains(&user.role)
                    && !excluded_user_ids.contains(&user.id)
            })
            .map(|user| user.id)
            .collect();

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;
    use chrono::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        resolver: ScheduleResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let rotation = Arc::new(RotationTracker::new(store.clone()));
        let resolver = ScheduleResolver::new(store.clone(), rotation);
        Fixture { store, resolver }
    }

    async fn add_user(store: &InMemoryStore, name: &str, role: Role, active: bool) -> i64 {
        let mut user = User::new(name, Some(format!("+1415555{:04}", 0)), role);
        user.active = active;
        store.create_user(&user).await.unwrap()
    }

    async fn add_entry(
        store: &InMemoryStore,
        user_id: i64,
        primary: bool,
        secondary: bool,
    ) -> i64 {
        let now = Utc::now();
        let mut entry =
            ScheduleEntry::new(user_id, now - Duration::hours(1), now + Duration::hours(8));
        entry.is_primary = primary;
        entry.is_secondary = secondary;
        entry.pool_eligible = false;
        store.create_schedule_entry(&entry).await.unwrap()
    }

    #[tokio::test]
    async fn test_primary_resolves_single_active_entry() {
        let f = fixture();
        let u1 = add_user(&f.store, "Primary", Role::Tech, true).await;
        let u2 = add_user(&f.store, "Idle", Role::Tech, true).await;
        add_entry(&f.store, u1, true, false).await;
        add_entry(&f.store, u2, false, true).await;

        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Primary, Utc::now(), &[])
            .await
            .unwrap();
        assert_eq!(candidates, vec![u1]);
    }

    #[tokio::test]
    async fn test_primary_excluded_when_already_rung() {
        let f = fixture();
        let u1 = add_user(&f.store, "Primary", Role::Tech, true).await;
        add_entry(&f.store, u1, true, false).await;

        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Primary, Utc::now(), &[u1])
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_no_active_entry_resolves_empty() {
        let f = fixture();
        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Secondary, Utc::now(), &[])
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_admin_deterministic_first_by_id() {
        let f = fixture();
        let a1 = add_user(&f.store, "Admin One", Role::Admin, true).await;
        let _a2 = add_user(&f.store, "Admin Two", Role::Admin, true).await;

        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Admin, Utc::now(), &[])
            .await
            .unwrap();
        assert_eq!(candidates, vec![a1]);
    }

    #[tokio::test]
    async fn test_admin_excluded_yields_next_admin() {
        let f = fixture();
        let a1 = add_user(&f.store, "Admin One", Role::Admin, true).await;
        let a2 = add_user(&f.store, "Admin Two", Role::Admin, true).await;

        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Admin, Utc::now(), &[a1])
            .await
            .unwrap();
        assert_eq!(candidates, vec![a2]);
    }

    #[tokio::test]
    async fn test_manager_returns_all_active_managers() {
        let f = fixture();
        let m1 = add_user(&f.store, "Mgr One", Role::Manager, true).await;
        let _off = add_user(&f.store, "Mgr Off", Role::Manager, false).await;
        let m3 = add_user(&f.store, "Mgr Three", Role::Manager, true).await;

        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Manager, Utc::now(), &[])
            .await
            .unwrap();
        assert_eq!(candidates, vec![m1, m3]);
    }

    #[tokio::test]
    async fn test_broadcast_includes_admins_and_managers() {
        let f = fixture();
        let a = add_user(&f.store, "Admin", Role::Admin, true).await;
        let m = add_user(&f.store, "Manager", Role::Manager, true).await;
        let _t = add_user(&f.store, "Tech", Role::Tech, true).await;

        let candidates = f
            .resolver
            .resolve_candidates(&LadderStep::Broadcast, Utc::now(), &[])
            .await
            .unwrap();
        assert_eq!(candidates, vec![a, m]);
    }

    #[tokio::test]
    async fn test_unknown_step_resolves_empty() {
        let f = fixture();
        add_user(&f.store, "Admin", Role::Admin, true).await;

        let candidates = f
            .resolver
            .resolve_candidates(
                &LadderStep::Unknown("pager_duty".to_string()),
                Utc::now(),
                &[],
            )
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }
}
