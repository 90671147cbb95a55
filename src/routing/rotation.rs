use crate::error::Result;
use crate::models::RotationState;
use crate::state::DispatchStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fan-out size for a rotating-pool dispatch
const POOL_TAKE: usize = 3;

/// Distributes rotating-pool assignments fairly across incidents.
///
/// A single persistent pointer walks the pool-eligible users; it advances
/// by three on every effective call and round-trips through the store so
/// fairness survives restarts and multiple instances. Pointer updates are
/// serialized behind one global critical section.
pub struct RotationTracker {
    store: Arc<dyn DispatchStore>,
    pointer_lock: Mutex<()>,
}

impl RotationTracker {
    pub fn new(store: Arc<dyn DispatchStore>) -> Self {
        Self {
            store,
            pointer_lock: Mutex::new(()),
        }
    }

    /// Next up-to-three pool members, excluding everyone already rung.
    ///
    /// The eligible pool is the set of users with a pool-eligible schedule
    /// entry active at `at`, in ascending user-id order so the pointer is
    /// meaningful across calls. An empty availability returns empty and
    /// leaves the pointer untouched.
    pub async fn next_from_pool(
        &self,
        excluded_user_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let _guard = self.pointer_lock.lock().await;

        let mut eligible: Vec<i64> = self
            .store
            .schedule_entries_active_at(at)
            .await?
            .into_iter()
            .filter(|entry| entry.pool_eligible)
            .map(|entry| entry.user_id)
            .collect();
        eligible.sort_unstable();
        eligible.dedup();

        let available: Vec<i64> = eligible
            .into_iter()
            .filter(|id| !excluded_user_ids.contains(id))
            .collect();

        if available.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.store.get_rotation_state().await?;
        let start = state.pointer_index % available.len();

        let mut dispatched = Vec::with_capacity(POOL_TAKE);
        for i in 0..POOL_TAKE {
            if dispatched.len() >= available.len() {
                break;
            }
            dispatched.push(available[(start + i) % available.len()]);
        }

        // Advances by the fixed fan-out size regardless of how many of the
        // returned users the engine ends up dispatching.
        let next = RotationState {
            pointer_index: (state.pointer_index + POOL_TAKE) % available.len(),
            last_used_user_ids: dispatched.clone(),
            updated_at: Utc::now(),
        };
        self.store.set_rotation_state(&next).await?;

        tracing::debug!(
            pointer = next.pointer_index,
            dispatched = ?dispatched,
            pool_size = available.len(),
            "Rotating pool advanced"
        );

        Ok(dispatched)
    }
}
