use crate::error::Result;
use crate::models::{keys, BusinessHoursConfig, LadderConfig, Period, RingDuration};
use crate::state::DispatchStore;
use std::sync::Arc;

/// Reads runtime configuration records from the store at routing time.
///
/// Values are re-read on every call, never cached across incidents, so an
/// administrator's change applies to the next inbound call. Missing or
/// malformed records fall back to permissive defaults; routing never
/// hard-fails on configuration.
#[derive(Clone)]
pub struct RuntimeSettings {
    store: Arc<dyn DispatchStore>,
}

impl RuntimeSettings {
    pub fn new(store: Arc<dyn DispatchStore>) -> Self {
        Self { store }
    }

    pub async fn business_hours(&self) -> Result<BusinessHoursConfig> {
        match self.store.get_config(keys::BUSINESS_HOURS).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(config) => Ok(config),
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed business_hours config, using default");
                    Ok(BusinessHoursConfig::default())
                }
            },
            None => Ok(BusinessHoursConfig::default()),
        }
    }

    pub async fn ladder(&self, period: Period) -> Result<LadderConfig> {
        let (key, default) = match period {
            Period::BusinessHours => (
                keys::BUSINESS_HOURS_LADDER,
                LadderConfig::default_business_hours(),
            ),
            Period::AfterHours => (keys::AFTER_HOURS_LADDER, LadderConfig::default_after_hours()),
        };

        match self.store.get_config(key).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(config) => Ok(config),
                Err(e) => {
                    tracing::warn!(key = key, error = %e, "Malformed ladder config, using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    pub async fn ring_duration(&self) -> Result<RingDuration> {
        match self.store.get_config(keys::RING_DURATION).await? {
            Some(value) => match serde_json::from_value::<RingDuration>(value) {
                Ok(duration) => Ok(RingDuration::clamped(duration.seconds)),
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed ring_duration config, using default");
                    Ok(RingDuration::default())
                }
            },
            None => Ok(RingDuration::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LadderStep;
    use crate::state::InMemoryStore;

    fn settings() -> (RuntimeSettings, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (RuntimeSettings::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_missing_config_falls_back_to_defaults() {
        let (settings, _store) = settings();

        let hours = settings.business_hours().await.unwrap();
        assert_eq!(hours.days, vec![1, 2, 3, 4, 5]);

        let ladder = settings.ladder(Period::AfterHours).await.unwrap();
        assert_eq!(
            ladder.resolved_steps().last(),
            Some(&LadderStep::RotatingPool)
        );

        assert_eq!(settings.ring_duration().await.unwrap().seconds, 30);
    }

    #[tokio::test]
    async fn test_stored_config_wins() {
        let (settings, store) = settings();

        store
            .set_config(
                keys::BUSINESS_HOURS_LADDER,
                serde_json::json!({ "steps": ["admin", "broadcast"] }),
            )
            .await
            .unwrap();

        let ladder = settings.ladder(Period::BusinessHours).await.unwrap();
        assert_eq!(ladder.steps, vec!["admin", "broadcast"]);
    }

    #[tokio::test]
    async fn test_ring_duration_clamped_on_read() {
        let (settings, store) = settings();

        store
            .set_config(keys::RING_DURATION, serde_json::json!({ "seconds": 600 }))
            .await
            .unwrap();
        assert_eq!(settings.ring_duration().await.unwrap().seconds, 60);
    }

    #[tokio::test]
    async fn test_malformed_config_falls_back() {
        let (settings, store) = settings();

        store
            .set_config(keys::BUSINESS_HOURS, serde_json::json!("not an object"))
            .await
            .unwrap();
        let hours = settings.business_hours().await.unwrap();
        assert_eq!(hours.timezone, "America/Los_Angeles");
    }
}
