pub mod webhook;

pub use webhook::WebhookGateway;

use crate::config::{TelephonyConfig, TelephonyGatewayKind};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// An outbound call the engine has decided to place.
///
/// The gateway only carries the ring; answered/missed/declined outcomes
/// come back through the telephony callback endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedCall {
    pub incident_id: i64,
    pub attempt_id: i64,
    pub step: u32,
    pub step_name: String,
    pub user_id: i64,
    pub user_name: String,
    pub phone: String,
    pub ring_seconds: u32,
}

/// Boundary to the actual calling infrastructure.
#[async_trait]
pub trait TelephonyGateway: Send + Sync {
    async fn place_call(&self, call: &PlacedCall) -> Result<()>;
}

/// Gateway that only logs placed calls. Default for development and the
/// backend used by the integration tests.
pub struct LogGateway;

#[async_trait]
impl TelephonyGateway for LogGateway {
    async fn place_call(&self, call: &PlacedCall) -> Result<()> {
        info!(
            incident_id = call.incident_id,
            attempt_id = call.attempt_id,
            step = call.step,
            step_name = %call.step_name,
            user_id = call.user_id,
            phone = %call.phone,
            ring_seconds = call.ring_seconds,
            "Placing outbound call"
        );
        Ok(())
    }
}

/// Create a telephony gateway from configuration.
pub fn create_gateway(config: &TelephonyConfig) -> Result<Arc<dyn TelephonyGateway>> {
    match config.gateway {
        TelephonyGatewayKind::Log => {
            info!("Using log-only telephony gateway");
            Ok(Arc::new(LogGateway))
        }
        TelephonyGatewayKind::Webhook => {
            let url = config.webhook_url.clone().ok_or_else(|| {
                crate::error::AppError::Configuration(
                    "telephony.webhook_url is required for the webhook gateway".to_string(),
                )
            })?;
            info!(url = %url, "Using webhook telephony gateway");
            Ok(Arc::new(WebhookGateway::new(
                url,
                config.webhook_timeout_secs,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelephonyConfig;

    #[tokio::test]
    async fn test_log_gateway_accepts_calls() {
        let gateway = LogGateway;
        let call = PlacedCall {
            incident_id: 1,
            attempt_id: 1,
            step: 0,
            step_name: "primary_oncall".to_string(),
            user_id: 7,
            user_name: "Tech".to_string(),
            phone: "+14155550100".to_string(),
            ring_seconds: 30,
        };
        assert!(gateway.place_call(&call).await.is_ok());
    }

    #[test]
    fn test_factory_defaults_to_log_gateway() {
        let config = TelephonyConfig::default();
        assert!(create_gateway(&config).is_ok());
    }

    #[test]
    fn test_factory_webhook_requires_url() {
        let config = TelephonyConfig {
            gateway: TelephonyGatewayKind::Webhook,
            webhook_url: None,
            webhook_timeout_secs: 10,
        };
        assert!(create_gateway(&config).is_err());
    }
}
