use crate::error::{AppError, Result};
use crate::telephony::{PlacedCall, TelephonyGateway};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Gateway that forwards place-call commands to an external dialer over
/// HTTP. The dialer rings the target and reports the outcome back through
/// the telephony callback endpoints.
#[derive(Clone)]
pub struct WebhookGateway {
    client: Client,
    url: String,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct PlaceCallPayload<'a> {
    event_type: &'static str,
    timestamp: String,
    call: &'a PlacedCall,
}

impl WebhookGateway {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            timeout_secs,
        })
    }
}

#[async_trait]
impl TelephonyGateway for WebhookGateway {
    async fn place_call(&self, call: &PlacedCall) -> Result<()> {
        let payload = PlaceCallPayload {
            event_type: "call.place",
            timestamp: Utc::now().to_rfc3339(),
            call,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "oncall-dispatch/0.1")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Internal(format!(
                        "Telephony webhook timed out after {} seconds",
                        self.timeout_secs
                    ))
                } else {
                    AppError::Internal(format!("Telephony webhook request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                incident_id = call.incident_id,
                attempt_id = call.attempt_id,
                status = status.as_u16(),
                body = %body,
                "Telephony webhook rejected place-call command"
            );
            return Err(AppError::Internal(format!(
                "Telephony webhook returned status {}",
                status
            )));
        }

        info!(
            incident_id = call.incident_id,
            attempt_id = call.attempt_id,
            user_id = call.user_id,
            url = %self.url,
            "Place-call command delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_creation() {
        let gateway = WebhookGateway::new("https://dialer.example.com/calls".to_string(), 10);
        assert!(gateway.is_ok());
    }

    #[test]
    fn test_payload_shape() {
        let call = PlacedCall {
            incident_id: 4,
            attempt_id: 9,
            step: 1,
            step_name: "secondary".to_string(),
            user_id: 2,
            user_name: "Backup".to_string(),
            phone: "+14155550101".to_string(),
            ring_seconds: 30,
        };
        let payload = PlaceCallPayload {
            event_type: "call.place",
            timestamp: Utc::now().to_rfc3339(),
            call: &call,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event_type"], "call.place");
        assert_eq!(json["call"]["user_id"], 2);
        assert_eq!(json["call"]["step_name"], "secondary");
    }
}
