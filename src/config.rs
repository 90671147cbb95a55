use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// State backend configuration
    pub state: StateConfig,

    /// Telephony gateway configuration
    #[serde(default)]
    pub telephony: TelephonyConfig,

    /// Dispatch policy knobs
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string()),
        )
    }

    /// Load configuration, overriding the config file path
    pub fn load_from(config_path: impl AsRef<str>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // Start with built-in defaults
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(config_path.as_ref()).required(false))
            // Override with environment variables (prefix: DISPATCH_)
            .add_source(
                config::Environment::with_prefix("DISPATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Outbound gateway kind
    #[serde(default)]
    pub gateway: TelephonyGatewayKind,

    /// Endpoint the webhook gateway posts place-call commands to
    pub webhook_url: Option<String>,

    /// HTTP timeout for the webhook gateway
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            gateway: TelephonyGatewayKind::Log,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TelephonyGatewayKind {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds an answered call may sit unclaimed before it is flagged
    #[serde(default = "default_claim_window")]
    pub claim_window_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            claim_window_secs: default_claim_window(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_claim_window() -> u64 {
    90
}
