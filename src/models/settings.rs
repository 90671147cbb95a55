use serde::{Deserialize, Serialize};
use validator::Validate;

/// Storage keys for runtime configuration records
pub mod keys {
    pub const BUSINESS_HOURS: &str = "business_hours";
    pub const BUSINESS_HOURS_LADDER: &str = "business_hours_ladder";
    pub const AFTER_HOURS_LADDER: &str = "after_hours_ladder";
    pub const RING_DURATION: &str = "ring_duration";
}

/// Business-hours window, evaluated by weekday set and minute-of-day range
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BusinessHoursConfig {
    /// Weekdays 0-6, 0 = Sunday
    pub days: Vec<u8>,
    #[validate(range(max = 23))]
    pub start_hour: u8,
    #[validate(range(max = 59))]
    pub start_minute: u8,
    #[validate(range(max = 23))]
    pub end_hour: u8,
    #[validate(range(max = 59))]
    pub end_minute: u8,

    /// IANA timezone name, e.g. "America/Los_Angeles"
    pub timezone: String,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            days: vec![1, 2, 3, 4, 5],
            start_hour: 8,
            start_minute: 0,
            end_hour: 17,
            end_minute: 0,
            timezone: "America/Los_Angeles".to_string(),
        }
    }
}

impl BusinessHoursConfig {
    pub fn start_minutes(&self) -> u32 {
        self.start_hour as u32 * 60 + self.start_minute as u32
    }

    pub fn end_minutes(&self) -> u32 {
        self.end_hour as u32 * 60 + self.end_minute as u32
    }
}

/// Ordered step names for one time period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    pub steps: Vec<String>,
}

impl LadderConfig {
    pub fn default_business_hours() -> Self {
        Self {
            steps: vec![
                "primary_oncall".to_string(),
                "secondary".to_string(),
                "admin".to_string(),
                "manager".to_string(),
                "broadcast".to_string(),
            ],
        }
    }

    pub fn default_after_hours() -> Self {
        Self {
            steps: vec![
                "primary_oncall".to_string(),
                "secondary".to_string(),
                "manager".to_string(),
                "admin".to_string(),
                "rotating_pool".to_string(),
            ],
        }
    }

    /// Parse step names into the closed step set
    pub fn resolved_steps(&self) -> Vec<LadderStep> {
        self.steps.iter().map(|s| LadderStep::parse(s)).collect()
    }
}

/// The closed set of step strategies. Unknown names are carried through
/// so the engine can skip them as zero-candidate steps rather than fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LadderStep {
    Primary,
    Secondary,
    Admin,
    Manager,
    Broadcast,
    RotatingPool,
    Unknown(String),
}

impl LadderStep {
    pub fn parse(name: &str) -> Self {
        match name {
            "primary_oncall" => LadderStep::Primary,
            "secondary" => LadderStep::Secondary,
            "admin" => LadderStep::Admin,
            "manager" => LadderStep::Manager,
            "broadcast" => LadderStep::Broadcast,
            "rotating_pool" => LadderStep::RotatingPool,
            other => LadderStep::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LadderStep::Primary => "primary_oncall",
            LadderStep::Secondary => "secondary",
            LadderStep::Admin => "admin",
            LadderStep::Manager => "manager",
            LadderStep::Broadcast => "broadcast",
            LadderStep::RotatingPool => "rotating_pool",
            LadderStep::Unknown(name) => name,
        }
    }

    /// Steps that ring every resolved candidate simultaneously
    pub fn is_fan_out(&self) -> bool {
        matches!(self, LadderStep::Broadcast | LadderStep::RotatingPool)
    }
}

/// How long each candidate's phone rings before the attempt times out
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RingDuration {
    pub seconds: u32,
}

impl RingDuration {
    pub const MIN_SECONDS: u32 = 10;
    pub const MAX_SECONDS: u32 = 60;

    /// Clamp into the allowed [10, 60] range
    pub fn clamped(seconds: u32) -> Self {
        Self {
            seconds: seconds.clamp(Self::MIN_SECONDS, Self::MAX_SECONDS),
        }
    }
}

impl Default for RingDuration {
    fn default() -> Self {
        Self { seconds: 30 }
    }
}
