use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// A technician, manager, or administrator reachable by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct User {
    pub id: i64,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// E.164 phone; users without one cannot be dispatched
    pub phone: Option<String>,
    pub role: Role,

    /// Deactivated users are never candidates
    pub active: bool,

    /// Self-serve availability toggle, honored at dispatch time
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, phone: Option<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            phone,
            role,
            active: true,
            available: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this user can be rung right now
    pub fn is_dispatchable(&self) -> bool {
        self.active && self.available && self.phone.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Tech,
    Admin,
    Manager,
}

/// A customer site; inbound caller ids are matched against its rules
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Site {
    pub id: i64,

    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub address: String,
    pub notes: Option<String>,

    /// Caller id prefixes that identify this site (exact or prefix match)
    pub phone_match_rules: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            address: address.into(),
            notes: None,
            phone_match_rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a caller id matches one of this site's rules
    pub fn matches_caller(&self, caller_id: &str) -> bool {
        self.phone_match_rules
            .iter()
            .any(|rule| !rule.is_empty() && caller_id.starts_with(rule.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatchable() {
        let user = User::new("Ana", Some("+14155550100".to_string()), Role::Tech);
        assert!(user.is_dispatchable());

        let mut no_phone = User::new("Ben", None, Role::Tech);
        assert!(!no_phone.is_dispatchable());
        no_phone.phone = Some("+14155550101".to_string());
        no_phone.available = false;
        assert!(!no_phone.is_dispatchable());
    }

    #[test]
    fn test_site_caller_match() {
        let mut site = Site::new("Warehouse 12", "12 Dock Rd");
        site.phone_match_rules = vec!["+1415555".to_string()];

        assert!(site.matches_caller("+14155550123"));
        assert!(!site.matches_caller("+12065550123"));
    }

    #[test]
    fn test_empty_rule_never_matches() {
        let mut site = Site::new("Empty", "nowhere");
        site.phone_match_rules = vec![String::new()];
        assert!(!site.matches_caller("+14155550123"));
    }
}
