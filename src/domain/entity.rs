//! Tracked entities and their roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an entity appears on the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Participant,
    Judge,
    Organizer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Participant => "participant",
            Role::Judge => "judge",
            Role::Organizer => "organizer",
        }
    }

    /// Roster line prefix that selects this role, if any.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Role::Participant => None,
            Role::Judge => Some("judge:"),
            Role::Organizer => Some("org:"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An account whose activity is collected and judged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Login as written in the roster
    pub login: String,
    pub role: Role,
}

impl TrackedEntity {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            role: Role::Participant,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Key used by the state store; logins are case-insensitive.
    pub fn id(&self) -> String {
        self.login.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_is_lowercase() {
        let entity = TrackedEntity::new("OctoCat");
        assert_eq!(entity.id(), "octocat");
        assert_eq!(entity.login, "OctoCat");
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Role::Organizer).unwrap();
        assert_eq!(json, "\"organizer\"");
        assert_eq!(Role::default(), Role::Participant);
        assert_eq!(Role::Judge.prefix(), Some("judge:"));
    }
}
