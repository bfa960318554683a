use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Marketplace role attached to an identity by the session collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Landlord,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Landlord => "landlord",
            Role::Admin => "admin",
        }
    }

    /// Students and admins may open a conversation with a landlord.
    pub fn can_start_conversation(&self) -> bool {
        matches!(self, Role::Student | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "landlord" => Ok(Role::Landlord),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Display summary of a participant, resolved from the profile collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ParticipantProfile {
    pub const UNKNOWN_NAME: &'static str = "Unknown user";

    /// Placeholder for a user the profile collaborator could not resolve.
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            name: Self::UNKNOWN_NAME.to_string(),
            avatar_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Student, Role::Landlord, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("tenant".parse::<Role>().is_err());
    }

    #[test]
    fn only_students_and_admins_start_conversations() {
        assert!(Role::Student.can_start_conversation());
        assert!(Role::Admin.can_start_conversation());
        assert!(!Role::Landlord.can_start_conversation());
    }
}
