//! Authenticated principals

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform role of a user.
///
/// Closed set: every authorization decision matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Agency,
    Agent,
    Contractor,
    Browser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Agency => "AGENCY",
            Role::Agent => "AGENT",
            Role::Contractor => "CONTRACTOR",
            Role::Browser => "BROWSER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "AGENCY" => Ok(Role::Agency),
            "AGENT" => Ok(Role::Agent),
            "CONTRACTOR" => Ok(Role::Contractor),
            "BROWSER" => Ok(Role::Browser),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// The principal derived from a valid session token.
///
/// Linked ids are present only when set on the user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contractor_id: Option<Uuid>,
}

impl Identity {
    /// Identity with no linked domain entity
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            agent_id: None,
            agency_id: None,
            contractor_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_agency(mut self, agency_id: Uuid) -> Self {
        self.agency_id = Some(agency_id);
        self
    }

    pub fn with_contractor(mut self, contractor_id: Uuid) -> Self {
        self.contractor_id = Some(contractor_id);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
