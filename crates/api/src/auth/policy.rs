//! Listing write authorization
//!
//! A pure decision over the caller's [`Identity`] and the listing's owner
//! chain (listing → agent → agency). Rules, first match wins:
//!
//! 1. Admins may write anything.
//! 2. Agents may write their own listings.
//! 3. Agencies may write listings of agents that belong to them. An agent
//!    whose agency cannot be resolved is denied.
//! 4. Everyone else is denied.

use std::fmt;

use keyhaven_shared::{Identity, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ListingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListingAction::Create => "create",
            ListingAction::Update => "update",
            ListingAction::Delete => "delete",
        })
    }
}

/// Where the owning agent sits in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAffiliation {
    Agency(Uuid),
    Independent,
    /// The agent record could not be found
    Unknown,
}

/// Owner chain of an existing or proposed listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerChain {
    pub agent_id: Uuid,
    pub affiliation: AgentAffiliation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotYourListing,
    NotYourAgencysListing,
    UnauthorizedRole,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::NotYourListing => "not your listing",
            DenyReason::NotYourAgencysListing => "not your agency's listing",
            DenyReason::UnauthorizedRole => "unauthorized role",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `identity` may perform `action` on a listing owned by `chain`.
///
/// The action does not change the rules; creation passes the chain of the
/// proposed owning agent.
pub fn authorize(identity: &Identity, _action: ListingAction, chain: &OwnerChain) -> Decision {
    match identity.role {
        Role::Admin => Decision::Allow,
        Role::Agent => match identity.agent_id {
            Some(own) if own == chain.agent_id => Decision::Allow,
            Some(_) => Decision::Deny(DenyReason::NotYourListing),
            None => Decision::Deny(DenyReason::UnauthorizedRole),
        },
        Role::Agency => match (identity.agency_id, chain.affiliation) {
            (None, _) => Decision::Deny(DenyReason::UnauthorizedRole),
            (Some(own), AgentAffiliation::Agency(owner)) if own == owner => Decision::Allow,
            (Some(_), AgentAffiliation::Agency(_))
            | (Some(_), AgentAffiliation::Independent)
            | (Some(_), AgentAffiliation::Unknown) => {
                Decision::Deny(DenyReason::NotYourAgencysListing)
            }
        },
        Role::Contractor | Role::Browser => Decision::Deny(DenyReason::UnauthorizedRole),
    }
}
