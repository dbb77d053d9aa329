//! Listing write guard
//!
//! Resolves the owner chain of a listing (or of the agent proposed for a new
//! one) and applies [`policy::authorize`]. A missing listing is reported as
//! `NotFound` before any ownership check runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keyhaven_shared::Identity;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::middleware::AuthError;
use super::policy::{self, AgentAffiliation, Decision, ListingAction, OwnerChain};

/// A requested listing mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ListingWrite {
    Create { agent_id: Uuid },
    Update { listing_id: Uuid },
    Delete { listing_id: Uuid },
}

impl ListingWrite {
    pub fn action(&self) -> ListingAction {
        match self {
            ListingWrite::Create { .. } => ListingAction::Create,
            ListingWrite::Update { .. } => ListingAction::Update,
            ListingWrite::Delete { .. } => ListingAction::Delete,
        }
    }
}

/// Read-only lookups over listings, agents and agencies
#[async_trait]
pub trait OwnershipDirectory: Send + Sync {
    /// Owning agent of a listing, if the listing exists
    async fn listing_agent(&self, listing_id: Uuid) -> Result<Option<Uuid>, AuthError>;

    /// `None` when the agent does not exist; `Some(None)` for an independent agent
    async fn agent_agency(&self, agent_id: Uuid) -> Result<Option<Option<Uuid>>, AuthError>;
}

#[derive(Debug, Clone)]
pub struct PgOwnershipDirectory {
    pool: PgPool,
}

impl PgOwnershipDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnershipDirectory for PgOwnershipDirectory {
    async fn listing_agent(&self, listing_id: Uuid) -> Result<Option<Uuid>, AuthError> {
        let agent_id: Option<Uuid> =
            sqlx::query_scalar("SELECT agent_id FROM listings WHERE id = $1")
                .bind(listing_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(agent_id)
    }

    async fn agent_agency(&self, agent_id: Uuid) -> Result<Option<Option<Uuid>>, AuthError> {
        let agency_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT agency_id FROM agents WHERE id = $1")
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(agency_id)
    }
}

#[derive(Debug, Default)]
struct DirectoryTables {
    listings: HashMap<Uuid, Uuid>,
    agents: HashMap<Uuid, Option<Uuid>>,
}

/// In-memory [`OwnershipDirectory`]
#[derive(Debug, Clone, Default)]
pub struct MemoryOwnershipDirectory {
    tables: Arc<RwLock<DirectoryTables>>,
}

impl MemoryOwnershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_agent(&self, agent_id: Uuid, agency_id: Option<Uuid>) {
        self.tables.write().await.agents.insert(agent_id, agency_id);
    }

    pub async fn insert_listing(&self, listing_id: Uuid, agent_id: Uuid) {
        self.tables.write().await.listings.insert(listing_id, agent_id);
    }
}

#[async_trait]
impl OwnershipDirectory for MemoryOwnershipDirectory {
    async fn listing_agent(&self, listing_id: Uuid) -> Result<Option<Uuid>, AuthError> {
        Ok(self.tables.read().await.listings.get(&listing_id).copied())
    }

    async fn agent_agency(&self, agent_id: Uuid) -> Result<Option<Option<Uuid>>, AuthError> {
        Ok(self.tables.read().await.agents.get(&agent_id).copied())
    }
}

#[derive(Clone)]
pub struct ListingGuard {
    directory: Arc<dyn OwnershipDirectory>,
}

impl ListingGuard {
    pub fn new(directory: Arc<dyn OwnershipDirectory>) -> Self {
        Self { directory }
    }

    /// Allow or refuse a listing write. Refusals are `PermissionDenied`
    /// carrying the reason, never a silent no-op.
    pub async fn authorize_listing_write(
        &self,
        identity: &Identity,
        write: ListingWrite,
    ) -> Result<(), AuthError> {
        let agent_id = match write {
            ListingWrite::Create { agent_id } => agent_id,
            ListingWrite::Update { listing_id } | ListingWrite::Delete { listing_id } => self
                .directory
                .listing_agent(listing_id)
                .await?
                .ok_or(AuthError::NotFound("listing"))?,
        };

        let chain = self.owner_chain(agent_id).await?;

        match policy::authorize(identity, write.action(), &chain) {
            Decision::Allow => {
                tracing::debug!(
                    user_id = %identity.user_id,
                    action = %write.action(),
                    agent_id = %agent_id,
                    "Listing write allowed"
                );
                Ok(())
            }
            Decision::Deny(reason) => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    role = %identity.role,
                    action = %write.action(),
                    agent_id = %agent_id,
                    reason = %reason,
                    "Listing write denied"
                );
                Err(AuthError::PermissionDenied(reason.to_string()))
            }
        }
    }

    async fn owner_chain(&self, agent_id: Uuid) -> Result<OwnerChain, AuthError> {
        let affiliation = match self.directory.agent_agency(agent_id).await? {
            Some(Some(agency_id)) => AgentAffiliation::Agency(agency_id),
            Some(None) => AgentAffiliation::Independent,
            None => AgentAffiliation::Unknown,
        };

        Ok(OwnerChain {
            agent_id,
            affiliation,
        })
    }
}
