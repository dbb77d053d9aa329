//! Application state

use std::sync::Arc;

use keyhaven_billing::{BillingError, BillingService};
use keyhaven_shared::{Clock, SystemClock};
use sqlx::PgPool;

use crate::{
    auth::{CredentialStore, ListingGuard, PgCredentialStore, PgOwnershipDirectory, SessionResolver},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionResolver,
    pub listings: ListingGuard,
    pub billing: BillingService,
}

impl AppState {
    /// Postgres-backed state with the HTTP gateway and the wall clock
    pub fn new(pool: PgPool, config: Config) -> Result<Self, BillingError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));

        let sessions = SessionResolver::new(credentials, clock, config.session_ttl);
        let listings = ListingGuard::new(Arc::new(PgOwnershipDirectory::new(pool.clone())));
        let billing = BillingService::new(pool, config.gateway.clone())?;

        Ok(Self::from_parts(config, sessions, listings, billing))
    }

    pub fn from_parts(
        config: Config,
        sessions: SessionResolver,
        listings: ListingGuard,
        billing: BillingService,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            listings,
            billing,
        }
    }
}
