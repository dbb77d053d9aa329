// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Keyhaven Billing Module
//!
//! The subscription ledger and everything it talks to.
//!
//! ## Features
//!
//! - **Package catalog**: active packages with price, billing period and entitlements
//! - **Checkout**: pending payment recorded, then a gateway checkout opened
//! - **Verification**: idempotent, atomic settlement into the user's single subscription
//! - **Webhooks**: signed gateway callbacks routed to the same settlement path
//! - **Expiry**: elapsed subscriptions swept to `expired`
//! - **Invariants**: read-only ledger consistency checks

pub mod error;
pub mod gateway;
pub mod invariants;
pub mod packages;
pub mod payments;
pub mod store;
pub mod subscriptions;
pub mod testing;
pub mod webhooks;


// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    CheckoutMetadata, CheckoutRequest, CheckoutSession, CheckoutStatus, GatewayConfig,
    HttpGateway, PaymentGateway, RemoteCheckoutState,
};

// Catalog and payments
pub use packages::{BillingPeriod, Entitlements, Package, MONTHLY_PERIOD, ONE_TIME_PERIOD};
pub use payments::{Payment, PaymentStatus};

// Storage
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore, SettleOutcome, Settlement};

// Subscriptions
pub use subscriptions::{
    CheckoutResponse, CurrentSubscription, Subscription, SubscriptionLedger, SubscriptionStatus,
    VerifyOutcome,
};

// Webhooks
pub use webhooks::{GatewayEvent, WebhookHandler, WebhookOutcome};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

use std::sync::Arc;

use keyhaven_shared::{Clock, SystemClock};
use sqlx::PgPool;

/// Main billing service: the ledger plus its webhook entry point
#[derive(Clone)]
pub struct BillingService {
    pub ledger: SubscriptionLedger,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Postgres storage, HTTP gateway, wall clock
    pub fn new(pool: PgPool, config: GatewayConfig) -> BillingResult<Self> {
        let webhook_secret = config.webhook_secret.clone();
        let gateway = HttpGateway::new(config)?;

        Ok(Self::from_parts(
            Arc::new(PgLedgerStore::new(pool)),
            Arc::new(gateway),
            Arc::new(SystemClock),
            webhook_secret,
        ))
    }

    /// Assemble from explicit collaborators
    pub fn from_parts(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        let ledger = SubscriptionLedger::new(store, gateway, clock.clone());
        let webhooks = WebhookHandler::new(webhook_secret, ledger.clone(), clock);
        Self { ledger, webhooks }
    }
}
