//! Ledger storage
//!
//! Packages, payments and subscriptions are owned by the ledger. The
//! [`LedgerStore`] trait is the only path that mutates them; settlement is a
//! single atomic operation so that concurrent verifications cannot produce
//! two subscription rows for one user.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::packages::Package;
use crate::payments::Payment;
use crate::subscriptions::{CurrentSubscription, Subscription};

/// Everything needed to settle one confirmed payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
    /// Id used only when the user has no subscription row yet
    pub new_subscription_id: Uuid,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call moved the payment to completed and wrote the subscription
    Settled(Subscription),
    /// The payment had already left `pending`; nothing was written
    AlreadySettled,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn list_active_packages(&self) -> BillingResult<Vec<Package>>;

    async fn find_package(&self, id: Uuid) -> BillingResult<Option<Package>>;

    async fn find_package_by_slug(&self, slug: &str) -> BillingResult<Option<Package>>;

    async fn insert_payment(&self, payment: &Payment) -> BillingResult<()>;

    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_id: &str,
        at: OffsetDateTime,
    ) -> BillingResult<()>;

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<Payment>>;

    async fn find_payment_by_checkout(&self, checkout_id: &str) -> BillingResult<Option<Payment>>;

    /// `pending → failed`. Returns false when the payment was not pending.
    async fn mark_payment_failed(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool>;

    /// `completed → refunded`. Returns false when the payment was not completed.
    async fn mark_payment_refunded(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool>;

    /// Atomically: `pending → completed`, upsert the user's subscription to
    /// `active` with the new period, link the payment to it.
    async fn settle_payment(&self, settlement: &Settlement) -> BillingResult<SettleOutcome>;

    /// Most recently created `active` subscription for the user, with its package
    async fn latest_active_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<CurrentSubscription>>;

    /// `active → expired` for every subscription whose period ended at or before `now`
    async fn expire_elapsed(&self, now: OffsetDateTime) -> BillingResult<u64>;
}
