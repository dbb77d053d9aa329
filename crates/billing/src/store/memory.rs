// In-memory ledger store: HashMap tables behind one tokio RwLock.
//
// Settlement runs entirely under the write lock, which gives it the same
// all-or-nothing behavior as the Postgres transaction. Used by tests and
// local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LedgerStore, SettleOutcome, Settlement};
use crate::error::{BillingError, BillingResult};
use crate::packages::Package;
use crate::payments::{Payment, PaymentStatus};
use crate::subscriptions::{CurrentSubscription, Subscription, SubscriptionStatus};

#[derive(Debug, Default)]
struct Tables {
    packages: HashMap<Uuid, Package>,
    payments: HashMap<Uuid, Payment>,
    subscriptions: HashMap<Uuid, Subscription>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_package(&self, package: Package) {
        self.tables
            .write()
            .await
            .packages
            .insert(package.id, package);
    }

    /// Every subscription row for a user, whatever its status
    pub async fn subscriptions_for_user(&self, user_id: Uuid) -> Vec<Subscription> {
        self.tables
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn payments_for_user(&self, user_id: Uuid) -> Vec<Payment> {
        self.tables
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Overwrite a subscription row as-is (test setup for elapsed periods)
    pub async fn put_subscription(&self, subscription: Subscription) {
        self.tables
            .write()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }
}

fn transition(
    payment: &mut Payment,
    next: PaymentStatus,
    at: OffsetDateTime,
) -> bool {
    if !payment.status.can_transition_to(next) {
        return false;
    }
    payment.status = next;
    payment.updated_at = at;
    true
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn list_active_packages(&self) -> BillingResult<Vec<Package>> {
        let tables = self.tables.read().await;
        let mut packages: Vec<Package> = tables
            .packages
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        packages.sort_by_key(|p| p.price_cents);
        Ok(packages)
    }

    async fn find_package(&self, id: Uuid) -> BillingResult<Option<Package>> {
        Ok(self.tables.read().await.packages.get(&id).cloned())
    }

    async fn find_package_by_slug(&self, slug: &str) -> BillingResult<Option<Package>> {
        Ok(self
            .tables
            .read()
            .await
            .packages
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn insert_payment(&self, payment: &Payment) -> BillingResult<()> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.id) {
            return Err(BillingError::Internal(format!(
                "duplicate payment id {}",
                payment.id
            )));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_id: &str,
        at: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or(BillingError::NotFound("payment"))?;
        payment.checkout_id = Some(checkout_id.to_string());
        payment.updated_at = at;
        Ok(())
    }

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_checkout(&self, checkout_id: &str) -> BillingResult<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|p| p.checkout_id.as_deref() == Some(checkout_id))
            .cloned())
    }

    async fn mark_payment_failed(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .payments
            .get_mut(&id)
            .is_some_and(|p| transition(p, PaymentStatus::Failed, at)))
    }

    async fn mark_payment_refunded(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .payments
            .get_mut(&id)
            .is_some_and(|p| transition(p, PaymentStatus::Refunded, at)))
    }

    async fn settle_payment(&self, settlement: &Settlement) -> BillingResult<SettleOutcome> {
        let mut tables = self.tables.write().await;

        let payment = tables
            .payments
            .get_mut(&settlement.payment_id)
            .ok_or(BillingError::NotFound("payment"))?;
        if !transition(payment, PaymentStatus::Completed, settlement.period_start) {
            return Ok(SettleOutcome::AlreadySettled);
        }

        let existing = tables
            .subscriptions
            .values_mut()
            .find(|s| s.user_id == settlement.user_id);

        let subscription = match existing {
            Some(row) => {
                row.package_id = settlement.package_id;
                row.status = SubscriptionStatus::Active;
                row.current_period_start = settlement.period_start;
                row.current_period_end = settlement.period_end;
                row.updated_at = settlement.period_start;
                row.clone()
            }
            None => {
                let row = Subscription {
                    id: settlement.new_subscription_id,
                    user_id: settlement.user_id,
                    package_id: settlement.package_id,
                    status: SubscriptionStatus::Active,
                    current_period_start: settlement.period_start,
                    current_period_end: settlement.period_end,
                    created_at: settlement.period_start,
                    updated_at: settlement.period_start,
                };
                tables.subscriptions.insert(row.id, row.clone());
                row
            }
        };

        if let Some(payment) = tables.payments.get_mut(&settlement.payment_id) {
            payment.subscription_id = Some(subscription.id);
        }

        Ok(SettleOutcome::Settled(subscription))
    }

    async fn latest_active_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<CurrentSubscription>> {
        let tables = self.tables.read().await;

        let latest = tables
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| s.created_at);

        let Some(subscription) = latest else {
            return Ok(None);
        };

        let package = tables
            .packages
            .get(&subscription.package_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::Internal(format!(
                    "subscription {} references missing package {}",
                    subscription.id, subscription.package_id
                ))
            })?;

        Ok(Some(CurrentSubscription {
            subscription: subscription.clone(),
            package,
        }))
    }

    async fn expire_elapsed(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for subscription in tables.subscriptions.values_mut() {
            if subscription.status == SubscriptionStatus::Active
                && subscription.current_period_end <= now
            {
                subscription.status = SubscriptionStatus::Expired;
                subscription.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
