//! Subscription ledger
//!
//! Owns the payment and subscription state machines. A checkout writes a
//! pending payment before the gateway is contacted; verification settles the
//! payment and upserts the user's single subscription row in one storage
//! operation. Verification is idempotent: a payment that already left
//! `pending` is answered from storage without another gateway round-trip.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use keyhaven_shared::{Clock, Identity};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutMetadata, CheckoutRequest, PaymentGateway, RemoteCheckoutState};
use crate::packages::Package;
use crate::payments::{Payment, PaymentStatus};
use crate::store::{LedgerStore, SettleOutcome, Settlement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(BillingError::Internal(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

/// A user's subscription row. There is at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Active and inside its paid period
    pub fn is_current(&self, now: OffsetDateTime) -> bool {
        self.status == SubscriptionStatus::Active && self.current_period_end > now
    }
}

/// Subscription joined with the package it grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSubscription {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub package: Package,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub payment_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<CurrentSubscription>,
}

impl VerifyOutcome {
    fn not_yet() -> Self {
        Self {
            success: false,
            subscription: None,
        }
    }

    fn settled(subscription: Option<CurrentSubscription>) -> Self {
        Self {
            success: true,
            subscription,
        }
    }
}

/// Packages, payments and subscriptions behind one façade
#[derive(Clone)]
pub struct SubscriptionLedger {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
        }
    }

    /// Active packages, cheapest first
    pub async fn list_packages(&self) -> BillingResult<Vec<Package>> {
        self.store.list_active_packages().await
    }

    /// Inactive packages are reported as absent
    pub async fn get_package(&self, slug: &str) -> BillingResult<Package> {
        self.store
            .find_package_by_slug(slug)
            .await?
            .filter(|p| p.is_active)
            .ok_or(BillingError::NotFound("package"))
    }

    /// Open a checkout for `package_id`.
    ///
    /// The pending payment is persisted first. If the gateway then fails the
    /// row stays behind for reconciliation and the error is returned.
    pub async fn initiate_checkout(
        &self,
        identity: &Identity,
        package_id: Uuid,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutResponse> {
        let package = self
            .store
            .find_package(package_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(BillingError::NotFound("package"))?;

        if success_url.trim().is_empty() || cancel_url.trim().is_empty() {
            return Err(BillingError::Invalid(
                "success_url and cancel_url are required".to_string(),
            ));
        }

        let payment = Payment::pending(identity.user_id, &package, self.clock.now());
        self.store.insert_payment(&payment).await?;

        tracing::info!(
            user_id = %identity.user_id,
            payment_id = %payment.id,
            package = %package.slug,
            amount_cents = payment.amount_cents,
            "Pending payment recorded"
        );

        let request = CheckoutRequest {
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
            metadata: CheckoutMetadata {
                payment_id: Some(payment.id),
                user_id: Some(identity.user_id),
                package_id: Some(package.id),
            },
        };

        let session = match self.gateway.create_checkout(&request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    payment_id = %payment.id,
                    error = %e,
                    "Gateway checkout failed; pending payment kept for reconciliation"
                );
                return Err(e);
            }
        };

        self.store
            .attach_checkout(payment.id, &session.external_id, self.clock.now())
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            checkout_id = %session.external_id,
            "Checkout opened"
        );

        Ok(CheckoutResponse {
            checkout_url: session.redirect_url,
            payment_id: payment.id,
        })
    }

    /// Confirm a payment with the gateway and settle it.
    pub async fn verify_payment(
        &self,
        identity: &Identity,
        payment_id: Uuid,
    ) -> BillingResult<VerifyOutcome> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or(BillingError::NotFound("payment"))?;

        if payment.user_id != identity.user_id {
            tracing::warn!(
                user_id = %identity.user_id,
                payment_id = %payment_id,
                "Verify attempted on another user's payment"
            );
            return Err(BillingError::PermissionDenied(
                "payment belongs to another user".to_string(),
            ));
        }

        self.settle_from_gateway(payment).await
    }

    /// The newest active subscription still inside its period
    pub async fn current_subscription(
        &self,
        identity: &Identity,
    ) -> BillingResult<Option<CurrentSubscription>> {
        self.current_for_user(identity.user_id).await
    }

    /// Webhook-driven settlement for a checkout the gateway reported on.
    ///
    /// Status is always re-read from the gateway; the callback body is only a
    /// hint. Unknown checkout ids are `NotFound`.
    pub async fn settle_checkout(&self, external_id: &str) -> BillingResult<VerifyOutcome> {
        let payment = self
            .store
            .find_payment_by_checkout(external_id)
            .await?
            .ok_or(BillingError::NotFound("payment"))?;

        self.settle_from_gateway(payment).await
    }

    /// Admin-only `completed → refunded`. The subscription is left alone.
    pub async fn record_refund(
        &self,
        identity: &Identity,
        payment_id: Uuid,
    ) -> BillingResult<Payment> {
        if !identity.is_admin() {
            return Err(BillingError::PermissionDenied(
                "only administrators may record refunds".to_string(),
            ));
        }

        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or(BillingError::NotFound("payment"))?;

        if !payment.status.can_transition_to(PaymentStatus::Refunded) {
            return Err(BillingError::Invalid(format!(
                "cannot refund a {} payment",
                payment.status
            )));
        }

        if !self
            .store
            .mark_payment_refunded(payment_id, self.clock.now())
            .await?
        {
            return Err(BillingError::Invalid(
                "payment changed state during refund".to_string(),
            ));
        }

        tracing::info!(
            admin_id = %identity.user_id,
            payment_id = %payment_id,
            "Payment refunded"
        );

        self.store
            .find_payment(payment_id)
            .await?
            .ok_or(BillingError::NotFound("payment"))
    }

    /// Flip every active subscription whose period has ended to `expired`
    pub async fn expire_elapsed(&self) -> BillingResult<u64> {
        let expired = self.store.expire_elapsed(self.clock.now()).await?;
        if expired > 0 {
            tracing::info!(count = expired, "Expired elapsed subscriptions");
        }
        Ok(expired)
    }

    async fn current_for_user(&self, user_id: Uuid) -> BillingResult<Option<CurrentSubscription>> {
        let now = self.clock.now();
        Ok(self
            .store
            .latest_active_subscription(user_id)
            .await?
            .filter(|c| c.subscription.is_current(now)))
    }

    async fn settle_from_gateway(&self, payment: Payment) -> BillingResult<VerifyOutcome> {
        match payment.status {
            PaymentStatus::Completed => {
                tracing::debug!(payment_id = %payment.id, "Payment already settled");
                return Ok(VerifyOutcome::settled(
                    self.current_for_user(payment.user_id).await?,
                ));
            }
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                return Ok(VerifyOutcome::not_yet());
            }
            PaymentStatus::Pending => {}
        }

        let Some(checkout_id) = payment.checkout_id.as_deref() else {
            tracing::debug!(payment_id = %payment.id, "Pending payment has no checkout yet");
            return Ok(VerifyOutcome::not_yet());
        };

        let remote = self.gateway.checkout_status(checkout_id).await?;
        check_metadata(&payment, &remote.metadata)?;

        match remote.status {
            RemoteCheckoutState::Completed => {}
            RemoteCheckoutState::Failed | RemoteCheckoutState::Expired => {
                if self
                    .store
                    .mark_payment_failed(payment.id, self.clock.now())
                    .await?
                {
                    tracing::info!(
                        payment_id = %payment.id,
                        remote_status = ?remote.status,
                        "Payment marked failed"
                    );
                }
                return Ok(VerifyOutcome::not_yet());
            }
            RemoteCheckoutState::Open | RemoteCheckoutState::Unknown => {
                return Ok(VerifyOutcome::not_yet());
            }
        }

        let package = self
            .store
            .find_package(payment.package_id)
            .await?
            .ok_or_else(|| {
                BillingError::Internal(format!(
                    "payment {} references missing package {}",
                    payment.id, payment.package_id
                ))
            })?;

        let now = self.clock.now();
        let settlement = Settlement {
            payment_id: payment.id,
            user_id: payment.user_id,
            package_id: package.id,
            new_subscription_id: Uuid::new_v4(),
            period_start: now,
            period_end: package.billing_period.period_end(now),
        };

        match self.store.settle_payment(&settlement).await? {
            SettleOutcome::Settled(subscription) => {
                tracing::info!(
                    user_id = %payment.user_id,
                    payment_id = %payment.id,
                    subscription_id = %subscription.id,
                    package = %package.slug,
                    "Payment settled; subscription active"
                );
                Ok(VerifyOutcome::settled(Some(CurrentSubscription {
                    subscription,
                    package,
                })))
            }
            SettleOutcome::AlreadySettled => {
                // Another caller won the race; report what it wrote.
                let latest = self
                    .store
                    .find_payment(payment.id)
                    .await?
                    .ok_or(BillingError::NotFound("payment"))?;
                if latest.status == PaymentStatus::Completed {
                    Ok(VerifyOutcome::settled(
                        self.current_for_user(payment.user_id).await?,
                    ))
                } else {
                    Ok(VerifyOutcome::not_yet())
                }
            }
        }
    }
}

/// Metadata echoed by the gateway must agree with the stored payment
fn check_metadata(payment: &Payment, metadata: &CheckoutMetadata) -> BillingResult<()> {
    let mismatch = metadata.payment_id.is_some_and(|id| id != payment.id)
        || metadata.user_id.is_some_and(|id| id != payment.user_id)
        || metadata.package_id.is_some_and(|id| id != payment.package_id);

    if mismatch {
        tracing::warn!(
            payment_id = %payment.id,
            metadata = ?metadata,
            "Gateway metadata does not match payment"
        );
        return Err(BillingError::Invalid(
            "checkout metadata does not match payment".to_string(),
        ));
    }
    Ok(())
}
