//! Postgres-backed ledger storage

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{LedgerStore, SettleOutcome, Settlement};
use crate::error::{BillingError, BillingResult};
use crate::packages::{Entitlements, Package};
use crate::payments::Payment;
use crate::subscriptions::{CurrentSubscription, Subscription};

const PACKAGE_COLUMNS: &str = r#"
    id, slug, name, price_cents, currency, billing_period,
    max_listings, featured_slots, top_agent_slots, max_photos, is_active
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, user_id, package_id, subscription_id, checkout_id, amount_cents,
    currency, status, description, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct PackageRow {
    id: Uuid,
    slug: String,
    name: String,
    price_cents: i64,
    currency: String,
    billing_period: String,
    max_listings: i32,
    featured_slots: i32,
    top_agent_slots: i32,
    max_photos: i32,
    is_active: bool,
}

impl TryFrom<PackageRow> for Package {
    type Error = BillingError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        Ok(Package {
            id: row.id,
            slug: row.slug,
            name: row.name,
            price_cents: row.price_cents,
            currency: row.currency,
            billing_period: row.billing_period.parse()?,
            entitlements: Entitlements {
                max_listings: row.max_listings,
                featured_slots: row.featured_slots,
                top_agent_slots: row.top_agent_slots,
                max_photos: row.max_photos,
            },
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    package_id: Uuid,
    subscription_id: Option<Uuid>,
    checkout_id: Option<String>,
    amount_cents: i64,
    currency: String,
    status: String,
    description: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            user_id: row.user_id,
            package_id: row.package_id,
            subscription_id: row.subscription_id,
            checkout_id: row.checkout_id,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: row.status.parse()?,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    package_id: Uuid,
    status: String,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            package_id: row.package_id,
            status: row.status.parse()?,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Subscription joined with its package
#[derive(Debug, FromRow)]
struct ActiveSubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    package_id: Uuid,
    status: String,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    slug: String,
    name: String,
    price_cents: i64,
    currency: String,
    billing_period: String,
    max_listings: i32,
    featured_slots: i32,
    top_agent_slots: i32,
    max_photos: i32,
    is_active: bool,
}

impl TryFrom<ActiveSubscriptionRow> for CurrentSubscription {
    type Error = BillingError;

    fn try_from(row: ActiveSubscriptionRow) -> Result<Self, Self::Error> {
        let package = Package::try_from(PackageRow {
            id: row.package_id,
            slug: row.slug,
            name: row.name,
            price_cents: row.price_cents,
            currency: row.currency,
            billing_period: row.billing_period,
            max_listings: row.max_listings,
            featured_slots: row.featured_slots,
            top_agent_slots: row.top_agent_slots,
            max_photos: row.max_photos,
            is_active: row.is_active,
        })?;

        let subscription = Subscription::try_from(SubscriptionRow {
            id: row.id,
            user_id: row.user_id,
            package_id: row.package_id,
            status: row.status,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })?;

        Ok(CurrentSubscription {
            subscription,
            package,
        })
    }
}

/// [`LedgerStore`] over a Postgres pool
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn list_active_packages(&self) -> BillingResult<Vec<Package>> {
        let rows: Vec<PackageRow> = sqlx::query_as(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE is_active = TRUE ORDER BY price_cents ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Package::try_from).collect()
    }

    async fn find_package(&self, id: Uuid) -> BillingResult<Option<Package>> {
        let row: Option<PackageRow> =
            sqlx::query_as(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Package::try_from).transpose()
    }

    async fn find_package_by_slug(&self, slug: &str) -> BillingResult<Option<Package>> {
        let row: Option<PackageRow> =
            sqlx::query_as(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE slug = $1"))
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Package::try_from).transpose()
    }

    async fn insert_payment(&self, payment: &Payment) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, package_id, subscription_id, checkout_id, amount_cents,
                currency, status, description, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.package_id)
        .bind(payment.subscription_id)
        .bind(&payment.checkout_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.description)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_id: &str,
        at: OffsetDateTime,
    ) -> BillingResult<()> {
        let rows_affected = sqlx::query(
            "UPDATE payments SET checkout_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(payment_id)
        .bind(checkout_id)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(BillingError::NotFound("payment"));
        }
        Ok(())
    }

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_checkout(&self, checkout_id: &str) -> BillingResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE checkout_id = $1"
        ))
        .bind(checkout_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn mark_payment_failed(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn mark_payment_refunded(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'refunded', updated_at = $2
            WHERE id = $1 AND status = 'completed'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn settle_payment(&self, settlement: &Settlement) -> BillingResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the payment serializes concurrent settlers; the loser
        // re-evaluates the status guard after the winner commits.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE payments
            SET status = 'completed', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(settlement.payment_id)
        .bind(settlement.period_start)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(SettleOutcome::AlreadySettled);
        }

        let row: SubscriptionRow = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                id, user_id, package_id, status,
                current_period_start, current_period_end, created_at, updated_at
            ) VALUES ($1, $2, $3, 'active', $4, $5, $4, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                package_id = EXCLUDED.package_id,
                status = 'active',
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                updated_at = EXCLUDED.updated_at
            RETURNING id, user_id, package_id, status,
                      current_period_start, current_period_end, created_at, updated_at
            "#,
        )
        .bind(settlement.new_subscription_id)
        .bind(settlement.user_id)
        .bind(settlement.package_id)
        .bind(settlement.period_start)
        .bind(settlement.period_end)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE payments SET subscription_id = $2 WHERE id = $1")
            .bind(settlement.payment_id)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(SettleOutcome::Settled(Subscription::try_from(row)?))
    }

    async fn latest_active_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<CurrentSubscription>> {
        let row: Option<ActiveSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT
                s.id, s.user_id, s.package_id, s.status,
                s.current_period_start, s.current_period_end, s.created_at, s.updated_at,
                p.slug, p.name, p.price_cents, p.currency, p.billing_period,
                p.max_listings, p.featured_slots, p.top_agent_slots, p.max_photos, p.is_active
            FROM subscriptions s
            JOIN packages p ON p.id = s.package_id
            WHERE s.user_id = $1
              AND s.status = 'active'
            ORDER BY s.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CurrentSubscription::try_from).transpose()
    }

    async fn expire_elapsed(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = $1
            WHERE status = 'active'
              AND current_period_end <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }
}
