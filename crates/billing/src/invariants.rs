//! Ledger invariants
//!
//! Runnable consistency checks over payments and subscriptions. Every check
//! is a read-only SQL query; violations carry enough context to debug.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

/// How long a payment may sit pending without a checkout before it is flagged
pub const ORPHANED_PAYMENT_AGE: Duration = Duration::days(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub user_ids: Vec<Uuid>,
    pub description: String,
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Entitlement may be double-granted or lost
    Critical,
    High,
    Medium,
    /// Informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    fn from_violations(checked_at: OffsetDateTime, violations: Vec<InvariantViolation>) -> Self {
        let checks_run = InvariantChecker::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| v.invariant.as_str())
            .collect::<HashSet<_>>()
            .len();

        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            // Low severity findings are reported but do not make the ledger unhealthy
            healthy: violations
                .iter()
                .all(|v| v.severity == ViolationSeverity::Low),
            violations,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleActiveRow {
    user_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UnlinkedPaymentRow {
    payment_id: Uuid,
    user_id: Uuid,
    amount_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ElapsedActiveRow {
    subscription_id: Uuid,
    user_id: Uuid,
    current_period_end: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanedPaymentRow {
    payment_id: Uuid,
    user_id: Uuid,
    created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self, now: OffsetDateTime) -> BillingResult<InvariantCheckSummary> {
        let mut violations = Vec::new();
        for name in Self::available_checks() {
            violations.extend(self.run_check(name, now).await?);
        }
        Ok(InvariantCheckSummary::from_violations(now, violations))
    }

    /// Invariant 1: at most one active subscription per user
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleActiveRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) AS sub_count
            FROM subscriptions
            WHERE status = 'active'
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} active subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({ "subscription_count": row.sub_count }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: a completed payment is linked to the subscription it paid for
    async fn check_completed_payments_linked(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnlinkedPaymentRow> = sqlx::query_as(
            r#"
            SELECT id AS payment_id, user_id, amount_cents
            FROM payments
            WHERE status = 'completed'
              AND subscription_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_payment_linked".to_string(),
                user_ids: vec![row.user_id],
                description: "Completed payment has no subscription".to_string(),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "amount_cents": row.amount_cents,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: active subscriptions are inside their period.
    ///
    /// Reads already ignore these; this reports rows the expiry sweep has not
    /// reached yet.
    async fn check_elapsed_still_active(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ElapsedActiveRow> = sqlx::query_as(
            r#"
            SELECT id AS subscription_id, user_id, current_period_end
            FROM subscriptions
            WHERE status = 'active'
              AND current_period_end <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "elapsed_subscription_active".to_string(),
                user_ids: vec![row.user_id],
                description: "Active subscription period has ended".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.subscription_id,
                    "current_period_end": row.current_period_end.unix_timestamp(),
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Invariant 4: no payment is stuck pending without ever reaching the gateway
    async fn check_orphaned_pending_payments(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanedPaymentRow> = sqlx::query_as(
            r#"
            SELECT id AS payment_id, user_id, created_at
            FROM payments
            WHERE status = 'pending'
              AND checkout_id IS NULL
              AND created_at < $1
            "#,
        )
        .bind(now - ORPHANED_PAYMENT_AGE)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "orphaned_pending_payment".to_string(),
                user_ids: vec![row.user_id],
                description: "Pending payment never received a checkout".to_string(),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "created_at": row.created_at.unix_timestamp(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name; unknown names find nothing
    pub async fn run_check(
        &self,
        name: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "completed_payment_linked" => self.check_completed_payments_linked().await,
            "elapsed_subscription_active" => self.check_elapsed_still_active(now).await,
            "orphaned_pending_payment" => self.check_orphaned_pending_payments(now).await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "completed_payment_linked",
            "elapsed_subscription_active",
            "orphaned_pending_payment",
        ]
    }
}
