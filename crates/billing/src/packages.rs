//! Package catalog
//!
//! Packages are read-mostly reference data: price, billing period and the
//! entitlement limits a subscription grants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingError;

/// Length of a monthly period. Fixed offset, not calendar months.
pub const MONTHLY_PERIOD: Duration = Duration::days(30);

/// Length of the period granted by a one-time purchase
pub const ONE_TIME_PERIOD: Duration = Duration::days(365);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Once,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Once => "once",
        }
    }

    pub fn length(&self) -> Duration {
        match self {
            BillingPeriod::Monthly => MONTHLY_PERIOD,
            BillingPeriod::Once => ONE_TIME_PERIOD,
        }
    }

    /// End of a period activated at `start`
    pub fn period_end(&self, start: OffsetDateTime) -> OffsetDateTime {
        start + self.length()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingPeriod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingPeriod::Monthly),
            "once" => Ok(BillingPeriod::Once),
            other => Err(BillingError::Internal(format!(
                "unknown billing period: {other}"
            ))),
        }
    }
}

/// Limits granted while a subscription to the package is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    pub max_listings: i32,
    pub featured_slots: i32,
    pub top_agent_slots: i32,
    pub max_photos: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub billing_period: BillingPeriod,
    pub entitlements: Entitlements,
    pub is_active: bool,
}
