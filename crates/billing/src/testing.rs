//! Test doubles for the gateway and catalog fixtures
//!
//! Used by this crate's tests and by the API integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CheckoutMetadata, CheckoutRequest, CheckoutSession, CheckoutStatus, PaymentGateway,
    RemoteCheckoutState,
};
use crate::packages::{BillingPeriod, Entitlements, Package};

/// Id of [`gold_package`]
pub const GOLD_PACKAGE_ID: Uuid = Uuid::from_u128(0x6f1d_2c3a_0000_4000_8000_0000_0000_0001);

/// Id of [`lifetime_package`]
pub const LIFETIME_PACKAGE_ID: Uuid = Uuid::from_u128(0x6f1d_2c3a_0000_4000_8000_0000_0000_0002);

/// `gold`: 499.00 USD, monthly
pub fn gold_package() -> Package {
    Package {
        id: GOLD_PACKAGE_ID,
        slug: "gold".to_string(),
        name: "Gold".to_string(),
        price_cents: 49_900,
        currency: "usd".to_string(),
        billing_period: BillingPeriod::Monthly,
        entitlements: Entitlements {
            max_listings: 50,
            featured_slots: 5,
            top_agent_slots: 1,
            max_photos: 40,
        },
        is_active: true,
    }
}

/// `lifetime`: one-time purchase
pub fn lifetime_package() -> Package {
    Package {
        id: LIFETIME_PACKAGE_ID,
        slug: "lifetime".to_string(),
        name: "Lifetime Starter".to_string(),
        price_cents: 99_900,
        currency: "usd".to_string(),
        billing_period: BillingPeriod::Once,
        entitlements: Entitlements {
            max_listings: 10,
            featured_slots: 0,
            top_agent_slots: 0,
            max_photos: 20,
        },
        is_active: true,
    }
}

/// In-process [`PaymentGateway`] that counts calls.
///
/// Checkouts echo back the metadata they were opened with; every checkout
/// reports the same configurable remote state.
#[derive(Debug)]
pub struct RecordingGateway {
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    fail_create: AtomicBool,
    fail_status: AtomicBool,
    state: Mutex<RemoteCheckoutState>,
    metadata_override: Mutex<Option<CheckoutMetadata>>,
    checkouts: Mutex<HashMap<String, CheckoutMetadata>>,
    last_checkout_id: Mutex<Option<String>>,
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            state: Mutex::new(RemoteCheckoutState::Open),
            metadata_override: Mutex::new(None),
            checkouts: Mutex::new(HashMap::new()),
            last_checkout_id: Mutex::new(None),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: RemoteCheckoutState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Report this metadata instead of what the checkout was opened with
    pub fn set_metadata_override(&self, metadata: Option<CheckoutMetadata>) {
        *self.metadata_override.lock().unwrap_or_else(|e| e.into_inner()) = metadata;
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn last_checkout_id(&self) -> Option<String> {
        self.last_checkout_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSession> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("gateway responded with status 503".to_string()));
        }

        let external_id = format!("chk_test_{n}");
        self.checkouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(external_id.clone(), request.metadata.clone());
        *self.last_checkout_id.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(external_id.clone());

        Ok(CheckoutSession {
            redirect_url: format!("https://pay.example.test/c/{external_id}"),
            external_id,
        })
    }

    async fn checkout_status(&self, external_id: &str) -> BillingResult<CheckoutStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent verifiers interleave here, as a network call would.
        tokio::task::yield_now().await;

        if self.fail_status.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("gateway responded with status 502".to_string()));
        }

        let opened_with = self
            .checkouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(external_id)
            .cloned()
            .ok_or_else(|| BillingError::Gateway("gateway responded with status 404".to_string()))?;

        let metadata = self
            .metadata_override
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or(opened_with);

        Ok(CheckoutStatus {
            status: *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            metadata,
        })
    }
}
