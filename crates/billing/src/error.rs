//! Billing error types

/// Errors surfaced by the subscription ledger and the gateway adapter
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// True for failures the caller may retry unchanged (gateway outages)
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Gateway(_))
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
