//! HTTP-facing error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keyhaven_billing::BillingError;
use serde_json::json;

use crate::auth::AuthError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    BadGateway(String),
    /// Details are logged where the error is created, never returned
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth => ApiError::Unauthorized("Authentication required".to_string()),
            AuthError::InvalidToken => {
                ApiError::Unauthorized("Invalid or expired token".to_string())
            }
            AuthError::InvalidCredentials => {
                ApiError::Unauthorized("Invalid email or password".to_string())
            }
            AuthError::PermissionDenied(reason) => ApiError::Forbidden(reason),
            AuthError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            AuthError::Database(e) => {
                tracing::error!(error = ?e, "Credential store failure");
                ApiError::Internal
            }
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Authentication internal error");
                ApiError::Internal
            }
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            BillingError::PermissionDenied(reason) => ApiError::Forbidden(reason),
            BillingError::Invalid(msg) => ApiError::BadRequest(msg),
            BillingError::Gateway(msg) => {
                tracing::error!(error = %msg, "Payment gateway failure");
                ApiError::BadGateway("Payment gateway unavailable, try again".to_string())
            }
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::Database(e) => {
                tracing::error!(error = ?e, "Ledger storage failure");
                ApiError::Internal
            }
            BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Ledger internal error");
                ApiError::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (AuthError::MissingAuth.into(), StatusCode::UNAUTHORIZED),
            (AuthError::InvalidToken.into(), StatusCode::UNAUTHORIZED),
            (
                AuthError::PermissionDenied("not your listing".to_string()).into(),
                StatusCode::FORBIDDEN,
            ),
            (AuthError::NotFound("listing").into(), StatusCode::NOT_FOUND),
            (BillingError::Invalid("bad".to_string()).into(), StatusCode::BAD_REQUEST),
            (BillingError::Gateway("503".to_string()).into(), StatusCode::BAD_GATEWAY),
            (
                BillingError::Internal("boom".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err:?}");
        }
    }

    #[test]
    fn test_denial_reason_is_surfaced() {
        let err: ApiError = AuthError::PermissionDenied("not your agency's listing".to_string()).into();
        assert_eq!(err.to_string(), "not your agency's listing");
    }

    #[test]
    fn test_internal_details_are_not_returned() {
        let err: ApiError = BillingError::Internal("connection string leaked".to_string()).into();
        assert_eq!(err.to_string(), "internal server error");
    }
}
