//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-class errors to
//! Sentry before responding to the client. All route handlers return
//! `Result<T, AppError>`.
//!
//! Error bodies are JSON:
//!
//! ```json
//! {"error": {"code": "invalid_total", "message": "...", "retryable": false}}
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::checkout::CheckoutError;
use crate::services::payments::GatewayError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Per-identity action limit exceeded.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    retryable: bool,
}

/// What a client sees for an error.
struct Rendered {
    status: StatusCode,
    code: &'static str,
    message: String,
    retryable: bool,
}

impl AppError {
    fn render(&self) -> Rendered {
        match self {
            Self::Checkout(err) => render_checkout(err),
            Self::Database(_) | Self::Internal(_) => Rendered {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal_error",
                message: "Internal server error".to_string(),
                retryable: true,
            },
            Self::BadRequest(message) => Rendered {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request",
                message: message.clone(),
                retryable: false,
            },
            Self::RateLimited => Rendered {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "rate_limited",
                message: "Too many requests, please slow down".to_string(),
                retryable: true,
            },
        }
    }
}

fn render_checkout(err: &CheckoutError) -> Rendered {
    let client = |status, message: String| Rendered {
        status,
        code: err.code(),
        message,
        retryable: false,
    };

    match err {
        CheckoutError::EmptyCart
        | CheckoutError::InvalidQuantity { .. }
        | CheckoutError::InvalidOrderId
        | CheckoutError::InvalidTotal => client(StatusCode::BAD_REQUEST, err.to_string()),
        CheckoutError::AccountSuspended => client(StatusCode::FORBIDDEN, err.to_string()),
        CheckoutError::OrderConflict(_) | CheckoutError::ChargeAlreadyUsed(_) => {
            client(StatusCode::CONFLICT, err.to_string())
        }
        CheckoutError::PaymentNotCompleted(_)
        | CheckoutError::AmountMismatch { .. }
        | CheckoutError::CurrencyMismatch { .. } => {
            client(StatusCode::PAYMENT_REQUIRED, err.to_string())
        }
        CheckoutError::Gateway(GatewayError::ChargeNotFound(_)) => Rendered {
            status: StatusCode::BAD_REQUEST,
            code: "charge_not_found",
            message: "Payment transaction not found".to_string(),
            retryable: false,
        },
        CheckoutError::Gateway(gateway) => Rendered {
            status: StatusCode::BAD_GATEWAY,
            code: err.code(),
            message: match gateway {
                GatewayError::Api { message, .. } => message.clone(),
                _ => "Payment provider unavailable".to_string(),
            },
            retryable: match gateway {
                GatewayError::Api { status, .. } => *status >= 500 || *status == 429,
                GatewayError::Http(_) => true,
                _ => false,
            },
        },
        CheckoutError::GatewayConfigMissing => Rendered {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: err.code(),
            message: "Payments are not available".to_string(),
            retryable: false,
        },
        CheckoutError::IntegrityViolation(_) => Rendered {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: err.code(),
            message: "Order record could not be verified".to_string(),
            retryable: false,
        },
        CheckoutError::Repository(_) => Rendered {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: err.code(),
            message: "Internal server error".to_string(),
            retryable: true,
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let rendered = self.render();

        // Capture server errors to Sentry
        if rendered.status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::info!(error = %self, code = rendered.code, "Request rejected");
        }

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: rendered.code,
                message: rendered.message,
                retryable: rendered.retryable,
            },
        };
        (rendered.status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for checkout steps.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}
