//! Checkout error types.

use thiserror::Error;

use orchard_core::{ChargeId, CurrencyCode, OrderId, ProductId};

use crate::db::RepositoryError;
use crate::services::payments::{ChargeStatus, GatewayError};

/// Errors that can occur during checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// No lines in the cart, or none of them are in the catalog.
    #[error("cart is empty")]
    EmptyCart,

    /// A line quantity is outside the accepted range.
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The client-supplied order id is not a safe key.
    #[error("invalid order id")]
    InvalidOrderId,

    /// The quoted total is zero or cannot be charged.
    #[error("order total must be greater than zero")]
    InvalidTotal,

    /// The account registered under the checkout email is suspended.
    #[error("account is suspended")]
    AccountSuspended,

    /// The order id is already stored with a different cart.
    #[error("order {0} already exists with a different cart")]
    OrderConflict(OrderId),

    /// No payment gateway credentials are configured.
    #[error("payment gateway is not configured")]
    GatewayConfigMissing,

    /// The payment gateway failed or refused the request.
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The charge is not in a state that secures funds.
    #[error("payment not completed (status: {0})")]
    PaymentNotCompleted(ChargeStatus),

    /// The charge already paid for a different order.
    #[error("charge {0} is already attached to another order")]
    ChargeAlreadyUsed(ChargeId),

    /// The charged amount differs from the quote beyond tolerance.
    #[error("charged {charged_minor} minor units but the order total is {expected_minor}")]
    AmountMismatch {
        expected_minor: i64,
        charged_minor: i64,
    },

    /// The charge is in a different currency than the store.
    #[error("charged in {charged} but the store sells in {expected}")]
    CurrencyMismatch {
        expected: CurrencyCode,
        charged: String,
    },

    /// A stored order no longer matches its signature.
    #[error("stored order {0} failed integrity verification")]
    IntegrityViolation(OrderId),

    /// Order storage failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CheckoutError {
    /// Stable machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyCart => "empty_cart",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::InvalidOrderId => "invalid_order_id",
            Self::InvalidTotal => "invalid_total",
            Self::AccountSuspended => "account_suspended",
            Self::OrderConflict(_) => "order_conflict",
            Self::GatewayConfigMissing => "gateway_config_missing",
            Self::Gateway(_) => "gateway_error",
            Self::PaymentNotCompleted(_) => "payment_not_completed",
            Self::ChargeAlreadyUsed(_) => "charge_already_used",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::IntegrityViolation(_) => "integrity_violation",
            Self::Repository(_) => "internal_error",
        }
    }
}
