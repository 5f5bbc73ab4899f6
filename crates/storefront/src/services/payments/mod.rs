//! Payment gateway contract.
//!
//! Checkout talks to the payment processor only through [`PaymentGateway`].
//! [`StripeGateway`] speaks the Stripe-style REST API; tests substitute a
//! scripted implementation.
//!
//! Amounts cross this boundary as integer minor units (cents).

mod stripe;

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;

use orchard_core::{ChargeId, CurrencyCode, CustomerRef, Email, OrderId, PaymentMethodRef};

pub use stripe::StripeGateway;

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway returned an error response.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The referenced charge does not exist.
    #[error("charge not found: {0}")]
    ChargeNotFound(ChargeId),

    /// Failed to parse a gateway response.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Lifecycle state of a gateway charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

impl ChargeStatus {
    /// Whether funds are secured or on their way. Only these statuses may
    /// produce an order.
    #[must_use]
    pub const fn is_success_class(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Processing | Self::RequiresCapture
        )
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A charge as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub id: ChargeId,
    pub status: ChargeStatus,
    /// Amount in minor units.
    pub amount_minor: i64,
    /// Lower-case ISO currency code.
    pub currency: String,
    /// Processor risk score (0-100), when the processor evaluated one.
    pub risk_score: Option<u32>,
    /// Order id recorded in the charge metadata at creation.
    pub order_id: Option<OrderId>,
}

/// An unconfirmed charge the client can complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCharge {
    pub id: ChargeId,
    /// Secret the client-side SDK needs to confirm the charge.
    pub client_secret: String,
    pub amount_minor: i64,
}

/// Parameters for a server-confirmed charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest<'a> {
    pub order_id: &'a OrderId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub customer: &'a CustomerRef,
    /// `None` charges the customer's default payment method.
    pub payment_method: Option<&'a PaymentMethodRef>,
    /// Sent as the `Idempotency-Key` header.
    pub idempotency_key: &'a str,
}

/// Parameters for creating or re-pricing an unconfirmed charge.
#[derive(Debug, Clone)]
pub struct PrepareChargeRequest<'a> {
    pub order_id: &'a OrderId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    /// Update this charge's amount instead of creating a new one.
    pub existing: Option<&'a ChargeId>,
}

/// Operations checkout needs from a payment processor.
pub trait PaymentGateway: Send + Sync {
    /// Return the processor's customer for `email`, creating one if needed.
    fn find_or_create_customer(
        &self,
        email: &Email,
    ) -> impl Future<Output = Result<CustomerRef, GatewayError>> + Send;

    /// Save a payment method on a customer and make it their default.
    fn attach_payment_method(
        &self,
        customer: &CustomerRef,
        payment_method: &PaymentMethodRef,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Create a charge and confirm it off-session in one call.
    fn create_and_confirm_charge(
        &self,
        request: &ChargeRequest<'_>,
    ) -> impl Future<Output = Result<ChargeOutcome, GatewayError>> + Send;

    /// Fetch the current state of a charge.
    fn retrieve_charge(
        &self,
        id: &ChargeId,
    ) -> impl Future<Output = Result<ChargeOutcome, GatewayError>> + Send;

    /// Create an unconfirmed charge, or update the amount of an existing one.
    fn prepare_charge(
        &self,
        request: &PrepareChargeRequest<'_>,
    ) -> impl Future<Output = Result<PreparedCharge, GatewayError>> + Send;
}
