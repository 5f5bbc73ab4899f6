//! Checkout orchestration.
//!
//! [`Checkout::process`] turns a submitted cart into a signed, persisted order.
//! Both payment flows go through it:
//!
//! - **Manual**: the server finds or creates the gateway customer, optionally
//!   saves the payment method, then creates and confirms a charge for the
//!   quoted total.
//! - **Express**: the client already confirmed a charge (prepared by
//!   [`Checkout::prepare_intent`]); the server retrieves it and checks it
//!   against the quote.
//!
//! # Flow
//!
//! 1. Validate the request (cart shape, account standing). No gateway calls.
//! 2. Quote the cart from the catalog. Client prices are never used.
//! 3. If the order id is already stored, replay its outcome (same cart) or
//!    refuse (different cart).
//! 4. Charge or verify the charge. An express charge must belong to this
//!    order.
//! 5. Flag high-risk payments, sign the order, upsert it. If another request
//!    stored the order first, its record wins.

mod error;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use orchard_core::{
    CartLineItem, CatalogReader, ChargeId, CurrencyCode, Email, Order, OrderDraft, OrderId,
    OrderSigner, OrderStatus, PaymentMethodRef, PriceQuote, quote, to_minor_units,
};

pub use error::CheckoutError;

use crate::config::{AmountMismatchPolicy, CheckoutConfig};
use crate::db::{OrderStore, RepositoryError, StoreOutcome};
use crate::models::Account;
use crate::services::payments::{
    ChargeOutcome, ChargeRequest, ChargeStatus, PaymentGateway, PrepareChargeRequest,
};

/// Largest quantity accepted for a single cart line.
pub const MAX_QUANTITY: u32 = 99;

/// How the customer pays.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutMethod {
    /// Server creates and confirms the charge.
    Manual {
        #[serde(default)]
        payment_method: Option<PaymentMethodRef>,
        #[serde(default)]
        save_payment_method: bool,
    },
    /// Client confirmed a prepared charge.
    Express { transaction: ChargeId },
}

impl CheckoutMethod {
    /// Flow name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::Express { .. } => "express",
        }
    }
}

/// A checkout submission, after email parsing and account lookup.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: OrderId,
    pub email: Email,
    /// Account registered under `email`, if any.
    pub account: Option<Account>,
    pub items: Vec<CartLineItem>,
    pub promo_code: Option<String>,
    pub method: CheckoutMethod,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOutcome {
    pub success: bool,
    pub order_id: OrderId,
    pub payment_reference: ChargeId,
    pub is_fraud_suspect: bool,
    pub fraud_score: Option<u32>,
    /// The server-computed total that was charged.
    pub verified_total: Decimal,
    /// True when the order already existed and nothing was charged.
    pub replayed: bool,
}

impl CheckoutOutcome {
    fn for_order(order: &Order, replayed: bool) -> Self {
        Self {
            success: true,
            order_id: order.id.clone(),
            payment_reference: order.payment_reference.clone(),
            is_fraud_suspect: order.is_fraud_suspect,
            fraud_score: order.fraud_score,
            verified_total: order.total,
            replayed,
        }
    }
}

/// A request to price a cart and prepare a client-confirmable charge.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub items: Vec<CartLineItem>,
    pub promo_code: Option<String>,
    /// Re-price this charge instead of creating a new one.
    pub transaction: Option<ChargeId>,
    /// Order id issued with `transaction`; a fresh id is issued otherwise.
    pub order_id: Option<OrderId>,
}

/// A prepared charge plus the quote it was priced from.
#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub order_id: OrderId,
    pub transaction_id: ChargeId,
    pub client_secret: String,
    pub quote: PriceQuote,
}

/// Idempotency key sent with the confirm call for an order.
#[must_use]
pub fn confirm_idempotency_key(order_id: &OrderId) -> String {
    format!("order-{order_id}-confirm")
}

/// Checkout orchestrator.
///
/// Borrows its collaborators; build one per request. `gateway` is `None` when
/// no payment credentials are configured.
pub struct Checkout<'a, G, S> {
    gateway: Option<&'a G>,
    store: &'a S,
    signer: &'a OrderSigner,
    policy: CheckoutConfig,
    currency: CurrencyCode,
}

impl<'a, G, S> Checkout<'a, G, S>
where
    G: PaymentGateway,
    S: OrderStore,
{
    #[must_use]
    pub const fn new(
        gateway: Option<&'a G>,
        store: &'a S,
        signer: &'a OrderSigner,
        policy: CheckoutConfig,
        currency: CurrencyCode,
    ) -> Self {
        Self {
            gateway,
            store,
            signer,
            policy,
            currency,
        }
    }

    /// Charge (or verify the charge for) a cart and persist the signed order.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError` for invalid carts, suspended accounts, order id
    /// conflicts, gateway failures, unsuccessful or mismatched payments, and
    /// storage failures. Validation errors are raised before any gateway call.
    #[instrument(
        skip_all,
        fields(order_id = %request.order_id, method = request.method.kind())
    )]
    pub async fn process<C>(
        &self,
        catalog: &C,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, CheckoutError>
    where
        C: CatalogReader + Sync + ?Sized,
    {
        if !request.order_id.is_well_formed() {
            return Err(CheckoutError::InvalidOrderId);
        }
        validate_items(&request.items)?;
        if let Some(account) = &request.account
            && !account.can_checkout()
        {
            warn!(account_id = %account.id, "Checkout refused for suspended account");
            return Err(CheckoutError::AccountSuspended);
        }

        let quote = quote(
            catalog,
            &request.items,
            request.promo_code.as_deref(),
            Utc::now(),
        );

        if let Some(existing) = self.store.find(&request.order_id).await? {
            return self.replay(&existing, &quote);
        }

        let expected_minor = checked_total(&quote)?;
        let gateway = self.gateway.ok_or(CheckoutError::GatewayConfigMissing)?;

        let charge = match &request.method {
            CheckoutMethod::Manual {
                payment_method,
                save_payment_method,
            } => {
                self.charge_manual(
                    gateway,
                    &request,
                    payment_method.as_ref(),
                    *save_payment_method,
                    expected_minor,
                )
                .await?
            }
            CheckoutMethod::Express { transaction } => {
                self.verify_express(gateway, transaction, &request.order_id, expected_minor)
                    .await?
            }
        };

        let fraud_score = charge.risk_score;
        let is_fraud_suspect = fraud_score.is_some_and(|score| score > self.policy.fraud_threshold);
        if is_fraud_suspect {
            warn!(
                charge = %charge.id,
                fraud_score,
                threshold = self.policy.fraud_threshold,
                "Order flagged as fraud suspect"
            );
        }

        let mut draft = OrderDraft::from_quote(
            request.order_id,
            request.email,
            &quote,
            self.currency,
            charge.id.clone(),
        );
        draft.user_id = request.account.as_ref().map(|account| account.id);
        draft.is_fraud_suspect = is_fraud_suspect;
        draft.fraud_score = fraud_score;
        if charge.status != ChargeStatus::Succeeded {
            draft.status = OrderStatus::Processing;
        }

        let order = self.signer.seal(draft);
        match self.store.upsert(&order).await {
            Ok(StoreOutcome::Inserted) => {}
            Ok(StoreOutcome::Updated) => return self.settle_concurrent(&order).await,
            Err(RepositoryError::Conflict(_)) => {
                return Err(CheckoutError::ChargeAlreadyUsed(charge.id));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            total = %order.total,
            charge = %order.payment_reference,
            status = ?order.status,
            "Order placed"
        );
        Ok(CheckoutOutcome::for_order(&order, false))
    }

    /// Price a cart and create (or re-price) an unconfirmed charge for it.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError` for invalid carts, a missing gateway, or a
    /// gateway failure.
    #[instrument(skip_all, fields(items = request.items.len()))]
    pub async fn prepare_intent<C>(
        &self,
        catalog: &C,
        request: IntentRequest,
    ) -> Result<IntentOutcome, CheckoutError>
    where
        C: CatalogReader + Sync + ?Sized,
    {
        validate_items(&request.items)?;

        let quote = quote(
            catalog,
            &request.items,
            request.promo_code.as_deref(),
            Utc::now(),
        );
        let amount_minor = checked_total(&quote)?;
        let gateway = self.gateway.ok_or(CheckoutError::GatewayConfigMissing)?;

        let order_id = match (request.transaction.as_ref(), request.order_id) {
            (Some(_), Some(order_id)) if order_id.is_well_formed() => order_id,
            (Some(_), Some(_)) => return Err(CheckoutError::InvalidOrderId),
            _ => OrderId::generate(),
        };

        let prepared = gateway
            .prepare_charge(&PrepareChargeRequest {
                order_id: &order_id,
                amount_minor,
                currency: self.currency,
                existing: request.transaction.as_ref(),
            })
            .await?;

        info!(
            order_id = %order_id,
            transaction = %prepared.id,
            amount_minor = prepared.amount_minor,
            total = %quote.total,
            "Checkout intent prepared"
        );
        Ok(IntentOutcome {
            order_id,
            transaction_id: prepared.id,
            client_secret: prepared.client_secret,
            quote,
        })
    }

    fn replay(&self, existing: &Order, quote: &PriceQuote) -> Result<CheckoutOutcome, CheckoutError> {
        if !self.signer.verify_stored(existing) {
            tracing::error!(order_id = %existing.id, "Stored order failed integrity verification");
            return Err(CheckoutError::IntegrityViolation(existing.id.clone()));
        }
        if existing.selection() != quote.selection() {
            return Err(CheckoutError::OrderConflict(existing.id.clone()));
        }
        info!("Replaying stored order; gateway not contacted");
        Ok(CheckoutOutcome::for_order(existing, true))
    }

    /// Resolve an upsert that found the order id already stored.
    ///
    /// Another request stored the order between the lookup and the write. The
    /// stored record is the order; this request's outcome is reported only if
    /// it describes the same cart paid by the same charge.
    async fn settle_concurrent(&self, order: &Order) -> Result<CheckoutOutcome, CheckoutError> {
        let stored = self.store.find(&order.id).await?;
        match stored {
            Some(stored)
                if stored.selection() == order.selection()
                    && stored.payment_reference == order.payment_reference =>
            {
                info!("Order was stored concurrently with the same charge");
                Ok(CheckoutOutcome::for_order(&stored, true))
            }
            stored => {
                tracing::error!(
                    charge = %order.payment_reference,
                    total = %order.total,
                    stored_charge = ?stored.as_ref().map(|o| &o.payment_reference),
                    "Charge is not recorded on any order; order id was taken concurrently"
                );
                Err(CheckoutError::OrderConflict(order.id.clone()))
            }
        }
    }

    async fn charge_manual(
        &self,
        gateway: &G,
        request: &CheckoutRequest,
        payment_method: Option<&PaymentMethodRef>,
        save_payment_method: bool,
        amount_minor: i64,
    ) -> Result<ChargeOutcome, CheckoutError> {
        let customer = gateway.find_or_create_customer(&request.email).await?;

        if save_payment_method && let Some(payment_method) = payment_method {
            gateway
                .attach_payment_method(&customer, payment_method)
                .await?;
        }

        let idempotency_key = confirm_idempotency_key(&request.order_id);
        let charge = gateway
            .create_and_confirm_charge(&ChargeRequest {
                order_id: &request.order_id,
                amount_minor,
                currency: self.currency,
                customer: &customer,
                payment_method,
                idempotency_key: &idempotency_key,
            })
            .await?;

        if !charge.status.is_success_class() {
            return Err(CheckoutError::PaymentNotCompleted(charge.status));
        }
        Ok(charge)
    }

    async fn verify_express(
        &self,
        gateway: &G,
        transaction: &ChargeId,
        order_id: &OrderId,
        expected_minor: i64,
    ) -> Result<ChargeOutcome, CheckoutError> {
        let charge = gateway.retrieve_charge(transaction).await?;

        if !charge.status.is_success_class() {
            return Err(CheckoutError::PaymentNotCompleted(charge.status));
        }

        if let Some(issued_for) = &charge.order_id
            && issued_for != order_id
        {
            warn!(charge = %charge.id, issued_for = %issued_for, "Charge was issued for another order");
            return Err(CheckoutError::ChargeAlreadyUsed(charge.id));
        }

        if let Some(other) = self.store.find_by_payment_reference(&charge.id).await?
            && &other.id != order_id
        {
            warn!(charge = %charge.id, other_order = %other.id, "Charge reused across orders");
            return Err(CheckoutError::ChargeAlreadyUsed(charge.id));
        }

        if !charge
            .currency
            .eq_ignore_ascii_case(self.currency.gateway_code())
        {
            return Err(CheckoutError::CurrencyMismatch {
                expected: self.currency,
                charged: charge.currency,
            });
        }

        let difference = (charge.amount_minor - expected_minor).abs();
        if difference > self.policy.mismatch_tolerance_minor {
            match self.policy.mismatch_policy {
                AmountMismatchPolicy::Log => {
                    warn!(
                        charge = %charge.id,
                        expected_minor,
                        charged_minor = charge.amount_minor,
                        "Charged amount differs from quote"
                    );
                }
                AmountMismatchPolicy::Reject => {
                    return Err(CheckoutError::AmountMismatch {
                        expected_minor,
                        charged_minor: charge.amount_minor,
                    });
                }
            }
        }

        Ok(charge)
    }
}

/// Check cart shape before anything else runs.
///
/// # Errors
///
/// Returns `CheckoutError::EmptyCart` for no lines and
/// `CheckoutError::InvalidQuantity` for a quantity outside `1..=MAX_QUANTITY`.
pub fn validate_items(items: &[CartLineItem]) -> Result<(), CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    if let Some(item) = items
        .iter()
        .find(|item| !(1..=MAX_QUANTITY).contains(&item.quantity))
    {
        return Err(CheckoutError::InvalidQuantity {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
        });
    }
    Ok(())
}

/// Reject quotes that cannot be charged; return the total in minor units.
fn checked_total(quote: &PriceQuote) -> Result<i64, CheckoutError> {
    if !quote.has_items() {
        return Err(CheckoutError::EmptyCart);
    }
    if quote.total <= Decimal::ZERO {
        return Err(CheckoutError::InvalidTotal);
    }
    to_minor_units(quote.total).map_err(|_| CheckoutError::InvalidTotal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_items() {
        assert!(matches!(validate_items(&[]), Err(CheckoutError::EmptyCart)));
        assert!(matches!(
            validate_items(&[CartLineItem::new("mug-1", 0)]),
            Err(CheckoutError::InvalidQuantity { quantity: 0, .. })
        ));
        assert!(matches!(
            validate_items(&[CartLineItem::new("mug-1", MAX_QUANTITY + 1)]),
            Err(CheckoutError::InvalidQuantity { .. })
        ));
        assert!(validate_items(&[CartLineItem::new("mug-1", MAX_QUANTITY)]).is_ok());
    }

    #[test]
    fn test_confirm_idempotency_key() {
        assert_eq!(
            confirm_idempotency_key(&OrderId::new("abc-1")),
            "order-abc-1-confirm"
        );
    }

    #[test]
    fn test_checkout_method_wire_format() {
        let manual: CheckoutMethod = serde_json::from_str(
            r#"{"type": "manual", "payment_method": "pm_1", "save_payment_method": true}"#,
        )
        .unwrap();
        assert_eq!(
            manual,
            CheckoutMethod::Manual {
                payment_method: Some(PaymentMethodRef::new("pm_1")),
                save_payment_method: true,
            }
        );

        let express: CheckoutMethod =
            serde_json::from_str(r#"{"type": "express", "transaction": "pi_9"}"#).unwrap();
        assert_eq!(
            express,
            CheckoutMethod::Express {
                transaction: ChargeId::new("pi_9"),
            }
        );

        let bare: CheckoutMethod = serde_json::from_str(r#"{"type": "manual"}"#).unwrap();
        assert_eq!(
            bare,
            CheckoutMethod::Manual {
                payment_method: None,
                save_payment_method: false,
            }
        );
    }
}
