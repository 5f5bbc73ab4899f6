//! End-to-end checkout against the scripted gateway and in-memory store.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use orchard_core::{
    AccountId, AccountStatus, CartLineItem, ChargeId, CurrencyCode, Order, OrderId, OrderStatus,
    PaymentMethodRef,
};
use orchard_integration_tests::{
    CheckoutHarness, GatewayCall, ScriptedGateway, buyer, dollars, express_request,
    manual_request, two_mugs,
};
use orchard_storefront::config::AmountMismatchPolicy;
use orchard_storefront::db::{MemoryOrderStore, OrderStore, RepositoryError, StoreOutcome};
use orchard_storefront::models::Account;
use orchard_storefront::services::checkout::{
    Checkout, CheckoutError, CheckoutMethod, IntentRequest, MAX_QUANTITY,
};
use orchard_storefront::services::payments::{ChargeStatus, GatewayError};

fn account(status: AccountStatus) -> Account {
    Account {
        id: AccountId::new(7),
        email: buyer(),
        status,
        created_at: Utc::now(),
    }
}

/// Store whose first `stale` lookups miss, as when another request commits
/// the same order id between this request's lookup and its write.
struct LaggingStore {
    inner: MemoryOrderStore,
    stale: AtomicUsize,
}

impl LaggingStore {
    fn new(inner: &MemoryOrderStore, stale: usize) -> Self {
        Self {
            inner: inner.clone(),
            stale: AtomicUsize::new(stale),
        }
    }
}

impl OrderStore for LaggingStore {
    async fn find(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let missed = self
            .stale
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Ok(None);
        }
        self.inner.find(id).await
    }

    async fn find_by_payment_reference(
        &self,
        reference: &ChargeId,
    ) -> Result<Option<Order>, RepositoryError> {
        self.inner.find_by_payment_reference(reference).await
    }

    async fn upsert(&self, order: &Order) -> Result<StoreOutcome, RepositoryError> {
        self.inner.upsert(order).await
    }
}

// =============================================================================
// Manual flow
// =============================================================================

#[tokio::test]
async fn test_manual_checkout_charges_server_total() {
    let h = CheckoutHarness::new();

    let outcome = h
        .checkout()
        .process(&h.catalog, manual_request("ord-1", two_mugs()))
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(!outcome.replayed);
    assert_eq!(outcome.verified_total, dollars(2950));
    assert_eq!(outcome.order_id, OrderId::new("ord-1"));
    assert!(h.gateway.calls().contains(&GatewayCall::CreateAndConfirm {
        amount_minor: 2950,
        idempotency_key: "order-ord-1-confirm".to_string(),
    }));

    let stored = h.store.find(&OrderId::new("ord-1")).await.unwrap().unwrap();
    assert_eq!(stored.total, dollars(2950));
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.payment_reference, outcome.payment_reference);
    assert!(h.signer.verify_stored(&stored));
}

#[tokio::test]
async fn test_client_prices_are_ignored() {
    let h = CheckoutHarness::new();
    let mut line = CartLineItem::new("mug-1", 2);
    line.client_price = Some(dollars(1));

    let outcome = h
        .checkout()
        .process(&h.catalog, manual_request("ord-cheap", vec![line]))
        .await
        .unwrap();

    assert_eq!(outcome.verified_total, dollars(2950));
}

#[tokio::test]
async fn test_saving_payment_method_attaches_it() {
    let h = CheckoutHarness::new();
    let mut request = manual_request("ord-save", two_mugs());
    request.method = CheckoutMethod::Manual {
        payment_method: Some(PaymentMethodRef::new("pm_card_visa")),
        save_payment_method: true,
    };

    h.checkout().process(&h.catalog, request).await.unwrap();

    assert!(h.gateway.calls().iter().any(|call| matches!(
        call,
        GatewayCall::AttachPaymentMethod { payment_method, .. }
            if payment_method == &PaymentMethodRef::new("pm_card_visa")
    )));
}

#[tokio::test]
async fn test_declined_charge_surfaces_gateway_message() {
    let h = CheckoutHarness::new();
    h.gateway.decline("Your card was declined.");

    let err = h
        .checkout()
        .process(&h.catalog, manual_request("ord-declined", two_mugs()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::Gateway(GatewayError::Api { ref message, .. })
            if message == "Your card was declined."
    ));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_unfinished_charge_is_not_an_order() {
    let h = CheckoutHarness::new();
    h.gateway.set_status(ChargeStatus::RequiresAction);

    let err = h
        .checkout()
        .process(&h.catalog, manual_request("ord-3ds", two_mugs()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::PaymentNotCompleted(ChargeStatus::RequiresAction)
    ));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_processing_charge_creates_processing_order() {
    let h = CheckoutHarness::new();
    h.gateway.set_status(ChargeStatus::Processing);

    h.checkout()
        .process(&h.catalog, manual_request("ord-slow", two_mugs()))
        .await
        .unwrap();

    let stored = h
        .store
        .find(&OrderId::new("ord-slow"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_validation_happens_before_gateway() {
    let h = CheckoutHarness::new();

    let empty = h
        .checkout()
        .process(&h.catalog, manual_request("ord-empty", Vec::new()))
        .await;
    assert!(matches!(empty, Err(CheckoutError::EmptyCart)));

    let zero = h
        .checkout()
        .process(
            &h.catalog,
            manual_request("ord-zero", vec![CartLineItem::new("mug-1", 0)]),
        )
        .await;
    assert!(matches!(zero, Err(CheckoutError::InvalidQuantity { .. })));

    let huge = h
        .checkout()
        .process(
            &h.catalog,
            manual_request("ord-huge", vec![CartLineItem::new("mug-1", MAX_QUANTITY + 1)]),
        )
        .await;
    assert!(matches!(huge, Err(CheckoutError::InvalidQuantity { .. })));

    let bad_id = h
        .checkout()
        .process(&h.catalog, manual_request("ord 1; drop", two_mugs()))
        .await;
    assert!(matches!(bad_id, Err(CheckoutError::InvalidOrderId)));

    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_products_only_is_empty_cart() {
    let h = CheckoutHarness::new();

    let err = h
        .checkout()
        .process(
            &h.catalog,
            manual_request("ord-ghost", vec![CartLineItem::new("discontinued", 1)]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::EmptyCart));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_discount_to_zero_is_invalid_total() {
    let h = CheckoutHarness::new();
    let mut catalog = h.catalog.clone();
    catalog.insert_promo(orchard_core::PromoCode {
        code: "EVERYTHING".to_string(),
        kind: orchard_core::PromoKind::Fixed,
        value: dollars(100_000),
        active: true,
        expires_at: None,
    });
    let mut request = manual_request("ord-free", two_mugs());
    request.promo_code = Some("everything".to_string());

    let err = h.checkout().process(&catalog, request).await.unwrap_err();

    assert!(matches!(err, CheckoutError::InvalidTotal));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_suspended_account_is_refused_before_gateway() {
    let h = CheckoutHarness::new();
    let mut request = manual_request("ord-banned", two_mugs());
    request.account = Some(account(AccountStatus::Suspended));

    let err = h.checkout().process(&h.catalog, request).await.unwrap_err();

    assert!(matches!(err, CheckoutError::AccountSuspended));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_active_account_is_linked_to_order() {
    let h = CheckoutHarness::new();
    let mut request = manual_request("ord-member", two_mugs());
    request.account = Some(account(AccountStatus::Active));

    h.checkout().process(&h.catalog, request).await.unwrap();

    let stored = h
        .store
        .find(&OrderId::new("ord-member"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.user_id, Some(AccountId::new(7)));
}

#[tokio::test]
async fn test_missing_gateway_is_configuration_error() {
    let h = CheckoutHarness::new();

    let err = h
        .checkout_without_gateway()
        .process(&h.catalog, manual_request("ord-nogw", two_mugs()))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::GatewayConfigMissing));
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn test_resubmission_replays_without_charging() {
    let h = CheckoutHarness::new();
    let first = h
        .checkout()
        .process(&h.catalog, manual_request("ord-twice", two_mugs()))
        .await
        .unwrap();
    let calls_after_first = h.gateway.calls().len();

    let second = h
        .checkout()
        .process(&h.catalog, manual_request("ord-twice", two_mugs()))
        .await
        .unwrap();

    assert!(second.replayed);
    assert_eq!(second.payment_reference, first.payment_reference);
    assert_eq!(second.verified_total, first.verified_total);
    assert_eq!(h.gateway.calls().len(), calls_after_first);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.gateway.charges_created(), 1);
}

#[tokio::test]
async fn test_same_order_id_with_different_cart_conflicts() {
    let h = CheckoutHarness::new();
    h.checkout()
        .process(&h.catalog, manual_request("ord-clash", two_mugs()))
        .await
        .unwrap();

    let err = h
        .checkout()
        .process(
            &h.catalog,
            manual_request("ord-clash", vec![CartLineItem::new("mug-1", 5)]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::OrderConflict(id) if id == OrderId::new("ord-clash")));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_replay_of_tampered_order_is_refused() {
    let h = CheckoutHarness::new();
    h.checkout()
        .process(&h.catalog, manual_request("ord-edit", two_mugs()))
        .await
        .unwrap();

    let mut stored = h
        .store
        .find(&OrderId::new("ord-edit"))
        .await
        .unwrap()
        .unwrap();
    stored.total = dollars(100);
    h.store.replace(stored);

    let err = h
        .checkout()
        .process(&h.catalog, manual_request("ord-edit", two_mugs()))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::IntegrityViolation(_)));
}

// =============================================================================
// Fraud flag
// =============================================================================

#[tokio::test]
async fn test_high_risk_score_flags_order() {
    let h = CheckoutHarness::new();
    h.gateway.set_risk_score(Some(80));

    let outcome = h
        .checkout()
        .process(&h.catalog, manual_request("ord-risky", two_mugs()))
        .await
        .unwrap();

    assert!(outcome.is_fraud_suspect);
    assert_eq!(outcome.fraud_score, Some(80));
    let stored = h
        .store
        .find(&OrderId::new("ord-risky"))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_fraud_suspect);
}

#[tokio::test]
async fn test_risk_score_at_threshold_is_not_flagged() {
    let h = CheckoutHarness::new();
    h.gateway.set_risk_score(Some(65));

    let outcome = h
        .checkout()
        .process(&h.catalog, manual_request("ord-edge", two_mugs()))
        .await
        .unwrap();

    assert!(!outcome.is_fraud_suspect);
    assert_eq!(outcome.fraud_score, Some(65));
}

// =============================================================================
// Express flow
// =============================================================================

#[tokio::test]
async fn test_express_checkout_verifies_charge() {
    let h = CheckoutHarness::new();
    h.gateway
        .insert_charge(ScriptedGateway::confirmed_charge("pi_express", 2950));

    let outcome = h
        .checkout()
        .process(&h.catalog, express_request("ord-x1", two_mugs(), "pi_express"))
        .await
        .unwrap();

    assert_eq!(outcome.payment_reference, ChargeId::new("pi_express"));
    assert_eq!(outcome.verified_total, dollars(2950));
    assert_eq!(outcome.fraud_score, Some(12));
    assert!(
        !h.gateway
            .calls()
            .iter()
            .any(|call| matches!(call, GatewayCall::CreateAndConfirm { .. }))
    );
}

#[tokio::test]
async fn test_express_unconfirmed_charge_is_refused() {
    let h = CheckoutHarness::new();
    let mut charge = ScriptedGateway::confirmed_charge("pi_pending", 2950);
    charge.status = ChargeStatus::RequiresPaymentMethod;
    h.gateway.insert_charge(charge);

    let err = h
        .checkout()
        .process(&h.catalog, express_request("ord-x2", two_mugs(), "pi_pending"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::PaymentNotCompleted(ChargeStatus::RequiresPaymentMethod)
    ));
}

#[tokio::test]
async fn test_express_unknown_charge_is_not_found() {
    let h = CheckoutHarness::new();

    let err = h
        .checkout()
        .process(&h.catalog, express_request("ord-x3", two_mugs(), "pi_nope"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::Gateway(GatewayError::ChargeNotFound(_))
    ));
}

#[tokio::test]
async fn test_express_mismatch_is_logged_by_default() {
    let h = CheckoutHarness::new();
    h.gateway
        .insert_charge(ScriptedGateway::confirmed_charge("pi_short", 100));

    let outcome = h
        .checkout()
        .process(&h.catalog, express_request("ord-x4", two_mugs(), "pi_short"))
        .await
        .unwrap();

    // The order records the authoritative total, not the charged amount.
    assert_eq!(outcome.verified_total, dollars(2950));
}

#[tokio::test]
async fn test_express_mismatch_rejected_by_policy() {
    let mut h = CheckoutHarness::new();
    h.policy.mismatch_policy = AmountMismatchPolicy::Reject;
    h.gateway
        .insert_charge(ScriptedGateway::confirmed_charge("pi_short", 100));

    let err = h
        .checkout()
        .process(&h.catalog, express_request("ord-x5", two_mugs(), "pi_short"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::AmountMismatch {
            expected_minor: 2950,
            charged_minor: 100,
        }
    ));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_express_difference_within_tolerance_passes_reject_policy() {
    let mut h = CheckoutHarness::new();
    h.policy.mismatch_policy = AmountMismatchPolicy::Reject;
    h.gateway
        .insert_charge(ScriptedGateway::confirmed_charge("pi_close", 2955));

    let outcome = h
        .checkout()
        .process(&h.catalog, express_request("ord-x6", two_mugs(), "pi_close"))
        .await;

    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_express_currency_mismatch() {
    let h = CheckoutHarness::new();
    let mut charge = ScriptedGateway::confirmed_charge("pi_eur", 2950);
    charge.currency = "eur".to_string();
    h.gateway.insert_charge(charge);

    let err = h
        .checkout()
        .process(&h.catalog, express_request("ord-x7", two_mugs(), "pi_eur"))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::CurrencyMismatch { .. }));
}

#[tokio::test]
async fn test_express_charge_cannot_pay_for_two_orders() {
    let h = CheckoutHarness::new();
    h.gateway
        .insert_charge(ScriptedGateway::confirmed_charge("pi_once", 2950));
    h.checkout()
        .process(&h.catalog, express_request("ord-a", two_mugs(), "pi_once"))
        .await
        .unwrap();

    let err = h
        .checkout()
        .process(&h.catalog, express_request("ord-b", two_mugs(), "pi_once"))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::ChargeAlreadyUsed(id) if id == ChargeId::new("pi_once")));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_express_charge_issued_for_another_order_is_refused() {
    let h = CheckoutHarness::new();
    let mut charge = ScriptedGateway::confirmed_charge("pi_a", 2950);
    charge.order_id = Some(OrderId::new("ord-A"));
    h.gateway.insert_charge(charge);

    let err = h
        .checkout()
        .process(&h.catalog, express_request("ord-B", two_mugs(), "pi_a"))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::ChargeAlreadyUsed(id) if id == ChargeId::new("pi_a")));
    assert!(h.store.is_empty());
}

// =============================================================================
// Concurrent submissions
// =============================================================================

#[tokio::test]
async fn test_concurrent_order_with_other_charge_is_a_conflict() {
    let h = CheckoutHarness::new();
    let first = h
        .checkout()
        .process(&h.catalog, manual_request("ord-r", two_mugs()))
        .await
        .unwrap();
    h.gateway
        .insert_charge(ScriptedGateway::confirmed_charge("pi_other", 3400));

    let lagging = LaggingStore::new(&h.store, 1);
    let checkout = Checkout::new(
        Some(&h.gateway),
        &lagging,
        &h.signer,
        h.policy,
        CurrencyCode::USD,
    );
    let err = checkout
        .process(
            &h.catalog,
            express_request("ord-r", vec![CartLineItem::new("poster-2", 1)], "pi_other"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::OrderConflict(id) if id == OrderId::new("ord-r")));
    let stored = h.store.find(&OrderId::new("ord-r")).await.unwrap().unwrap();
    assert_eq!(stored.total, dollars(2950));
    assert_eq!(stored.payment_reference, first.payment_reference);
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_submission_reports_stored_order() {
    let h = CheckoutHarness::new();
    let first = h
        .checkout()
        .process(&h.catalog, manual_request("ord-dup", two_mugs()))
        .await
        .unwrap();

    let lagging = LaggingStore::new(&h.store, 1);
    let checkout = Checkout::new(
        Some(&h.gateway),
        &lagging,
        &h.signer,
        h.policy,
        CurrencyCode::USD,
    );
    let second = checkout
        .process(&h.catalog, manual_request("ord-dup", two_mugs()))
        .await
        .unwrap();

    // The confirm call reused the idempotency key, so no second charge exists.
    assert_eq!(h.gateway.charges_created(), 1);
    assert!(second.replayed);
    assert_eq!(second.payment_reference, first.payment_reference);
    assert_eq!(second.verified_total, first.verified_total);
    assert_eq!(h.store.len(), 1);
}

// =============================================================================
// Intent
// =============================================================================

#[tokio::test]
async fn test_intent_issues_order_id_and_prices_charge() {
    let h = CheckoutHarness::new();

    let intent = h
        .checkout()
        .prepare_intent(
            &h.catalog,
            IntentRequest {
                items: two_mugs(),
                promo_code: None,
                transaction: None,
                order_id: None,
            },
        )
        .await
        .unwrap();

    assert!(intent.order_id.is_well_formed());
    assert_eq!(intent.quote.total, dollars(2950));
    assert!(intent.client_secret.starts_with(intent.transaction_id.as_str()));
    assert!(h.gateway.calls().contains(&GatewayCall::Prepare {
        amount_minor: 2950,
        existing: None,
    }));
}

#[tokio::test]
async fn test_intent_repricing_keeps_order_id() {
    let h = CheckoutHarness::new();
    let first = h
        .checkout()
        .prepare_intent(
            &h.catalog,
            IntentRequest {
                items: two_mugs(),
                promo_code: None,
                transaction: None,
                order_id: None,
            },
        )
        .await
        .unwrap();

    let second = h
        .checkout()
        .prepare_intent(
            &h.catalog,
            IntentRequest {
                items: vec![CartLineItem::new("mug-1", 5)],
                promo_code: None,
                transaction: Some(first.transaction_id.clone()),
                order_id: Some(first.order_id.clone()),
            },
        )
        .await
        .unwrap();

    assert_eq!(second.order_id, first.order_id);
    assert_eq!(second.transaction_id, first.transaction_id);
    // 5 x $12.00 = $60.00, over the free-shipping threshold.
    assert_eq!(second.quote.total, dollars(6000));
    assert!(h.gateway.calls().contains(&GatewayCall::Prepare {
        amount_minor: 6000,
        existing: Some(first.transaction_id),
    }));
}

#[tokio::test]
async fn test_intent_then_express_checkout() {
    let h = CheckoutHarness::new();
    let intent = h
        .checkout()
        .prepare_intent(
            &h.catalog,
            IntentRequest {
                items: two_mugs(),
                promo_code: None,
                transaction: None,
                order_id: None,
            },
        )
        .await
        .unwrap();

    // The client confirms the prepared charge.
    let mut confirmed =
        ScriptedGateway::confirmed_charge(intent.transaction_id.as_str(), 2950);
    confirmed.order_id = Some(intent.order_id.clone());
    h.gateway.insert_charge(confirmed);

    let outcome = h
        .checkout()
        .process(
            &h.catalog,
            express_request(
                intent.order_id.as_str(),
                two_mugs(),
                intent.transaction_id.as_str(),
            ),
        )
        .await
        .unwrap();

    assert_eq!(outcome.order_id, intent.order_id);
    assert_eq!(outcome.payment_reference, intent.transaction_id);
}

#[tokio::test]
async fn test_intent_rejects_malformed_order_id() {
    let h = CheckoutHarness::new();

    let err = h
        .checkout()
        .prepare_intent(
            &h.catalog,
            IntentRequest {
                items: two_mugs(),
                promo_code: None,
                transaction: Some(ChargeId::new("pi_1")),
                order_id: Some(OrderId::new("../../etc")),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::InvalidOrderId));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_intent_with_empty_cart_fails() {
    let h = CheckoutHarness::new();

    let err = h
        .checkout()
        .prepare_intent(
            &h.catalog,
            IntentRequest {
                items: Vec::new(),
                promo_code: None,
                transaction: None,
                order_id: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::EmptyCart));
}
