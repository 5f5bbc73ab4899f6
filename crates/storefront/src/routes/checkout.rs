//! Checkout route handlers.
//!
//! Request bodies carry product ids and quantities only. Prices and totals
//! are always recomputed from the catalog; a client-sent total is ignored.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::instrument;

use orchard_core::{CartLineItem, ChargeId, Email, OrderId, ProductId};

use crate::db::{AccountRepository, PgOrderStore};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::ClientIdentity;
use crate::services::abuse_guard::GuardedAction;
use crate::services::checkout::{
    Checkout, CheckoutMethod, CheckoutOutcome, CheckoutRequest, IntentOutcome, IntentRequest,
    validate_items,
};
use crate::services::payments::StripeGateway;
use crate::state::AppState;

/// Body of `POST /checkout/intent`.
#[derive(Debug, Deserialize)]
pub struct IntentBody {
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    pub promo_code: Option<String>,
    /// Existing transaction to re-price.
    #[serde(default)]
    pub transaction_id: Option<ChargeId>,
    /// Order id issued alongside `transaction_id`.
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

/// Body of `POST /checkout/process`.
#[derive(Debug, Deserialize)]
pub struct ProcessBody {
    pub order_id: OrderId,
    pub email: String,
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    pub promo_code: Option<String>,
    pub method: CheckoutMethod,
}

/// Price a cart and prepare a client-confirmable charge.
///
/// POST /checkout/intent
#[instrument(skip_all, fields(client = %identity.as_str(), items = body.items.len()))]
pub async fn intent(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Json(body): Json<IntentBody>,
) -> Result<Json<IntentOutcome>> {
    enforce_limit(&state, &identity, GuardedAction::CheckoutIntent)?;
    validate_items(&body.items)?;

    let catalog = state
        .catalog()
        .snapshot_for(&product_ids(&body.items), body.promo_code.as_deref())
        .await?;

    let outcome = orchestrator(&state)
        .prepare_intent(
            &catalog,
            IntentRequest {
                items: body.items,
                promo_code: body.promo_code,
                transaction: body.transaction_id,
                order_id: body.order_id,
            },
        )
        .await?;

    Ok(Json(outcome))
}

/// Charge a cart and persist the signed order.
///
/// POST /checkout/process
#[instrument(
    skip_all,
    fields(client = %identity.as_str(), order_id = %body.order_id, method = body.method.kind())
)]
pub async fn process(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Json(body): Json<ProcessBody>,
) -> Result<Json<CheckoutOutcome>> {
    enforce_limit(&state, &identity, GuardedAction::CheckoutProcess)?;
    validate_items(&body.items)?;

    let email = Email::parse(&body.email)
        .map_err(|e| AppError::BadRequest(format!("Invalid email: {e}")))?;
    let account = AccountRepository::new(state.pool())
        .get_by_email(&email)
        .await?;

    let catalog = state
        .catalog()
        .snapshot_for(&product_ids(&body.items), body.promo_code.as_deref())
        .await?;

    add_breadcrumb(
        "checkout",
        "Processing checkout",
        &[
            ("order_id", body.order_id.as_str()),
            ("method", body.method.kind()),
        ],
    );

    let outcome = orchestrator(&state)
        .process(
            &catalog,
            CheckoutRequest {
                order_id: body.order_id,
                email,
                account,
                items: body.items,
                promo_code: body.promo_code,
                method: body.method,
            },
        )
        .await?;

    Ok(Json(outcome))
}

fn orchestrator(state: &AppState) -> Checkout<'_, StripeGateway, PgOrderStore> {
    Checkout::new(
        state.gateway(),
        state.orders(),
        state.signer(),
        state.config().checkout,
        state.config().currency,
    )
}

/// Reject the request once the client has used up its allowance.
pub(super) fn enforce_limit(
    state: &AppState,
    identity: &ClientIdentity,
    action: GuardedAction,
) -> Result<()> {
    let limit = state.config().abuse.limit_for(action);
    if state.abuse_guard().allow(identity.as_str(), action, limit) {
        Ok(())
    } else {
        tracing::warn!(client = %identity.as_str(), action = action.as_str(), "Abuse guard limit hit");
        Err(AppError::RateLimited)
    }
}

fn product_ids(items: &[CartLineItem]) -> Vec<ProductId> {
    let mut ids: Vec<ProductId> = items.iter().map(|item| item.product_id.clone()).collect();
    ids.sort();
    ids.dedup();
    ids
}
