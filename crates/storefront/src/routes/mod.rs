//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness check
//! GET  /health/ready           - Readiness check (database ping)
//!
//! # Checkout (JSON, rate limited)
//! POST /checkout/intent        - Quote a cart and prepare a charge
//! POST /checkout/process       - Charge a cart and place the order
//!
//! # Support (JSON, rate limited)
//! POST /support/tickets        - Open a support ticket
//! ```

pub mod checkout;
pub mod support;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::middleware::api_rate_limiter;
use crate::state::AppState;

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(checkout::intent))
        .route("/process", post(checkout::process))
}

/// Create the support routes router.
pub fn support_routes() -> Router<AppState> {
    Router::new().route("/tickets", post(support::create_ticket))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    let api = Router::new()
        .nest("/checkout", checkout_routes())
        .nest("/support", support_routes())
        .layer(api_rate_limiter());

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(api)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
