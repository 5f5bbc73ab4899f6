//! Order audit commands.
//!
//! `orders verify` recomputes the signature of every stored order with the
//! configured `ORDER_SIGNING_SECRET` and reports records whose financial
//! fields no longer match.

use secrecy::SecretString;
use tracing::{error, info};

use orchard_core::{Order, OrderSigner};
use orchard_storefront::config::{SIGNING_SECRET_VAR, validate_signing_secret};
use orchard_storefront::db::{self, PgOrderStore};

use super::{CommandError, database_url};

/// Verify every stored order's integrity signature.
///
/// # Errors
///
/// Returns `CommandError::TamperedOrders` if any order fails verification,
/// or an error if configuration or database access fails.
pub async fn verify() -> Result<(), CommandError> {
    let database_url = database_url()?;
    let secret = std::env::var(SIGNING_SECRET_VAR)
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar(SIGNING_SECRET_VAR))?;
    let signer = signer_for(&secret)?;

    let pool = db::create_pool(&database_url).await?;
    let orders = PgOrderStore::new(pool).all().await?;
    info!(orders = orders.len(), "Verifying stored orders");

    let tampered = tampered_orders(&signer, &orders);
    for order in &tampered {
        error!(
            order_id = %order.id,
            total = %order.total,
            payment_reference = %order.payment_reference,
            "Order failed integrity verification"
        );
    }

    if tampered.is_empty() {
        info!(orders = orders.len(), "All orders verified");
        Ok(())
    } else {
        Err(CommandError::TamperedOrders(tampered.len()))
    }
}

/// Build the signer, holding the key to the same rules as the storefront.
fn signer_for(secret: &SecretString) -> Result<OrderSigner, CommandError> {
    validate_signing_secret(secret, SIGNING_SECRET_VAR)?;
    Ok(OrderSigner::new(secret)?)
}

fn tampered_orders<'a>(signer: &OrderSigner, orders: &'a [Order]) -> Vec<&'a Order> {
    orders
        .iter()
        .filter(|order| !signer.verify_stored(order))
        .collect()
}
