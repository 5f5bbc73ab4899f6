//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use orchard_core::{IntegrityError, OrderSigner};

use crate::config::StorefrontConfig;
use crate::db::{CatalogRepository, PgOrderStore};
use crate::services::abuse_guard::AbuseGuard;
use crate::services::payments::{GatewayError, StripeGateway};

/// Error building application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("order signing key rejected: {0}")]
    Signer(#[from] IntegrityError),
    #[error("payment gateway client: {0}")]
    Gateway(#[from] GatewayError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    catalog: CatalogRepository,
    orders: PgOrderStore,
    gateway: Option<StripeGateway>,
    signer: OrderSigner,
    abuse_guard: Arc<AbuseGuard>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The payment gateway client is only built when credentials are
    /// configured; checkout reports `gateway_config_missing` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the order signing key is unusable or the gateway
    /// HTTP client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let signer = OrderSigner::new(&config.order_signing_secret)?;
        let gateway = config
            .payment
            .as_ref()
            .map(StripeGateway::new)
            .transpose()?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                catalog: CatalogRepository::new(pool.clone()),
                orders: PgOrderStore::new(pool.clone()),
                config,
                pool,
                gateway,
                signer,
                abuse_guard: Arc::new(AbuseGuard::new()),
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Catalog reads for pricing.
    #[must_use]
    pub fn catalog(&self) -> &CatalogRepository {
        &self.inner.catalog
    }

    /// Order persistence.
    #[must_use]
    pub fn orders(&self) -> &PgOrderStore {
        &self.inner.orders
    }

    /// Payment gateway client, if credentials are configured.
    #[must_use]
    pub fn gateway(&self) -> Option<&StripeGateway> {
        self.inner.gateway.as_ref()
    }

    /// Order signer.
    #[must_use]
    pub fn signer(&self) -> &OrderSigner {
        &self.inner.signer
    }

    /// Per-identity action limiter.
    #[must_use]
    pub fn abuse_guard(&self) -> &Arc<AbuseGuard> {
        &self.inner.abuse_guard
    }
}
