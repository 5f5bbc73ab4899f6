//! Catalog reads for checkout pricing.
//!
//! Pricing runs against an in-memory [`CatalogSnapshot`]. This repository
//! builds one per request containing only the products in the cart and the
//! requested promo code. Shipping configuration and templates change rarely
//! and are cached with `moka` (1-minute TTL).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};

use orchard_core::catalog::normalize_code;
use orchard_core::{
    CatalogSnapshot, Product, ProductId, PromoCode, PromoKind, ShippingConfig, ShippingTemplate,
    ShippingTemplateId,
};

use super::RepositoryError;

const SHIPPING_CACHE_KEY: &str = "shipping";

/// Shipping configuration plus every template, cached together.
#[derive(Debug)]
struct ShippingData {
    config: ShippingConfig,
    templates: Vec<ShippingTemplate>,
}

#[derive(Debug, FromRow)]
struct ShippingConfigRow {
    enabled: bool,
    free_shipping_threshold: Option<Decimal>,
    handling_fee: Option<Decimal>,
    template_id: ShippingTemplateId,
    base_rate: Decimal,
    additional_item_rate: Decimal,
}

#[derive(Debug, FromRow)]
struct TemplateRow {
    id: ShippingTemplateId,
    base_rate: Decimal,
    additional_item_rate: Decimal,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: ProductId,
    title: String,
    price: Decimal,
    shipping_template_id: Option<ShippingTemplateId>,
}

#[derive(Debug, FromRow)]
struct PromoRow {
    code: String,
    kind: String,
    value: Decimal,
    active: bool,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<PromoRow> for PromoCode {
    type Error = RepositoryError;

    fn try_from(row: PromoRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "percentage" => PromoKind::Percentage,
            "fixed" => PromoKind::Fixed,
            other => {
                return Err(RepositoryError::DataCorruption(format!(
                    "unknown promo kind '{other}' for code {}",
                    row.code
                )));
            }
        };
        Ok(Self {
            code: row.code,
            kind,
            value: row.value,
            active: row.active,
            expires_at: row.expires_at,
        })
    }
}

/// Loads catalog snapshots from `PostgreSQL`.
///
/// Cheap to clone; clones share the shipping cache.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
    shipping_cache: Cache<&'static str, Arc<ShippingData>>,
}

impl CatalogRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let shipping_cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(60))
            .build();
        Self {
            pool,
            shipping_cache,
        }
    }

    /// Build a snapshot covering `product_ids` and, if given, `promo_code`.
    ///
    /// Products that do not exist are simply absent from the snapshot; pricing
    /// drops them from the quote.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    /// Returns `RepositoryError::DataCorruption` if the shipping configuration
    /// is missing or a promo row is malformed.
    #[instrument(skip(self, product_ids), fields(products = product_ids.len()))]
    pub async fn snapshot_for(
        &self,
        product_ids: &[ProductId],
        promo_code: Option<&str>,
    ) -> Result<CatalogSnapshot, RepositoryError> {
        let shipping = self.shipping().await?;

        let mut snapshot = CatalogSnapshot::new(shipping.config.clone());
        for template in &shipping.templates {
            snapshot.insert_template(template.clone());
        }

        for product in self.products(product_ids).await? {
            snapshot.insert_product(product);
        }

        if let Some(code) = promo_code.map(str::trim).filter(|code| !code.is_empty())
            && let Some(promo) = self.promo(code).await?
        {
            snapshot.insert_promo(promo);
        }

        debug!(found = snapshot.product_count(), "Loaded catalog snapshot");
        Ok(snapshot)
    }

    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, title, price, shipping_template_id
            FROM storefront.product
            WHERE id = ANY($1)
            ",
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Product {
                id: row.id,
                title: row.title,
                price: row.price,
                shipping_template_id: row.shipping_template_id,
            })
            .collect())
    }

    async fn promo(&self, code: &str) -> Result<Option<PromoCode>, RepositoryError> {
        let row = sqlx::query_as::<_, PromoRow>(
            r"
            SELECT code, kind, value, active, expires_at
            FROM storefront.promo_code
            WHERE code = $1
            ",
        )
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?;

        row.map(PromoCode::try_from).transpose()
    }

    async fn shipping(&self) -> Result<Arc<ShippingData>, RepositoryError> {
        if let Some(data) = self.shipping_cache.get(SHIPPING_CACHE_KEY).await {
            debug!("Cache hit for shipping configuration");
            return Ok(data);
        }

        let config = sqlx::query_as::<_, ShippingConfigRow>(
            r"
            SELECT c.enabled, c.free_shipping_threshold, c.handling_fee,
                   t.id AS template_id, t.base_rate, t.additional_item_rate
            FROM storefront.shipping_config c
            JOIN storefront.shipping_template t ON t.id = c.default_template_id
            ",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::DataCorruption("shipping configuration is missing".to_string())
        })?;

        let templates = sqlx::query_as::<_, TemplateRow>(
            r"
            SELECT id, base_rate, additional_item_rate
            FROM storefront.shipping_template
            ",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| ShippingTemplate {
            id: row.id,
            base_rate: row.base_rate,
            additional_item_rate: row.additional_item_rate,
        })
        .collect();

        let data = Arc::new(ShippingData {
            config: ShippingConfig {
                enabled: config.enabled,
                free_shipping_threshold: config.free_shipping_threshold,
                handling_fee: config.handling_fee,
                default_template: ShippingTemplate {
                    id: config.template_id,
                    base_rate: config.base_rate,
                    additional_item_rate: config.additional_item_rate,
                },
            },
            templates,
        });

        self.shipping_cache
            .insert(SHIPPING_CACHE_KEY, Arc::clone(&data))
            .await;
        Ok(data)
    }
}
