//! Seed the catalog from a YAML file.
//!
//! Upserts shipping templates, the store shipping configuration, products and
//! promo codes in one transaction. Re-running with the same file is a no-op.
//!
//! # File format
//!
//! ```yaml
//! shipping:
//!   enabled: true
//!   free_shipping_threshold: "50.00"
//!   handling_fee: "0.00"
//!   default_template: standard
//! templates:
//!   - id: standard
//!     base_rate: "3.00"
//!     additional_item_rate: "1.10"
//! products:
//!   - id: mug-1
//!     title: Ceramic Mug
//!     price: "12.00"
//!     shipping_template_id: standard
//! promos:
//!   - code: save10
//!     kind: percentage
//!     value: "10"
//!     active: true
//! ```

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use orchard_core::catalog::normalize_code;
use orchard_core::{Product, PromoCode, PromoKind, ShippingTemplate, ShippingTemplateId};
use orchard_storefront::db;

use super::{CommandError, database_url};

/// Store-wide shipping settings as written in the seed file.
#[derive(Debug, Deserialize)]
pub struct SeedShipping {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub free_shipping_threshold: Option<Decimal>,
    #[serde(default)]
    pub handling_fee: Option<Decimal>,
    pub default_template: ShippingTemplateId,
}

const fn default_enabled() -> bool {
    true
}

/// Contents of a catalog seed file.
#[derive(Debug, Deserialize)]
pub struct CatalogSeed {
    pub shipping: SeedShipping,
    #[serde(default)]
    pub templates: Vec<ShippingTemplate>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub promos: Vec<PromoCode>,
}

impl CatalogSeed {
    /// Parse and validate a seed document.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidCatalog` for malformed YAML, negative
    /// amounts, duplicate ids, or references to undefined templates.
    pub fn parse(content: &str) -> Result<Self, CommandError> {
        let seed: Self = serde_yaml::from_str(content)
            .map_err(|e| CommandError::InvalidCatalog(e.to_string()))?;
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> Result<(), CommandError> {
        let invalid = |msg: String| Err(CommandError::InvalidCatalog(msg));

        let mut templates = HashSet::new();
        for template in &self.templates {
            if !templates.insert(&template.id) {
                return invalid(format!("duplicate template '{}'", template.id));
            }
            if template.base_rate < Decimal::ZERO || template.additional_item_rate < Decimal::ZERO
            {
                return invalid(format!("template '{}' has a negative rate", template.id));
            }
        }

        if !templates.contains(&self.shipping.default_template) {
            return invalid(format!(
                "default template '{}' is not defined",
                self.shipping.default_template
            ));
        }

        let mut products = HashSet::new();
        for product in &self.products {
            if !products.insert(&product.id) {
                return invalid(format!("duplicate product '{}'", product.id));
            }
            if product.price < Decimal::ZERO {
                return invalid(format!("product '{}' has a negative price", product.id));
            }
            if let Some(template) = &product.shipping_template_id
                && !templates.contains(template)
            {
                return invalid(format!(
                    "product '{}' uses undefined template '{template}'",
                    product.id
                ));
            }
        }

        let mut codes = HashSet::new();
        for promo in &self.promos {
            let code = normalize_code(&promo.code);
            if code.is_empty() {
                return invalid("promo code must not be empty".to_string());
            }
            if promo.value < Decimal::ZERO {
                return invalid(format!("promo '{code}' has a negative value"));
            }
            if !codes.insert(code) {
                return invalid(format!("duplicate promo '{}'", promo.code));
            }
        }

        Ok(())
    }
}

/// Load a catalog seed file into the storefront database.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid, or if any
/// database statement fails (in which case nothing is written).
pub async fn catalog(file_path: &Path) -> Result<(), CommandError> {
    let content = tokio::fs::read_to_string(file_path)
        .await
        .map_err(|source| CommandError::Io {
            path: file_path.display().to_string(),
            source,
        })?;
    let seed = CatalogSeed::parse(&content)?;
    info!(
        templates = seed.templates.len(),
        products = seed.products.len(),
        promos = seed.promos.len(),
        "Parsed catalog seed"
    );

    let pool = db::create_pool(&database_url()?).await?;
    let mut tx = pool.begin().await?;

    for template in &seed.templates {
        sqlx::query(
            r"
            INSERT INTO storefront.shipping_template (id, base_rate, additional_item_rate)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET base_rate = EXCLUDED.base_rate,
                additional_item_rate = EXCLUDED.additional_item_rate
            ",
        )
        .bind(template.id.as_str())
        .bind(template.base_rate)
        .bind(template.additional_item_rate)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r"
        INSERT INTO storefront.shipping_config
            (id, enabled, free_shipping_threshold, handling_fee, default_template_id)
        VALUES (TRUE, $1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET enabled = EXCLUDED.enabled,
            free_shipping_threshold = EXCLUDED.free_shipping_threshold,
            handling_fee = EXCLUDED.handling_fee,
            default_template_id = EXCLUDED.default_template_id
        ",
    )
    .bind(seed.shipping.enabled)
    .bind(seed.shipping.free_shipping_threshold)
    .bind(seed.shipping.handling_fee)
    .bind(seed.shipping.default_template.as_str())
    .execute(&mut *tx)
    .await?;

    for product in &seed.products {
        sqlx::query(
            r"
            INSERT INTO storefront.product (id, title, price, shipping_template_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                price = EXCLUDED.price,
                shipping_template_id = EXCLUDED.shipping_template_id,
                updated_at = NOW()
            ",
        )
        .bind(product.id.as_str())
        .bind(&product.title)
        .bind(product.price)
        .bind(product.shipping_template_id.as_ref().map(ShippingTemplateId::as_str))
        .execute(&mut *tx)
        .await?;
    }

    for promo in &seed.promos {
        sqlx::query(
            r"
            INSERT INTO storefront.promo_code (code, kind, value, active, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE
            SET kind = EXCLUDED.kind,
                value = EXCLUDED.value,
                active = EXCLUDED.active,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(normalize_code(&promo.code))
        .bind(promo_kind_column(promo.kind))
        .bind(promo.value)
        .bind(promo.active)
        .bind(promo.expires_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!("Catalog seeded");
    Ok(())
}

const fn promo_kind_column(kind: PromoKind) -> &'static str {
    match kind {
        PromoKind::Percentage => "percentage",
        PromoKind::Fixed => "fixed",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SEED: &str = r#"
shipping:
  free_shipping_threshold: "50.00"
  default_template: standard
templates:
  - id: standard
    base_rate: "3.00"
    additional_item_rate: "1.10"
products:
  - id: mug-1
    title: Ceramic Mug
    price: "12.00"
    shipping_template_id: standard
  - id: sticker-2
    title: Sticker
    price: "2.50"
promos:
  - code: save10
    kind: percentage
    value: "10"
    active: true
"#;

    #[test]
    fn test_parses_seed_file() {
        let seed = CatalogSeed::parse(SEED).unwrap();
        assert!(seed.shipping.enabled);
        assert_eq!(seed.shipping.free_shipping_threshold, Some(Decimal::new(5000, 2)));
        assert_eq!(seed.products.len(), 2);
        assert_eq!(seed.promos.first().unwrap().kind, PromoKind::Percentage);
    }

    #[test]
    fn test_rejects_undefined_template() {
        let bad = SEED.replace("shipping_template_id: standard", "shipping_template_id: express");
        assert!(matches!(
            CatalogSeed::parse(&bad),
            Err(CommandError::InvalidCatalog(msg)) if msg.contains("express")
        ));
    }

    #[test]
    fn test_rejects_missing_default_template() {
        let bad = SEED.replace("default_template: standard", "default_template: bulky");
        assert!(CatalogSeed::parse(&bad).is_err());
    }

    #[test]
    fn test_rejects_duplicate_promo_ignoring_case() {
        let bad = format!(
            "{SEED}  - code: SAVE10\n    kind: fixed\n    value: \"5\"\n    active: true\n"
        );
        assert!(matches!(
            CatalogSeed::parse(&bad),
            Err(CommandError::InvalidCatalog(msg)) if msg.contains("duplicate promo")
        ));
    }

    #[test]
    fn test_promo_kind_column_matches_check_constraint() {
        assert_eq!(promo_kind_column(PromoKind::Percentage), "percentage");
        assert_eq!(promo_kind_column(PromoKind::Fixed), "fixed");
    }
}
