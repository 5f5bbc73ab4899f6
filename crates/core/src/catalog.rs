//! Catalog records and the read-only lookup interface used by pricing.
//!
//! The pricing calculator never talks to storage directly. It sees the catalog
//! through [`CatalogReader`], a synchronous key-value view. Production code
//! loads a [`CatalogSnapshot`] for the products in a cart and hands it to
//! [`crate::pricing::quote`]; tests build snapshots by hand.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ProductId, ShippingTemplateId, round_cents};

/// A sellable product as seen by pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    /// Current unit price. The only price checkout ever charges.
    pub price: Decimal,
    /// Per-product shipping template; `None` uses the store default.
    #[serde(default)]
    pub shipping_template_id: Option<ShippingTemplateId>,
}

/// Shipping rates applied per cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingTemplate {
    pub id: ShippingTemplateId,
    /// Charged once per line (or per unit when `additional_item_rate` is 0).
    pub base_rate: Decimal,
    /// Charged per unit on top of the base rate, after rounding normalization.
    pub additional_item_rate: Decimal,
}

/// Store-wide shipping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingConfig {
    /// When false, every order ships free.
    pub enabled: bool,
    /// Subtotals at or above this amount ship free.
    #[serde(default)]
    pub free_shipping_threshold: Option<Decimal>,
    /// Flat fee added once to computed shipping.
    #[serde(default)]
    pub handling_fee: Option<Decimal>,
    /// Template used by products without their own.
    pub default_template: ShippingTemplate,
}

/// How a promo code reduces the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// `value` percent of the subtotal.
    Percentage,
    /// `value` off, in currency units.
    Fixed,
}

/// A promotional discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub kind: PromoKind,
    pub value: Decimal,
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PromoCode {
    /// Whether the code can be redeemed at `now`.
    ///
    /// A code expiring exactly at `now` is already expired.
    #[must_use]
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    /// Discount this code grants against `subtotal`, rounded to cents.
    ///
    /// Not clamped: a fixed discount may exceed the subtotal. The quote clamps
    /// the order total instead.
    #[must_use]
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.kind {
            PromoKind::Fixed => self.value,
            PromoKind::Percentage => subtotal * self.value / Decimal::ONE_HUNDRED,
        };
        round_cents(raw.max(Decimal::ZERO))
    }
}

/// Synchronous, read-only catalog lookups.
///
/// Implementations must not perform writes; pricing may call these in any
/// order and any number of times.
pub trait CatalogReader {
    /// Look up a product by id.
    fn product(&self, id: &ProductId) -> Option<&Product>;

    /// Look up a shipping template by id.
    fn shipping_template(&self, id: &ShippingTemplateId) -> Option<&ShippingTemplate>;

    /// Look up a promo code. Codes are case-insensitive.
    fn promo(&self, code: &str) -> Option<&PromoCode>;

    /// Store-wide shipping configuration.
    fn shipping_config(&self) -> &ShippingConfig;
}

/// An in-memory slice of the catalog.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    products: HashMap<ProductId, Product>,
    templates: HashMap<ShippingTemplateId, ShippingTemplate>,
    promos: HashMap<String, PromoCode>,
    shipping: ShippingConfig,
}

impl CatalogSnapshot {
    /// Create an empty snapshot with the given shipping configuration.
    #[must_use]
    pub fn new(shipping: ShippingConfig) -> Self {
        Self {
            products: HashMap::new(),
            templates: HashMap::new(),
            promos: HashMap::new(),
            shipping,
        }
    }

    /// Add or replace a product.
    pub fn insert_product(&mut self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    /// Add or replace a shipping template.
    pub fn insert_template(&mut self, template: ShippingTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Add or replace a promo code.
    pub fn insert_promo(&mut self, promo: PromoCode) {
        self.promos.insert(normalize_code(&promo.code), promo);
    }

    /// Builder-style [`Self::insert_product`].
    #[must_use]
    pub fn with_product(mut self, product: Product) -> Self {
        self.insert_product(product);
        self
    }

    /// Builder-style [`Self::insert_template`].
    #[must_use]
    pub fn with_template(mut self, template: ShippingTemplate) -> Self {
        self.insert_template(template);
        self
    }

    /// Builder-style [`Self::insert_promo`].
    #[must_use]
    pub fn with_promo(mut self, promo: PromoCode) -> Self {
        self.insert_promo(promo);
        self
    }

    /// Number of products in the snapshot.
    #[must_use]
    pub fn product_count(&self) -> usize {
        self.products.len()
    }
}

impl CatalogReader for CatalogSnapshot {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    fn shipping_template(&self, id: &ShippingTemplateId) -> Option<&ShippingTemplate> {
        self.templates.get(id)
    }

    fn promo(&self, code: &str) -> Option<&PromoCode> {
        self.promos.get(&normalize_code(code))
    }

    fn shipping_config(&self) -> &ShippingConfig {
        &self.shipping
    }
}

/// Canonical form of a promo code for lookups.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
