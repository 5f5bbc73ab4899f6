//! Authoritative cart pricing.
//!
//! [`quote`] is the single source of truth for what a cart costs. It reads
//! prices from the catalog and ignores anything the client claims about
//! prices or totals.
//!
//! # Algorithm
//!
//! 1. Price each line from the catalog; unknown products are dropped.
//! 2. Apply the promo code if it is active and unexpired (else no discount).
//! 3. Compute shipping unless shipping is disabled or the subtotal reaches the
//!    free-shipping threshold.
//! 4. `total = max(0, subtotal + shipping - discount)`.

pub mod shipping;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::CatalogReader;
use crate::types::{ProductId, ShippingTemplateId, round_cents};

/// A cart line as submitted by the client. Untrusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price the client displayed. Only used for drift diagnostics.
    #[serde(default, alias = "price")]
    pub client_price: Option<Decimal>,
}

impl CartLineItem {
    /// A line with no client-asserted price.
    #[must_use]
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            client_price: None,
        }
    }
}

/// A cart line priced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedLineItem {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: u32,
    /// Server-side unit price at quote time.
    pub unit_price: Decimal,
    /// `unit_price × quantity`.
    pub line_total: Decimal,
    #[serde(skip)]
    pub shipping_template_id: Option<ShippingTemplateId>,
}

/// Server-computed price breakdown for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub line_items: Vec<VerifiedLineItem>,
    /// Requested products that are no longer in the catalog.
    pub dropped: Vec<ProductId>,
    /// The promo code that contributed a discount, if any.
    pub promo_applied: Option<String>,
}

impl PriceQuote {
    /// Whether at least one line survived catalog resolution.
    #[must_use]
    pub fn has_items(&self) -> bool {
        !self.line_items.is_empty()
    }

    /// `(product id, quantity)` pairs in cart order.
    #[must_use]
    pub fn selection(&self) -> Vec<(ProductId, u32)> {
        self.line_items
            .iter()
            .map(|line| (line.product_id.clone(), line.quantity))
            .collect()
    }
}

/// Compute the authoritative quote for a cart.
///
/// Never fails: products missing from the catalog are dropped (and listed in
/// [`PriceQuote::dropped`]), and an unknown, inactive or expired promo code
/// contributes no discount. Lines with quantity 0 are ignored.
pub fn quote<C: CatalogReader + ?Sized>(
    catalog: &C,
    items: &[CartLineItem],
    promo_code: Option<&str>,
    now: DateTime<Utc>,
) -> PriceQuote {
    let mut line_items = Vec::with_capacity(items.len());
    let mut dropped = Vec::new();

    for item in items.iter().filter(|item| item.quantity > 0) {
        let Some(product) = catalog.product(&item.product_id) else {
            debug!(product_id = %item.product_id, "dropping unknown product from quote");
            dropped.push(item.product_id.clone());
            continue;
        };

        if let Some(client_price) = item.client_price
            && client_price != product.price
        {
            debug!(
                product_id = %product.id,
                client_price = %client_price,
                server_price = %product.price,
                "client price differs from catalog; using catalog"
            );
        }

        line_items.push(VerifiedLineItem {
            product_id: product.id.clone(),
            title: product.title.clone(),
            quantity: item.quantity,
            unit_price: product.price,
            line_total: round_cents(product.price * Decimal::from(item.quantity)),
            shipping_template_id: product.shipping_template_id.clone(),
        });
    }

    let subtotal: Decimal = line_items.iter().map(|line| line.line_total).sum();

    let promo = promo_code
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .and_then(|code| {
            let found = catalog.promo(code);
            if found.is_none_or(|promo| !promo.is_redeemable_at(now)) {
                debug!(code, "promo code not redeemable; no discount applied");
                return None;
            }
            found
        });
    let discount = promo.map_or(Decimal::ZERO, |promo| promo.discount_for(subtotal));

    let config = catalog.shipping_config();
    let ships_free = !config.enabled
        || config
            .free_shipping_threshold
            .is_some_and(|threshold| subtotal >= threshold);
    let shipping_cost = if ships_free || line_items.is_empty() {
        Decimal::ZERO
    } else {
        shipping::cart_shipping_cost(catalog, &line_items)
    };

    let total = (subtotal + shipping_cost - discount).max(Decimal::ZERO);

    PriceQuote {
        subtotal,
        shipping_cost,
        discount,
        total,
        line_items,
        dropped,
        promo_applied: promo.map(|promo| promo.code.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::catalog::{
        CatalogSnapshot, Product, PromoCode, PromoKind, ShippingConfig, ShippingTemplate,
    };

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn catalog(threshold: Option<Decimal>) -> CatalogSnapshot {
        CatalogSnapshot::new(ShippingConfig {
            enabled: true,
            free_shipping_threshold: threshold,
            handling_fee: None,
            default_template: ShippingTemplate {
                id: ShippingTemplateId::new("standard"),
                base_rate: dollars(300),
                additional_item_rate: dollars(110),
            },
        })
        .with_product(Product {
            id: ProductId::new("mug-1"),
            title: "Orchard Mug".to_string(),
            price: dollars(1200),
            shipping_template_id: None,
        })
    }

    #[test]
    fn test_mug_scenario() {
        let q = quote(
            &catalog(Some(dollars(5000))),
            &[CartLineItem::new("mug-1", 2)],
            None,
            Utc::now(),
        );
        assert_eq!(q.subtotal, dollars(2400));
        assert_eq!(q.shipping_cost, dollars(550));
        assert_eq!(q.discount, Decimal::ZERO);
        assert_eq!(q.total, dollars(2950));
    }

    #[test]
    fn test_client_price_is_ignored() {
        let mut line = CartLineItem::new("mug-1", 1);
        line.client_price = Some(dollars(1));
        let q = quote(&catalog(None), &[line], None, Utc::now());
        assert_eq!(q.subtotal, dollars(1200));
        assert_eq!(q.line_items[0].unit_price, dollars(1200));
    }

    #[test]
    fn test_unknown_products_are_dropped() {
        let q = quote(
            &catalog(None),
            &[CartLineItem::new("gone", 3), CartLineItem::new("mug-1", 1)],
            None,
            Utc::now(),
        );
        assert_eq!(q.dropped, vec![ProductId::new("gone")]);
        assert_eq!(q.line_items.len(), 1);
        assert_eq!(q.subtotal, dollars(1200));
    }

    #[test]
    fn test_empty_quote_has_no_shipping() {
        let q = quote(&catalog(None), &[CartLineItem::new("gone", 1)], None, Utc::now());
        assert!(!q.has_items());
        assert_eq!(q.total, Decimal::ZERO);
    }

    #[test]
    fn test_free_shipping_threshold_is_inclusive() {
        // Exactly at threshold
        let q = quote(
            &catalog(Some(dollars(2400))),
            &[CartLineItem::new("mug-1", 2)],
            None,
            Utc::now(),
        );
        assert_eq!(q.shipping_cost, Decimal::ZERO);

        // One cent below
        let q = quote(
            &catalog(Some(dollars(2401))),
            &[CartLineItem::new("mug-1", 2)],
            None,
            Utc::now(),
        );
        assert_eq!(q.shipping_cost, dollars(550));
    }

    #[test]
    fn test_disabled_shipping_is_free() {
        let mut snapshot = catalog(None);
        let mut config = snapshot.shipping_config().clone();
        config.enabled = false;
        snapshot = CatalogSnapshot::new(config).with_product(
            snapshot
                .product(&ProductId::new("mug-1"))
                .cloned()
                .expect("fixture product"),
        );
        let q = quote(&snapshot, &[CartLineItem::new("mug-1", 2)], None, Utc::now());
        assert_eq!(q.shipping_cost, Decimal::ZERO);
    }

    #[test]
    fn test_expired_promo_is_a_silent_noop() {
        let now = Utc::now();
        let snapshot = catalog(None).with_promo(PromoCode {
            code: "OLD".to_string(),
            kind: PromoKind::Fixed,
            value: dollars(500),
            active: true,
            expires_at: Some(now - Duration::days(1)),
        });
        let q = quote(&snapshot, &[CartLineItem::new("mug-1", 1)], Some("old"), now);
        assert_eq!(q.discount, Decimal::ZERO);
        assert_eq!(q.promo_applied, None);

        let q = quote(&snapshot, &[CartLineItem::new("mug-1", 1)], Some("NOPE"), now);
        assert_eq!(q.discount, Decimal::ZERO);
    }

    #[test]
    fn test_percentage_promo() {
        let snapshot = catalog(Some(dollars(5000))).with_promo(PromoCode {
            code: "TEN".to_string(),
            kind: PromoKind::Percentage,
            value: Decimal::from(10),
            active: true,
            expires_at: None,
        });
        let q = quote(
            &snapshot,
            &[CartLineItem::new("mug-1", 2)],
            Some("ten"),
            Utc::now(),
        );
        assert_eq!(q.discount, dollars(240));
        assert_eq!(q.total, dollars(2710));
        assert_eq!(q.promo_applied.as_deref(), Some("TEN"));
    }

    #[test]
    fn test_oversized_discount_clamps_total_to_zero() {
        let snapshot = catalog(None).with_promo(PromoCode {
            code: "ALLFREE".to_string(),
            kind: PromoKind::Fixed,
            value: dollars(100_000),
            active: true,
            expires_at: None,
        });
        let q = quote(
            &snapshot,
            &[CartLineItem::new("mug-1", 1)],
            Some("ALLFREE"),
            Utc::now(),
        );
        assert_eq!(q.total, Decimal::ZERO);
        assert!(q.discount > q.subtotal + q.shipping_cost);
    }

    #[test]
    fn test_zero_quantity_lines_are_ignored() {
        let q = quote(&catalog(None), &[CartLineItem::new("mug-1", 0)], None, Utc::now());
        assert!(!q.has_items());
        assert!(q.dropped.is_empty());
    }
}
