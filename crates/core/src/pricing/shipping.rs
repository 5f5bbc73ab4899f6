//! Shipping rate engine.
//!
//! Each cart line resolves a shipping template (the product's own, else the
//! store default) and is charged:
//!
//! ```text
//! additional_item_rate == 0:  base_rate × quantity
//! otherwise:                  base_rate + quantity × adjusted(additional_item_rate)
//! ```
//!
//! `adjusted` keeps per-unit add-ons on a small set of price endings
//! (`.25`, `.50`, `.75`, `.95`). Anything else is rounded to the nearest
//! quarter, and a rate that rounds onto a whole dollar is bumped up by `.25`.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::catalog::{CatalogReader, ShippingTemplate};
use crate::types::round_cents;

use super::VerifiedLineItem;

/// Fractional endings that are left untouched.
fn allowed_endings() -> [Decimal; 4] {
    [
        Decimal::new(25, 2),
        Decimal::new(50, 2),
        Decimal::new(75, 2),
        Decimal::new(95, 2),
    ]
}

/// Normalize a per-unit additional shipping rate.
///
/// - `1.95` stays `1.95` (allowed ending)
/// - `1.10` rounds to `1.00`, lands on a whole dollar, becomes `1.25`
/// - `2.00` becomes `2.25`
/// - `1.60` rounds to `1.50`
#[must_use]
pub fn adjusted_additional_rate(rate: Decimal) -> Decimal {
    if allowed_endings().contains(&rate.fract()) {
        return rate;
    }

    let quarters = (rate * Decimal::from(4))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let rounded = quarters / Decimal::from(4);

    if rounded.fract().is_zero() {
        rounded + Decimal::new(25, 2)
    } else {
        rounded
    }
}

/// Shipping charged for one cart line.
#[must_use]
pub fn line_shipping_cost(template: &ShippingTemplate, quantity: u32) -> Decimal {
    let quantity = Decimal::from(quantity);
    if template.additional_item_rate.is_zero() {
        template.base_rate * quantity
    } else {
        template.base_rate + quantity * adjusted_additional_rate(template.additional_item_rate)
    }
}

/// Shipping for a whole cart: the sum of line costs plus the handling fee.
///
/// Free-shipping rules (disabled shipping, threshold) are applied by the
/// caller; this always returns the computed rate.
#[must_use]
pub fn cart_shipping_cost<C: CatalogReader + ?Sized>(
    catalog: &C,
    lines: &[VerifiedLineItem],
) -> Decimal {
    let config = catalog.shipping_config();

    let lines_total: Decimal = lines
        .iter()
        .map(|line| {
            let template = line
                .shipping_template_id
                .as_ref()
                .and_then(|id| catalog.shipping_template(id))
                .unwrap_or(&config.default_template);
            line_shipping_cost(template, line.quantity)
        })
        .sum();

    round_cents(lines_total + config.handling_fee.unwrap_or(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use crate::catalog::{CatalogSnapshot, ShippingConfig};
    use crate::types::{ProductId, ShippingTemplateId};

    use super::*;

    fn template(base: Decimal, additional: Decimal) -> ShippingTemplate {
        ShippingTemplate {
            id: ShippingTemplateId::new("t"),
            base_rate: base,
            additional_item_rate: additional,
        }
    }

    #[test]
    fn test_adjusted_rate_rounds_to_nearest_quarter() {
        assert_eq!(
            adjusted_additional_rate(Decimal::new(110, 2)),
            Decimal::new(125, 2)
        );
        assert_eq!(
            adjusted_additional_rate(Decimal::new(160, 2)),
            Decimal::new(150, 2)
        );
        assert_eq!(
            adjusted_additional_rate(Decimal::new(340, 2)),
            Decimal::new(350, 2)
        );
    }

    #[test]
    fn test_adjusted_rate_bumps_whole_dollars() {
        assert_eq!(
            adjusted_additional_rate(Decimal::new(200, 2)),
            Decimal::new(225, 2)
        );
        // 1.90 rounds up to 2.00, then bumps
        assert_eq!(
            adjusted_additional_rate(Decimal::new(190, 2)),
            Decimal::new(225, 2)
        );
        assert_eq!(adjusted_additional_rate(Decimal::from(3)), Decimal::new(325, 2));
    }

    #[test]
    fn test_adjusted_rate_keeps_allowed_endings() {
        for cents in [195, 125, 150, 175, 95, 25] {
            let rate = Decimal::new(cents, 2);
            assert_eq!(adjusted_additional_rate(rate), rate, "rate {rate}");
        }
        // Scale differences do not matter: 1.5 is the same as 1.50
        assert_eq!(
            adjusted_additional_rate(Decimal::new(15, 1)),
            Decimal::new(15, 1)
        );
    }

    #[test]
    fn test_zero_additional_rate_charges_base_per_unit() {
        let t = template(Decimal::new(4, 0), Decimal::ZERO);
        assert_eq!(line_shipping_cost(&t, 3), Decimal::new(12, 0));
    }

    #[test]
    fn test_additional_rate_charged_for_every_unit() {
        let t = template(Decimal::new(3, 0), Decimal::new(110, 2));
        // 3 + 2 × 1.25
        assert_eq!(line_shipping_cost(&t, 2), Decimal::new(550, 2));
        // 3 + 1 × 1.25
        assert_eq!(line_shipping_cost(&t, 1), Decimal::new(425, 2));
    }

    #[test]
    fn test_cart_cost_uses_product_template_and_handling_fee() {
        let flat = ShippingTemplate {
            id: ShippingTemplateId::new("flat"),
            base_rate: Decimal::new(4, 0),
            additional_item_rate: Decimal::ZERO,
        };
        let catalog = CatalogSnapshot::new(ShippingConfig {
            enabled: true,
            free_shipping_threshold: None,
            handling_fee: Some(Decimal::new(150, 2)),
            default_template: template(Decimal::new(3, 0), Decimal::new(110, 2)),
        })
        .with_template(flat);

        let line = |id: &str, quantity: u32, template: Option<&str>| VerifiedLineItem {
            product_id: ProductId::new(id),
            title: id.to_string(),
            quantity,
            unit_price: Decimal::ONE,
            line_total: Decimal::from(quantity),
            shipping_template_id: template.map(ShippingTemplateId::new),
        };
        let lines = [line("mug-1", 2, None), line("poster-2", 1, Some("flat"))];

        // 5.50 default + 4.00 flat + 1.50 handling
        assert_eq!(cart_shipping_cost(&catalog, &lines), Decimal::new(1100, 2));
    }
}
