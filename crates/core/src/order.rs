//! The persisted order record.
//!
//! An order is assembled from a [`PriceQuote`] as an [`OrderDraft`] and only
//! becomes an [`Order`] when [`crate::OrderSigner::seal`] attaches its
//! integrity signature. Financial fields never change after that.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::{PriceQuote, VerifiedLineItem};
use crate::types::{AccountId, ChargeId, CurrencyCode, Email, OrderId, OrderStatus, ProductId};

/// One purchased line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<&VerifiedLineItem> for OrderItem {
    fn from(line: &VerifiedLineItem) -> Self {
        Self {
            product_id: line.product_id.clone(),
            title: line.title.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
        }
    }
}

/// An order that has been priced and paid but not yet signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub id: OrderId,
    pub user_id: Option<AccountId>,
    pub email: Email,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub promo_code: Option<String>,
    pub status: OrderStatus,
    pub payment_reference: ChargeId,
    pub is_fraud_suspect: bool,
    pub fraud_score: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl OrderDraft {
    /// Start a draft from a quote. Every money field comes from the quote.
    #[must_use]
    pub fn from_quote(
        id: OrderId,
        email: Email,
        quote: &PriceQuote,
        currency: CurrencyCode,
        payment_reference: ChargeId,
    ) -> Self {
        Self {
            id,
            user_id: None,
            email,
            items: quote.line_items.iter().map(OrderItem::from).collect(),
            subtotal: quote.subtotal,
            shipping_cost: quote.shipping_cost,
            discount: quote.discount,
            total: quote.total,
            currency,
            promo_code: quote.promo_applied.clone(),
            status: OrderStatus::Paid,
            payment_reference,
            is_fraud_suspect: false,
            fraud_score: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn into_order(self, integrity_signature: String) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            email: self.email,
            items: self.items,
            subtotal: self.subtotal,
            shipping_cost: self.shipping_cost,
            discount: self.discount,
            total: self.total,
            currency: self.currency,
            promo_code: self.promo_code,
            status: self.status,
            payment_reference: self.payment_reference,
            is_fraud_suspect: self.is_fraud_suspect,
            fraud_score: self.fraud_score,
            integrity_signature,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// A signed, persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// `None` for guest checkouts.
    pub user_id: Option<AccountId>,
    pub email: Email,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub promo_code: Option<String>,
    pub status: OrderStatus,
    pub payment_reference: ChargeId,
    pub is_fraud_suspect: bool,
    pub fraud_score: Option<u32>,
    pub integrity_signature: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// `(product id, quantity)` pairs in stored order.
    #[must_use]
    pub fn selection(&self) -> Vec<(ProductId, u32)> {
        self.items
            .iter()
            .map(|item| (item.product_id.clone(), item.quantity))
            .collect()
    }
}
