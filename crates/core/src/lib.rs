//! Orchard Core - pricing and checkout-integrity library.
//!
//! This crate holds everything about an order that can be computed without
//! touching the network or a database:
//! - `storefront` - HTTP checkout service built on top of these types
//! - `cli` - Operator tools (migrations, catalog seeding, order audits)
//!
//! # Architecture
//!
//! The core crate contains only types, traits and pure functions - no I/O, no
//! database access, no HTTP clients. Catalog data reaches the pricing
//! calculator through the [`catalog::CatalogReader`] trait, so quotes can be
//! computed against an in-memory snapshot in tests and in production alike.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, money, emails, and statuses
//! - [`catalog`] - Catalog records and the read-only lookup trait
//! - [`pricing`] - Authoritative cart quotes and the shipping rate engine
//! - [`order`] - The persisted order record
//! - [`integrity`] - Keyed signatures over an order's financial fields

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod catalog;
pub mod integrity;
pub mod order;
pub mod pricing;
pub mod types;

pub use catalog::{
    CatalogReader, CatalogSnapshot, Product, PromoCode, PromoKind, ShippingConfig,
    ShippingTemplate,
};
pub use integrity::{IntegrityError, OrderSigner};
pub use order::{Order, OrderDraft, OrderItem};
pub use pricing::{CartLineItem, PriceQuote, VerifiedLineItem, quote};
pub use types::*;
