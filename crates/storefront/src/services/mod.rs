//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `abuse_guard` - Per-identity limits on checkout and support mutations
//! - `checkout` - Checkout orchestration (quote, charge, sign, persist)
//! - `payments` - Payment gateway client

pub mod abuse_guard;
pub mod checkout;
pub mod payments;
