//! Tamper-evident order signatures.
//!
//! An order's signature is HMAC-SHA256, keyed with a server secret, over a
//! canonical encoding of the fields that define what was bought and what was
//! paid: the order id, the total, and the ordered `(product id, quantity)`
//! pairs. Editing any of them in storage without re-signing makes
//! [`OrderSigner::verify`] fail.
//!
//! # Canonical encoding
//!
//! ```text
//! orchard-order-v1 \n
//! <len(id)>:<id> \n
//! <total with 2 decimals> \n
//! <item count> \n
//! <len(product id)>:<product id>x<quantity> \n   (one per item, in order)
//! ```
//!
//! Length prefixes keep `("ab", 1)` and `("a", "b1")`-style splices apart.

use std::fmt::Write as _;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use crate::order::{Order, OrderDraft};
use crate::types::{OrderId, ProductId, round_cents};

type HmacSha256 = Hmac<Sha256>;

const DOMAIN_TAG: &str = "orchard-order-v1";

/// Errors constructing a signer.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The signing secret is empty.
    #[error("order signing secret must not be empty")]
    EmptySecret,
    /// The HMAC implementation rejected the key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Signs and verifies orders.
///
/// Holds a keyed HMAC state; the raw secret is not retained.
#[derive(Clone)]
pub struct OrderSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for OrderSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSigner")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl OrderSigner {
    /// Create a signer from the configured secret.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::EmptySecret`] for an empty secret.
    pub fn new(secret: &SecretString) -> Result<Self, IntegrityError> {
        let key = secret.expose_secret().as_bytes();
        if key.is_empty() {
            return Err(IntegrityError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| IntegrityError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Sign a draft and turn it into a persistable order.
    #[must_use]
    pub fn seal(&self, draft: OrderDraft) -> Order {
        let selection: Vec<(ProductId, u32)> = draft
            .items
            .iter()
            .map(|item| (item.product_id.clone(), item.quantity))
            .collect();
        let signature = self.sign_fields(&draft.id, draft.total, &selection);
        draft.into_order(signature)
    }

    /// Compute the signature an order should carry.
    #[must_use]
    pub fn sign(&self, order: &Order) -> String {
        self.sign_fields(&order.id, order.total, &order.selection())
    }

    /// Check `signature` against the order's current fields.
    ///
    /// Comparison is constant-time. Malformed hex is simply a mismatch.
    #[must_use]
    pub fn verify(&self, order: &Order, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(&canonical_payload(&order.id, order.total, &order.selection()));
        mac.verify_slice(&expected).is_ok()
    }

    /// Check the signature stored on the order itself.
    #[must_use]
    pub fn verify_stored(&self, order: &Order) -> bool {
        self.verify(order, &order.integrity_signature)
    }

    fn sign_fields(&self, id: &OrderId, total: Decimal, selection: &[(ProductId, u32)]) -> String {
        let mut mac = self.mac.clone();
        mac.update(&canonical_payload(id, total, selection));
        hex::encode(mac.finalize().into_bytes())
    }
}

fn canonical_payload(id: &OrderId, total: Decimal, selection: &[(ProductId, u32)]) -> Vec<u8> {
    let mut payload = String::with_capacity(64 + selection.len() * 24);
    // Writing to a String cannot fail.
    let _ = writeln!(payload, "{DOMAIN_TAG}");
    let _ = writeln!(payload, "{}:{}", id.as_str().len(), id);
    let _ = writeln!(payload, "{:.2}", round_cents(total));
    let _ = writeln!(payload, "{}", selection.len());
    for (product_id, quantity) in selection {
        let _ = writeln!(
            payload,
            "{}:{}x{}",
            product_id.as_str().len(),
            product_id,
            quantity
        );
    }
    payload.into_bytes()
}
