//! Status enums for orders and accounts.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a persisted order.
///
/// Checkout only ever creates `Paid` or `Processing` orders; the remaining
/// states are written by fulfillment tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Payment captured.
    #[default]
    Paid,
    /// Payment accepted by the gateway but not yet settled.
    Processing,
    /// Shipped to the customer.
    Fulfilled,
    /// Cancelled after creation.
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Processing => write!(f, "processing"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl OrderStatus {
    /// Whether a later write may move an order from `current` to `self`.
    ///
    /// A settled or fulfilled order never falls back to `Processing`.
    #[must_use]
    pub const fn may_replace(self, current: Self) -> bool {
        !matches!(self, Self::Processing) || matches!(current, Self::Processing)
    }
}

/// Standing of a customer account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "account_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    /// Barred from checkout.
    Suspended,
}

impl AccountStatus {
    /// Whether this account may place orders.
    #[must_use]
    pub const fn can_checkout(self) -> bool {
        matches!(self, Self::Active)
    }
}
