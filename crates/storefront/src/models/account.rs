//! Customer account domain types.

use chrono::{DateTime, Utc};

use orchard_core::{AccountId, AccountStatus, Email};

/// A customer account (domain type).
///
/// Checkout looks accounts up by email to link orders and to refuse
/// suspended customers.
#[derive(Debug, Clone)]
pub struct Account {
    /// Unique account ID.
    pub id: AccountId,
    /// Account email address.
    pub email: Email,
    /// Whether the account may place orders.
    pub status: AccountStatus,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Whether this account is allowed to check out.
    #[must_use]
    pub const fn can_checkout(&self) -> bool {
        self.status.can_checkout()
    }
}
