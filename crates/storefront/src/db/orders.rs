//! Order persistence.
//!
//! Orders are written with a single upsert keyed by id. The first write stores
//! every field, including the integrity signature. Later writes for the same
//! id only touch `status` and `updated_at`, so the financial record and its
//! signature are fixed once inserted. The status is only taken from a write
//! carrying the stored payment reference, and never moves a settled order
//! back to `processing`.
//!
//! [`OrderStore`] is the seam the checkout orchestrator depends on.
//! [`PgOrderStore`] is the production implementation; [`MemoryOrderStore`]
//! backs tests and local tooling with the same semantics.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use orchard_core::{
    AccountId, ChargeId, CurrencyCode, Email, Order, OrderId, OrderItem, OrderStatus,
};

use super::RepositoryError;

const PAYMENT_REFERENCE_INDEX: &str = "idx_order_payment_reference";

/// Whether an upsert created the row or hit an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Updated,
}

/// Persistence operations checkout needs.
pub trait OrderStore: Send + Sync {
    /// Look up an order by id.
    fn find(
        &self,
        id: &OrderId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Look up the order a gateway charge was recorded against.
    fn find_by_payment_reference(
        &self,
        reference: &ChargeId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Insert the order, or update status and `updated_at` if the id exists.
    ///
    /// Returns `RepositoryError::Conflict` if the payment reference already
    /// belongs to a different order.
    fn upsert(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<StoreOutcome, RepositoryError>> + Send;
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[derive(Debug, FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: Option<AccountId>,
    email: String,
    items: Json<Vec<OrderItem>>,
    subtotal: Decimal,
    shipping_cost: Decimal,
    discount: Decimal,
    total: Decimal,
    currency: String,
    promo_code: Option<String>,
    status: OrderStatus,
    payment_reference: ChargeId,
    is_fraud_suspect: bool,
    fraud_score: Option<i32>,
    integrity_signature: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email on order {}: {e}", row.id))
        })?;
        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;
        let fraud_score = row
            .fraud_score
            .map(u32::try_from)
            .transpose()
            .map_err(|_| {
                RepositoryError::DataCorruption(format!("negative fraud score on order {}", row.id))
            })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            email,
            items: row.items.0,
            subtotal: row.subtotal,
            shipping_cost: row.shipping_cost,
            discount: row.discount,
            total: row.total,
            currency,
            promo_code: row.promo_code,
            status: row.status,
            payment_reference: row.payment_reference,
            is_fraud_suspect: row.is_fraud_suspect,
            fraud_score,
            integrity_signature: row.integrity_signature,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_ORDER: &str = r#"
    SELECT id, user_id, email, items, subtotal, shipping_cost, discount, total,
           currency, promo_code, status, payment_reference, is_fraud_suspect,
           fraud_score, integrity_signature, created_at, updated_at
    FROM storefront."order"
"#;

/// `PostgreSQL`-backed order store.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every stored order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a row cannot be decoded.
    pub async fn all(&self) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{SELECT_ORDER} ORDER BY created_at"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }
}

impl OrderStore for PgOrderStore {
    #[instrument(skip(self), fields(order_id = %id))]
    async fn find(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{SELECT_ORDER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    #[instrument(skip(self), fields(payment_reference = %reference))]
    async fn find_by_payment_reference(
        &self,
        reference: &ChargeId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "{SELECT_ORDER} WHERE payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn upsert(&self, order: &Order) -> Result<StoreOutcome, RepositoryError> {
        let fraud_score = order
            .fraud_score
            .map(|score| i32::try_from(score).unwrap_or(i32::MAX));

        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO storefront."order" (
                id, user_id, email, items, subtotal, shipping_cost, discount, total,
                currency, promo_code, status, payment_reference, is_fraud_suspect,
                fraud_score, integrity_signature, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE
            SET status = CASE
                    WHEN storefront."order".payment_reference = EXCLUDED.payment_reference
                        AND (EXCLUDED.status <> 'processing'
                            OR storefront."order".status = 'processing')
                    THEN EXCLUDED.status
                    ELSE storefront."order".status
                END,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&order.id)
        .bind(order.user_id)
        .bind(order.email.as_str())
        .bind(Json(&order.items))
        .bind(order.subtotal)
        .bind(order.shipping_cost)
        .bind(order.discount)
        .bind(order.total)
        .bind(order.currency.code())
        .bind(order.promo_code.as_deref())
        .bind(order.status)
        .bind(&order.payment_reference)
        .bind(order.is_fraud_suspect)
        .bind(fraud_score)
        .bind(&order.integrity_signature)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let duplicate_charge = e
                .as_database_error()
                .and_then(|db| db.constraint())
                == Some(PAYMENT_REFERENCE_INDEX);
            if duplicate_charge {
                RepositoryError::Conflict(format!(
                    "payment reference {} is already recorded",
                    order.payment_reference
                ))
            } else {
                RepositoryError::Database(e)
            }
        })?;

        Ok(if inserted {
            StoreOutcome::Inserted
        } else {
            StoreOutcome::Updated
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Order store kept in process memory.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrderStore {
    orders: Arc<Mutex<HashMap<OrderId, Order>>>,
}

impl MemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Overwrite a stored order without any upsert rules. For simulating
    /// out-of-band edits to persisted data.
    pub fn replace(&self, order: Order) {
        self.lock().insert(order.id.clone(), order);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OrderId, Order>> {
        // A poisoned map still holds consistent orders; each write is one insert.
        self.orders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl OrderStore for MemoryOrderStore {
    async fn find(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn find_by_payment_reference(
        &self,
        reference: &ChargeId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()
            .values()
            .find(|order| &order.payment_reference == reference)
            .cloned())
    }

    async fn upsert(&self, order: &Order) -> Result<StoreOutcome, RepositoryError> {
        let mut orders = self.lock();

        if let Some(existing) = orders.get_mut(&order.id) {
            if existing.payment_reference == order.payment_reference
                && order.status.may_replace(existing.status)
            {
                existing.status = order.status;
            }
            existing.updated_at = Utc::now();
            return Ok(StoreOutcome::Updated);
        }

        if orders
            .values()
            .any(|other| other.payment_reference == order.payment_reference)
        {
            return Err(RepositoryError::Conflict(format!(
                "payment reference {} is already recorded",
                order.payment_reference
            )));
        }

        orders.insert(order.id.clone(), order.clone());
        Ok(StoreOutcome::Inserted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orchard_core::{
        CartLineItem, CatalogSnapshot, OrderDraft, OrderSigner, Product, ProductId,
        ShippingConfig, ShippingTemplate, ShippingTemplateId, quote,
    };
    use secrecy::SecretString;

    use super::*;

    fn sealed(id: &str, charge: &str, quantity: u32) -> Order {
        let catalog = CatalogSnapshot::new(ShippingConfig {
            enabled: false,
            free_shipping_threshold: None,
            handling_fee: None,
            default_template: ShippingTemplate {
                id: ShippingTemplateId::new("standard"),
                base_rate: Decimal::ZERO,
                additional_item_rate: Decimal::ZERO,
            },
        })
        .with_product(Product {
            id: ProductId::new("mug-1"),
            title: "Mug".to_string(),
            price: Decimal::new(1200, 2),
            shipping_template_id: None,
        });
        let q = quote(&catalog, &[CartLineItem::new("mug-1", quantity)], None, Utc::now());
        let signer =
            OrderSigner::new(&SecretString::from("test-signing-secret".to_string())).unwrap();
        signer.seal(OrderDraft::from_quote(
            OrderId::new(id),
            Email::parse("buyer@example.com").unwrap(),
            &q,
            CurrencyCode::USD,
            ChargeId::new(charge),
        ))
    }

    #[tokio::test]
    async fn test_memory_upsert_inserts_once() {
        let store = MemoryOrderStore::new();
        let order = sealed("o-1", "pi_1", 2);

        assert_eq!(store.upsert(&order).await.unwrap(), StoreOutcome::Inserted);
        assert_eq!(store.upsert(&order).await.unwrap(), StoreOutcome::Updated);
        assert_eq!(store.len(), 1);

        let stored = store.find(&order.id).await.unwrap().unwrap();
        assert_eq!(stored.integrity_signature, order.integrity_signature);
    }

    #[tokio::test]
    async fn test_memory_upsert_keeps_financial_fields() {
        let store = MemoryOrderStore::new();
        let original = sealed("o-1", "pi_1", 2);
        store.upsert(&original).await.unwrap();

        let mut changed = sealed("o-1", "pi_1", 5);
        changed.status = OrderStatus::Fulfilled;
        store.upsert(&changed).await.unwrap();

        let stored = store.find(&original.id).await.unwrap().unwrap();
        assert_eq!(stored.total, original.total);
        assert_eq!(stored.items, original.items);
        assert_eq!(stored.integrity_signature, original.integrity_signature);
        assert_eq!(stored.status, OrderStatus::Fulfilled);
    }

    #[tokio::test]
    async fn test_memory_upsert_keeps_status_of_other_charge() {
        let store = MemoryOrderStore::new();
        store.upsert(&sealed("o-1", "pi_1", 2)).await.unwrap();

        let mut other = sealed("o-1", "pi_2", 1);
        other.status = OrderStatus::Cancelled;
        assert_eq!(store.upsert(&other).await.unwrap(), StoreOutcome::Updated);

        let stored = store.find(&OrderId::new("o-1")).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_reference, ChargeId::new("pi_1"));
    }

    #[tokio::test]
    async fn test_memory_upsert_never_demotes_paid_order() {
        let store = MemoryOrderStore::new();
        store.upsert(&sealed("o-1", "pi_1", 2)).await.unwrap();

        let mut late = sealed("o-1", "pi_1", 2);
        late.status = OrderStatus::Processing;
        store.upsert(&late).await.unwrap();

        let stored = store.find(&OrderId::new("o-1")).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_memory_rejects_reused_payment_reference() {
        let store = MemoryOrderStore::new();
        store.upsert(&sealed("o-1", "pi_1", 1)).await.unwrap();

        let result = store.upsert(&sealed("o-2", "pi_1", 1)).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));

        let found = store
            .find_by_payment_reference(&ChargeId::new("pi_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, OrderId::new("o-1"));
    }
}
