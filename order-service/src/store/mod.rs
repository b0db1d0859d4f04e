mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::{DbPool, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{CheckoutStatus, EventStatus, ItemSnapshot, OrderStatus, StoreContext};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::*;

/// Persistent storage for everything the order pipeline, dispatcher and
/// recovery sweep touch. Every mutation is scoped to one store.
///
/// Implementations must be `Send + Sync + 'static` so they can be shared
/// through axum state and moved into detached dispatch tasks.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Stores & catalog ──────────────────────────────────────────────────────

    /// Returns the store only if it is published.
    async fn published_store_by_slug(&self, slug: &str) -> Result<Option<StoreRecord>, StoreError>;

    async fn store_context(&self, store_id: Uuid) -> Result<StoreContext, StoreError>;

    /// Products with the given ids that belong to `store_id`. Foreign or
    /// unknown ids are simply absent from the result.
    async fn catalog_products(
        &self,
        store_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProductRecord>, StoreError>;

    async fn catalog_variants(&self, variant_ids: &[Uuid]) -> Result<Vec<VariantRecord>, StoreError>;

    // ── Orders ────────────────────────────────────────────────────────────────

    /// Inserts the order row, assigning the next per-store order number
    /// atomically with the insert.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn insert_order_items(
        &self,
        order_id: Uuid,
        items: &[ItemSnapshot],
    ) -> Result<Vec<OrderItem>, StoreError>;

    async fn order(&self, store_id: Uuid, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;

    async fn set_order_status(
        &self,
        store_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;

    /// Whether the store has an order for `phone` created strictly after `since`.
    async fn has_order_since(
        &self,
        store_id: Uuid,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ── Integrations ──────────────────────────────────────────────────────────

    async fn installations(&self, store_id: Uuid) -> Result<Vec<IntegrationInstallation>, StoreError>;

    /// Creates the installation or replaces its config.
    async fn upsert_installation(
        &self,
        store_id: Uuid,
        integration_id: &str,
        config: serde_json::Value,
    ) -> Result<IntegrationInstallation, StoreError>;

    async fn delete_installation(&self, store_id: Uuid, integration_id: &str) -> Result<bool, StoreError>;

    /// Records a dispatch attempt in `processing` state.
    async fn insert_event(&self, event: NewIntegrationEvent) -> Result<(), StoreError>;

    async fn finish_event(
        &self,
        event_id: Uuid,
        status: EventStatus,
        error: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Abandoned checkouts ───────────────────────────────────────────────────

    /// Moves every `pending` or `sent` checkout created before `created_before`
    /// to `expired`. Returns how many rows moved.
    async fn expire_checkouts(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// `pending` checkouts created in `(created_after, created_before]`,
    /// oldest first.
    async fn due_checkouts(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AbandonedCheckout>, StoreError>;

    /// Moves a checkout out of `pending`. Returns false when the row was no
    /// longer pending, so a repeated sweep never applies a transition twice.
    async fn transition_checkout(
        &self,
        checkout_id: Uuid,
        to: CheckoutStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
