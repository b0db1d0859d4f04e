use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::{CheckoutStatus, EventStatus, ItemSnapshot, OrderStatus, StoreContext};
use uuid::Uuid;

use super::Store;
use crate::error::StoreError;
use crate::models::*;

#[derive(Default)]
struct MemoryState {
    stores: HashMap<Uuid, (StoreRecord, i64)>,
    products: HashMap<Uuid, ProductRecord>,
    variants: HashMap<Uuid, VariantRecord>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
    installations: Vec<IntegrationInstallation>,
    events: Vec<IntegrationEvent>,
    checkouts: Vec<AbandonedCheckout>,
}

/// In-process `Store` backend. Seeding and inspection helpers are inherent
/// methods; the trait only carries what the service itself needs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_item_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_store(&self, store: StoreRecord) {
        self.state.lock().stores.insert(store.id, (store, 0));
    }

    pub fn add_product(&self, product: ProductRecord) {
        self.state.lock().products.insert(product.id, product);
    }

    pub fn add_variant(&self, variant: VariantRecord) {
        self.state.lock().variants.insert(variant.id, variant);
    }

    pub fn add_checkout(&self, checkout: AbandonedCheckout) {
        self.state.lock().checkouts.push(checkout);
    }

    /// Inserts an order row as-is, bypassing numbering.
    pub fn add_order(&self, order: Order) {
        self.state.lock().orders.push(order);
    }

    /// Makes every later `insert_order_items` call fail.
    pub fn fail_item_inserts(&self, fail: bool) {
        self.fail_item_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    pub fn items_of(&self, order_id: Uuid) -> Vec<OrderItem> {
        self.state
            .lock()
            .order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<IntegrationEvent> {
        self.state.lock().events.clone()
    }

    pub fn checkout(&self, checkout_id: Uuid) -> Option<AbandonedCheckout> {
        self.state
            .lock()
            .checkouts
            .iter()
            .find(|c| c.id == checkout_id)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn published_store_by_slug(&self, slug: &str) -> Result<Option<StoreRecord>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .stores
            .values()
            .map(|(store, _)| store)
            .find(|store| store.slug == slug && store.published)
            .cloned())
    }

    async fn store_context(&self, store_id: Uuid) -> Result<StoreContext, StoreError> {
        let state = self.state.lock();
        state
            .stores
            .get(&store_id)
            .map(|(store, _)| store.context())
            .ok_or_else(|| StoreError::NotFound(format!("store {}", store_id)))
    }

    async fn catalog_products(
        &self,
        store_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProductRecord>, StoreError> {
        let state = self.state.lock();
        Ok(product_ids
            .iter()
            .filter_map(|id| state.products.get(id))
            .filter(|product| product.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn catalog_variants(&self, variant_ids: &[Uuid]) -> Result<Vec<VariantRecord>, StoreError> {
        let state = self.state.lock();
        Ok(variant_ids
            .iter()
            .filter_map(|id| state.variants.get(id))
            .cloned()
            .collect())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut state = self.state.lock();
        let (_, seq) = state
            .stores
            .get_mut(&order.store_id)
            .ok_or_else(|| StoreError::NotFound(format!("store {}", order.store_id)))?;
        *seq += 1;
        let order_number = *seq;

        let order = Order {
            id: order.id,
            store_id: order.store_id,
            order_number,
            customer: order.customer,
            note: order.note,
            subtotal: order.subtotal,
            total: order.total,
            payment_method: order.payment_method,
            status: OrderStatus::Pending,
            created_at: order.created_at,
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn insert_order_items(
        &self,
        order_id: Uuid,
        items: &[ItemSnapshot],
    ) -> Result<Vec<OrderItem>, StoreError> {
        if self.fail_item_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("order_items insert rejected".to_string()));
        }
        let rows: Vec<OrderItem> = items
            .iter()
            .map(|snapshot| OrderItem {
                id: Uuid::new_v4(),
                order_id,
                snapshot: snapshot.clone(),
            })
            .collect();
        self.state.lock().order_items.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn order(&self, store_id: Uuid, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .find(|o| o.id == order_id && o.store_id == store_id)
            .cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self.items_of(order_id))
    }

    async fn set_order_status(
        &self,
        store_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut state = self.state.lock();
        Ok(state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.store_id == store_id)
            .map(|order| {
                order.status = status;
                order.clone()
            }))
    }

    async fn has_order_since(
        &self,
        store_id: Uuid,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .any(|o| o.store_id == store_id && o.customer.phone == phone && o.created_at > since))
    }

    async fn installations(&self, store_id: Uuid) -> Result<Vec<IntegrationInstallation>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .installations
            .iter()
            .filter(|i| i.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn upsert_installation(
        &self,
        store_id: Uuid,
        integration_id: &str,
        config: serde_json::Value,
    ) -> Result<IntegrationInstallation, StoreError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        if let Some(existing) = state
            .installations
            .iter_mut()
            .find(|i| i.store_id == store_id && i.integration_id == integration_id)
        {
            existing.config = config;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let installation = IntegrationInstallation {
            id: Uuid::new_v4(),
            store_id,
            integration_id: integration_id.to_string(),
            config,
            created_at: now,
            updated_at: now,
        };
        state.installations.push(installation.clone());
        Ok(installation)
    }

    async fn delete_installation(&self, store_id: Uuid, integration_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let before = state.installations.len();
        state
            .installations
            .retain(|i| !(i.store_id == store_id && i.integration_id == integration_id));
        Ok(state.installations.len() < before)
    }

    async fn insert_event(&self, event: NewIntegrationEvent) -> Result<(), StoreError> {
        self.state.lock().events.push(IntegrationEvent {
            id: event.id,
            store_id: event.store_id,
            integration_id: event.integration_id,
            event_type: event.event_type.as_str().to_string(),
            payload: event.payload,
            status: EventStatus::Processing,
            error: None,
            created_at: event.created_at,
            processed_at: None,
        });
        Ok(())
    }

    async fn finish_event(
        &self,
        event_id: Uuid,
        status: EventStatus,
        error: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| StoreError::NotFound(format!("integration event {}", event_id)))?;
        event.status = status;
        event.error = error;
        event.processed_at = Some(processed_at);
        Ok(())
    }

    async fn expire_checkouts(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let mut moved = 0;
        for checkout in state.checkouts.iter_mut() {
            let open = matches!(checkout.status, CheckoutStatus::Pending | CheckoutStatus::Sent);
            if open && checkout.created_at < created_before {
                checkout.status = CheckoutStatus::Expired;
                checkout.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn due_checkouts(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AbandonedCheckout>, StoreError> {
        let state = self.state.lock();
        let mut due: Vec<AbandonedCheckout> = state
            .checkouts
            .iter()
            .filter(|c| c.status == CheckoutStatus::Pending)
            .filter(|c| c.created_at > created_after && c.created_at <= created_before)
            .cloned()
            .collect();
        due.sort_by_key(|c| c.created_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn transition_checkout(
        &self,
        checkout_id: Uuid,
        to: CheckoutStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let Some(checkout) = state
            .checkouts
            .iter_mut()
            .find(|c| c.id == checkout_id && c.status == CheckoutStatus::Pending)
        else {
            return Ok(false);
        };
        if !checkout.status.can_transition_to(to) {
            return Err(StoreError::Backend(format!(
                "checkout {}: cannot transition back to pending",
                checkout_id
            )));
        }
        checkout.status = to;
        checkout.updated_at = at;
        match to {
            CheckoutStatus::Sent => checkout.sent_at = Some(at),
            CheckoutStatus::Recovered => checkout.recovered_at = Some(at),
            _ => {}
        }
        Ok(true)
    }
}
