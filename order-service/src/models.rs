use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub currency: String,
    pub language: String,
    pub published: bool,
}

impl StoreRecord {
    pub fn context(&self) -> StoreContext {
        StoreContext {
            id: self.id,
            slug: self.slug.clone(),
            name: self.name.clone(),
            currency: self.currency.clone(),
            language: self.language.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct ProductRecord {
    pub id: Uuid,
    pub store_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub image_url: Option<String>,
    pub is_available: bool,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Overrides the product price when set.
    pub price: Option<BigDecimal>,
    pub option_labels: Vec<String>,
    pub image_url: Option<String>,
    pub is_available: bool,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: Uuid,
    pub store_id: Uuid,
    pub customer: CustomerFields,
    pub note: Option<String>,
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub store_id: Uuid,
    pub order_number: i64,
    pub customer: CustomerFields,
    pub note: Option<String>,
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
    pub payment_method: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub snapshot: ItemSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationInstallation {
    pub id: Uuid,
    pub store_id: Uuid,
    pub integration_id: String,
    /// Integration-specific; only the integration's own handler reads it.
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewIntegrationEvent {
    pub id: Uuid,
    pub store_id: Uuid,
    pub integration_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    pub id: Uuid,
    pub store_id: Uuid,
    pub integration_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedCheckout {
    pub id: Uuid,
    pub store_id: Uuid,
    pub customer_name: Option<String>,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub items: Vec<ItemSnapshot>,
    pub currency: String,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub recovered_at: Option<DateTime<Utc>>,
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::stores)]
pub struct DbStore {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub currency: String,
    pub language: String,
    pub published: bool,
}

impl From<DbStore> for StoreRecord {
    fn from(row: DbStore) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            name: row.name,
            currency: row.currency,
            language: row.language,
            published: row.published,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::product_variants)]
pub struct DbVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub price: Option<BigDecimal>,
    pub option_labels: serde_json::Value,
    pub image_url: Option<String>,
    pub is_available: bool,
    pub stock: Option<i32>,
}

impl TryFrom<DbVariant> for VariantRecord {
    type Error = StoreError;

    fn try_from(row: DbVariant) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            price: row.price,
            option_labels: serde_json::from_value(row.option_labels)?,
            image_url: row.image_url,
            is_available: row.is_available,
            stock: row.stock,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct DbOrder {
    pub id: Uuid,
    pub store_id: Uuid,
    pub order_number: i64,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub customer_city: Option<String>,
    pub customer_country: Option<String>,
    pub customer_address: String,
    pub note: Option<String>,
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
    pub payment_method: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl DbOrder {
    pub fn numbered(order: NewOrder, order_number: i64) -> Self {
        Self {
            id: order.id,
            store_id: order.store_id,
            order_number,
            customer_name: order.customer.name,
            customer_phone: order.customer.phone,
            customer_email: order.customer.email,
            customer_city: order.customer.city,
            customer_country: order.customer.country,
            customer_address: order.customer.address,
            note: order.note,
            subtotal: order.subtotal,
            total: order.total,
            payment_method: order.payment_method,
            status: OrderStatus::Pending.as_str().to_string(),
            created_at: order.created_at,
        }
    }
}

impl TryFrom<DbOrder> for Order {
    type Error = StoreError;

    fn try_from(row: DbOrder) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("order {}: {}", row.id, e)))?;
        Ok(Self {
            id: row.id,
            store_id: row.store_id,
            order_number: row.order_number,
            customer: CustomerFields {
                name: row.customer_name,
                phone: row.customer_phone,
                email: row.customer_email,
                city: row.customer_city,
                country: row.customer_country,
                address: row.customer_address,
            },
            note: row.note,
            subtotal: row.subtotal,
            total: row.total,
            payment_method: row.payment_method,
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct DbOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub price: BigDecimal,
    pub variant_options: serde_json::Value,
    pub image_url: Option<String>,
    pub quantity: i32,
}

impl DbOrderItem {
    pub fn from_snapshot(order_id: Uuid, snapshot: &ItemSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: snapshot.product_id,
            variant_id: snapshot.variant_id,
            product_name: snapshot.name.clone(),
            price: snapshot.price.clone(),
            variant_options: serde_json::Value::from(snapshot.variant_options.clone()),
            image_url: snapshot.image_url.clone(),
            quantity: snapshot.quantity,
        }
    }
}

impl TryFrom<DbOrderItem> for OrderItem {
    type Error = StoreError;

    fn try_from(row: DbOrderItem) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            snapshot: ItemSnapshot {
                product_id: row.product_id,
                variant_id: row.variant_id,
                name: row.product_name,
                price: row.price,
                variant_options: serde_json::from_value(row.variant_options)?,
                image_url: row.image_url,
                quantity: row.quantity,
            },
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::integration_installations)]
pub struct DbInstallation {
    pub id: Uuid,
    pub store_id: Uuid,
    pub integration_id: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbInstallation> for IntegrationInstallation {
    fn from(row: DbInstallation) -> Self {
        Self {
            id: row.id,
            store_id: row.store_id,
            integration_id: row.integration_id,
            config: row.config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::integration_events)]
pub struct DbIntegrationEvent {
    pub id: Uuid,
    pub store_id: Uuid,
    pub integration_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<NewIntegrationEvent> for DbIntegrationEvent {
    fn from(event: NewIntegrationEvent) -> Self {
        Self {
            id: event.id,
            store_id: event.store_id,
            integration_id: event.integration_id,
            event_type: event.event_type.as_str().to_string(),
            payload: event.payload,
            status: EventStatus::Processing.as_str().to_string(),
            error: None,
            created_at: event.created_at,
            processed_at: None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::abandoned_checkouts)]
pub struct DbAbandonedCheckout {
    pub id: Uuid,
    pub store_id: Uuid,
    pub customer_name: Option<String>,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub items: serde_json::Value,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub recovered_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbAbandonedCheckout> for AbandonedCheckout {
    type Error = StoreError;

    fn try_from(row: DbAbandonedCheckout) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("checkout {}: {}", row.id, e)))?;
        Ok(Self {
            id: row.id,
            store_id: row.store_id,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            customer_email: row.customer_email,
            items: serde_json::from_value(row.items)?,
            currency: row.currency,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            recovered_at: row.recovered_at,
        })
    }
}
