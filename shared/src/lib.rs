use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.status_changed")]
    OrderStatusChanged,
    #[serde(rename = "checkout.abandoned")]
    CheckoutAbandoned,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderStatusChanged => "order.status_changed",
            EventType::CheckoutAbandoned => "checkout.abandoned",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order.created" => Ok(EventType::OrderCreated),
            "order.status_changed" => Ok(EventType::OrderStatusChanged),
            "checkout.abandoned" => Ok(EventType::CheckoutAbandoned),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Merchant-facing order lifecycle. Transitions are not constrained here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Processing)
    }
}

impl FromStr for EventStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(EventStatus::Processing),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// `pending -> sent -> recovered | expired`, with `pending -> recovered` and
/// `pending -> expired` as shortcuts. `recovered` and `expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Pending,
    Sent,
    Recovered,
    Expired,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::Sent => "sent",
            CheckoutStatus::Recovered => "recovered",
            CheckoutStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutStatus::Recovered | CheckoutStatus::Expired)
    }

    pub fn can_transition_to(&self, next: CheckoutStatus) -> bool {
        use CheckoutStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Recovered) | (Pending, Expired) | (Sent, Recovered) | (Sent, Expired)
        )
    }
}

impl FromStr for CheckoutStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckoutStatus::Pending),
            "sent" => Ok(CheckoutStatus::Sent),
            "recovered" => Ok(CheckoutStatus::Recovered),
            "expired" => Ok(CheckoutStatus::Expired),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// What a shopper submits for one cart line. Prices are deliberately absent:
/// anything else the client sends is ignored during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// Missing fields deserialize as empty so shape validation can name them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerFields {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub address: String,
}

/// Order-time copy of a catalog line. Never re-read from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub price: BigDecimal,
    #[serde(default)]
    pub variant_options: Vec<String>,
    pub image_url: Option<String>,
    pub quantity: i32,
}

impl ItemSnapshot {
    pub fn line_total(&self) -> BigDecimal {
        &self.price * BigDecimal::from(self.quantity)
    }
}

pub fn items_total(items: &[ItemSnapshot]) -> BigDecimal {
    items
        .iter()
        .fold(BigDecimal::from(0), |acc, item| acc + item.line_total())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreContext {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub currency: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: Uuid,
    pub order_number: i64,
    pub customer: CustomerFields,
    pub note: Option<String>,
    pub items: Vec<ItemSnapshot>,
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChangedPayload {
    pub order_id: Uuid,
    pub order_number: i64,
    pub customer_name: String,
    pub customer_phone: String,
    pub previous_status: OrderStatus,
    pub status: OrderStatus,
    pub total: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutAbandonedPayload {
    pub checkout_id: Uuid,
    pub customer_name: Option<String>,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub items: Vec<ItemSnapshot>,
    pub total: BigDecimal,
    pub currency: String,
    pub recovery_url: String,
    pub created_at: DateTime<Utc>,
}
