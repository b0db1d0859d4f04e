use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::*;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogResolver, ResolveError, ResolvedLine};
use crate::collaborators::{AbuseVerifier, GeoLocator, UNKNOWN_COUNTRY};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::IntakeError;
use crate::models::{NewOrder, Order};
use crate::store::Store;

pub const DEFAULT_PAYMENT_METHOD: &str = "cash_on_delivery";
const MAX_CART_LINES: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub store_slug: String,
    pub customer: CustomerFields,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub verification_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderReceipt {
    pub order_id: Uuid,
    pub order_number: i64,
    pub store_name: String,
    pub currency: String,
    pub items: Vec<ItemSnapshot>,
    pub subtotal: BigDecimal,
    pub total: BigDecimal,
}

/// A persisted order plus the detached `order.created` dispatch. Dropping
/// `dispatch` does not cancel it.
#[derive(Debug)]
pub struct PlacedOrder {
    pub receipt: OrderReceipt,
    pub dispatch: JoinHandle<DispatchReport>,
}

pub struct OrderIntake {
    store: Arc<dyn Store>,
    catalog: CatalogResolver,
    verifier: Arc<dyn AbuseVerifier>,
    geo: Arc<dyn GeoLocator>,
    dispatcher: Arc<Dispatcher>,
}

impl OrderIntake {
    pub fn new(
        store: Arc<dyn Store>,
        verifier: Arc<dyn AbuseVerifier>,
        geo: Arc<dyn GeoLocator>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            catalog: CatalogResolver::new(Arc::clone(&store)),
            store,
            verifier,
            geo,
            dispatcher,
        }
    }

    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
        client_ip: Option<IpAddr>,
    ) -> Result<PlacedOrder, IntakeError> {
        validate(&request)?;

        self.verifier
            .verify(request.verification_token.as_deref(), client_ip)
            .await
            .map_err(IntakeError::AbuseCheckFailed)?;

        let store = self
            .store
            .published_store_by_slug(request.store_slug.trim())
            .await?
            .ok_or_else(|| IntakeError::NotFound(format!("store '{}' not found", request.store_slug)))?;

        // Prices and availability come from the catalog only.
        let resolved = self
            .catalog
            .resolve(store.id, &request.items)
            .await
            .map_err(|e| match e {
                ResolveError::ProductNotFound(_) | ResolveError::VariantNotFound(_) => {
                    IntakeError::NotFound(e.to_string())
                }
                ResolveError::VariantMismatch { .. } => IntakeError::InvalidSelection(e.to_string()),
                ResolveError::Store(inner) => inner.into(),
            })?;
        check_selection(&resolved)?;

        let mut customer = normalize_customer(request.customer);
        if customer.country.is_none() {
            let located = match client_ip {
                Some(ip) => self.geo.country(ip).await,
                None => None,
            };
            customer.country = Some(located.unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()));
        }

        let items: Vec<ItemSnapshot> = resolved.iter().map(ResolvedLine::snapshot).collect();
        let subtotal = items_total(&items);
        let total = subtotal.clone();

        let order = self
            .store
            .insert_order(NewOrder {
                id: Uuid::new_v4(),
                store_id: store.id,
                customer,
                note: request.note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
                subtotal,
                total,
                payment_method: request
                    .payment_method
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
                created_at: Utc::now(),
            })
            .await?;

        if let Err(e) = self.store.insert_order_items(order.id, &items).await {
            // The order row is committed; an operator has to reconcile it.
            error!(
                "Order {} (#{}) in store {} persisted without items: {}",
                order.id, order.order_number, store.id, e
            );
            return Err(IntakeError::PartialPersistence {
                order_id: order.id,
                order_number: order.order_number,
                reason: e.to_string(),
            });
        }

        info!(
            "Placed order #{} ({}) in store {} for {} {}",
            order.order_number,
            order.id,
            store.slug,
            order.total,
            store.currency
        );

        let payload = OrderCreatedPayload {
            order_id: order.id,
            order_number: order.order_number,
            customer: order.customer.clone(),
            note: order.note.clone(),
            items: items.clone(),
            subtotal: order.subtotal.clone(),
            total: order.total.clone(),
            currency: store.currency.clone(),
            payment_method: order.payment_method.clone(),
            created_at: order.created_at,
        };
        let dispatch = self.spawn_event(order.store_id, EventType::OrderCreated, &payload);

        Ok(PlacedOrder {
            receipt: OrderReceipt {
                order_id: order.id,
                order_number: order.order_number,
                store_name: store.name,
                currency: store.currency,
                items,
                subtotal: order.subtotal,
                total: order.total,
            },
            dispatch,
        })
    }

    /// Merchant-driven; any status may follow any other.
    pub async fn change_status(
        &self,
        store_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(Order, JoinHandle<DispatchReport>), IntakeError> {
        let previous = self
            .store
            .order(store_id, order_id)
            .await?
            .ok_or_else(|| IntakeError::NotFound(format!("order {} not found", order_id)))?;
        let order = self
            .store
            .set_order_status(store_id, order_id, status)
            .await?
            .ok_or_else(|| IntakeError::NotFound(format!("order {} not found", order_id)))?;
        let context = self.store.store_context(store_id).await?;

        info!(
            "Order #{} in store {} moved from {} to {}",
            order.order_number,
            store_id,
            previous.status.as_str(),
            status.as_str()
        );

        let payload = OrderStatusChangedPayload {
            order_id: order.id,
            order_number: order.order_number,
            customer_name: order.customer.name.clone(),
            customer_phone: order.customer.phone.clone(),
            previous_status: previous.status,
            status: order.status,
            total: order.total.clone(),
            currency: context.currency,
        };
        let dispatch = self.spawn_event(store_id, EventType::OrderStatusChanged, &payload);
        Ok((order, dispatch))
    }

    fn spawn_event<T: Serialize>(&self, store_id: Uuid, event_type: EventType, payload: &T) -> JoinHandle<DispatchReport> {
        match serde_json::to_value(payload) {
            Ok(value) => self.dispatcher.spawn_dispatch(store_id, event_type, value),
            Err(e) => {
                warn!("Could not serialise {} payload, nothing dispatched: {}", event_type, e);
                tokio::spawn(async { DispatchReport::default() })
            }
        }
    }
}

pub fn validate(request: &PlaceOrderRequest) -> Result<(), IntakeError> {
    let required = [
        ("name", &request.customer.name),
        ("phone", &request.customer.phone),
        ("address", &request.customer.address),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(IntakeError::InvalidInput(format!("{} is required", field)));
        }
    }
    if request.store_slug.trim().is_empty() {
        return Err(IntakeError::InvalidInput("store is required".to_string()));
    }
    if request.items.is_empty() {
        return Err(IntakeError::InvalidInput("cart is empty".to_string()));
    }
    if request.items.len() > MAX_CART_LINES {
        return Err(IntakeError::InvalidInput(format!(
            "cart has more than {} lines",
            MAX_CART_LINES
        )));
    }
    if let Some(line) = request.items.iter().find(|l| l.quantity <= 0) {
        return Err(IntakeError::InvalidInput(format!(
            "quantity for product {} must be positive",
            line.product_id
        )));
    }
    Ok(())
}

/// Availability and tracked stock, with quantities of repeated lines added up.
pub fn check_selection(lines: &[ResolvedLine]) -> Result<(), IntakeError> {
    let mut requested: HashMap<(Uuid, Option<Uuid>), i64> = HashMap::new();
    for line in lines {
        if !line.is_available {
            return Err(IntakeError::InvalidSelection(format!("{} is not available", line.name)));
        }
        *requested.entry((line.product_id, line.variant_id)).or_default() += line.quantity as i64;
    }

    for line in lines {
        if let Some(stock) = line.stock {
            let wanted = requested[&(line.product_id, line.variant_id)];
            if (stock as i64) < wanted {
                return Err(IntakeError::InvalidSelection(format!(
                    "only {} of {} left in stock",
                    stock.max(0),
                    line.name
                )));
            }
        }
    }
    Ok(())
}

fn normalize_customer(customer: CustomerFields) -> CustomerFields {
    let optional = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    CustomerFields {
        name: customer.name.trim().to_string(),
        phone: customer.phone.trim().to_string(),
        email: optional(customer.email),
        city: optional(customer.city),
        country: optional(customer.country),
        address: customer.address.trim().to_string(),
    }
}
