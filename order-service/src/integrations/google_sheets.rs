use std::net::IpAddr;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{EventType, OrderCreatedPayload, OrderStatusChangedPayload, StoreContext};

use super::{truncate_body, HandlerInput, IntegrationEntry};
use crate::error::HandlerError;

pub const ENTRY: IntegrationEntry = IntegrationEntry {
    id: "google_sheets",
    events: &[EventType::OrderCreated, EventType::OrderStatusChanged],
    handler: handle,
};

/// The merchant deploys an Apps Script web app bound to their sheet and
/// pastes its URL here; the script appends or updates rows.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub sheet_name: Option<String>,
}

fn handle(input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(sync_row(input))
}

async fn sync_row(input: HandlerInput<'_>) -> Result<(), HandlerError> {
    let config: SheetsConfig =
        serde_json::from_value(input.config.clone()).map_err(|e| HandlerError::Config(e.to_string()))?;
    let url = reqwest::Url::parse(&config.webhook_url)
        .map_err(|e| HandlerError::Config(format!("webhook_url: {}", e)))?;
    check_webhook_url(&url)?;

    let body = sheet_request(input.event_type, input.payload, input.store, config.sheet_name.as_deref())?;
    let response = input.deps.http.post(url).json(&body).send().await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    Err(HandlerError::Rejected {
        status: status.as_u16(),
        body: truncate_body(&text),
    })
}

/// https only; plain http is accepted for loopback hosts.
pub fn check_webhook_url(url: &reqwest::Url) -> Result<(), HandlerError> {
    let loopback = url.host_str().is_some_and(|host| {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        host == "localhost" || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
    });
    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        _ => Err(HandlerError::Config("webhook_url must use https".to_string())),
    }
}

pub const ORDER_COLUMNS: &[&str] = &[
    "Order #", "Date", "Name", "Phone", "Email", "City", "Country", "Address", "Items", "Total", "Currency",
    "Status",
];

/// `append` for new orders, `update` keyed by order number for status changes.
pub fn sheet_request(
    event_type: EventType,
    payload: &Value,
    store: &StoreContext,
    sheet_name: Option<&str>,
) -> Result<Value, HandlerError> {
    let sheet = sheet_name.unwrap_or("Orders");
    match event_type {
        EventType::OrderCreated => {
            let order: OrderCreatedPayload = serde_json::from_value(payload.clone())?;
            let items = order
                .items
                .iter()
                .map(|item| {
                    if item.variant_options.is_empty() {
                        format!("{} x{}", item.name, item.quantity)
                    } else {
                        format!("{} ({}) x{}", item.name, item.variant_options.join("/"), item.quantity)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            Ok(json!({
                "action": "append",
                "sheet": sheet,
                "store": store.name,
                "columns": ORDER_COLUMNS,
                "row": [
                    order.order_number,
                    order.created_at.to_rfc3339(),
                    order.customer.name,
                    order.customer.phone,
                    order.customer.email.unwrap_or_default(),
                    order.customer.city.unwrap_or_default(),
                    order.customer.country.unwrap_or_default(),
                    order.customer.address,
                    items,
                    order.total.with_scale(2).to_string(),
                    order.currency,
                    "pending",
                ],
            }))
        }
        EventType::OrderStatusChanged => {
            let change: OrderStatusChangedPayload = serde_json::from_value(payload.clone())?;
            Ok(json!({
                "action": "update",
                "sheet": sheet,
                "store": store.name,
                "key": { "column": "Order #", "value": change.order_number },
                "set": { "Status": change.status.as_str() },
            }))
        }
        other => Err(HandlerError::Unsupported(other.to_string())),
    }
}
