use futures::future::BoxFuture;
use num_traits::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use shared::{EventType, OrderCreatedPayload};

use super::{truncate_body, HandlerInput, IntegrationEntry};
use crate::error::HandlerError;

pub const ENTRY: IntegrationEntry = IntegrationEntry {
    id: "meta_conversions",
    events: &[EventType::OrderCreated],
    handler: handle,
};

#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    pub pixel_id: String,
    pub access_token: String,
    #[serde(default)]
    pub test_event_code: Option<String>,
}

fn handle(input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(send_purchase(input))
}

async fn send_purchase(input: HandlerInput<'_>) -> Result<(), HandlerError> {
    if input.event_type != EventType::OrderCreated {
        return Err(HandlerError::Unsupported(input.event_type.to_string()));
    }
    let config: MetaConfig =
        serde_json::from_value(input.config.clone()).map_err(|e| HandlerError::Config(e.to_string()))?;
    if config.pixel_id.trim().is_empty() || config.access_token.trim().is_empty() {
        return Err(HandlerError::Config("pixel_id and access_token are required".to_string()));
    }

    let order: OrderCreatedPayload = serde_json::from_value(input.payload.clone())?;
    let body = purchase_event(&order, config.test_event_code.as_deref());

    let url = format!(
        "{}/{}/events",
        input.deps.endpoints.graph_api.trim_end_matches('/'),
        config.pixel_id
    );
    let response = input
        .deps
        .http
        .post(&url)
        .query(&[("access_token", config.access_token.as_str())])
        .json(&body)
        .send()
        .await
        .map_err(|e| HandlerError::Http(e.without_url()))?;

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

/// Builds the Conversions API request body for one order. Customer
/// identifiers are normalised and hashed; nothing is sent in clear text.
pub fn purchase_event(order: &OrderCreatedPayload, test_event_code: Option<&str>) -> Value {
    let mut user_data = serde_json::Map::new();
    let phone = normalize_phone(&order.customer.phone);
    if !phone.is_empty() {
        user_data.insert("ph".to_string(), json!([sha256_hex(&phone)]));
    }
    if let Some(email) = order.customer.email.as_deref().map(|e| e.trim().to_lowercase()) {
        if !email.is_empty() {
            user_data.insert("em".to_string(), json!([sha256_hex(&email)]));
        }
    }
    if let Some(city) = order.customer.city.as_deref().map(normalize_text) {
        if !city.is_empty() {
            user_data.insert("ct".to_string(), json!([sha256_hex(&city)]));
        }
    }
    if let Some(name) = order.customer.name.split_whitespace().next().map(normalize_text) {
        user_data.insert("fn".to_string(), json!([sha256_hex(&name)]));
    }

    let contents: Vec<Value> = order
        .items
        .iter()
        .map(|item| {
            json!({
                "id": item.variant_id.unwrap_or(item.product_id).to_string(),
                "quantity": item.quantity,
                "item_price": item.price.to_f64().unwrap_or_default(),
            })
        })
        .collect();

    let mut body = json!({
        "data": [{
            "event_name": "Purchase",
            "event_time": order.created_at.timestamp(),
            "event_id": order.order_id.to_string(),
            "action_source": "website",
            "user_data": user_data,
            "custom_data": {
                "currency": order.currency,
                "value": order.total.to_f64().unwrap_or_default(),
                "order_id": order.order_number.to_string(),
                "content_type": "product",
                "contents": contents,
                "num_items": order.items.iter().map(|i| i.quantity as i64).sum::<i64>(),
            },
        }],
    });
    if let Some(code) = test_event_code.filter(|c| !c.is_empty()) {
        body["test_event_code"] = json!(code);
    }
    body
}

/// Digits only, no leading `+` or zero-padding.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.trim_start_matches('0').to_string()
}

fn normalize_text(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

pub fn sha256_hex(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::{CustomerFields, ItemSnapshot};
    use uuid::Uuid;

    fn order() -> OrderCreatedPayload {
        OrderCreatedPayload {
            order_id: Uuid::nil(),
            order_number: 7,
            customer: CustomerFields {
                name: "Sara Benali".to_string(),
                phone: "+33 6 12 34 56 78".to_string(),
                email: Some(" Sara@Example.com ".to_string()),
                city: Some("Lyon".to_string()),
                country: None,
                address: "1 rue".to_string(),
            },
            note: None,
            items: vec![ItemSnapshot {
                product_id: Uuid::nil(),
                variant_id: None,
                name: "Candle".to_string(),
                price: "9.90".parse().unwrap(),
                variant_options: vec![],
                image_url: None,
                quantity: 3,
            }],
            subtotal: "29.70".parse().unwrap(),
            total: "29.70".parse().unwrap(),
            currency: "EUR".to_string(),
            payment_method: "cash_on_delivery".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn phone_is_reduced_to_digits() {
        assert_eq!(normalize_phone("+33 6 12 34 56 78"), "33612345678");
        assert_eq!(normalize_phone("0612-345"), "612345");
    }

    #[test]
    fn known_sha256_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn purchase_event_hashes_identifiers() {
        let body = purchase_event(&order(), Some("TEST123"));
        let event = &body["data"][0];

        assert_eq!(event["event_name"], "Purchase");
        assert_eq!(event["event_time"], 1740830400);
        assert_eq!(event["user_data"]["em"][0], sha256_hex("sara@example.com"));
        assert_eq!(event["user_data"]["ph"][0], sha256_hex("33612345678"));
        assert_eq!(event["user_data"]["fn"][0], sha256_hex("sara"));
        assert_eq!(event["custom_data"]["value"], 29.7);
        assert_eq!(event["custom_data"]["num_items"], 3);
        assert_eq!(body["test_event_code"], "TEST123");
        assert!(!body.to_string().contains("Sara@Example.com"));
    }
}
