use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::*;
use tracing::debug;

use super::{truncate_body, HandlerInput, IntegrationEntry};
use crate::collaborators::ComposeRequest;
use crate::error::HandlerError;

pub const ENTRY: IntegrationEntry = IntegrationEntry {
    id: "telegram",
    events: &[
        EventType::OrderCreated,
        EventType::OrderStatusChanged,
        EventType::CheckoutAbandoned,
    ],
    handler: handle,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: ChatId,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

fn handle(input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(send_message(input))
}

async fn send_message(input: HandlerInput<'_>) -> Result<(), HandlerError> {
    let config: TelegramConfig =
        serde_json::from_value(input.config.clone()).map_err(|e| HandlerError::Config(e.to_string()))?;
    if config.bot_token.trim().is_empty() {
        return Err(HandlerError::Config("bot_token is empty".to_string()));
    }

    let composed = input
        .deps
        .composer
        .compose(ComposeRequest {
            event_type: input.event_type,
            store: input.store,
            payload: input.payload,
        })
        .await;
    let text = match composed {
        Ok(text) => text,
        Err(e) => {
            debug!("Composer unavailable for {}, using template: {}", input.event_type, e);
            format_message(input.event_type, input.payload, input.store)?
        }
    };

    let url = format!(
        "{}/bot{}/sendMessage",
        input.deps.endpoints.telegram_api.trim_end_matches('/'),
        config.bot_token
    );
    let response = input
        .deps
        .http
        .post(&url)
        .json(&json!({
            "chat_id": config.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        }))
        .send()
        .await
        // The bot token is part of the URL; keep it out of stored errors.
        .map_err(|e| HandlerError::Http(e.without_url()))?;

    let status = response.status();
    let body = response.text().await.map_err(|e| HandlerError::Http(e.without_url()))?;
    let parsed: Option<TelegramResponse> = serde_json::from_str(&body).ok();

    match parsed {
        Some(reply) if status.is_success() && reply.ok => Ok(()),
        Some(reply) => Err(HandlerError::Rejected {
            status: status.as_u16(),
            body: reply.description.unwrap_or_else(|| truncate_body(&body)),
        }),
        None => Err(HandlerError::Rejected {
            status: status.as_u16(),
            body: truncate_body(&body),
        }),
    }
}

/// Plain-text notification used when no composed text is available.
pub fn format_message(
    event_type: EventType,
    payload: &serde_json::Value,
    store: &StoreContext,
) -> Result<String, HandlerError> {
    let mut lines = Vec::new();
    match event_type {
        EventType::OrderCreated => {
            let order: OrderCreatedPayload = serde_json::from_value(payload.clone())?;
            lines.push(format!("🛒 New order #{} at {}", order.order_number, store.name));
            lines.push(format!("Customer: {} ({})", order.customer.name, order.customer.phone));
            let mut address = vec![order.customer.address.clone()];
            address.extend(order.customer.city.clone());
            address.extend(order.customer.country.clone());
            lines.push(format!("Address: {}", address.join(", ")));
            lines.push(String::new());
            push_items(&mut lines, &order.items);
            lines.push(format!("Total: {} {}", order.total.with_scale(2), order.currency));
            lines.push(format!("Payment: {}", order.payment_method));
            if let Some(note) = order.note.filter(|n| !n.trim().is_empty()) {
                lines.push(format!("Note: {}", note));
            }
        }
        EventType::OrderStatusChanged => {
            let change: OrderStatusChangedPayload = serde_json::from_value(payload.clone())?;
            lines.push(format!(
                "📦 Order #{} at {} is now {} (was {})",
                change.order_number,
                store.name,
                change.status.as_str(),
                change.previous_status.as_str()
            ));
            lines.push(format!("Customer: {} ({})", change.customer_name, change.customer_phone));
            lines.push(format!("Total: {} {}", change.total.with_scale(2), change.currency));
        }
        EventType::CheckoutAbandoned => {
            let checkout: CheckoutAbandonedPayload = serde_json::from_value(payload.clone())?;
            lines.push(format!("⏳ Abandoned checkout at {}", store.name));
            let name = checkout.customer_name.as_deref().unwrap_or("Unknown customer");
            lines.push(format!("Customer: {} ({})", name, checkout.customer_phone));
            lines.push(String::new());
            push_items(&mut lines, &checkout.items);
            lines.push(format!("Total: {} {}", checkout.total.with_scale(2), checkout.currency));
            lines.push(format!("Recovery link: {}", checkout.recovery_url));
        }
    }
    Ok(lines.join("\n"))
}

fn push_items(lines: &mut Vec<String>, items: &[ItemSnapshot]) {
    for item in items {
        let options = if item.variant_options.is_empty() {
            String::new()
        } else {
            format!(" ({})", item.variant_options.join(", "))
        };
        lines.push(format!(
            "• {} × {}{} = {}",
            item.quantity,
            item.name,
            options,
            item.line_total().with_scale(2)
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use uuid::Uuid;

    fn store() -> StoreContext {
        StoreContext {
            id: Uuid::new_v4(),
            slug: "corner-shop".to_string(),
            name: "Corner Shop".to_string(),
            currency: "MAD".to_string(),
            language: "fr".to_string(),
        }
    }

    fn item() -> ItemSnapshot {
        ItemSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: Some(Uuid::new_v4()),
            name: "Tea glass".to_string(),
            price: "12.5".parse().unwrap(),
            variant_options: vec!["Gold".to_string()],
            image_url: None,
            quantity: 2,
        }
    }

    #[test]
    fn order_message_lists_items_and_total() {
        let payload = OrderCreatedPayload {
            order_id: Uuid::new_v4(),
            order_number: 42,
            customer: CustomerFields {
                name: "Amina".to_string(),
                phone: "+212600000000".to_string(),
                email: None,
                city: Some("Fes".to_string()),
                country: Some("Morocco".to_string()),
                address: "12 Rue Talaa".to_string(),
            },
            note: Some("Ring twice".to_string()),
            items: vec![item()],
            subtotal: "25".parse().unwrap(),
            total: "25".parse().unwrap(),
            currency: "MAD".to_string(),
            payment_method: "cash_on_delivery".to_string(),
            created_at: Utc::now(),
        };
        let text = format_message(
            EventType::OrderCreated,
            &serde_json::to_value(&payload).unwrap(),
            &store(),
        )
        .unwrap();

        assert!(text.contains("New order #42 at Corner Shop"));
        assert!(text.contains("Address: 12 Rue Talaa, Fes, Morocco"));
        assert!(text.contains("• 2 × Tea glass (Gold) = 25.00"));
        assert!(text.contains("Total: 25.00 MAD"));
        assert!(text.contains("Note: Ring twice"));
    }

    #[test]
    fn abandoned_message_includes_recovery_link() {
        let payload = CheckoutAbandonedPayload {
            checkout_id: Uuid::new_v4(),
            customer_name: None,
            customer_phone: "0600".to_string(),
            customer_email: None,
            items: vec![item()],
            total: BigDecimal::from(25),
            currency: "MAD".to_string(),
            recovery_url: "https://shop.example/corner-shop/checkout?recover=abc".to_string(),
            created_at: Utc::now(),
        };
        let text = format_message(
            EventType::CheckoutAbandoned,
            &serde_json::to_value(&payload).unwrap(),
            &store(),
        )
        .unwrap();
        assert!(text.contains("Unknown customer (0600)"));
        assert!(text.contains("Recovery link: https://shop.example/corner-shop/checkout?recover=abc"));
    }

    #[test]
    fn mismatched_payload_is_an_error() {
        let err = format_message(EventType::OrderCreated, &json!({"nope": true}), &store()).unwrap_err();
        assert!(matches!(err, HandlerError::Payload(_)));
    }

    #[test]
    fn chat_id_accepts_numbers_and_usernames() {
        let numeric: TelegramConfig =
            serde_json::from_value(json!({"bot_token": "t", "chat_id": -1001234})).unwrap();
        assert_eq!(numeric.chat_id, ChatId::Id(-1001234));
        let named: TelegramConfig =
            serde_json::from_value(json!({"bot_token": "t", "chat_id": "@orders"})).unwrap();
        assert_eq!(named.chat_id, ChatId::Username("@orders".to_string()));
    }
}
