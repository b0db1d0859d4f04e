#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use shared::*;
use uuid::Uuid;

use order_service::collaborators::{AbuseVerifier, GeoLocator, SkipAbuseCheck, TemplateOnly};
use order_service::dispatcher::{DispatchConfig, Dispatcher};
use order_service::error::HandlerError;
use order_service::intake::{OrderIntake, PlaceOrderRequest};
use order_service::integrations::{HandlerDeps, HandlerInput, IntegrationEndpoints, IntegrationEntry, Registry};
use order_service::models::*;
use order_service::store::{MemoryStore, Store};

// --- Fake integrations ---

fn succeed(_input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async { Ok(()) })
}

fn reject(_input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async {
        Err(HandlerError::Rejected {
            status: 401,
            body: "invalid credentials".to_string(),
        })
    })
}

fn hang(_input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    })
}

fn lag(_input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    })
}

fn explode(_input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async {
        if true {
            panic!("handler bug");
        }
        Ok(())
    })
}

/// Fails unless the installation config carries `"ok": true`.
fn config_driven(input: HandlerInput<'_>) -> BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async move {
        if input.config.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            Ok(())
        } else {
            Err(HandlerError::Config("ok flag missing".to_string()))
        }
    })
}

const ALL_EVENTS: &[EventType] = &[
    EventType::OrderCreated,
    EventType::OrderStatusChanged,
    EventType::CheckoutAbandoned,
];

pub fn test_registry() -> Registry {
    Registry::new(vec![
        IntegrationEntry {
            id: "echo",
            events: ALL_EVENTS,
            handler: succeed,
        },
        IntegrationEntry {
            id: "mirror",
            events: ALL_EVENTS,
            handler: succeed,
        },
        IntegrationEntry {
            id: "broken",
            events: ALL_EVENTS,
            handler: reject,
        },
        IntegrationEntry {
            id: "sleepy",
            events: ALL_EVENTS,
            handler: hang,
        },
        IntegrationEntry {
            id: "laggy",
            events: ALL_EVENTS,
            handler: lag,
        },
        IntegrationEntry {
            id: "buggy",
            events: ALL_EVENTS,
            handler: explode,
        },
        IntegrationEntry {
            id: "orders_only",
            events: &[EventType::OrderCreated],
            handler: succeed,
        },
        IntegrationEntry {
            id: "configurable",
            events: ALL_EVENTS,
            handler: config_driven,
        },
    ])
}

pub fn handler_deps() -> HandlerDeps {
    HandlerDeps {
        http: reqwest::Client::new(),
        composer: Arc::new(TemplateOnly),
        endpoints: IntegrationEndpoints::default(),
    }
}

pub fn dispatcher(store: Arc<MemoryStore>) -> Arc<Dispatcher> {
    dispatcher_with(store, test_registry())
}

pub fn dispatcher_with(store: Arc<MemoryStore>, registry: Registry) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        store,
        registry,
        handler_deps(),
        DispatchConfig {
            handler_timeout: Duration::from_millis(200),
        },
    ))
}

// --- Fake collaborators ---

pub struct RejectAll;

#[async_trait]
impl AbuseVerifier for RejectAll {
    async fn verify(&self, _token: Option<&str>, _remote_ip: Option<IpAddr>) -> Result<(), String> {
        Err("token rejected".to_string())
    }
}

pub struct FixedCountry(pub Option<&'static str>);

#[async_trait]
impl GeoLocator for FixedCountry {
    async fn country(&self, _ip: IpAddr) -> Option<String> {
        self.0.map(str::to_string)
    }
}

pub fn intake(store: Arc<MemoryStore>) -> OrderIntake {
    intake_with(store, Arc::new(SkipAbuseCheck), Arc::new(FixedCountry(None)))
}

pub fn intake_with(
    store: Arc<MemoryStore>,
    verifier: Arc<dyn AbuseVerifier>,
    geo: Arc<dyn GeoLocator>,
) -> OrderIntake {
    let dispatcher = dispatcher(store.clone());
    OrderIntake::new(store, verifier, geo, dispatcher)
}

/// Dispatches through the built-in integrations, with their remote APIs
/// pointed at `endpoints`.
pub fn builtin_intake(store: Arc<MemoryStore>, endpoints: IntegrationEndpoints) -> OrderIntake {
    let deps = HandlerDeps {
        http: reqwest::Client::builder().no_proxy().build().unwrap(),
        composer: Arc::new(TemplateOnly),
        endpoints,
    };
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Registry::builtin(),
        deps,
        DispatchConfig::default(),
    ));
    OrderIntake::new(store, Arc::new(SkipAbuseCheck), Arc::new(FixedCountry(None)), dispatcher)
}

/// Serves `app` on an ephemeral loopback port and returns its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// --- Seed data ---

pub fn seed_store(memory: &MemoryStore, slug: &str) -> StoreRecord {
    let record = StoreRecord {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        name: format!("{} store", slug),
        currency: "USD".to_string(),
        language: "en".to_string(),
        published: true,
    };
    memory.add_store(record.clone());
    record
}

pub fn money(value: &str) -> BigDecimal {
    value.parse().unwrap()
}

pub fn seed_product(memory: &MemoryStore, store_id: Uuid, name: &str, price: &str) -> ProductRecord {
    let product = ProductRecord {
        id: Uuid::new_v4(),
        store_id,
        name: name.to_string(),
        price: money(price),
        image_url: None,
        is_available: true,
        stock: None,
    };
    memory.add_product(product.clone());
    product
}

pub fn seed_variant(
    memory: &MemoryStore,
    product_id: Uuid,
    price: Option<&str>,
    stock: Option<i32>,
) -> VariantRecord {
    let variant = VariantRecord {
        id: Uuid::new_v4(),
        product_id,
        price: price.map(money),
        option_labels: vec!["Large".to_string()],
        image_url: None,
        is_available: true,
        stock,
    };
    memory.add_variant(variant.clone());
    variant
}

pub async fn install(memory: &MemoryStore, store_id: Uuid, integration_id: &str) {
    memory
        .upsert_installation(store_id, integration_id, serde_json::json!({}))
        .await
        .unwrap();
}

pub fn customer() -> CustomerFields {
    CustomerFields {
        name: "Maya Haddad".to_string(),
        phone: "+15550100".to_string(),
        email: Some("maya@example.com".to_string()),
        city: Some("Austin".to_string()),
        country: None,
        address: "42 Oak Street".to_string(),
    }
}

pub fn line(product_id: Uuid, variant_id: Option<Uuid>, quantity: i32) -> CartLine {
    CartLine {
        product_id,
        variant_id,
        quantity,
    }
}

pub fn order_request(slug: &str, items: Vec<CartLine>) -> PlaceOrderRequest {
    PlaceOrderRequest {
        store_slug: slug.to_string(),
        customer: customer(),
        note: None,
        payment_method: None,
        items,
        verification_token: None,
    }
}

pub fn checkout(store_id: Uuid, phone: &str, created_at: DateTime<Utc>) -> AbandonedCheckout {
    AbandonedCheckout {
        id: Uuid::new_v4(),
        store_id,
        customer_name: Some("Sam".to_string()),
        customer_phone: phone.to_string(),
        customer_email: None,
        items: vec![ItemSnapshot {
            product_id: Uuid::new_v4(),
            variant_id: None,
            name: "Backpack".to_string(),
            price: money("40.00"),
            variant_options: vec![],
            image_url: None,
            quantity: 2,
        }],
        currency: "USD".to_string(),
        status: CheckoutStatus::Pending,
        created_at,
        updated_at: created_at,
        sent_at: None,
        recovered_at: None,
    }
}

pub fn existing_order(store_id: Uuid, phone: &str, created_at: DateTime<Utc>) -> Order {
    Order {
        id: Uuid::new_v4(),
        store_id,
        order_number: 1,
        customer: CustomerFields {
            phone: phone.to_string(),
            ..customer()
        },
        note: None,
        subtotal: money("80.00"),
        total: money("80.00"),
        payment_method: "cash_on_delivery".to_string(),
        status: OrderStatus::Pending,
        created_at,
    }
}
