mod common;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::*;
use order_service::integrations::meta_conversions::sha256_hex;
use order_service::integrations::IntegrationEndpoints;
use order_service::intake::OrderIntake;
use order_service::store::{MemoryStore, Store};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use shared::EventStatus;

#[derive(Debug, Clone)]
struct Hit {
    pixel: String,
    access_token: Option<String>,
    body: Value,
}

type Hits = Arc<Mutex<Vec<Hit>>>;

/// Stands in for the Graph API events edge: only `good-token` is accepted.
async fn fake_graph_api() -> (String, Hits) {
    let hits: Hits = Arc::default();

    async fn events(
        State(hits): State<Hits>,
        Path(pixel): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let access_token = query.get("access_token").cloned();
        let accepted = access_token.as_deref() == Some("good-token");
        hits.lock().push(Hit {
            pixel,
            access_token,
            body,
        });
        if accepted {
            (StatusCode::OK, Json(json!({"events_received": 1})))
        } else {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {"message": "Invalid OAuth access token.", "code": 190}})),
            )
        }
    }

    let app = Router::new()
        .route("/:pixel/events", post(events))
        .with_state(hits.clone());
    (serve(app).await, hits)
}

fn meta_intake(memory: &Arc<MemoryStore>, graph_api: String) -> OrderIntake {
    builtin_intake(
        memory.clone(),
        IntegrationEndpoints {
            graph_api,
            ..IntegrationEndpoints::default()
        },
    )
}

#[tokio::test]
async fn purchase_reaches_the_pixel_with_hashed_customer_data() {
    let (base, hits) = fake_graph_api().await;
    let memory = Arc::new(MemoryStore::new());
    let store = seed_store(&memory, "candles");
    let candle = seed_product(&memory, store.id, "Candle", "9.90");
    memory
        .upsert_installation(
            store.id,
            "meta_conversions",
            json!({"pixel_id": "4242", "access_token": "good-token", "test_event_code": "TEST77"}),
        )
        .await
        .unwrap();

    let placed = meta_intake(&memory, base)
        .place_order(order_request("candles", vec![line(candle.id, None, 3)]), None)
        .await
        .unwrap();
    let report = placed.dispatch.await.unwrap();

    assert_eq!(report.completed(), 1);
    let events = memory.events();
    assert_eq!(events[0].integration_id, "meta_conversions");
    assert_eq!(events[0].status, EventStatus::Completed);

    let hits = hits.lock().clone();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pixel, "4242");
    assert_eq!(hits[0].access_token.as_deref(), Some("good-token"));
    assert_eq!(hits[0].body["test_event_code"], "TEST77");
    let event = &hits[0].body["data"][0];
    assert_eq!(event["event_name"], "Purchase");
    assert_eq!(event["event_id"], placed.receipt.order_id.to_string());
    assert_eq!(event["user_data"]["ph"][0], sha256_hex("15550100"));
    assert_eq!(event["user_data"]["em"][0], sha256_hex("maya@example.com"));
    assert_eq!(event["custom_data"]["num_items"], 3);
    assert_eq!(event["custom_data"]["currency"], "USD");
    assert!(!hits[0].body.to_string().contains("Maya"));
}

#[tokio::test]
async fn refused_token_fails_the_row_without_storing_it() {
    let (base, hits) = fake_graph_api().await;
    let memory = Arc::new(MemoryStore::new());
    let store = seed_store(&memory, "candles");
    let candle = seed_product(&memory, store.id, "Candle", "9.90");
    memory
        .upsert_installation(
            store.id,
            "meta_conversions",
            json!({"pixel_id": "4242", "access_token": "expired-token"}),
        )
        .await
        .unwrap();

    let placed = meta_intake(&memory, base)
        .place_order(order_request("candles", vec![line(candle.id, None, 1)]), None)
        .await
        .unwrap();
    let report = placed.dispatch.await.unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(hits.lock()[0].access_token.as_deref(), Some("expired-token"));
    let event = &memory.events()[0];
    assert_eq!(event.status, EventStatus::Failed);
    let error = event.error.as_deref().unwrap();
    assert!(error.starts_with("rejected by remote (400)"), "{}", error);
    assert!(error.contains("Invalid OAuth access token"), "{}", error);
    assert!(!error.contains("expired-token"), "{}", error);
}

#[tokio::test]
async fn unreachable_api_error_omits_the_token() {
    // Bind and drop a listener so the port is closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let memory = Arc::new(MemoryStore::new());
    let store = seed_store(&memory, "candles");
    let candle = seed_product(&memory, store.id, "Candle", "9.90");
    memory
        .upsert_installation(
            store.id,
            "meta_conversions",
            json!({"pixel_id": "4242", "access_token": "secret-token"}),
        )
        .await
        .unwrap();

    let placed = meta_intake(&memory, base)
        .place_order(order_request("candles", vec![line(candle.id, None, 1)]), None)
        .await
        .unwrap();
    let report = placed.dispatch.await.unwrap();

    assert_eq!(report.failed(), 1);
    let error = memory.events()[0].error.clone().unwrap();
    assert!(!error.contains("secret-token"), "{}", error);
}

#[tokio::test]
async fn status_changes_are_not_sent_to_the_pixel() {
    let (base, hits) = fake_graph_api().await;
    let memory = Arc::new(MemoryStore::new());
    let store = seed_store(&memory, "candles");
    let candle = seed_product(&memory, store.id, "Candle", "9.90");
    memory
        .upsert_installation(
            store.id,
            "meta_conversions",
            json!({"pixel_id": "4242", "access_token": "good-token"}),
        )
        .await
        .unwrap();
    let intake = meta_intake(&memory, base);

    let placed = intake
        .place_order(order_request("candles", vec![line(candle.id, None, 1)]), None)
        .await
        .unwrap();
    placed.dispatch.await.unwrap();
    let (_, dispatch) = intake
        .change_status(store.id, placed.receipt.order_id, shared::OrderStatus::Confirmed)
        .await
        .unwrap();
    let report = dispatch.await.unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(hits.lock().len(), 1);
    assert_eq!(memory.events().len(), 1);
}
