use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{ErrorResponse, IntakeError, StoreError};
use crate::intake::{OrderIntake, OrderReceipt, PlaceOrderRequest};
use crate::integrations::Registry;
use crate::models::{IntegrationInstallation, Order};
use crate::recovery::RecoveryScheduler;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<OrderIntake>,
    pub recovery: Arc<RecoveryScheduler>,
    pub store: Arc<dyn Store>,
    pub registry: Registry,
    pub admin_secret: Arc<str>,
}

#[derive(Debug, Deserialize)]
pub struct OrderSubmission {
    #[serde(default)]
    pub customer: CustomerFields,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub verification_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub processed: usize,
    pub expired: usize,
    pub recovered: usize,
    pub sent: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
}

/// Errors of the operator-facing endpoints.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Intake(IntakeError),
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        ApiError::Intake(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Intake(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "unauthorized".to_string(),
                    message: "missing or invalid bearer token".to_string(),
                }),
            )
                .into_response(),
            ApiError::Intake(err) => err.into_response(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stores/:store/orders", post(place_order))
        .route("/internal/abandoned-checkouts/sweep", post(run_sweep))
        .route(
            "/stores/:store/integrations/:integration_id",
            put(install_integration).delete(uninstall_integration),
        )
        .route("/stores/:store/orders/:order_id/status", patch(update_order_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn place_order(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Result<Json<OrderSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderReceipt>), IntakeError> {
    let Json(submission) = body.map_err(|e| IntakeError::InvalidInput(e.body_text()))?;

    let request = PlaceOrderRequest {
        store_slug: slug,
        customer: submission.customer,
        note: submission.note,
        payment_method: submission.payment_method,
        items: submission.items,
        verification_token: submission.verification_token,
    };

    // The dispatch handle is dropped; the task keeps running on its own.
    let placed = state.intake.place_order(request, client_ip(&headers)).await?;
    Ok((StatusCode::CREATED, Json(placed.receipt)))
}

pub async fn run_sweep(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<SweepResponse>, ApiError> {
    authorize(&headers, &state.admin_secret)?;
    let report = state.recovery.sweep().await?;
    Ok(Json(SweepResponse {
        processed: report.processed(),
        expired: report.expired,
        recovered: report.recovered,
        sent: report.sent,
        skipped: report.skipped,
    }))
}

pub async fn install_integration(
    State(state): State<AppState>,
    Path((store_id, integration_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Json(config): Json<serde_json::Value>,
) -> Result<Json<IntegrationInstallation>, ApiError> {
    authorize(&headers, &state.admin_secret)?;
    if state.registry.get(&integration_id).is_none() {
        return Err(IntakeError::InvalidInput(format!("unknown integration '{}'", integration_id)).into());
    }
    if !config.is_object() {
        return Err(IntakeError::InvalidInput("integration config must be an object".to_string()).into());
    }
    // Existence check so a bad store id is a 404 rather than a FK error.
    state.store.store_context(store_id).await?;
    let installation = state
        .store
        .upsert_installation(store_id, &integration_id, config)
        .await?;
    tracing::info!("Installed {} for store {}", integration_id, store_id);
    Ok(Json(installation))
}

pub async fn uninstall_integration(
    State(state): State<AppState>,
    Path((store_id, integration_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authorize(&headers, &state.admin_secret)?;
    if state.store.delete_installation(store_id, &integration_id).await? {
        tracing::info!("Uninstalled {} from store {}", integration_id, store_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(IntakeError::NotFound(format!("integration '{}' is not installed", integration_id)).into())
    }
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path((store_id, order_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Order>, ApiError> {
    authorize(&headers, &state.admin_secret)?;
    let (order, _dispatch) = state.intake.change_status(store_id, order_id, update.status).await?;
    Ok(Json(order))
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Unauthorized)?;

    if secret.is_empty() || !constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), Some("203.0.113.7".parse().unwrap()));

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers), Some("198.51.100.2".parse().unwrap()));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn bearer_must_match_secret() {
        let mut headers = HeaderMap::new();
        assert!(authorize(&headers, "s3cret").is_err());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(authorize(&headers, "s3cret").is_err());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorize(&headers, "s3cret").is_ok());
        assert!(authorize(&headers, "").is_err());
    }
}
