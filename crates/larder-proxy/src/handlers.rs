use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use larder_core::ErrorReport;
use larder_telemetry::TelemetryBuffer;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProxyError;
use crate::fatsecret::FatSecretClient;

/// State shared by the proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub client: Arc<FatSecretClient>,
    pub telemetry: Option<TelemetryBuffer>,
    pub default_max_results: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct FoodSearchRequest {
    pub search_expression: Option<String>,
    pub page_number: Option<u32>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BarcodeLookupRequest {
    pub barcode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FoodDetailsRequest {
    pub food_id: Option<String>,
}

pub async fn food_search(
    State(state): State<ProxyState>,
    body: Result<Json<FoodSearchRequest>, JsonRejection>,
) -> Result<Json<Value>, ProxyError> {
    observed(&state, "food_search", async {
        state.client.credentials()?;
        let Json(req) = body.map_err(|e| ProxyError::InvalidBody(e.body_text()))?;
        let expression = required(req.search_expression, ProxyError::MissingSearchExpression)?;
        let page_number = req.page_number.unwrap_or(0);
        let max_results = req.max_results.unwrap_or(state.default_max_results);
        tracing::debug!(expression = %expression, page_number, max_results, "food search");
        state
            .client
            .search_foods(&expression, page_number, max_results)
            .await
    })
    .await
    .map(Json)
}

pub async fn barcode_lookup(
    State(state): State<ProxyState>,
    body: Result<Json<BarcodeLookupRequest>, JsonRejection>,
) -> Result<Json<Value>, ProxyError> {
    observed(&state, "barcode_lookup", async {
        state.client.credentials()?;
        let Json(req) = body.map_err(|e| ProxyError::InvalidBody(e.body_text()))?;
        let barcode = required(req.barcode, ProxyError::MissingBarcode)?;
        tracing::debug!(barcode = %barcode, "barcode lookup");
        state.client.lookup_barcode(&barcode).await
    })
    .await
    .map(Json)
}

pub async fn food_details(
    State(state): State<ProxyState>,
    body: Result<Json<FoodDetailsRequest>, JsonRejection>,
) -> Result<Json<Value>, ProxyError> {
    observed(&state, "food_details", async {
        state.client.credentials()?;
        let Json(req) = body.map_err(|e| ProxyError::InvalidBody(e.body_text()))?;
        let food_id = required(req.food_id, ProxyError::MissingFoodId)?;
        state.client.food_details(&food_id).await
    })
    .await
    .map(Json)
}

/// CORS preflight and bare OPTIONS requests.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn health(State(state): State<ProxyState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "credentialsConfigured": state.client.is_configured(),
    }))
}

fn required(value: Option<String>, missing: ProxyError) -> Result<String, ProxyError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(missing),
    }
}

/// Run a handler body, recording its latency and any failure with the
/// attached telemetry buffer.
async fn observed<F>(state: &ProxyState, route: &'static str, fut: F) -> Result<Value, ProxyError>
where
    F: Future<Output = Result<Value, ProxyError>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Err(e) = &result {
        tracing::warn!(route, error_kind = e.error_kind(), error = %e, "proxy request failed");
    }

    if let Some(telemetry) = &state.telemetry {
        telemetry.capture_performance(format!("proxy.{route}_ms"), elapsed_ms);
        if let Err(e) = &result {
            telemetry.capture_error(
                ErrorReport::from_error(e),
                Some(serde_json::json!({
                    "route": route,
                    "kind": e.error_kind(),
                })),
            );
        }
    }
    result
}
