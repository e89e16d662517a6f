pub mod error;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::features::SchemaKind;
use crate::model::StoreStatus;
use crate::predict::{PredictionResult, Predictor, Rows};
use error::{ApiError, ApiResult};

pub struct AppState {
    pub predictor: Predictor,
}

/// Build the Axum router for the prediction API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/predict_one", post(predict_one_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: &'static str,
    pub version: &'static str,
    pub model_dir: String,
    pub load_policy: &'static str,
    #[serde(flatten)]
    pub store: StoreStatus,
}

/// Single categorical prediction; this contract carries no outcome label.
#[derive(Debug, Serialize)]
pub struct TeamsPrediction {
    pub pred_home_goals: f64,
    pub pred_away_goals: f64,
}

#[derive(Debug, Serialize)]
pub struct BatchPrediction {
    pub predictions: Vec<PredictionResult>,
}

/// GET /health – always 200, reflects current readiness.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.predictor.store();
    let status = store.status().await;
    let healthy = status.is_serviceable(store.policy());
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        model_dir: store.dir().display().to_string(),
        load_policy: store.policy().as_str(),
        store: status,
    })
}

/// POST /predict
///
/// `{items: [...]}` is a batch for either schema. A bare object is a single
/// team pair under the categorical schema, and a one-item batch under the
/// aggregate schema.
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;

    if let Some(items) = body.get("items") {
        let items = items
            .as_array()
            .ok_or_else(|| ApiError::BadRequest("field 'items' must be an array".into()))?;
        let predictions = state.predictor.predict(Rows::Many(items)).await?;
        return Ok(Json(to_json(BatchPrediction { predictions })?));
    }

    let (kind, predictions) = state.predictor.predict_with_schema(Rows::One(&body)).await?;
    match kind {
        SchemaKind::Categorical => {
            let result = single(predictions)?;
            Ok(Json(to_json(TeamsPrediction {
                pred_home_goals: result.pred_home_goals,
                pred_away_goals: result.pred_away_goals,
            })?))
        }
        SchemaKind::Aggregate => Ok(Json(to_json(BatchPrediction { predictions })?)),
    }
}

/// POST /predict_one – one row for the active schema.
async fn predict_one_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<PredictionResult>> {
    let Json(body) = payload?;
    let result = single(state.predictor.predict(Rows::One(&body)).await?)?;
    Ok(Json(result))
}

fn single(results: Vec<PredictionResult>) -> ApiResult<PredictionResult> {
    results
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Internal("regressors returned no prediction".into()))
}

fn to_json<T: Serialize>(value: T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}
