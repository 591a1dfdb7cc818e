//! HTTP surface of the inference service.

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::annotate::{annotate, PredictionResult};
use crate::catalog::{default_labels, DiseaseClass};
use crate::error::{Error, Result};
use crate::preprocess;
use crate::state::SharedState;

pub const SERVICE_NAME: &str = "Plant Disease Detection AI";

pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/predict", post(predict))
        .route(
            "/predict-batch",
            post(predict_batch).layer(DefaultBodyLimit::disable()),
        )
        .route("/stats", get(stats))
        .route("/reload-model", post(reload_model))
        .route("/test-backend", get(test_backend))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Fields of a predict form. Unknown fields are ignored.
#[derive(Default)]
struct PredictForm {
    image: Option<Bytes>,
    images: Vec<Bytes>,
    capteur_id: Option<String>,
    user_id: Option<String>,
}

/// A request that is not a multipart form carries none of the expected fields.
async fn read_form(
    multipart: std::result::Result<Multipart, MultipartRejection>,
    required: &'static str,
) -> Result<PredictForm> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!("Rejected non-multipart upload: {}", rejection.body_text());
        Error::MissingField(required)
    })?;
    let mut form = PredictForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => form.image = Some(field.bytes().await?),
            Some("images") => form.images.push(field.bytes().await?),
            Some("capteurId") => form.capteur_id = non_empty(field.text().await?),
            Some("userId") => form.user_id = non_empty(field.text().await?),
            _ => {}
        }
    }

    Ok(form)
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    pub success: bool,
    pub backend_sent: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Succeeded(PredictResponse),
    Failed {
        success: bool,
        image_index: usize,
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub total: usize,
    pub success_count: usize,
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub model_loaded: bool,
    pub model_path: String,
    pub backend_url: String,
    pub backend_enabled: bool,
    pub supported_classes: usize,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub model_loaded: bool,
    pub model_path: String,
    pub backend_url: String,
    pub backend_enabled: bool,
    pub supported_classes: Vec<String>,
    pub total_classes: usize,
}

/// Classifies one image and relays the annotated result.
async fn analyse(
    state: &SharedState,
    image: Bytes,
    capteur_id: Option<&str>,
    user_id: Option<&str>,
) -> Result<PredictResponse> {
    preprocess::ensure_within_limit(image.len())?;

    let classification = state.classify(image).await?;
    let result = annotate(
        &classification.label,
        classification.confidence,
        classification.source,
    );

    info!(
        prediction = %result.prediction,
        confidence = result.confidence,
        severity = ?result.severity,
        should_water = result.should_water,
        "Analysis finished"
    );

    let backend_sent = state
        .backend
        .send_analysis(&result, capteur_id, user_id)
        .await;

    Ok(PredictResponse {
        result,
        success: true,
        backend_sent,
    })
}

/// GET /health
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "online",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        model_loaded: state.model_loaded().await,
        model_path: state.config.model_path.display().to_string(),
        backend_url: state.config.backend_url.clone(),
        backend_enabled: state.backend.is_enabled(),
        supported_classes: DiseaseClass::ALL.len(),
        timestamp: Local::now(),
    })
}

/// POST /predict
pub async fn predict(
    State(state): State<SharedState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>> {
    let form = read_form(multipart, "image").await?;
    let image = form.image.ok_or_else(|| {
        error!("No image provided");
        Error::MissingField("image")
    })?;

    info!(
        capteur_id = form.capteur_id.as_deref().unwrap_or("unspecified"),
        user_id = form.user_id.as_deref().unwrap_or("unspecified"),
        "Image received: {} bytes ({:.1} KB)",
        image.len(),
        image.len() as f64 / 1024.0
    );

    let response = analyse(
        &state,
        image,
        form.capteur_id.as_deref(),
        form.user_id.as_deref(),
    )
    .await
    .map_err(|err| {
        error!("Analysis failed: {:?}", err);
        err
    })?;

    Ok(Json(response))
}

/// POST /predict-batch
pub async fn predict_batch(
    State(state): State<SharedState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>> {
    let form = read_form(multipart, "images").await?;
    if form.images.is_empty() {
        return Err(Error::MissingField("images"));
    }

    let total = form.images.len();
    let mut results = Vec::with_capacity(total);
    let mut success_count = 0;

    for (index, image) in form.images.iter().enumerate() {
        info!("Analysing image {}/{}", index + 1, total);
        match analyse(&state, image.clone(), form.capteur_id.as_deref(), None).await {
            Ok(response) => {
                success_count += 1;
                results.push(BatchItem::Succeeded(response));
            }
            Err(err) => {
                error!("Image {} failed: {}", index + 1, err);
                results.push(BatchItem::Failed {
                    success: false,
                    image_index: index,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(Json(BatchResponse {
        success: true,
        total,
        success_count,
        results,
    }))
}

/// GET /stats
pub async fn stats(State(state): State<SharedState>) -> Json<StatsResponse> {
    let supported_classes = default_labels();
    Json(StatsResponse {
        model_loaded: state.model_loaded().await,
        model_path: state.config.model_path.display().to_string(),
        backend_url: state.config.backend_url.clone(),
        backend_enabled: state.backend.is_enabled(),
        total_classes: supported_classes.len(),
        supported_classes,
    })
}

/// POST /reload-model
pub async fn reload_model(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let loaded = state.reload_model().await;
    let message = if loaded {
        "Model reloaded successfully"
    } else {
        "Model not found, serving demo predictions"
    };
    Json(json!({
        "success": true,
        "model_loaded": loaded,
        "message": message,
    }))
}

/// GET /test-backend
pub async fn test_backend(State(state): State<SharedState>) -> Response {
    let backend_url = state.config.backend_url.clone();
    match state.backend.probe().await {
        Ok(probe) => Json(json!({
            "success": true,
            "backend_url": backend_url,
            "status_code": probe.status_code,
            "response": probe.response,
        }))
        .into_response(),
        Err(err) => {
            error!("Backend probe failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "backend_url": backend_url,
                    "error": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}
