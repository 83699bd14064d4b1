//! HTTP API for the mobile client

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::analysis::{ClassifiedItem, InventoryItem, RecipeSuggestion, UrgencyBuckets};
use crate::config::ServerConfig;
use crate::pipeline::{FoodPipeline, PipelineError};

/// Shared across handlers
pub struct AppState {
    pipeline: Arc<FoodPipeline>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<FoodPipeline>, request_timeout: Duration, max_body_bytes: usize) -> Self {
        Self {
            pipeline,
            request_timeout,
            max_body_bytes,
        }
    }
}

#[derive(Serialize)]
struct RootResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    services: ServiceStatus,
}

#[derive(Serialize)]
struct ServiceStatus {
    detection: bool,
    ocr: bool,
}

#[derive(Deserialize)]
struct DetectRequest {
    /// Base64 image, optionally with a data URL header
    image: String,
    #[serde(default)]
    annotate: bool,
}

#[derive(Serialize)]
struct DetectResponse {
    detected_items: Vec<ClassifiedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotated_image: Option<String>,
}

#[derive(Serialize)]
struct InventoryResponse {
    inventory: Vec<InventoryItem>,
}

#[derive(Deserialize)]
struct RecipeRequest {
    labels: Vec<String>,
}

#[derive(Serialize)]
struct RecipeResponse {
    suggestions: Vec<RecipeSuggestion>,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            PipelineError::Decode(_) | PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    // Mobile clients call from arbitrary origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Base64 phone photos run well past axum's 2 MiB default
    let detect = post(detect_handler).layer(DefaultBodyLimit::max(state.max_body_bytes));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/detect", detect)
        .route("/inventory/add", post(inventory_add_handler))
        .route("/inventory/urgency", post(inventory_urgency_handler))
        .route("/recipes/suggest", post(recipes_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C or SIGTERM
pub async fn run_server(config: &ServerConfig, pipeline: Arc<FoodPipeline>) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(
        pipeline,
        Duration::from_secs(config.request_timeout_secs),
        config.max_body_bytes,
    ));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address {}:{}: {}", config.host, config.port, e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        status: "running",
        service: "FridgePal Backend",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        services: ServiceStatus {
            detection: state.pipeline.detector().is_ready(),
            ocr: state.pipeline.reader().is_ready(),
        },
    })
}

async fn detect_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, PipelineError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        request_id = %request_id,
        payload_bytes = request.image.len(),
        annotate = request.annotate,
        "Processing detect request"
    );
    let start = Instant::now();

    let pipeline = state.pipeline.clone();
    let task = tokio::task::spawn_blocking(move || {
        pipeline.detect_from_base64(&request.image, request.annotate)
    });

    let result = match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(PipelineError::Unexpected(join_error.to_string())),
        Err(_) => Err(PipelineError::Timeout(state.request_timeout.as_secs())),
    };

    match result {
        Ok(outcome) => {
            info!(
                request_id = %request_id,
                items = outcome.items.len(),
                total_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Detection completed"
            );
            Ok(Json(DetectResponse {
                detected_items: outcome.items,
                annotated_image: outcome.annotated_image,
            }))
        }
        Err(e) => {
            match &e {
                PipelineError::Decode(_) | PipelineError::Validation(_) => {
                    warn!(request_id = %request_id, error = %e, "Rejected detect request")
                }
                _ => error!(request_id = %request_id, error = %e, "Detection failed"),
            }
            Err(e)
        }
    }
}

async fn inventory_add_handler(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<ClassifiedItem>>,
) -> Json<InventoryResponse> {
    let added_at = Utc::now();
    let engine = state.pipeline.engine();

    let inventory = items
        .iter()
        .map(|item| InventoryItem::from_classified(item, engine, added_at))
        .collect();

    Json(InventoryResponse { inventory })
}

async fn inventory_urgency_handler(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<serde_json::Value>>,
) -> Json<UrgencyBuckets<serde_json::Value>> {
    Json(state.pipeline.engine().categorize_by_urgency(items))
}

async fn recipes_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecipeRequest>,
) -> Json<RecipeResponse> {
    Json(RecipeResponse {
        suggestions: state.pipeline.engine().suggest_recipes(&request.labels),
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::InferenceEngine;
    use crate::config::ImageConfig;
    use crate::vision::detection::{DetectionBackend, RawDetection};
    use crate::vision::image_prep::encode_base64;
    use crate::vision::{DetectParams, Detector, TextReader};
    use axum::body::Body;
    use axum::http::Request;
    use image::RgbImage;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct SlowBackend;

    impl DetectionBackend for SlowBackend {
        fn infer(&self, _image: &RgbImage, _params: &DetectParams) -> anyhow::Result<Vec<RawDetection>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }
    }

    fn degraded_app() -> Router {
        app_with(Detector::degraded("test"), Duration::from_secs(30))
    }

    fn app_with(detector: Detector, timeout: Duration) -> Router {
        app_with_limit(detector, timeout, ServerConfig::default().max_body_bytes)
    }

    fn app_with_limit(detector: Detector, timeout: Duration, max_body_bytes: usize) -> Router {
        let pipeline = FoodPipeline::new(
            detector,
            TextReader::degraded("test"),
            InferenceEngine::new(),
            DetectParams::default(),
            ImageConfig::default(),
        );
        build_router(Arc::new(AppState::new(Arc::new(pipeline), timeout, max_body_bytes)))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn jpeg_payload() -> String {
        encode_base64(&RgbImage::from_pixel(640, 480, image::Rgb([180, 180, 180])), 90).unwrap()
    }

    #[tokio::test]
    async fn test_root() {
        let (status, body) = send(degraded_app(), "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["service"], "FridgePal Backend");
    }

    #[tokio::test]
    async fn test_health_reports_degraded_services() {
        let (status, body) = send(degraded_app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "healthy", "services": {"detection": false, "ocr": false}})
        );
    }

    #[tokio::test]
    async fn test_detect_with_mock_adapters() {
        let (status, body) = send(
            degraded_app(),
            "POST",
            "/detect",
            Some(json!({ "image": jpeg_payload() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let items = body["detected_items"].as_array().unwrap();
        let categories: Vec<&str> = items.iter().map(|i| i["category"].as_str().unwrap()).collect();
        assert_eq!(categories, vec!["fruit", "fruit", "packaged", "packaged"]);
        assert_eq!(items[0]["label"], "apple");
        assert_eq!(items[1]["label"], "banana");
        assert!(items[0]["extra"].is_null());
        assert!(items[2]["extra"].is_string());
        assert!(body.get("annotated_image").is_none());
    }

    #[tokio::test]
    async fn test_detect_accepts_data_url_and_annotates() {
        let payload = format!("data:image/jpeg;base64,{}", jpeg_payload());
        let (status, body) = send(
            degraded_app(),
            "POST",
            "/detect",
            Some(json!({ "image": payload, "annotate": true })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["detected_items"].as_array().unwrap().len(), 4);
        assert!(body["annotated_image"].is_string());
    }

    #[tokio::test]
    async fn test_detect_rejects_bad_base64() {
        let (status, body) = send(
            degraded_app(),
            "POST",
            "/detect",
            Some(json!({ "image": "%%% not an image %%%" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_detect_rejects_small_image() {
        let small = encode_base64(&RgbImage::new(30, 30), 90).unwrap();
        let (status, body) = send(degraded_app(), "POST", "/detect", Some(json!({ "image": small }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("too small"));
    }

    #[tokio::test]
    async fn test_detect_accepts_large_body() {
        // Well-formed base64 of null bytes, over 2 MiB on the wire
        let image = "A".repeat(3_000_000);
        let (status, body) = send(degraded_app(), "POST", "/detect", Some(json!({ "image": image }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_detect_body_over_limit() {
        let app = app_with_limit(Detector::degraded("test"), Duration::from_secs(30), 1024);
        let request = Request::builder()
            .method("POST")
            .uri("/detect")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "image": "A".repeat(4096) }).to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_detect_times_out() {
        let app = app_with(
            Detector::with_backend(Box::new(SlowBackend)),
            Duration::from_millis(50),
        );
        let (status, body) = send(app, "POST", "/detect", Some(json!({ "image": jpeg_payload() }))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(body["detail"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_inventory_add() {
        let items = json!([
            {"category": "packaged", "label": "Milk", "confidence": 0.85, "extra": "AMUL MILK"},
            {"category": "fruit", "label": "apple", "confidence": 0.91, "extra": null}
        ]);
        let (status, body) = send(degraded_app(), "POST", "/inventory/add", Some(items)).await;
        assert_eq!(status, StatusCode::OK);

        let inventory = body["inventory"].as_array().unwrap();
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory[0]["estimated_expiry_days"], 3);
        assert_eq!(inventory[0]["quantity"], 1);
        assert_eq!(inventory[1]["estimated_expiry_days"], 7);
        assert!(chrono::DateTime::parse_from_rfc3339(inventory[0]["added_at"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_inventory_urgency() {
        let items = json!([
            {"label": "Milk", "estimated_expiry_days": 1},
            {"label": "Bread", "estimated_expiry_days": 5},
            {"label": "Pasta", "estimated_expiry_days": 10},
            {"label": "Mystery"}
        ]);
        let (status, body) = send(degraded_app(), "POST", "/inventory/urgency", Some(items)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["urgent"].as_array().unwrap().len(), 1);
        assert_eq!(body["soon"].as_array().unwrap().len(), 2);
        assert_eq!(body["normal"][0]["label"], "Pasta");
    }

    #[tokio::test]
    async fn test_recipes_suggest() {
        let (status, body) = send(
            degraded_app(),
            "POST",
            "/recipes/suggest",
            Some(json!({"labels": ["Bread", "Cheese"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suggestions"][0]["name"], "Grilled Cheese Sandwich");
    }
}
