//! HTTP API with Axum and Utoipa
//!
//! - `POST /isochrone` - GeoJSON isochrones for one request
//! - `GET /health` - liveness and graph size
//! - `GET /docs` - Swagger UI

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use butterfly_common::Error;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::EngineConfig;
use crate::geojson::FeatureCollection;
use crate::graph::MemoryGraph;
use crate::request::{ContourRequest, IsochroneRequest, Location};

#[derive(OpenApi)]
#[openapi(
    paths(isochrone, health),
    components(schemas(IsochroneRequest, Location, ContourRequest, ErrorResponse, HealthResponse)),
    info(
        title = "Butterfly Isochrone API",
        description = "Reachability contours (isochrones and isodistances) over a road graph"
    )
)]
struct ApiDoc;

/// Shared read-only state: one graph, one configuration
pub struct AppState {
    pub graph: MemoryGraph,
    pub config: EngineConfig,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub version: String,
    pub nodes: usize,
    pub edges: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// 400 for caller mistakes, 404 when no location is on the graph, 500 otherwise
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        Error::LocationUnreachable => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: &Error) -> ApiError {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Compute isochrones for one or more contours
#[utoipa::path(
    post,
    path = "/isochrone",
    request_body = IsochroneRequest,
    responses(
        (status = 200, description = "GeoJSON FeatureCollection, one feature per contour"),
        (status = 400, description = "Invalid request or limit exceeded", body = ErrorResponse),
        (status = 404, description = "No location is on the graph", body = ErrorResponse),
        (status = 500, description = "Server error", body = ErrorResponse)
    ),
    tag = "isochrone"
)]
async fn isochrone(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IsochroneRequest>,
) -> Result<Json<FeatureCollection>, ApiError> {
    let worker = Arc::clone(&state);
    // The engine is CPU-bound; keep it off the async workers
    let outcome = tokio::task::spawn_blocking(move || {
        crate::isochrone(&worker.graph, &worker.config, &req)
    })
    .await;

    match outcome {
        Ok(Ok(collection)) => Ok(Json(collection)),
        Ok(Err(e)) => {
            if e.is_client_error() {
                info!(error = %e, "rejected isochrone request");
            } else {
                warn!(error = %e, "isochrone request failed");
            }
            Err(api_error(&e))
        }
        Err(join) => {
            warn!(error = %join, "isochrone worker panicked");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal error".to_string(),
                }),
            ))
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        nodes: state.graph.node_count(),
        edges: state.graph.edge_count(),
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/isochrone", post(isochrone))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(graph: MemoryGraph, config: EngineConfig, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState { graph, config });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "isochrone server listening");
    info!("API docs available at http://{addr}/docs");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::synthetic::SyntheticGrid;

    fn state() -> Arc<AppState> {
        let grid = SyntheticGrid::new(11, 11, 100.0);
        Arc::new(AppState {
            graph: grid.build().unwrap(),
            config: EngineConfig::default(),
        })
    }

    fn request(json: &str) -> IsochroneRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::LimitExceeded("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::unknown_costing("cart")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::LocationUnreachable), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&Error::TileUnavailable(3)), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_isochrone_handler() {
        let state = state();
        let center = state.graph.position_of(60).unwrap();
        let body = format!(
            r#"{{"locations":[{{"lat":{},"lon":{}}}],"costing":"pedestrian",
                "contours":[{{"time":5}}],"polygons":true,"date_time":"12:00"}}"#,
            center.y, center.x
        );
        let Json(collection) = isochrone(State(state), Json(request(&body))).await.unwrap();
        assert_eq!(collection.features.len(), 1);
    }

    #[tokio::test]
    async fn test_isochrone_handler_rejects_bad_costing() {
        let body =
            r#"{"locations":[{"lat":52.06,"lon":5.09}],"costing":"cart","contours":[{"time":5}]}"#;
        let (status, Json(err)) = isochrone(State(state()), Json(request(body))).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err.error.contains("cart"));
    }

    #[tokio::test]
    async fn test_health() {
        let Json(health) = health(State(state())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.nodes, 121);
    }
}
