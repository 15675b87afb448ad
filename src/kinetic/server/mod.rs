// SPDX-License-Identifier: MIT

//! HTTP surface for the presentation layer
//!
//! Serves layouts and the per-run state read model, accepts raw wire events
//! for ingest, and pushes state over SSE after every change.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::kinetic::config::MonitorConfig;
use crate::kinetic::error::MonitorError;
use crate::kinetic::graph::{layout_with, GraphDefinition, LayoutOptions, Orientation};
use crate::kinetic::registry::RunRegistry;
use crate::kinetic::run::StartOptions;

#[derive(Clone)]
pub struct AppState {
    pub registry: RunRegistry,
    pub layout: LayoutOptions,
}

impl AppState {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            registry: RunRegistry::new(config.engine.clone()),
            layout: config.layout.clone(),
        }
    }
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(err: MonitorError) -> (StatusCode, Json<Value>) {
    let status = match err {
        MonitorError::RunNotFound { .. } => StatusCode::NOT_FOUND,
        MonitorError::Graph(_) | MonitorError::Json(_) | MonitorError::Yaml(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/layout", post(compute_layout))
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/{id}", get(get_run).delete(delete_run))
        .route("/api/runs/{id}/events", post(ingest_event))
        .route("/api/runs/{id}/reset", post(reset_run))
        .route("/api/runs/{id}/resync", post(resync_run))
        .route("/api/runs/{id}/stream", get(stream_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(config: MonitorConfig) -> Result<(), MonitorError> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| MonitorError::config(format!("Invalid listen address: {}", e)))?;

    let app = router(AppState::new(&config));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct LayoutRequest {
    graph: GraphDefinition,
    #[serde(default)]
    orientation: Orientation,
}

async fn compute_layout(
    State(state): State<AppState>,
    Json(payload): Json<LayoutRequest>,
) -> ApiResult {
    let result = layout_with(&payload.graph, payload.orientation, &state.layout);
    let value = serde_json::to_value(result).map_err(|e| api_error(e.into()))?;
    Ok(Json(value))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateRunRequest {
    graph_id: Option<String>,
    run_id: Option<String>,
    entry_node: Option<String>,
}

async fn list_runs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "runs": state.registry.ids().await }))
}

async fn create_run(
    State(state): State<AppState>,
    payload: Option<Json<CreateRunRequest>>,
) -> Json<Value> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let (id, run) = state
        .registry
        .create(StartOptions {
            run_id: payload.run_id,
            graph_id: payload.graph_id,
            entry_node: payload.entry_node,
        })
        .await;
    tracing::info!("Created run {}", id);
    Json(json!({ "id": id, "state": run }))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let run = state.registry.state(&id).await.map_err(api_error)?;
    Ok(Json(json!(run)))
}

async fn ingest_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(event): Json<Value>,
) -> ApiResult {
    let (outcome, run) = state.registry.apply(&id, &event).await.map_err(api_error)?;
    log::debug!("Run {}: {:?}", id, outcome);
    Ok(Json(json!(run)))
}

async fn reset_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let run = state.registry.reset(&id).await.map_err(api_error)?;
    Ok(Json(json!(run)))
}

/// Subscriber reconnected upstream; hold events until its next `init`
async fn resync_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.registry.await_snapshot(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "awaitingSnapshot": true })))
}

async fn delete_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.registry.remove(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "deleted": id })))
}

async fn stream_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, Json<Value>)> {
    let rx = state.registry.subscribe(&id).await.map_err(api_error)?;
    let stream = ReceiverStream::new(rx).map(|run| Event::default().event("state").json_data(run));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
