use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::ActionError;
use crate::engine::CommandError;
use crate::engine::Device;
use crate::engine::Engine;
use crate::engine::EntityState;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match &self {
            CommandError::UnknownEntity(_)
            | CommandError::UnknownInstance(_)
            | CommandError::Action(ActionError::UnknownService(_)) => StatusCode::NOT_FOUND,
            CommandError::Action(ActionError::NotPressable(_)) => StatusCode::BAD_REQUEST,
            CommandError::Action(ActionError::Failed(_)) => StatusCode::BAD_GATEWAY,
            CommandError::IntegrationGone(_)
            | CommandError::Action(ActionError::NotReady(_)) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn ok() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    ok()
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/entities
async fn list_entities(State(state): State<Arc<AppState>>) -> Json<Vec<EntityState>> {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.entities.values().cloned().collect())
}

/// Handler for GET /v1/entities/:entity_id
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityState>, CommandError> {
    state
        .engine
        .state_snapshot()
        .entities
        .get(&entity_id)
        .cloned()
        .map(Json)
        .ok_or(CommandError::UnknownEntity(entity_id))
}

/// Handler for GET /v1/devices
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<Device>> {
    Json(state.engine.devices())
}

/// Handler for POST /v1/entities/:entity_id/press
#[tracing::instrument(skip(state))]
async fn press(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, CommandError> {
    state.engine.press(&entity_id).await?;
    Ok(ok())
}

/// Handler for POST /v1/instances/:instance/services/:service
#[tracing::instrument(skip(state))]
async fn call_service(
    State(state): State<Arc<AppState>>,
    Path((instance, service)): Path<(String, String)>,
) -> Result<impl IntoResponse, CommandError> {
    state.engine.call_service(&instance, &service).await?;
    Ok(ok())
}

/// Create the API router with all endpoints
fn create_router(engine: Arc<Engine>) -> Router {
    let state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        engine,
    });

    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/devices", get(list_devices))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/:entity_id", get(get_entity))
        .route("/v1/entities/:entity_id/press", post(press))
        .route(
            "/v1/instances/:instance/services/:service",
            post(call_service),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    engine: Arc<Engine>,
    listen: String,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(engine);

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
