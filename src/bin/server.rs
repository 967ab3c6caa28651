//! AgentMem Server
//!
//! HTTP API for the memory system. Agents authenticate with
//! `Authorization: Bearer <agent id>`.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use agentmem::{
    config::Config,
    memory::{AgentRecord, MemoryUpdate, NewMemory},
    response::{
        AgentView, ErrorResponse, MemoryListResponse, MemoryView, ReembedResponse,
        SearchResponse, SearchStatsResponse, SharedWithResponse, SuccessResponse, SCHEMA_VERSION,
    },
    service::{MemoryService, SearchRequest},
    Error,
};

/// Application state shared across handlers
struct AppState {
    service: MemoryService,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting AgentMem Server on {}", config.bind_addr());
    tracing::info!("Data directory: {:?}", config.data_dir);

    let addr = config.bind_addr();
    let service = MemoryService::open(config)?;
    let state = Arc::new(AppState { service });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: SharedState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Agents
        .route("/agents", post(register_agent))
        // Search
        .route("/memories/search", post(search_memories))
        .route("/memories/search/stats", get(search_stats))
        .route("/memories/reembed", post(reembed))
        // Memory CRUD
        .route("/memories", get(list_memories).post(create_memory))
        .route(
            "/memories/:id",
            get(get_memory).put(update_memory).delete(delete_memory),
        )
        // Sharing
        .route("/memories/:id/share", post(share_memory))
        .route("/memories/:id/shared-with", get(shared_with))
        .route("/memories/:id/share/:agent_id", delete(revoke_sharing))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Errors ===

enum ApiError {
    Unauthorized(&'static str),
    Service(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.to_string()),
            ApiError::Service(e) => {
                let status = match &e {
                    Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
                    Error::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => {
                        tracing::error!(error = %e, "Request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// === Authentication ===

/// The authenticated agent making the request
struct Actor(AgentRecord);

#[async_trait]
impl FromRequestParts<SharedState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> ApiResult<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized("Missing bearer token"))?;

        let agent_id = Uuid::parse_str(token.trim())
            .map_err(|_| ApiError::Unauthorized("Invalid bearer token"))?;

        let agent = state
            .service
            .agent(agent_id)?
            .ok_or(ApiError::Unauthorized("Unknown agent"))?;

        Ok(Actor(agent))
    }
}

// === Handlers ===

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "schema_version": SCHEMA_VERSION,
    }))
}

// --- Agent handlers ---

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    workspace_id: String,
    name: String,
}

async fn register_agent(
    State(state): State<SharedState>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<(StatusCode, Json<AgentView>)> {
    let agent = state.service.register_agent(&req.workspace_id, &req.name)?;
    Ok((StatusCode::CREATED, Json(AgentView::from(&agent))))
}

// --- Memory handlers ---

async fn list_memories(
    State(state): State<SharedState>,
    Actor(actor): Actor,
) -> ApiResult<Json<MemoryListResponse>> {
    let memories = state.service.list(&actor)?;
    Ok(Json(MemoryListResponse::new(&memories)))
}

async fn create_memory(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Json(req): Json<NewMemory>,
) -> ApiResult<(StatusCode, Json<MemoryView>)> {
    let memory = state.service.create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(MemoryView::from(&memory))))
}

async fn get_memory(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MemoryView>> {
    let memory = state.service.get(&actor, id)?;
    Ok(Json(MemoryView::from(&memory)))
}

async fn update_memory(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<MemoryUpdate>,
) -> ApiResult<Json<MemoryView>> {
    let memory = state.service.update(&actor, id, req).await?;
    Ok(Json(MemoryView::from(&memory)))
}

async fn delete_memory(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    state.service.delete(&actor, id)?;
    Ok(Json(SuccessResponse::ok(Some(id))))
}

// --- Search handlers ---

async fn search_memories(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let hits = state.service.search(&actor, &req).await?;
    let limit = req.effective_limit(state.service.config().default_top_k);
    Ok(Json(SearchResponse::new(&hits, limit, req.offset)))
}

async fn search_stats(
    State(state): State<SharedState>,
    Actor(actor): Actor,
) -> ApiResult<Json<SearchStatsResponse>> {
    let stats = state.service.search_stats(&actor)?;
    Ok(Json(SearchStatsResponse::from(stats)))
}

async fn reembed(
    State(state): State<SharedState>,
    Actor(actor): Actor,
) -> ApiResult<Json<ReembedResponse>> {
    let report = state.service.reembed(&actor).await?;
    Ok(Json(ReembedResponse::from(report)))
}

// --- Sharing handlers ---

#[derive(Debug, Deserialize)]
struct ShareRequest {
    agent_id: Uuid,
}

async fn share_memory(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state.service.share(&actor, id, req.agent_id)?;
    Ok(Json(SuccessResponse::ok(Some(id))))
}

async fn shared_with(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SharedWithResponse>> {
    let grantees = state.service.shared_with(&actor, id)?;
    Ok(Json(SharedWithResponse {
        schema_version: SCHEMA_VERSION,
        memory_id: id,
        shared_with: grantees,
    }))
}

async fn revoke_sharing(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path((id, agent_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<SuccessResponse>> {
    state.service.revoke(&actor, id, agent_id)?;
    Ok(Json(SuccessResponse::ok(Some(id))))
}
