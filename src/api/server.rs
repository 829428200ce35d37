//! HTTP API server (SPEC_FULL.md §6): Axum router wiring every REST
//! endpoint plus the two WebSocket upgrades onto a single [`Manager`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::RuntimeConfig;
use crate::manager::{InboundMessage, Manager};
use crate::rag::Skills;
use crate::types::error::RuntimeError;
use crate::types::{Role, SessionId, TaskId, UserId};

use super::middleware::{auth_middleware, issue_token, rate_limit_middleware, validate_credentials};
use super::types::*;

#[derive(OpenApi)]
#[openapi(
    paths(health_check, chat_send, login),
    components(schemas(HealthResponse, ErrorResponse, LoginRequest, LoginResponse)),
    tags(
        (name = "chat", description = "Conversational orchestration endpoints"),
        (name = "rag", description = "Knowledge base management endpoints"),
        (name = "agents", description = "Agent registry and debug trace endpoints"),
        (name = "memory", description = "Per-user memory endpoints"),
        (name = "system", description = "Health and auth endpoints"),
    ),
    info(
        title = "Agentic Runtime API",
        description = "Multi-agent retrieval-augmented orchestration server",
        version = "0.1.0",
    )
)]
pub struct ApiDoc;

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl From<&RuntimeConfig> for HttpApiConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            cors_origins: config.cors_origins.clone(),
        }
    }
}

pub struct HttpApiServer {
    config: HttpApiConfig,
    manager: Arc<Manager>,
    start_time: Instant,
}

impl HttpApiServer {
    pub fn new(config: HttpApiConfig, manager: Arc<Manager>) -> Self {
        Self {
            config,
            manager,
            start_time: Instant::now(),
        }
    }

    pub async fn start(self) -> Result<(), RuntimeError> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to bind to {addr}: {e}")))?;

        tracing::info!("HTTP API server starting on {addr}");
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .map_err(|e| RuntimeError::Internal(format!("server error: {e}")))?;
        Ok(())
    }

    fn create_router(&self) -> Router {
        let manager = self.manager.clone();
        let auth = Arc::new(manager.config.auth.clone());

        let public = Router::new()
            .route("/health", get(health_check))
            .route("/", get(manifest))
            .route("/auth/login", post(login))
            .route("/chat/send", post(chat_send))
            .route("/chat/session/:id", get(chat_history))
            .route("/chat/session/:id/clear", post(chat_clear))
            .route("/rag/databases", get(list_databases))
            .route("/rag/databases/query", post(query_database))
            .route("/ws", get(super::ws::ws_handler))
            .route("/ws/chat", get(super::ws::ws_chat_handler))
            .with_state(manager.clone());

        let protected = Router::new()
            .route("/rag/databases", post(create_database))
            .route("/rag/databases/:name", delete(delete_database))
            .route("/rag/databases/smart-insert", post(smart_insert))
            .route("/rag/databases/suggest-target", post(suggest_target))
            .route("/agents/", get(list_agents))
            .route("/agents/interrupt", post(interrupt_agents))
            .route("/agents/debug/traces/recent", get(debug_traces_recent))
            .route("/agents/debug/session/:id/flow", get(debug_session_flow))
            .route("/agents/debug/task/:uid/flow", get(debug_task_flow))
            .route("/memory/observations/:user", get(get_preferences))
            .route("/memory/observations", post(set_preference))
            .route("/memory/context/:user", get(memory_context))
            .route("/memory/episodes/:id/rating", post(rate_episode))
            .with_state(manager.clone())
            .layer(axum::middleware::from_fn_with_state(auth, auth_middleware));

        let mut router = public.merge(protected).merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        );

        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router = router.layer(CorsLayer::new().allow_origin(AllowOrigin::list(origins)));
        router = router.layer(TraceLayer::new_for_http());
        router = router.layer(axum::middleware::from_fn(rate_limit_middleware));
        router = router.layer(Extension(Arc::new(self.start_time)));

        router
    }
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)), tag = "system")]
async fn health_check(Extension(start_time): Extension<Arc<Instant>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        uptime_s: start_time.elapsed().as_secs(),
    })
}

async fn manifest() -> Json<ManifestResponse> {
    Json(ManifestResponse {
        name: "agentic-runtime".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        endpoints: vec![
            "/health".into(),
            "/chat/send".into(),
            "/chat/session/{id}".into(),
            "/rag/databases".into(),
            "/agents/".into(),
            "/memory/observations/{user}".into(),
            "/ws".into(),
            "/ws/chat".into(),
        ],
    })
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses((status = 200, body = LoginResponse)),
    tag = "system"
)]
async fn login(State(manager): State<Arc<Manager>>, Json(req): Json<LoginRequest>) -> Json<LoginResponse> {
    match validate_credentials(&manager.config.auth, &req.username, &req.password) {
        Some(role) => Json(LoginResponse {
            success: true,
            role: Some(role.to_string()),
            username: req.username.clone(),
            token: Some(issue_token(&req.username, role)),
        }),
        None => Json(LoginResponse {
            success: false,
            role: None,
            username: req.username,
            token: None,
        }),
    }
}

#[utoipa::path(
    post,
    path = "/chat/send",
    responses((status = 200, description = "orchestration result"), (status = 500, body = ErrorResponse)),
    tag = "chat"
)]
async fn chat_send(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<ChatSendRequest>,
) -> Result<Json<ChatSendResponse>, (StatusCode, Json<ErrorResponse>)> {
    let is_async = req.options.r#async;
    let inbound = InboundMessage {
        message: req.message,
        session_id: req.session_id,
        user_id: req.user_id.map(UserId::from).unwrap_or_else(|| UserId::from("anonymous")),
        options: req.options.into(),
    };

    let result = manager.handle_message(inbound).await.map_err(err_response)?;

    Ok(Json(ChatSendResponse {
        task_uid: result.task_uid,
        session_id: result.session_id,
        response: if is_async { None } else { Some(result.answer) },
        sources: result.sources.into_iter().map(SourceDto::from).collect(),
        quality: if is_async { None } else { Some(result.quality_score) },
        quality_low: result.quality_low,
    }))
}

async fn chat_history(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionHistoryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let turns = manager.store.session_history(id).await.map_err(|e| {
        err_response(RuntimeError::Store(e))
    })?;
    let mut dtos = Vec::with_capacity(turns.len());
    for t in turns {
        let steps = if let Some(uid) = t.task_uid {
            manager
                .store
                .get_steps(uid)
                .await
                .into_iter()
                .map(|s| ThinkingStepDto {
                    seq: s.seq,
                    step_type: s.step_type,
                    agent_name: s.agent_name,
                    content: s.content,
                    created_at: s.created_at,
                })
                .collect()
        } else {
            Vec::new()
        };
        dtos.push(TurnDto {
            role: match t.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
            },
            content: t.content,
            created_at: t.created_at,
            task_uid: t.task_uid,
            steps,
        });
    }
    Ok(Json(SessionHistoryResponse { turns: dtos }))
}

async fn chat_clear(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    manager
        .store
        .clear_session(id)
        .await
        .map_err(|e| err_response(RuntimeError::Store(e)))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_databases(State(manager): State<Arc<Manager>>) -> Json<Vec<crate::rag::KbCollection>> {
    Json(manager.vector_store.list_collections().await)
}

async fn create_database(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<CreateDatabaseRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    manager
        .vector_store
        .create_collection(&req.name, &req.description, &req.category, Skills::default())
        .await
        .map_err(|e| err_response(RuntimeError::Rag(e)))?;
    Ok(StatusCode::CREATED)
}

async fn delete_database(
    State(manager): State<Arc<Manager>>,
    Path(name): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    manager
        .vector_store
        .delete_collection(&name)
        .await
        .map_err(|e| err_response(RuntimeError::Rag(e)))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn query_database(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<QueryDatabaseRequest>,
) -> Result<Json<Vec<crate::rag::QueryMatch>>, (StatusCode, Json<ErrorResponse>)> {
    let embedding = crate::rag::placeholder_embedding(&req.query);
    let matches = manager
        .vector_store
        .query(&req.database, &embedding, req.n_results)
        .await
        .map_err(|e| err_response(RuntimeError::Rag(e)))?;
    Ok(Json(matches))
}

async fn smart_insert(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<SmartInsertRequest>,
) -> Result<Json<SmartInsertResponse>, (StatusCode, Json<ErrorResponse>)> {
    let embedding = crate::rag::placeholder_embedding(&req.content);
    let metadata = serde_json::json!({ "title": req.title, "tags": req.tags });
    let (database, id) = manager
        .vector_store
        .smart_insert(req.content, embedding, metadata, req.auto_create)
        .await
        .map_err(|e| err_response(RuntimeError::Rag(e)))?;
    Ok(Json(SmartInsertResponse {
        database,
        inserted_id: id.to_string(),
    }))
}

async fn suggest_target(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<SuggestTargetRequest>,
) -> Result<Json<SuggestTargetResponse>, (StatusCode, Json<ErrorResponse>)> {
    let suggestion = manager
        .vector_store
        .smart_suggest(&req.content)
        .await
        .map_err(|e| err_response(RuntimeError::Rag(e)))?;
    let confidence = if suggestion.is_some() { 0.75 } else { 0.0 };
    Ok(Json(SuggestTargetResponse {
        database: suggestion,
        confidence,
        reason: if confidence > 0.0 {
            "keyword/topic overlap with an existing collection".into()
        } else {
            "no collection's skills overlap this content".into()
        },
    }))
}

async fn list_agents(State(manager): State<Arc<Manager>>) -> Json<Vec<crate::agents::AgentDescriptor>> {
    Json(manager.registry.list().await)
}

async fn interrupt_agents(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<InterruptRequest>,
) -> StatusCode {
    manager.interrupt(req.task_uid);
    StatusCode::ACCEPTED
}

#[derive(serde::Deserialize)]
struct DebugLimit {
    limit: Option<usize>,
}

async fn debug_traces_recent(
    State(manager): State<Arc<Manager>>,
    Query(q): Query<DebugLimit>,
) -> Json<Vec<crate::debug::DebugTrace>> {
    Json(manager.debug.recent(q.limit.unwrap_or(100)))
}

async fn debug_session_flow(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<SessionId>,
) -> Json<Vec<crate::debug::DebugTrace>> {
    Json(manager.debug.get_session_flow(id))
}

async fn debug_task_flow(
    State(manager): State<Arc<Manager>>,
    Path(uid): Path<TaskId>,
) -> Json<Vec<crate::debug::DebugTrace>> {
    Json(manager.debug.get_task_flow(uid))
}

async fn get_preferences(
    State(manager): State<Arc<Manager>>,
    Path(user): Path<String>,
) -> Json<std::collections::HashMap<String, serde_json::Value>> {
    let user_id: UserId = user.into();
    Json(manager.memory.preferences().lock().all_for_user(&user_id))
}

async fn set_preference(
    State(manager): State<Arc<Manager>>,
    Json(req): Json<SetPreferenceRequest>,
) -> StatusCode {
    // `value` doubles as the payload envelope: callers pass `{user_id, key, value}`
    // but this facade only needs the key/value pair plus an implicit user scope
    // carried in `key`'s namespace when no explicit user is given.
    let user_id: UserId = req
        .value
        .get("user_id")
        .and_then(|v| v.as_str())
        .unwrap_or("anonymous")
        .into();
    manager
        .memory
        .preferences()
        .lock()
        .set(user_id, req.key, req.value);
    StatusCode::NO_CONTENT
}

async fn rate_episode(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<crate::types::EpisodeId>,
    Json(req): Json<RateEpisodeRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    manager.rate_episode(id, req.rating).map_err(err_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(serde::Deserialize)]
struct MemoryContextQuery {
    query: Option<String>,
}

async fn memory_context(
    State(manager): State<Arc<Manager>>,
    Path(user): Path<String>,
    Query(q): Query<MemoryContextQuery>,
) -> Json<serde_json::Value> {
    let user_id: UserId = user.into();
    let prefs = manager.memory.preferences().lock().all_for_user(&user_id);
    Json(serde_json::json!({
        "user_id": user_id.0,
        "query": q.query,
        "preferences": prefs,
    }))
}

fn err_response(err: RuntimeError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err.code() {
        crate::types::ErrorCode::NotFound => StatusCode::NOT_FOUND,
        crate::types::ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        crate::types::ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
        crate::types::ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(err.code().as_str(), err.to_string())))
}
