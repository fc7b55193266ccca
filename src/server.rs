use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path, Request, State,
        multipart::MultipartError,
        rejection::JsonRejection,
    },
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::analysis::{AnalysisError, DocumentAnalysis, schema::validate};
use crate::config::AppConfig;
use crate::extraction::{self, ExtractionError, SourceFile};
use crate::llm::LlmSettings;
use crate::session::{ChatError, ChatSession, ConversationTurn, GroundingContext, ReplyStream};

/// Multipart framing allowed on top of the upload itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, settings: LlmSettings) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        chat_model = %settings.chat_model,
        provider = ?settings.provider,
        analysis_mode = ?settings.effective_analysis_mode(),
        configured = settings.is_configured(),
        "LLM configuration loaded"
    );
    if !settings.is_configured() {
        tracing::warn!(
            "No LLM API key set; analysis and chat requests will fail until LLM_API_KEY is provided"
        );
    }

    let state = AppState::new(Arc::clone(&config), &settings);
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the router with all routes and layers.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = state.config.server.request_timeout();
    let body_limit = state.config.limits.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/extract-file", post(extract_file))
        .route("/chat", post(chat))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", axum::routing::delete(delete_session))
        .route(
            "/sessions/{id}/messages",
            post(send_session_message).get(get_session_messages),
        )
        .route("/sessions/{id}/cancel", post(cancel_session_turn))
        .layer(DefaultBodyLimit::max(body_limit))
        // Bounds the time to the response head; streamed bodies are not cut.
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => {
                        tracing::warn!(timeout = ?timeout_duration, "Request timed out");
                        error_response(StatusCode::REQUEST_TIMEOUT, "Request timed out")
                    }
                }
            },
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// An error already mapped to a status and a user-facing message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn session_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Session not found")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status, &self.message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection, "Rejected request body");
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        tracing::warn!(error = %err, "Rejected multipart body");
        Self::new(err.status(), err.body_text())
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, detail = err.detail(), "Analysis failed");
        } else {
            tracing::warn!(error = %err, "Analysis rejected");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        if err.is_client_error() {
            tracing::warn!(error = %err, "Extraction rejected");
            Self::bad_request(err.to_string())
        } else {
            if let ExtractionError::Malformed { reason, .. } = &err {
                tracing::error!(error = %err, reason = %reason, "Extraction failed");
            }
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl IntoResponse for ExtractionError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = err.status();
        match &err {
            ChatError::Unknown(detail) => {
                tracing::error!(error = %err, detail = %detail, "Chat failed");
            }
            _ => tracing::warn!(error = %err, "Chat rejected"),
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /health - Liveness and configuration status.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "llmConfigured": state.llm.is_some(),
    }))
}

/// Request body for `/analyze`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    #[serde(default)]
    document_text: Option<String>,
    #[serde(default)]
    document_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    analysis: DocumentAnalysis,
}

/// POST /analyze - Explain a document.
async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(req) = payload?;
    let analysis = state
        .analyzer
        .analyze(
            req.document_text.as_deref().unwrap_or_default(),
            req.document_type.as_deref(),
        )
        .await?;
    Ok(Json(AnalyzeResponse { analysis }))
}

#[derive(Debug, Serialize)]
struct ExtractResponse {
    text: String,
}

/// POST /extract-file - Pull plain text out of an uploaded file.
async fn extract_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractResponse>, ApiError> {
    let max_bytes = state.config.limits.max_upload_bytes;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().map(ToString::to_string);
        let declared = field.content_type().map(ToString::to_string);
        let bytes = field.bytes().await?;
        upload = Some(SourceFile::new(name, declared.as_deref(), bytes));
        break;
    }

    let Some(file) = upload else {
        return Err(ApiError::bad_request("No file provided"));
    };
    if file.bytes.len() > max_bytes {
        tracing::warn!(bytes = file.bytes.len(), max_bytes, "Upload too large");
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "File is too large. The maximum size is {} MB.",
                max_bytes / (1024 * 1024)
            ),
        ));
    }

    let media_type = file.media_type.clone();
    let size = file.bytes.len();
    let text = tokio::task::spawn_blocking(move || extraction::extract(&file))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Extraction task failed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to extract text from file",
            )
        })??;

    if text.trim().is_empty() {
        return Err(ExtractionError::NoText("file").into());
    }

    info!(
        name: "extraction.completed",
        media_type = %media_type,
        bytes = size,
        chars = text.chars().count(),
        "Text extracted"
    );
    Ok(Json(ExtractResponse { text }))
}

/// Request body for the stateless `/chat` route.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    messages: Option<Value>,
    #[serde(default)]
    document_context: Option<String>,
}

/// POST /chat - Stream a reply to the last user turn of `messages`.
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;

    let Some(Value::Array(raw)) = req.messages else {
        return Err(ChatError::InvalidInput("Messages array is required".to_string()).into());
    };
    let mut turns: Vec<ConversationTurn> =
        raw.iter().filter_map(ConversationTurn::from_value).collect();
    if turns.len() < raw.len() {
        tracing::debug!(dropped = raw.len() - turns.len(), "Dropped malformed turns");
    }

    let Some(last) = turns.pop() else {
        return Err(ChatError::InvalidInput("Messages array is required".to_string()).into());
    };
    if last.role != crate::session::Role::User {
        return Err(
            ChatError::InvalidInput("The last message must come from the user".to_string()).into(),
        );
    }

    let session = ChatSession::new(
        state.llm.clone(),
        state.chat_options.clone(),
        req.document_context.and_then(GroundingContext::from_raw),
    );
    session.extend_history(turns);

    let reply = session.send(&last.content)?;
    Ok(stream_reply(reply).await)
}

/// Relay a reply as a plain-text streamed body.
///
/// Waits for the first fragment so that a request rejected upstream still
/// gets a JSON error instead of an empty stream.
async fn stream_reply(mut reply: ReplyStream) -> Response {
    match reply.next().await {
        Some(Err(e)) => e.into_response(),
        first => {
            let body = futures::stream::iter(first).chain(reply).map(|item| {
                item.inspect_err(|e| tracing::warn!(error = %e, "Chat stream ended early"))
            });
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Body::from_stream(body),
            )
                .into_response()
        }
    }
}

/// Request body for `/sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    #[serde(default)]
    document_text: Option<String>,
    #[serde(default)]
    analysis: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
}

/// POST /sessions - Start a chat about an analyzed document.
async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let Json(req) = payload?;

    let document_text = req.document_text.unwrap_or_default();
    if document_text.trim().is_empty() {
        return Err(ApiError::bad_request("Document text is required"));
    }
    let Some(analysis) = req.analysis else {
        return Err(ApiError::bad_request("Document analysis is required"));
    };
    let analysis = validate(&analysis).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let session = state.sessions.insert(ChatSession::new(
        state.llm.clone(),
        state.chat_options.clone(),
        Some(GroundingContext::from_analysis(&document_text, &analysis)),
    ));

    info!(
        name: "session.created",
        session_id = %session.id(),
        active = state.sessions.len(),
        "Chat session created"
    );
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id().to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    #[serde(default)]
    text: String,
}

/// POST /sessions/:id/messages - Send a turn and stream the reply.
async fn send_session_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(ApiError::session_not_found)?;
    let reply = session.send(&req.text)?;
    Ok(stream_reply(reply).await)
}

/// GET /sessions/:id/messages - Recorded turns.
async fn get_session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConversationTurn>>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(ApiError::session_not_found)?;
    Ok(Json(session.turns()))
}

/// POST /sessions/:id/cancel - Abort the in-flight turn.
async fn cancel_session_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(ApiError::session_not_found)?;
    if session.cancel() {
        info!(name: "session.turn.cancelled", session_id = %id, "Turn cancelled by client");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /sessions/:id - Discard the session and its history.
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .remove(&id)
        .ok_or_else(ApiError::session_not_found)?;
    info!(name: "session.deleted", session_id = %id, "Chat session deleted");
    Ok(StatusCode::NO_CONTENT)
}
