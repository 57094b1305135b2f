//! HTTP boundary.
//!
//! Thin axum layer over the core: uploads become ingestion jobs, questions
//! become NDJSON answer streams. Authentication and account handling live
//! in front of this server; `student_id` and `grade` arrive as opaque,
//! already-authorized values.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Multipart upload (file + grade/subject/chapter) → 202 with job id; `?sync=true` processes inline |
//! | `GET`  | `/jobs/{id}` | Ingestion job status |
//! | `POST` | `/ask` | Ask a question → NDJSON stream of answer fragments |
//! | `GET`  | `/conversations` | List a student's conversations (`?student_id=`) |
//! | `GET`  | `/conversations/{id}/messages` | Messages of one conversation |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "ingestion job not found: ..." } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `external_service`
//! (502), `internal` (500).
//!
//! # Ask Stream
//!
//! `POST /ask` responds with `application/x-ndjson`. The first line
//! carries the conversation id, then one line per fragment, then a
//! terminal line:
//!
//! ```text
//! {"conversation_id":"..."}
//! {"delta":"Inertia is"}
//! {"delta":" the resistance..."}
//! {"done":true}
//! ```
//!
//! A mid-stream generation failure replaces the `done` line with
//! `{"error":"..."}`; any fragments already delivered are still recorded
//! in the conversation.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::answer::{AnswerEvent, AnswerStreamer};
use crate::conversations::ConversationStore;
use crate::error::Error;
use crate::ingestion::IngestionCoordinator;
use crate::models::{Conversation, IngestionJob, Message};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: IngestionCoordinator,
    pub streamer: AnswerStreamer,
    pub conversations: ConversationStore,
}

pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/ask", post(handle_ask))
        .route("/conversations", get(handle_list_conversations))
        .route("/conversations/{id}/messages", get(handle_list_messages))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(Arc::new(state));

    info!(bind, "tutoring server listening");

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let (status, code) = match &e {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::ExternalService(_) => (StatusCode::BAD_GATEWAY, "external_service"),
            Error::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: e.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestQuery {
    /// Process the job inside this request instead of leaving it for the
    /// worker.
    #[serde(default)]
    sync: bool,
}

#[derive(Serialize)]
struct IngestResponse {
    job: IngestionJob,
}

async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IngestQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut grade: Option<i64> = None;
    let mut subject: Option<String> = None;
    let mut chapter: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|f| f.to_string())
                    .ok_or_else(|| bad_request("file field needs a filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
                file = Some((filename, bytes.to_vec()));
            }
            "grade" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(e.to_string()))?;
                grade = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| bad_request(format!("grade must be an integer, got {:?}", text)))?,
                );
            }
            "subject" => {
                subject = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?)
            }
            "chapter" => {
                chapter = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?)
            }
            other => return Err(bad_request(format!("unexpected field: {}", other))),
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("missing file field"))?;
    let grade = grade.ok_or_else(|| bad_request("missing grade field"))?;
    let subject = subject.ok_or_else(|| bad_request("missing subject field"))?;
    let chapter = chapter.ok_or_else(|| bad_request("missing chapter field"))?;

    state.coordinator.save_upload(&filename, &bytes)?;
    let job = state
        .coordinator
        .create_job(&filename, grade, &subject, &chapter)
        .await?;

    if query.sync {
        state.coordinator.start(&job.id).await?;
        let job = state.coordinator.get_job(&job.id).await?;
        return Ok((StatusCode::OK, Json(IngestResponse { job })));
    }

    // Fire-and-forget; the job row is the durable record of progress, and
    // the claim step keeps a concurrently running worker from doubling up.
    let coordinator = state.coordinator.clone();
    let job_id = job.id.clone();
    tokio::spawn(async move {
        if let Err(e) = coordinator.start(&job_id).await {
            error!(job_id = %job_id, error = %e, "background ingestion failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(IngestResponse { job })))
}

// ============ GET /jobs/{id} ============

async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IngestionJob>, AppError> {
    Ok(Json(state.coordinator.get_job(&id).await?))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    student_id: String,
    question: String,
    grade: i64,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn handle_ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Response, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let (conversation, rx) = state
        .streamer
        .stream_answer(
            &request.student_id,
            &request.question,
            request.grade,
            request.conversation_id.as_deref(),
        )
        .await?;

    let head = futures_util::stream::once(async move {
        format!("{}\n", serde_json::json!({ "conversation_id": conversation.id }))
    });
    let fragments = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event_line(event), rx))
    });
    let body = Body::from_stream(head.chain(fragments).map(Ok::<String, Infallible>));

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

fn event_line(event: AnswerEvent) -> String {
    let value = match event {
        AnswerEvent::Delta(delta) => serde_json::json!({ "delta": delta }),
        AnswerEvent::Error(message) => serde_json::json!({ "error": message }),
        AnswerEvent::Done => serde_json::json!({ "done": true }),
    };
    format!("{}\n", value)
}

// ============ GET /conversations ============

#[derive(Deserialize)]
struct ConversationsQuery {
    student_id: String,
}

async fn handle_list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationsQuery>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    Ok(Json(
        state.conversations.list_conversations(&query.student_id).await?,
    ))
}

// ============ GET /conversations/{id}/messages ============

async fn handle_list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    Ok(Json(state.conversations.list_messages(&id).await?))
}
