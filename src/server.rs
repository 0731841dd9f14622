//! HTTP ingestion boundary for forwarded slip notifications.
//!
//! The notifier delivers fire-and-forget, at-least-once and unordered; the
//! queue's dedup window is what makes redelivery safe. A single bad request
//! gets a structured error response and never takes the server down.

use crate::db::RecordFilter;
use crate::error::QueueError;
use crate::model::{LineError, ParsedLine, RawMessage, RecordStatus};
use crate::queue::PendingQueue;
use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<PendingQueue>,
    allowed_groups: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(queue: Arc<PendingQueue>, allowed_groups: Vec<String>) -> Self {
        Self {
            queue,
            allowed_groups: Arc::new(allowed_groups),
        }
    }

    fn group_allowed(&self, group: &str) -> bool {
        self.allowed_groups.is_empty() || self.allowed_groups.iter().any(|g| g == group)
    }
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub sender_name: String,
    #[serde(default)]
    pub sender_phone: Option<String>,
    pub group_name: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl IncomingMessage {
    fn into_raw(self) -> RawMessage {
        let received_at = self
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        RawMessage {
            sender_name: self.sender_name,
            sender_phone: self.sender_phone.unwrap_or_default(),
            group_name: self.group_name,
            body: self.message,
            received_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    fn staged(id: i64, errors: Vec<LineError>) -> Self {
        let errors = if errors.is_empty() {
            None
        } else {
            Some(
                errors
                    .iter()
                    .map(|e| format!("line {}: {} ({:?})", e.line_no, e.message, e.source))
                    .collect(),
            )
        };
        Self {
            success: true,
            id: Some(id),
            duplicate: None,
            errors,
            error: None,
        }
    }

    fn duplicate() -> Self {
        Self {
            success: true,
            id: None,
            duplicate: Some(true),
            errors: None,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            duplicate: None,
            errors: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    pending_count: i64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct PendingView {
    id: i64,
    sender_name: String,
    group_name: String,
    body: String,
    status: RecordStatus,
    total: i64,
    parsed: Vec<ParsedLine>,
    errors: Vec<LineError>,
}

#[derive(Debug, Serialize)]
struct PendingResponse {
    success: bool,
    count: usize,
    entries: Vec<PendingView>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/message", post(post_message))
        .route("/batch", post(post_batch))
        .route("/status", get(get_status))
        .route("/pending", get(get_pending))
        .route("/ping", post(post_ping))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "ingestion server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

async fn ingest_one(state: &AppState, incoming: IncomingMessage) -> (StatusCode, MessageResponse) {
    if !state.group_allowed(&incoming.group_name) {
        return (
            StatusCode::FORBIDDEN,
            MessageResponse::failed(format!(
                "group not in allowed list: {}",
                incoming.group_name
            )),
        );
    }

    let raw = incoming.into_raw();
    match state.queue.enqueue(&raw).await {
        Ok(enqueued) => (
            StatusCode::OK,
            MessageResponse::staged(enqueued.id, enqueued.errors),
        ),
        Err(QueueError::Duplicate) => (StatusCode::OK, MessageResponse::duplicate()),
        Err(err) => {
            warn!(?err, "failed to stage message");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                MessageResponse::failed(err.to_string()),
            )
        }
    }
}

async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<IncomingMessage>, JsonRejection>,
) -> impl IntoResponse {
    let incoming = match payload {
        Ok(Json(incoming)) => incoming,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(MessageResponse::failed(rejection.body_text())),
            )
        }
    };
    let (status, response) = ingest_one(&state, incoming).await;
    (status, Json(response))
}

async fn post_batch(
    State(state): State<AppState>,
    payload: Result<Json<Vec<serde_json::Value>>, JsonRejection>,
) -> impl IntoResponse {
    let batch = match payload {
        Ok(Json(batch)) => batch,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(vec![MessageResponse::failed(rejection.body_text())]),
            )
        }
    };

    // Items are independent; one bad entry never aborts the rest.
    let mut results = Vec::with_capacity(batch.len());
    for item in batch {
        match serde_json::from_value::<IncomingMessage>(item) {
            Ok(incoming) => {
                let (_, response) = ingest_one(&state, incoming).await;
                results.push(response);
            }
            Err(err) => results.push(MessageResponse::failed(err.to_string())),
        }
    }
    (StatusCode::OK, Json(results))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.pending_count().await {
        Ok(pending_count) => (
            StatusCode::OK,
            Json(StatusResponse {
                status: "running",
                pending_count,
                timestamp: Utc::now().to_rfc3339(),
            }),
        ),
        Err(err) => {
            warn!(?err, "failed to read pending count");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse {
                    status: "degraded",
                    pending_count: 0,
                    timestamp: Utc::now().to_rfc3339(),
                }),
            )
        }
    }
}

async fn get_pending(State(state): State<AppState>) -> impl IntoResponse {
    let filter = RecordFilter::with_status(RecordStatus::Pending);
    match state.queue.list(&filter).await {
        Ok(records) => {
            let entries: Vec<PendingView> = records
                .into_iter()
                .map(|r| PendingView {
                    id: r.id,
                    sender_name: r.sender_name.clone(),
                    group_name: r.group_name.clone(),
                    body: r.body.clone(),
                    status: r.status,
                    total: r.total,
                    parsed: r.parsed_lines(),
                    errors: r.line_errors(),
                })
                .collect();
            (
                StatusCode::OK,
                Json(PendingResponse {
                    success: true,
                    count: entries.len(),
                    entries,
                }),
            )
        }
        Err(err) => {
            warn!(?err, "failed to list pending records");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PendingResponse {
                    success: false,
                    count: 0,
                    entries: Vec::new(),
                }),
            )
        }
    }
}

async fn post_ping() -> impl IntoResponse {
    Json(serde_json::json!({ "success": true }))
}
