//! HTTP transport for webhook deliveries
//!
//! A deliberately thin adapter: it reads the raw body and signature header,
//! hands them to the sync engine on a blocking task, and maps the engine's
//! rejections to HTTP status codes. Everything interesting happens in
//! [`crate::sync`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;

use crate::error::CapstanError;
use crate::sync::{SyncEngine, WebhookDelivery};

/// Signature headers checked in order; the first present one wins.
const SIGNATURE_HEADERS: &[&str] = &["x-hub-signature", "x-hub-signature-256"];

/// Build the webhook router around a shared engine.
pub fn router(engine: Arc<SyncEngine>) -> Router {
    Router::new().route("/", post(sync)).with_state(engine)
}

/// Bind and serve until the process is stopped.
pub async fn serve(engine: Arc<SyncEngine>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening for webhook deliveries");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

async fn sync(
    State(engine): State<Arc<SyncEngine>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let Ok(body) = body else {
        let e = CapstanError::UnreadableInput;
        return (status_for(&e), e.to_string()).into_response();
    };

    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let delivery = WebhookDelivery::new(body.to_vec(), signature);

    // The engine is synchronous end to end; keep it off the async workers.
    match tokio::task::spawn_blocking(move || engine.run(&delivery)).await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(e)) => (status_for(&e), e.to_string()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("sync task failed: {e}"),
        )
            .into_response(),
    }
}

fn status_for(error: &CapstanError) -> StatusCode {
    match error {
        CapstanError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
        CapstanError::UnreadableInput | CapstanError::UndecodableData => StatusCode::BAD_REQUEST,
        CapstanError::HookAborted { .. } | CapstanError::HookFailed { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
