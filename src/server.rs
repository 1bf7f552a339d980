use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::alerts::{AlertDispatcher, DispatchOutcome};
use crate::models::SignalChange;
use crate::pipeline::{forward_changes, run_cycle};
use crate::store::SignalStore;

pub struct AppState {
    pub store: Arc<dyn SignalStore>,
    pub dispatcher: AlertDispatcher,
    pub webhook_secret: String,
}

/// A bare change record, or one wrapped in a database-webhook envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AlertPayload {
    Envelope { record: SignalChange },
    Bare(SignalChange),
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/alerts", post(submit_alert))
        .route("/evaluate", post(evaluate))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Domino signal watch listening on {bind_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), Response> {
    match bearer_token(headers) {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        _ => Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized")),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn parse_change(body: &[u8]) -> Result<SignalChange, String> {
    let payload: AlertPayload =
        serde_json::from_slice(body).map_err(|err| format!("invalid change record: {err}"))?;
    let change = match payload {
        AlertPayload::Envelope { record } => record,
        AlertPayload::Bare(change) => change,
    };
    if change.signal_name.trim().is_empty() {
        return Err("signal_name must not be empty".to_string());
    }
    if change.old_status.trim().is_empty() || change.new_status.trim().is_empty() {
        return Err("old_status and new_status must not be empty".to_string());
    }
    Ok(change)
}

async fn submit_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = authorize(&headers, &state.webhook_secret) {
        return rejection;
    }
    let change = match parse_change(&body) {
        Ok(change) => change,
        Err(message) => {
            warn!(%message, "Rejected alert payload");
            return error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    let outcome: DispatchOutcome = state.dispatcher.submit(change).await;
    let status = if outcome.is_delivered() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(outcome)).into_response()
}

async fn evaluate(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&headers, &state.webhook_secret) {
        return rejection;
    }
    let report = match run_cycle(state.store.as_ref()).await {
        Ok(report) => report,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "Evaluation cycle failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{err:#}"));
        }
    };
    let alerts = forward_changes(&state.dispatcher, &report.changes).await;
    Json(json!({ "report": report, "alerts": alerts })).into_response()
}
