// Webhook HTTP boundary.
// The caller only ever sees synchronous validation, signature, and
// duplicate outcomes; orchestration downstream is asynchronous.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dedup::{DedupGate, DedupOutcome};
use crate::payload::SignalPayload;
use crate::signature::verify_signature;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<DedupGate>,
    pub webhook_secret: Arc<String>,
}

/// Build the intake router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook/signal", post(handle_signal))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Signature first: an unsigned or mis-signed request never reaches dedup
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&state.webhook_secret, &body, signature) {
        warn!("webhook rejected: invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "INVALID_SIGNATURE" })),
        );
    }

    let payload: SignalPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "webhook rejected: malformed payload");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "status": "MALFORMED", "error": e.to_string() })),
            );
        }
    };

    let validated = match payload.validate() {
        Ok(validated) => validated,
        Err(e) => {
            warn!(error = %e, "webhook rejected: invalid payload");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "status": "INVALID", "error": e.to_string() })),
            );
        }
    };

    match state.gate.admit(&validated).await {
        Ok(DedupOutcome::Created { signal_id }) => (
            StatusCode::CREATED,
            Json(json!({
                "status": "ACCEPTED",
                "signal_id": signal_id,
                "symbol": validated.symbol,
            })),
        ),
        Ok(DedupOutcome::Duplicate { signal_id }) => {
            info!(%signal_id, "duplicate webhook ignored");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "DUPLICATE",
                    "signal_id": signal_id,
                })),
            )
        }
        Err(e) => {
            warn!(error = %e, "failed to admit signal");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "ERROR" })),
            )
        }
    }
}
