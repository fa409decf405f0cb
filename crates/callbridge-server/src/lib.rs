//! Call relay server library logic.
//!
//! Bridges telephony audio streams to a realtime speech AI that plays an
//! agent persona, records both sides of the conversation, and hands the
//! transcript to an evaluation service when the call ends.

pub mod background;
pub mod config;
pub mod envelope;
pub mod evaluation;
pub mod registry;
pub mod stream;

use axum::{routing::get, Extension, Json, Router};
use callbridge_voice::SpeechProvider;
use evaluation::EvaluationClient;
use registry::{SessionInfo, SessionRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Active call sessions.
    pub registry: SessionRegistry,
    /// Transcript submission target. `None` disables submission.
    pub evaluation: Option<Arc<EvaluationClient>>,
}

impl AppState {
    pub fn new(provider: Arc<dyn SpeechProvider>, evaluation: Option<EvaluationClient>) -> Self {
        Self {
            registry: SessionRegistry::new(provider),
            evaluation: evaluation.map(Arc::new),
        }
    }
}

/// Health check handler.
///
/// Reports process liveness regardless of active sessions.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_sessions(Extension(state): Extension<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list())
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(stream::ws_handler))
        .route("/api/sessions", get(list_sessions))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
