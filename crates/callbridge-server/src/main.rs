//! Call relay server binary.
//!
//! Starts an axum HTTP server with structured logging, the telephony stream
//! endpoint, the session reaper, and graceful shutdown on SIGTERM/SIGINT.

use callbridge_server::evaluation::EvaluationClient;
use callbridge_server::{app, background, config, AppState};
use callbridge_voice::GeminiLiveProvider;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if !config.speech.has_credential() {
        tracing::warn!("GEMINI_API_KEY is not set; every call will fail to open a speech session");
    }
    tracing::info!(
        model = %config.speech.model,
        voice = %config.speech.voice,
        "configured speech provider"
    );
    let provider = Arc::new(GeminiLiveProvider::new(config.speech.clone()));

    let evaluation = match config.evaluation.base_url.as_deref() {
        Some(base_url) => match EvaluationClient::new(base_url, config.evaluation.timeout()) {
            Ok(client) => {
                tracing::info!(endpoint = client.endpoint(), "transcript submission enabled");
                Some(client)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to build evaluation client; transcript submission disabled");
                None
            }
        },
        None => {
            tracing::warn!("LITMUS_API_URL is not set; transcript submission disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(provider, evaluation));

    tokio::spawn(background::start_session_reaper(
        state.clone(),
        config.sessions,
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting callbridge server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("callbridge server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
