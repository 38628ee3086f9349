use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;

use crate::config::Config;
use crate::error::{ChaiRelayError, Result};
use crate::providers::openai::OpenAiEngine;
use crate::providers::persona::PreamblePersonaProvider;
use crate::providers::sqlite::SqliteConversationStore;
use crate::services::relay::{RelaySettings, StreamRelay};
use crate::services::transport::channel_transport;

/// Fragments buffered between the relay and the response body.
const BODY_CHANNEL_CAPACITY: usize = 1;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StreamRelay>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    git_sha: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/generate-message/{chat_id}/{message_id}",
            get(generate_message),
        )
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: crate::GIT_SHA.to_string(),
    })
}

fn empty_response(status: StatusCode) -> Response {
    (status, Body::empty()).into_response()
}

async fn generate_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> Response {
    let session = match state.relay.prepare(&chat_id, &message_id).await {
        Ok(session) => session,
        Err(ChaiRelayError::NotFound(what)) => {
            tracing::warn!(chat_id = %chat_id, message_id = %message_id, "Generation target missing: {}", what);
            return empty_response(StatusCode::NOT_FOUND);
        }
        Err(ChaiRelayError::Conflict(reason)) => {
            tracing::warn!(chat_id = %chat_id, message_id = %message_id, "Rejected duplicate generation: {}", reason);
            return empty_response(StatusCode::CONFLICT);
        }
        Err(err) => {
            tracing::error!(chat_id = %chat_id, message_id = %message_id, "Generation setup failed: {}", err);
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let (transport, body) = channel_transport(BODY_CHANNEL_CAPACITY);
    let relay = Arc::clone(&state.relay);
    // Detached so a client disconnect cannot cancel the terminal write.
    tokio::spawn(async move {
        relay.run(session, transport).await;
    });

    match Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; charset=utf-8")
        .header("cache-control", "no-cache")
        .body(body)
    {
        Ok(response) => response,
        Err(err) => {
            tracing::error!("Failed to build streaming response: {}", err);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Wires the SQLite store, persona provider and model engine from `config`.
pub async fn build_state(config: &Config) -> Result<AppState> {
    config.validate()?;

    let store = SqliteConversationStore::new(config.sqlite_path()).await?;
    let engine = OpenAiEngine::from_config(&config.openai);
    tracing::info!(
        model = %config.openai.model(),
        base_url = %config.openai.base_url(),
        history_limit = config.generation.history_limit(),
        "Generation engine configured"
    );

    let relay = StreamRelay::new(
        Arc::new(store),
        Arc::new(PreamblePersonaProvider),
        Arc::new(engine),
        RelaySettings::from_config(config),
    );
    Ok(AppState {
        relay: Arc::new(relay),
    })
}

pub async fn run(config: Config) -> Result<()> {
    run_with_shutdown(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Unable to listen for shutdown signal: {}", err);
            futures::future::pending::<()>().await;
        }
    })
    .await
}

pub async fn run_with_shutdown<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = build_state(&config).await?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host(), config.server.port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ChaiRelayError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "chai-relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ChaiRelayError::Runtime(e.to_string()))?;

    tracing::info!("chai-relay stopped");
    Ok(())
}
