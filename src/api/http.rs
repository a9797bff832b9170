//! HTTP API Server
//!
//! REST API exposing lock records with compare-and-swap semantics, so
//! replicas on different hosts can elect a leader through one shared store.

use std::sync::Arc;
use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::lock::http::{ErrorResponse, LeaseEntry, UpdateRequest, VersionResponse};
use crate::lock::{LeaseBackend, LeaseKey, LeaseRecord};

/// Shared application state
pub struct AppState {
    /// Backend holding the records
    pub backend: Arc<dyn LeaseBackend>,
    /// Bearer token clients must present, if any
    pub auth_token: Option<String>,
}

/// HTTP coordination server
pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ServerConfig, backend: Arc<dyn LeaseBackend>) -> Self {
        let state = Arc::new(AppState {
            backend,
            auth_token: config.auth_token.clone(),
        });

        Self { config, state }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/leases", get(handle_list))
            .route(
                "/leases/:namespace/:name",
                get(handle_get).post(handle_create).put(handle_update),
            )
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("Coordination API listening on {}", self.config.bind_address);
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let app = Self::create_router(Arc::clone(&self.state));

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        tracing::info!("Coordination API stopped");
        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub leases: usize,
}

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Conflict => error_response(StatusCode::CONFLICT, "conflict", self.to_string()),
            Error::NotFound => error_response(StatusCode::NOT_FOUND, "not_found", self.to_string()),
            Error::StoreMalformedRecord(ref reason) => {
                error_response(StatusCode::UNPROCESSABLE_ENTITY, "malformed", reason.clone())
            }
            Error::StoreUnavailable(_) | Error::StoreAuthFailure(_) | Error::Io(_) => {
                tracing::warn!("Backend unavailable: {}", self);
                error_response(StatusCode::SERVICE_UNAVAILABLE, "unavailable", self.to_string())
            }
            other => {
                tracing::error!("Internal error: {}", other);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string())
            }
        }
    }
}

/// Reject requests without the configured bearer token
fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
        ))
    }
}

fn lease_key(namespace: String, name: String) -> std::result::Result<LeaseKey, Response> {
    let key = LeaseKey::new(namespace, name);
    if key.is_valid() {
        Ok(key)
    } else {
        Err(error_response(
            StatusCode::BAD_REQUEST,
            "bad_key",
            "namespace and name are required",
        ))
    }
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    match state.backend.list().await {
        Ok(leases) => Json(HealthResponse {
            healthy: true,
            leases: leases.len(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    match state.backend.list().await {
        Ok(leases) => {
            let entries: Vec<LeaseEntry> = leases
                .into_iter()
                .map(|(key, versioned)| LeaseEntry {
                    namespace: key.namespace,
                    name: key.name,
                    record: versioned.record,
                    version: versioned.version,
                })
                .collect();
            Json(entries).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let key = match lease_key(namespace, name) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };

    match state.backend.get(&key).await {
        Ok(Some(versioned)) => Json(versioned).into_response(),
        Ok(None) => Error::NotFound.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_create(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(record): Json<LeaseRecord>,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let key = match lease_key(namespace, name) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };

    match state.backend.create(&key, &record).await {
        Ok(version) => {
            tracing::info!("Lease {} created by {:?}", key, record.holder_identity);
            (StatusCode::CREATED, Json(VersionResponse { version })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn handle_update(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<UpdateRequest>,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let key = match lease_key(namespace, name) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };

    match state.backend.update(&key, &req.record, &req.version).await {
        Ok(version) => {
            tracing::debug!(
                "Lease {} written by {:?} at version {}",
                key,
                req.record.holder_identity,
                version
            );
            Json(VersionResponse { version }).into_response()
        }
        Err(e) => e.into_response(),
    }
}
