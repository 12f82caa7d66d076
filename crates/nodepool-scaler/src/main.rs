//! Nodepool Scaler - node-pool scaling service for Hetzner Cloud
//!
//! This is the main entry point for the scaler service.
//! It exposes the pool scaling operations over HTTP for out-of-process
//! autoscalers.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//!
//! ## Pool Management
//! - `GET /v1/pools` - List pools with their sizes
//! - `GET /v1/pools/:pool` - Get one pool
//! - `POST /v1/pools/:pool/grow` - Add instances
//! - `POST /v1/pools/:pool/shrink` - Remove named nodes
//! - `POST /v1/pools/:pool/decrease-target` - Retract unfulfilled growth
//! - `GET /v1/pools/:pool/instances` - List the pool's instances
//! - `GET /v1/pools/:pool/template` - Simulated node for a new instance

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nodepool_core::PoolId;
use nodepool_provider::{HcloudClient, HcloudConfig};
use nodepool_scaler::{ClusterConfig, NodeRef, PoolScaler, ScalerConfig, ScalerError};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    scaler: Arc<PoolScaler>,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "nodepool-scaler",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.scaler.directory().list().await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Provider not reachable");
            (StatusCode::SERVICE_UNAVAILABLE, "provider unavailable")
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

fn error_response(e: &ScalerError) -> Response {
    let code = e.http_status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(e.to_string(), code)),
    )
        .into_response()
}

fn parse_pool(raw: &str) -> Result<PoolId, Response> {
    PoolId::new(raw).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!("Invalid pool ID: {e}"), 400)),
        )
            .into_response()
    })
}

// ============================================================================
// Pool Endpoints
// ============================================================================

/// Summary of one pool.
#[derive(Debug, Serialize)]
struct PoolResponse {
    id: String,
    min_size: usize,
    max_size: usize,
    target_size: usize,
    instance_type: String,
    region: String,
}

fn pool_response(scaler: &PoolScaler, id: &PoolId) -> Result<PoolResponse, ScalerError> {
    let pool = scaler.registry().get(id)?;
    let spec = pool.spec();
    Ok(PoolResponse {
        id: spec.id.to_string(),
        min_size: spec.min_size,
        max_size: spec.max_size,
        target_size: pool.target_size(),
        instance_type: spec.instance_type.clone(),
        region: spec.region.clone(),
    })
}

/// List all pools.
///
/// GET /v1/pools
async fn list_pools_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pools: Result<Vec<_>, _> = state
        .scaler
        .registry()
        .ids()
        .iter()
        .map(|id| pool_response(&state.scaler, id))
        .collect();

    match pools {
        Ok(pools) => Json(pools).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Get one pool.
///
/// GET /v1/pools/:pool
async fn get_pool_handler(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> impl IntoResponse {
    let pool = match parse_pool(&pool) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match pool_response(&state.scaler, &pool) {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Request body for grow and decrease-target.
#[derive(Debug, Deserialize)]
struct DeltaRequest {
    delta: i64,
}

/// Add instances to a pool.
///
/// POST /v1/pools/:pool/grow
async fn grow_handler(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(req): Json<DeltaRequest>,
) -> impl IntoResponse {
    let pool = match parse_pool(&pool) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.scaler.grow(&pool, req.delta).await {
        Ok(()) => {
            tracing::info!(pool = %pool, delta = req.delta, "Grew pool via HTTP API");
            match pool_response(&state.scaler, &pool) {
                Ok(body) => Json(body).into_response(),
                Err(e) => error_response(&e),
            }
        }
        Err(e) => {
            tracing::error!(pool = %pool, delta = req.delta, error = %e, "Failed to grow pool");
            error_response(&e)
        }
    }
}

/// Request body for shrink.
#[derive(Debug, Deserialize)]
struct ShrinkRequest {
    nodes: Vec<NodeRef>,
}

/// Remove nodes from a pool.
///
/// POST /v1/pools/:pool/shrink
async fn shrink_handler(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(req): Json<ShrinkRequest>,
) -> impl IntoResponse {
    let pool = match parse_pool(&pool) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.scaler.shrink(&pool, &req.nodes).await {
        Ok(()) => {
            tracing::info!(pool = %pool, nodes = req.nodes.len(), "Shrank pool via HTTP API");
            match pool_response(&state.scaler, &pool) {
                Ok(body) => Json(body).into_response(),
                Err(e) => error_response(&e),
            }
        }
        Err(e) => {
            tracing::error!(pool = %pool, error = %e, "Failed to shrink pool");
            error_response(&e)
        }
    }
}

/// Lower a pool's target size without touching instances.
///
/// POST /v1/pools/:pool/decrease-target
async fn decrease_target_handler(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(req): Json<DeltaRequest>,
) -> impl IntoResponse {
    let pool = match parse_pool(&pool) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let result = state
        .scaler
        .decrease_target_size(&pool, req.delta)
        .and_then(|()| pool_response(&state.scaler, &pool));

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(&e),
    }
}

/// List a pool's instances.
///
/// GET /v1/pools/:pool/instances
async fn instances_handler(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> impl IntoResponse {
    let pool = match parse_pool(&pool) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.scaler.list_instances(&pool).await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Get the simulated node for a new instance of a pool.
///
/// GET /v1/pools/:pool/template
async fn template_handler(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> impl IntoResponse {
    let pool = match parse_pool(&pool) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.scaler.build_simulated_node(&pool).await {
        Ok(node) => Json(node).into_response(),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Pool management
        .route("/v1/pools", get(list_pools_handler))
        .route("/v1/pools/:pool", get(get_pool_handler))
        .route("/v1/pools/:pool/grow", post(grow_handler))
        .route("/v1/pools/:pool/shrink", post(shrink_handler))
        .route("/v1/pools/:pool/decrease-target", post(decrease_target_handler))
        .route("/v1/pools/:pool/instances", get(instances_handler))
        .route("/v1/pools/:pool/template", get(template_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nodepool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Nodepool Scaler");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let hcloud_config = HcloudConfig::from_env()?;
    let config = ScalerConfig::from_env()?;
    let cluster = ClusterConfig::from_env()?;

    tracing::info!(
        endpoint = %hcloud_config.endpoint,
        image = %config.image,
        lock_scope = ?config.lock_scope,
        pools = cluster.pools.len(),
        "Loaded scaler configuration"
    );

    let client = HcloudClient::new(hcloud_config)?;
    let scaler = Arc::new(PoolScaler::new(Arc::new(client), cluster, config)?);

    // Start from the provider's current counts
    scaler.refresh_target_sizes().await?;
    for id in scaler.registry().ids() {
        if let Ok(line) = scaler.debug(&id) {
            tracing::info!(pool = %id, size = scaler.current_size(&id)?, "{line}");
        }
    }

    // Create app state
    let state = AppState { scaler };

    // Create router
    let app = create_router(state);

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
