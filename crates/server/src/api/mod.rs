//! HTTP surface: cloud, orchestrator and service catalog routes plus the
//! health and metrics probes

mod auth;
mod aws;
mod catalog;
mod k8s;

pub use auth::{Caller, GROUPS_HEADER, USER_HEADER};

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dash_lib::{
    catalog::ManifestStorage,
    health::components,
    Account, ClientRegistry, Cluster, ClusterController, DashError, HealthAggregator,
    HealthRegistry, HealthStatus, InstanceController, ServiceCatalog, ServiceResolver,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub instances: InstanceController,
    pub clusters: ClusterController,
    pub catalog: Arc<ServiceCatalog>,
    pub resolver: Arc<ServiceResolver>,
    pub health: HealthAggregator,
    pub health_registry: HealthRegistry,
    pub allow_anonymous: bool,
}

impl AppState {
    pub fn new(
        accounts: Vec<Account>,
        clusters: Vec<Cluster>,
        registry: Arc<ClientRegistry>,
        storage: Arc<dyn ManifestStorage>,
        health_registry: HealthRegistry,
        allow_anonymous: bool,
    ) -> Self {
        let catalog = Arc::new(ServiceCatalog::new(storage));
        let resolver = Arc::new(ServiceResolver::new(catalog.clone()));
        Self {
            instances: InstanceController::new(accounts, registry.clone()),
            clusters: ClusterController::new(clusters.clone(), registry.clone())
                .with_resolver(resolver.clone()),
            health: HealthAggregator::new(catalog.clone(), registry, clusters),
            catalog,
            resolver,
            health_registry,
            allow_anonymous,
        }
    }
}

/// Error body `{"error": "..."}` with the status derived from the error kind
#[derive(Debug)]
pub struct ApiError(pub DashError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            DashError::InvalidArgument(_) | DashError::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
            DashError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DashError::NotFound(_) => StatusCode::NOT_FOUND,
            DashError::Conflict(_) => StatusCode::CONFLICT,
            DashError::Transient(_) | DashError::Fatal(_) | DashError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DashError> for ApiError {
    fn from(e: DashError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DashError::invalid(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(DashError::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind().as_str(), error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Envelope for write operations
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
    pub operation: String,
    pub resource: String,
}

impl OperationResponse {
    pub fn ok(operation: &str, resource: impl Into<String>, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            operation: operation.to_string(),
            resource: resource.into(),
        })
    }
}

/// Parse an optional numeric query parameter
pub(crate) fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&str>) -> ApiResult<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError(DashError::invalid(format!("{} must be a non-negative integer", name)))),
        None => Ok(None),
    }
}

/// Health check response - returns 200 unless a component is critical
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (status_code, Json(health))
}

/// Readiness check response - re-probes the catalog store on every call
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.catalog.probe().await {
        Ok(()) => state.health_registry.set_healthy(components::CATALOG).await,
        Err(e) => {
            state
                .health_registry
                .set_critical(components::CATALOG, e.to_string())
                .await
        }
    }
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError(DashError::fatal(format!("failed to encode metrics: {}", e))).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .nest("/aws", aws::routes())
        .nest("/k8s", k8s::routes())
        .nest("/service-catalog", catalog::routes())
        .with_state(state)
}

/// Start the API server; returns once `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
