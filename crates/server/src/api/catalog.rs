//! Service catalog routes under `/service-catalog`

use super::{ApiResult, AppState, Caller, OperationResponse};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dash_lib::catalog::ResolveQuery;
use dash_lib::health::ServiceHealth;
use dash_lib::{DeploymentRef, ServiceContext, ServiceManifest};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/:name",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route("/services/:name/health", get(service_health))
        .route("/services/:name/deployments", get(service_deployments))
        .route("/resolve", get(resolve))
}

#[derive(Debug, Serialize)]
pub struct ServiceList {
    pub services: Vec<ServiceManifest>,
    pub total: usize,
}

async fn list_services(State(state): State<Arc<AppState>>, caller: Caller) -> ApiResult<Json<ServiceList>> {
    let services = state.catalog.list(&caller.ctx).await?;
    Ok(Json(ServiceList {
        total: services.len(),
        services,
    }))
}

async fn create_service(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    body: Result<Json<ServiceManifest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(manifest) = body?;
    let created = state.catalog.create(&caller.ctx, manifest).await?;
    let location = format!("/service-catalog/services/{}", created.metadata.name);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(created)).into_response())
}

async fn get_service(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<ServiceManifest>> {
    Ok(Json(state.catalog.get(&caller.ctx, &name).await?))
}

async fn update_service(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
    body: Result<Json<ServiceManifest>, JsonRejection>,
) -> ApiResult<Json<ServiceManifest>> {
    let Json(manifest) = body?;
    Ok(Json(state.catalog.update(&caller.ctx, &name, manifest).await?))
}

async fn delete_service(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<OperationResponse>> {
    state.catalog.delete(&caller.ctx, &name).await?;
    Ok(OperationResponse::ok(
        "delete",
        format!("services/{}", name),
        format!("service {} deleted", name),
    ))
}

async fn service_health(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<ServiceHealth>> {
    Ok(Json(state.health.service_health(&caller.ctx, &name).await?))
}

async fn service_deployments(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<DeploymentRef>>> {
    Ok(Json(state.resolver.deployments_of(&caller.ctx, &name).await?))
}

async fn resolve(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    query: Result<Query<ResolveQuery>, QueryRejection>,
) -> ApiResult<Json<ServiceContext>> {
    let Query(query) = query?;
    Ok(Json(state.resolver.resolve(&caller.ctx, &query).await?))
}
