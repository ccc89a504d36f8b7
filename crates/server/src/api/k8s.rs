//! Orchestrator routes under `/k8s`

use super::{parse_number, ApiError, ApiResult, AppState, Caller, OperationResponse};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dash_lib::cluster::{ClusterDetail, ClusterInfo, DeploymentView};
use dash_lib::health::ClusterHealth;
use dash_lib::lifecycle::{Page, WorkloadQuery};
use dash_lib::provider::{LogOptions, LogSince};
use dash_lib::{DashError, Namespace, Node, Pod};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/clusters", get(list_clusters))
        .route("/clusters/:context", get(cluster_detail))
        .route("/clusters/:context/health", get(cluster_health))
        .route("/clusters/:context/nodes", get(list_nodes))
        .route("/clusters/:context/nodes/:name", get(get_node))
        .route(
            "/clusters/:context/namespaces",
            get(list_namespaces).post(create_namespace),
        )
        .route(
            "/clusters/:context/namespaces/:namespace",
            get(get_namespace).delete(delete_namespace),
        )
        .route("/clusters/:context/deployments", get(list_deployments))
        .route(
            "/clusters/:context/namespaces/:namespace/deployments/:name",
            get(get_deployment),
        )
        .route(
            "/clusters/:context/namespaces/:namespace/deployments/:name/scale",
            put(scale_deployment),
        )
        .route(
            "/clusters/:context/namespaces/:namespace/deployments/:name/restart",
            post(restart_deployment),
        )
        .route("/clusters/:context/pods", get(list_pods))
        .route(
            "/clusters/:context/namespaces/:namespace/pods/:name",
            get(get_pod).delete(delete_pod),
        )
        .route(
            "/clusters/:context/namespaces/:namespace/pods/:name/logs",
            get(pod_logs),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub replicas: i32,
}

fn workload_query(raw: &HashMap<String, String>) -> ApiResult<WorkloadQuery> {
    Ok(WorkloadQuery {
        namespace: raw.get("namespace").cloned(),
        search: raw.get("search").cloned(),
        limit: parse_number("limit", raw.get("limit").map(String::as_str))?,
        offset: parse_number("offset", raw.get("offset").map(String::as_str))?,
    })
}

fn log_since(raw: &HashMap<String, String>) -> ApiResult<Option<LogSince>> {
    let seconds: Option<i64> = parse_number("sinceSeconds", raw.get("sinceSeconds").map(String::as_str))?;
    let time = raw.get("sinceTime").map(|v| v.trim()).filter(|v| !v.is_empty());
    match (seconds, time) {
        (Some(_), Some(_)) => Err(ApiError(DashError::invalid(
            "sinceSeconds and sinceTime are mutually exclusive",
        ))),
        (Some(secs), None) if secs <= 0 => Err(ApiError(DashError::invalid(
            "sinceSeconds must be a positive integer",
        ))),
        (Some(secs), None) => Ok(Some(LogSince::Seconds(secs))),
        (None, Some(time)) => DateTime::parse_from_rfc3339(time)
            .map(|t| Some(LogSince::Time(t.with_timezone(&Utc))))
            .map_err(|_| ApiError(DashError::invalid("sinceTime must be an RFC 3339 timestamp"))),
        (None, None) => Ok(None),
    }
}

fn log_options(raw: &HashMap<String, String>) -> ApiResult<LogOptions> {
    let flag = |name: &str| raw.get(name).is_some_and(|v| v == "true" || v == "1");
    Ok(LogOptions {
        container: raw.get("container").filter(|c| !c.is_empty()).cloned(),
        follow: flag("follow"),
        previous: flag("previous"),
        tail_lines: parse_number("tailLines", raw.get("tailLines").map(String::as_str))?,
        since: log_since(raw)?,
        timestamps: flag("timestamps"),
    })
}

async fn list_clusters(State(state): State<Arc<AppState>>, _caller: Caller) -> Json<Vec<ClusterInfo>> {
    Json(state.clusters.clusters())
}

async fn cluster_detail(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
) -> ApiResult<Json<ClusterDetail>> {
    Ok(Json(state.clusters.cluster_detail(&caller.ctx, &context).await?))
}

async fn cluster_health(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
) -> ApiResult<Json<ClusterHealth>> {
    Ok(Json(state.clusters.cluster_health(&caller.ctx, &context).await?))
}

async fn list_nodes(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.clusters.nodes(&caller.ctx, &context).await?))
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, name)): Path<(String, String)>,
) -> ApiResult<Json<Node>> {
    Ok(Json(state.clusters.node(&caller.ctx, &context, &name).await?))
}

async fn list_namespaces(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
) -> ApiResult<Json<Vec<Namespace>>> {
    Ok(Json(state.clusters.namespaces(&caller.ctx, &context).await?))
}

async fn get_namespace(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace)): Path<(String, String)>,
) -> ApiResult<Json<Namespace>> {
    Ok(Json(
        state
            .clusters
            .namespace(&caller.ctx, &context, &namespace)
            .await?,
    ))
}

async fn create_namespace(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
    body: Result<Json<CreateNamespaceRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = body?;
    let namespace = state
        .clusters
        .create_namespace(&caller.ctx, &context, &request.name, request.labels)
        .await?;
    let location = format!("/k8s/clusters/{}/namespaces/{}", context, namespace.name);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(namespace),
    )
        .into_response())
}

async fn delete_namespace(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace)): Path<(String, String)>,
) -> ApiResult<Json<OperationResponse>> {
    state
        .clusters
        .delete_namespace(&caller.ctx, &context, &namespace)
        .await?;
    Ok(OperationResponse::ok(
        "delete",
        format!("{}/namespaces/{}", context, namespace),
        format!("namespace {} deleted", namespace),
    ))
}

async fn list_deployments(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<DeploymentView>>> {
    let query = workload_query(&raw)?;
    Ok(Json(
        state
            .clusters
            .deployments(&caller.ctx, &context, &query)
            .await?,
    ))
}

async fn get_deployment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Json<DeploymentView>> {
    Ok(Json(
        state
            .clusters
            .deployment(&caller.ctx, &context, &namespace, &name)
            .await?,
    ))
}

async fn scale_deployment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace, name)): Path<(String, String, String)>,
    body: Result<Json<ScaleRequest>, JsonRejection>,
) -> ApiResult<Json<OperationResponse>> {
    let Json(request) = body?;
    let op = state
        .clusters
        .scale(&caller.ctx, &context, &namespace, &name, request.replicas)
        .await?;
    Ok(OperationResponse::ok(
        &op.operation,
        format!("{}/{}/{}", context, namespace, name),
        op.message,
    ))
}

async fn restart_deployment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Json<OperationResponse>> {
    let op = state
        .clusters
        .restart(&caller.ctx, &context, &namespace, &name)
        .await?;
    Ok(OperationResponse::ok(
        &op.operation,
        format!("{}/{}/{}", context, namespace, name),
        op.message,
    ))
}

async fn list_pods(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(context): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<Pod>>> {
    let query = workload_query(&raw)?;
    Ok(Json(state.clusters.pods(&caller.ctx, &context, &query).await?))
}

async fn get_pod(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Pod>> {
    Ok(Json(
        state
            .clusters
            .pod(&caller.ctx, &context, &namespace, &name)
            .await?,
    ))
}

async fn delete_pod(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Json<OperationResponse>> {
    let op = state
        .clusters
        .delete_pod(&caller.ctx, &context, &namespace, &name)
        .await?;
    Ok(OperationResponse::ok(
        &op.operation,
        format!("{}/{}/{}", context, namespace, name),
        op.message,
    ))
}

/// Streams the log body as it arrives from the orchestrator
async fn pod_logs(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((context, namespace, name)): Path<(String, String, String)>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let options = log_options(&raw)?;
    let stream = state
        .clusters
        .pod_logs(&caller.ctx, &context, &namespace, &name, &options)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_log_options() {
        let options = log_options(&raw(&[("container", "app"), ("tailLines", "50"), ("follow", "true")])).unwrap();
        assert_eq!(options.container.as_deref(), Some("app"));
        assert_eq!(options.tail_lines, Some(50));
        assert!(options.follow);
        assert!(!options.previous);
        assert_eq!(options.since, None);
    }

    #[test]
    fn test_log_since_seconds() {
        let options = log_options(&raw(&[("sinceSeconds", "600")])).unwrap();
        assert_eq!(options.since, Some(LogSince::Seconds(600)));
        assert!(log_options(&raw(&[("sinceSeconds", "0")])).is_err());
        assert!(log_options(&raw(&[("sinceSeconds", "soon")])).is_err());
    }

    #[test]
    fn test_log_since_time() {
        let options = log_options(&raw(&[("sinceTime", "2024-05-01T12:00:00Z")])).unwrap();
        let expected = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(options.since, Some(LogSince::Time(expected)));

        assert!(log_options(&raw(&[("sinceTime", "yesterday")])).is_err());
        assert!(log_options(&raw(&[("sinceTime", "2024-05-01T12:00:00Z"), ("sinceSeconds", "60")])).is_err());
    }

    #[test]
    fn test_workload_query_rejects_bad_offset() {
        assert!(workload_query(&raw(&[("offset", "-1")])).is_err());
        let query = workload_query(&raw(&[("namespace", "auth"), ("limit", "5")])).unwrap();
        assert_eq!(query.namespace.as_deref(), Some("auth"));
        assert_eq!(query.limit, Some(5));
    }
}
