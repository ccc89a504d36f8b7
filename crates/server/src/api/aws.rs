//! Cloud account and instance routes under `/aws`

use super::{parse_number, ApiResult, AppState, Caller};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use dash_lib::lifecycle::{
    AccountInfo, AccountSummary, BatchOperationResult, InstancePage, InstanceQuery, MetricsWindow,
    TagFilter, VerifyResult,
};
use dash_lib::{
    Ec2Permissions, Instance, InstanceMetrics, InstanceOperation, InstanceTypeInfo, Region,
    StateName,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const TAG_PREFIX: &str = "tag.";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/:account/permissions", get(permissions))
        .route("/:account/ec2/instances", get(list_instances))
        .route("/:account/ec2/instance/start/:id", post(start_instance))
        .route("/:account/ec2/instance/stop/:id", post(stop_instance))
        .route("/:account/ec2/instance/restart/:id", post(restart_instance))
        .route("/:account/regions", get(regions))
        .route("/:account/regions/:region/instances/batch", post(batch))
        .route("/:account/regions/:region/instances/:id", get(get_instance))
        .route("/:account/regions/:region/instances/:id/metrics", get(instance_metrics))
        .route("/:account/instance-types", get(instance_types))
        .route("/:account/summary", get(summary))
        .route("/:account/verify", post(verify))
}

#[derive(Debug, Default, Deserialize)]
pub struct RegionQuery {
    pub region: Option<String>,
}

impl RegionQuery {
    fn region(&self) -> Option<&str> {
        self.region.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

/// `{"current_state": ...}` returned by single-instance operations
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub current_state: StateName,
}

impl From<InstanceOperation> for StateResponse {
    fn from(op: InstanceOperation) -> Self {
        Self {
            current_state: op.current_state,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operation: String,
    #[serde(default)]
    pub instance_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    pub period: Option<u32>,
    pub hours: Option<u32>,
}

/// Build an instance query from raw pairs so `tag.<key>` filters can repeat
fn instance_query(pairs: &[(String, String)]) -> ApiResult<(InstanceQuery, Option<String>)> {
    let mut query = InstanceQuery::default();
    let mut region = None;
    let mut limit = None;
    let mut offset = None;

    for (key, value) in pairs {
        match key.as_str() {
            "region" => region = Some(value.clone()),
            "state" => query.state = Some(value.clone()),
            "instance_type" => query.instance_type = Some(value.clone()),
            "search" => query.search = Some(value.clone()),
            "limit" => limit = parse_number::<usize>("limit", Some(value))?,
            "offset" => offset = parse_number::<usize>("offset", Some(value))?,
            _ => {
                if let Some(tag) = key.strip_prefix(TAG_PREFIX).filter(|t| !t.is_empty()) {
                    query.tags.push(TagFilter {
                        key: tag.to_string(),
                        value: value.clone(),
                    });
                }
            }
        }
    }
    query.limit = limit;
    query.offset = offset;
    Ok((query, region.filter(|r| !r.trim().is_empty())))
}

async fn list_accounts(State(state): State<Arc<AppState>>, _caller: Caller) -> Json<Vec<AccountInfo>> {
    Json(state.instances.accounts())
}

async fn permissions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(account): Path<String>,
) -> ApiResult<Json<Ec2Permissions>> {
    Ok(Json(state.instances.permissions(&caller.ctx, &account)?))
}

async fn list_instances(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(account): Path<String>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ApiResult<Json<InstancePage>> {
    let Query(pairs) = query?;
    let (query, region) = instance_query(&pairs)?;
    let page = state
        .instances
        .list_instances(&caller.ctx, &account, region.as_deref(), &query)
        .await?;
    Ok(Json(page))
}

async fn start_instance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((account, id)): Path<(String, String)>,
    Query(query): Query<RegionQuery>,
) -> ApiResult<Json<StateResponse>> {
    let op = state
        .instances
        .start_instance(&caller.ctx, &account, query.region(), &id)
        .await?;
    Ok(Json(op.into()))
}

async fn stop_instance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((account, id)): Path<(String, String)>,
    Query(query): Query<RegionQuery>,
) -> ApiResult<Json<StateResponse>> {
    let op = state
        .instances
        .stop_instance(&caller.ctx, &account, query.region(), &id)
        .await?;
    Ok(Json(op.into()))
}

async fn restart_instance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((account, id)): Path<(String, String)>,
    Query(query): Query<RegionQuery>,
) -> ApiResult<Json<StateResponse>> {
    let op = state
        .instances
        .restart_instance(&caller.ctx, &account, query.region(), &id)
        .await?;
    Ok(Json(op.into()))
}

async fn get_instance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((account, region, id)): Path<(String, String, String)>,
) -> ApiResult<Json<Instance>> {
    let instance = state
        .instances
        .get_instance(&caller.ctx, &account, Some(&region), &id)
        .await?;
    Ok(Json(instance))
}

async fn instance_metrics(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((account, region, id)): Path<(String, String, String)>,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> ApiResult<Json<InstanceMetrics>> {
    let Query(query) = query?;
    let defaults = MetricsWindow::default();
    let window = MetricsWindow {
        period_secs: query.period.unwrap_or(defaults.period_secs),
        hours: query.hours.unwrap_or(defaults.hours),
    };
    let metrics = state
        .instances
        .instance_metrics(&caller.ctx, &account, Some(&region), &id, window)
        .await?;
    Ok(Json(metrics))
}

async fn batch(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((account, region)): Path<(String, String)>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchOperationResult<InstanceOperation>>> {
    let Json(request) = body?;
    let result = state
        .instances
        .batch(
            &caller.ctx,
            &account,
            Some(&region),
            &request.operation,
            &request.instance_ids,
        )
        .await?;
    Ok(Json(result))
}

async fn regions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(account): Path<String>,
) -> ApiResult<Json<Vec<Region>>> {
    Ok(Json(state.instances.regions(&caller.ctx, &account).await?))
}

async fn instance_types(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(account): Path<String>,
    Query(query): Query<RegionQuery>,
) -> ApiResult<Json<Vec<InstanceTypeInfo>>> {
    let types = state
        .instances
        .instance_types(&caller.ctx, &account, query.region())
        .await?;
    Ok(Json(types))
}

async fn summary(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(account): Path<String>,
    Query(query): Query<RegionQuery>,
) -> ApiResult<Json<AccountSummary>> {
    let summary = state
        .instances
        .account_summary(&caller.ctx, &account, query.region())
        .await?;
    Ok(Json(summary))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(account): Path<String>,
) -> ApiResult<Json<VerifyResult>> {
    Ok(Json(state.instances.verify(&caller.ctx, &account).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dash_lib::DashError;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_instance_query_from_pairs() {
        let (query, region) = instance_query(&pairs(&[
            ("region", "eu-west-1"),
            ("state", "running"),
            ("tag.env", "prod"),
            ("tag.team", ""),
            ("limit", "10"),
            ("offset", "20"),
            ("unrelated", "x"),
        ]))
        .unwrap();

        assert_eq!(region.as_deref(), Some("eu-west-1"));
        assert_eq!(query.state.as_deref(), Some("running"));
        assert_eq!(query.tags.len(), 2);
        assert_eq!(query.tags[0].key, "env");
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(20));
    }

    #[test]
    fn test_bad_limit_rejected() {
        let err = instance_query(&pairs(&[("limit", "ten")])).unwrap_err();
        assert!(matches!(err.0, DashError::InvalidArgument(_)));
    }

    #[test]
    fn test_blank_region_ignored() {
        let (_, region) = instance_query(&pairs(&[("region", " ")])).unwrap();
        assert!(region.is_none());
    }
}
