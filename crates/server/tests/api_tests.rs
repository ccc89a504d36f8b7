//! Integration tests for the HTTP surface over in-memory providers

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use dash_lib::{
    catalog::FilesystemStorage,
    health::components,
    provider::{
        InMemoryCloud, InMemoryCloudFactory, InMemoryOrchestrator, InMemoryOrchestratorFactory,
        LogSince, UnlinkedCloudFactory,
    },
    Account, ClientRegistry, Cluster, Deployment, DeploymentPermissions, Ec2Permissions,
    HealthRegistry, Instance, ReplicaStatus, StateName, Tag,
};
use dash_ops::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const CONTEXT: &str = "docker-desktop";

struct TestApp {
    router: Router,
    cloud: Arc<InMemoryCloud>,
    orchestrator: Arc<InMemoryOrchestrator>,
    _dir: TempDir,
}

fn replicas(ready: i32, desired: i32) -> ReplicaStatus {
    ReplicaStatus {
        desired,
        current: desired,
        ready,
        available: ready,
    }
}

fn named(id: &str, name: &str, state: StateName) -> Instance {
    Instance::new(id, state, vec![Tag::new("Name", name)])
}

async fn setup_test_app(allow_anonymous: bool) -> TestApp {
    let cloud = Arc::new(InMemoryCloud::new(vec![
        named("i-0123456789abcdef0", "api", StateName::Running),
        named("i-aaaaaaaa", "batch", StateName::Stopped),
        named("i-1", "bastion", StateName::Running),
        named("i-2", "web", StateName::Running),
        named("i-3", "db", StateName::Stopped),
    ]));
    let clouds = Arc::new(InMemoryCloudFactory::new());
    clouds.insert("prod", cloud.clone());

    let orchestrator = Arc::new(InMemoryOrchestrator::new().with_deployments(vec![
        Deployment::new("auth-api", "auth", replicas(2, 2)),
        Deployment::new("api", "shop", replicas(3, 3)),
        Deployment::new("worker", "shop", replicas(0, 2)),
        Deployment::new("api", "shop-stage", replicas(1, 1)),
    ])
    .with_logs("shop", "api-7d9f", "booting\nlistening on :8080\n"));
    let orchestrators = Arc::new(InMemoryOrchestratorFactory::new());
    orchestrators.insert(CONTEXT, orchestrator.clone());

    let account = Account::new("prod", "us-east-1", "AKIAEXAMPLE", "secret")
        .with_permissions(Ec2Permissions {
            view: vec![],
            start: vec!["sre".into()],
            stop: vec!["sre".into()],
        })
        .with_skip_list(vec!["bastion".into()]);
    let cluster = Cluster::new("local", CONTEXT).with_permissions(DeploymentPermissions {
        namespaces: vec![],
        restart: vec!["sre".into()],
        scale: vec!["sre".into()],
    });

    let dir = TempDir::new().unwrap();
    let health_registry = HealthRegistry::new();
    health_registry.set_healthy(components::CONFIG).await;

    let state = Arc::new(AppState::new(
        vec![account],
        vec![cluster],
        Arc::new(ClientRegistry::new(clouds, orchestrators)),
        Arc::new(FilesystemStorage::new(dir.path().join("services"))),
        health_registry,
        allow_anonymous,
    ));

    TestApp {
        router: create_router(state),
        cloud,
        orchestrator,
        _dir: dir,
    }
}

fn request(method: Method, uri: &str, groups: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(groups) = groups {
        builder = builder
            .header("X-Forwarded-User", "tester")
            .header("X-Forwarded-Groups", groups);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::String(String::from_utf8_lossy(&body).into()))
    };
    (status, value)
}

fn manifest(name: &str, environments: Value) -> Value {
    json!({
        "metadata": {"name": name, "tier": "TIER-1"},
        "spec": {
            "description": format!("{} service", name),
            "team": {"githubTeam": "platform"},
            "kubernetes": {"environments": environments}
        }
    })
}

fn environment(name: &str, namespace: &str, deployments: &[&str]) -> Value {
    let deployments: Vec<Value> = deployments
        .iter()
        .map(|d| {
            json!({
                "name": d,
                "replicas": 1,
                "resources": {
                    "requests": {"cpu": "100m", "memory": "128Mi"},
                    "limits": {"cpu": "500m", "memory": "512Mi"}
                }
            })
        })
        .collect();
    json!({
        "name": name,
        "context": CONTEXT,
        "namespace": namespace,
        "resources": {"deployments": deployments}
    })
}

#[tokio::test]
async fn test_healthz_endpoint() {
    let app = setup_test_app(false).await;
    let (status, body) = send(&app, request(Method::GET, "/healthz", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_readyz_probes_catalog() {
    let app = setup_test_app(false).await;
    let (status, body) = send(&app, request(Method::GET, "/readyz", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_test_app(false).await;
    send(&app, request(Method::GET, "/aws/prod/summary", Some("dev"), None)).await;

    let response = app
        .router
        .clone()
        .oneshot(request(Method::GET, "/metrics", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&body).contains("dash_ops_"));
}

#[tokio::test]
async fn test_missing_identity_rejected() {
    let app = setup_test_app(false).await;
    let (status, body) = send(&app, request(Method::GET, "/aws/accounts", None, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("identity"));
}

#[tokio::test]
async fn test_anonymous_allowed_when_configured() {
    let app = setup_test_app(true).await;
    let (status, body) = send(&app, request(Method::GET, "/aws/accounts", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["key"], "prod");
}

#[tokio::test]
async fn test_stop_denied_without_group() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/aws/prod/ec2/instance/stop/i-0123456789abcdef0",
            Some("dev"),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({"error": "user does not have permission to stop instances in account prod"})
    );
    assert!(app.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_stop_of_stopped_instance_is_rejected() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(Method::POST, "/aws/prod/ec2/instance/stop/i-aaaaaaaa", Some("sre"), None),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("stopped"));
    assert!(!app.cloud.calls().iter().any(|c| c.starts_with("stop_instances")));
}

#[tokio::test]
async fn test_stop_running_instance() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/aws/prod/ec2/instance/stop/i-0123456789abcdef0",
            Some("sre"),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"current_state": "stopping"}));
}

#[tokio::test]
async fn test_instance_listing_applies_skip_list() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(Method::GET, "/aws/prod/ec2/instances?state=running&search=i-", Some("dev"), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["instances"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["instance_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"i-2"));
    assert!(!ids.contains(&"i-1"));
    assert!(!ids.contains(&"i-3"));
}

#[tokio::test]
async fn test_invalid_limit_is_bad_request() {
    let app = setup_test_app(false).await;
    let (status, _) = send(
        &app,
        request(Method::GET, "/aws/prod/ec2/instances?limit=abc", Some("dev"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_reports_per_item_outcomes() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/aws/prod/regions/us-east-1/instances/batch",
            Some("sre"),
            Some(json!({
                "operation": "start",
                "instance_ids": ["i-aaaaaaaa", "i-0123456789abcdef0"]
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["results"][0]["instance_id"], "i-aaaaaaaa");
    assert_eq!(body["results"][0]["success"], true);
    assert_eq!(body["results"][1]["success"], false);
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let app = setup_test_app(false).await;
    let (status, _) = send(&app, request(Method::GET, "/aws/staging/summary", Some("dev"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resolve_is_case_insensitive() {
    let app = setup_test_app(false).await;
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/service-catalog/services",
            Some("platform"),
            Some(manifest(
                "user-authentication",
                json!([environment("local", "auth", &["auth-api"])]),
            )),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/service-catalog/resolve?deployment=AUTH-API&namespace=auth&context=docker-desktop",
            Some("platform"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service_name"], "user-authentication");
    assert_eq!(body["service_tier"], "TIER-1");
    assert_eq!(body["environment"], "local");
    assert_eq!(body["found"], true);
}

#[tokio::test]
async fn test_service_health_rollup() {
    let app = setup_test_app(false).await;
    send(
        &app,
        request(
            Method::POST,
            "/service-catalog/services",
            Some("platform"),
            Some(manifest(
                "shop",
                json!([
                    environment("prod", "shop", &["api", "worker"]),
                    environment("stage", "shop-stage", &["api"])
                ]),
            )),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(Method::GET, "/service-catalog/services/shop/health", Some("platform"), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall_status"], "critical");
    assert_eq!(body["environments"][0]["status"], "critical");
    assert_eq!(body["environments"][1]["status"], "healthy");
}

#[tokio::test]
async fn test_catalog_update_versioning() {
    let app = setup_test_app(false).await;
    let body = manifest("svc-x", json!([]));

    let response = app
        .router
        .clone()
        .oneshot(request(Method::POST, "/service-catalog/services", Some("platform"), Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/service-catalog/services/svc-x"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let created: Value = serde_json::from_slice(&bytes).unwrap();
    let t0 = created["metadata"]["createdAt"].clone();

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            request(Method::PUT, "/service-catalog/services/svc-x", Some("platform"), Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, stored) = send(
        &app,
        request(Method::GET, "/service-catalog/services/svc-x", Some("platform"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["metadata"]["version"], 3);
    assert_eq!(stored["metadata"]["createdAt"], t0);
    assert_ne!(stored["metadata"]["updatedAt"], t0);
}

#[tokio::test]
async fn test_duplicate_service_conflicts() {
    let app = setup_test_app(false).await;
    let body = manifest("svc-y", json!([]));
    let create = || request(Method::POST, "/service-catalog/services", Some("platform"), Some(body.clone()));

    assert_eq!(send(&app, create()).await.0, StatusCode::CREATED);
    assert_eq!(send(&app, create()).await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_deployment_listing_carries_service_context() {
    let app = setup_test_app(false).await;
    send(
        &app,
        request(
            Method::POST,
            "/service-catalog/services",
            Some("platform"),
            Some(manifest(
                "user-authentication",
                json!([environment("local", "auth", &["auth-api"])]),
            )),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/k8s/clusters/docker-desktop/deployments?namespace=auth",
            Some("dev"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    let deployment = &body["items"][0];
    assert_eq!(deployment["name"], "auth-api");
    assert_eq!(deployment["status"], "healthy");
    assert_eq!(deployment["service_context"]["service_name"], "user-authentication");
}

#[tokio::test]
async fn test_scale_deployment() {
    let app = setup_test_app(false).await;
    let uri = "/k8s/clusters/docker-desktop/namespaces/shop/deployments/worker/scale";

    let (status, _) = send(&app, request(Method::PUT, uri, Some("dev"), Some(json!({"replicas": 1})))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request(Method::PUT, uri, Some("sre"), Some(json!({"replicas": 101})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, request(Method::PUT, uri, Some("sre"), Some(json!({"replicas": 0})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["operation"], "scale");
    assert_eq!(body["resource"], "docker-desktop/shop/worker");
}

#[tokio::test]
async fn test_system_namespace_delete_refused() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(
            Method::DELETE,
            "/k8s/clusters/docker-desktop/namespaces/kube-system",
            Some("sre"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("system namespace"));
}

#[tokio::test]
async fn test_create_namespace_sets_location() {
    let app = setup_test_app(false).await;
    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/k8s/clusters/docker-desktop/namespaces",
            Some("sre"),
            Some(json!({"name": "team-a"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/k8s/clusters/docker-desktop/namespaces/team-a"
    );
}

#[tokio::test]
async fn test_cluster_listing() {
    let app = setup_test_app(false).await;
    let (status, body) = send(&app, request(Method::GET, "/k8s/clusters", Some("dev"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["context"], CONTEXT);

    let (status, body) = send(&app, request(Method::GET, "/k8s/clusters/docker-desktop", Some("dev"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
}

/// The server binary wires no cloud SDK; accounts must fail loudly rather than
/// report fabricated state
#[tokio::test]
async fn test_unlinked_cloud_provider_fails_requests() {
    let dir = TempDir::new().unwrap();
    let account = Account::new("prod", "us-east-1", "AKIAEXAMPLE", "bogus-secret");
    let state = Arc::new(AppState::new(
        vec![account],
        vec![],
        Arc::new(ClientRegistry::new(
            Arc::new(UnlinkedCloudFactory),
            Arc::new(InMemoryOrchestratorFactory::new()),
        )),
        Arc::new(FilesystemStorage::new(dir.path().join("services"))),
        HealthRegistry::new(),
        false,
    ));
    let router = create_router(state);

    let response = router
        .clone()
        .oneshot(request(Method::POST, "/aws/prod/verify", Some("sre"), Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("no cloud provider linked for account prod"));

    let response = router
        .clone()
        .oneshot(request(Method::GET, "/aws/prod/ec2/instances", Some("sre"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = router
        .oneshot(request(Method::GET, "/aws/accounts", Some("sre"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pod_logs_forward_follow_and_since() {
    let app = setup_test_app(false).await;
    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            "/k8s/clusters/docker-desktop/namespaces/shop/pods/api-7d9f/logs?follow=true&sinceSeconds=120&tailLines=1",
            Some("dev"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&body), "listening on :8080\n");

    let requests = app.orchestrator.log_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].follow);
    assert_eq!(requests[0].since, Some(LogSince::Seconds(120)));
    assert_eq!(requests[0].tail_lines, Some(1));
}

#[tokio::test]
async fn test_pod_logs_reject_conflicting_since() {
    let app = setup_test_app(false).await;
    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/k8s/clusters/docker-desktop/namespaces/shop/pods/api-7d9f/logs?sinceSeconds=60&sinceTime=2024-05-01T12:00:00Z",
            Some("dev"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("mutually exclusive"));
    assert!(app.orchestrator.log_requests().is_empty());
}
