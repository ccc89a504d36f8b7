//! Orchestrator-facing controller
//!
//! Wraps the [`Orchestrator`] capability with the permission gate, the
//! per-cluster namespace whitelist and service-context enrichment. Reads are
//! filtered to whitelisted namespaces; writes outside them are denied.

use crate::catalog::ServiceResolver;
use crate::error::{DashError, Result, ResultExt};
use crate::health::{ClusterHealth, DeploymentStatus};
use crate::lifecycle::{filter_deployments, filter_pods, Page, WorkloadQuery};
use crate::models::{
    is_system_namespace, Cluster, ConnectionStatus, Deployment, DeploymentPermissions, Namespace,
    Node, Pod,
};
use crate::observability::{DashMetrics, StructuredLogger};
use crate::permission::{Gate, RequestContext, Verb};
use crate::provider::{instrumented, LogOptions, LogStream, Orchestrator};
use crate::registry::ClientRegistry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_REPLICAS: i32 = 100;
const MAX_NAMESPACE_LEN: usize = 63;

/// Descriptor-only view used by cluster listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub context: String,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDetail {
    #[serde(flatten)]
    pub info: ClusterInfo,
    pub permissions: DeploymentPermissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Deployment as returned to the UI, with derived health fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentView {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub availability_percent: f64,
    pub healthy: bool,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
}

impl From<Deployment> for DeploymentView {
    fn from(deployment: Deployment) -> Self {
        Self {
            availability_percent: deployment.availability_percent(),
            healthy: deployment.is_healthy(),
            status: DeploymentStatus::from_replicas(Some(&deployment.replicas)),
            age: deployment.age(),
            deployment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOperation {
    pub context: String,
    pub namespace: String,
    pub deployment: String,
    pub operation: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Lowercase alphanumerics and '-', starting and ending alphanumeric
pub fn validate_namespace_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAMESPACE_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(DashError::invalid(format!("invalid namespace name: {}", name)))
    }
}

pub fn validate_replicas(replicas: i32) -> Result<()> {
    if replicas < 0 {
        return Err(DashError::precondition(format!(
            "cannot scale to a negative replica count ({})",
            replicas
        )));
    }
    if replicas > MAX_REPLICAS {
        return Err(DashError::invalid(format!(
            "replicas must be between 0 and {}, got {}",
            MAX_REPLICAS, replicas
        )));
    }
    Ok(())
}

pub struct ClusterController {
    clusters: Vec<Cluster>,
    statuses: DashMap<String, (ConnectionStatus, Option<String>)>,
    registry: Arc<ClientRegistry>,
    resolver: Option<Arc<ServiceResolver>>,
    gate: Gate,
    metrics: DashMetrics,
    logger: StructuredLogger,
}

impl ClusterController {
    pub fn new(clusters: Vec<Cluster>, registry: Arc<ClientRegistry>) -> Self {
        let statuses = clusters
            .iter()
            .map(|c| (c.context.clone(), (c.status, c.server_version.clone())))
            .collect();
        Self {
            clusters,
            statuses,
            registry,
            resolver: None,
            gate: Gate::new(),
            metrics: DashMetrics::new(),
            logger: StructuredLogger::new("cluster"),
        }
    }

    /// Enrich deployment listings with service context
    pub fn with_resolver(mut self, resolver: Arc<ServiceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn cluster(&self, context: &str) -> Result<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.context == context)
            .ok_or_else(|| DashError::not_found(format!("cluster {} not found", context)))
    }

    pub fn descriptors(&self) -> &[Cluster] {
        &self.clusters
    }

    fn info(&self, cluster: &Cluster) -> ClusterInfo {
        let (status, server_version) = self
            .statuses
            .get(&cluster.context)
            .map(|s| s.value().clone())
            .unwrap_or((cluster.status, cluster.server_version.clone()));
        ClusterInfo {
            name: cluster.name.clone(),
            context: cluster.context.clone(),
            status,
            server_version,
        }
    }

    /// Listing without I/O: the last known status of each cluster
    pub fn clusters(&self) -> Vec<ClusterInfo> {
        self.clusters.iter().map(|c| self.info(c)).collect()
    }

    async fn client(&self, cluster: &Cluster) -> Result<Arc<dyn Orchestrator>> {
        self.registry.orchestrator(Some(cluster)).await
    }

    async fn call<T, F>(&self, ctx: &RequestContext, call: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        instrumented(&self.metrics, "orchestrator", call, &ctx.cancel, fut).await
    }

    /// View access plus, for a specific namespace, the whitelist
    fn check_read(&self, ctx: &RequestContext, cluster: &Cluster, namespace: &str) -> Result<()> {
        self.gate.check(ctx, cluster, Verb::View)?;
        self.check_namespace(cluster, namespace)
    }

    fn check_namespace(&self, cluster: &Cluster, namespace: &str) -> Result<()> {
        if namespace.is_empty() || cluster.allows_namespace(namespace) {
            return Ok(());
        }
        Err(DashError::denied(format!(
            "namespace {} is not permitted in cluster {}",
            namespace, cluster.context
        )))
    }

    fn check_write(&self, ctx: &RequestContext, cluster: &Cluster, namespace: &str, verb: Verb) -> Result<()> {
        self.gate.check(ctx, cluster, verb)?;
        self.check_namespace(cluster, namespace)
    }

    /// Probe the API server and record the connection status
    pub async fn cluster_detail(&self, ctx: &RequestContext, context: &str) -> Result<ClusterDetail> {
        let cluster = self.cluster(context)?;
        self.gate.check(ctx, cluster, Verb::View)?;

        let probe = match self.client(cluster).await {
            Ok(client) => self.call(ctx, "version", client.version()).await,
            Err(e) => Err(e),
        };
        let (status, version, message) = match probe {
            Ok(version) => (ConnectionStatus::Connected, Some(version), None),
            Err(DashError::Cancelled) => return Err(DashError::Cancelled),
            Err(e @ DashError::Transient(_)) => (ConnectionStatus::Disconnected, None, Some(e.to_string())),
            Err(e) => (ConnectionStatus::Error, None, Some(e.to_string())),
        };
        if let Some(message) = &message {
            warn!(context = %context, error = %message, "Cluster probe failed");
        }
        let known_version = version.or_else(|| self.info(cluster).server_version);
        self.statuses
            .insert(cluster.context.clone(), (status, known_version));

        Ok(ClusterDetail {
            info: self.info(cluster),
            permissions: cluster.permissions.clone(),
            message,
        })
    }

    pub async fn cluster_health(&self, ctx: &RequestContext, context: &str) -> Result<ClusterHealth> {
        let cluster = self.cluster(context)?;
        self.gate.check(ctx, cluster, Verb::View)?;

        let nodes = match self.client(cluster).await {
            Ok(client) => self.call(ctx, "list_nodes", client.list_nodes()).await,
            Err(e) => Err(e),
        };
        match nodes {
            Ok(nodes) => Ok(ClusterHealth::from_nodes(context, true, &nodes)),
            Err(DashError::Cancelled) => Err(DashError::Cancelled),
            Err(e) => {
                warn!(context = %context, error = %e, "Cluster unreachable");
                Ok(ClusterHealth::from_nodes(context, false, &[]))
            }
        }
    }

    pub async fn nodes(&self, ctx: &RequestContext, context: &str) -> Result<Vec<Node>> {
        let cluster = self.cluster(context)?;
        self.gate.check(ctx, cluster, Verb::View)?;
        let client = self.client(cluster).await?;
        self.call(ctx, "list_nodes", client.list_nodes())
            .await
            .context_op(|| format!("list nodes in cluster {}", context))
    }

    pub async fn node(&self, ctx: &RequestContext, context: &str, name: &str) -> Result<Node> {
        let cluster = self.cluster(context)?;
        self.gate.check(ctx, cluster, Verb::View)?;
        let client = self.client(cluster).await?;
        self.call(ctx, "get_node", client.get_node(name))
            .await
            .context_op(|| format!("get node {}", name))
    }

    pub async fn namespaces(&self, ctx: &RequestContext, context: &str) -> Result<Vec<Namespace>> {
        let cluster = self.cluster(context)?;
        self.gate.check(ctx, cluster, Verb::View)?;
        let client = self.client(cluster).await?;
        let namespaces = self
            .call(ctx, "list_namespaces", client.list_namespaces())
            .await
            .context_op(|| format!("list namespaces in cluster {}", context))?;
        Ok(namespaces
            .into_iter()
            .filter(|n| cluster.allows_namespace(&n.name))
            .collect())
    }

    pub async fn namespace(&self, ctx: &RequestContext, context: &str, name: &str) -> Result<Namespace> {
        let cluster = self.cluster(context)?;
        self.check_read(ctx, cluster, name)?;
        let client = self.client(cluster).await?;
        self.call(ctx, "get_namespace", client.get_namespace(name))
            .await
            .context_op(|| format!("get namespace {}", name))
    }

    /// Namespace writes need both the scale and restart allow-lists
    fn check_namespace_write(&self, ctx: &RequestContext, cluster: &Cluster, name: &str) -> Result<()> {
        self.check_write(ctx, cluster, name, Verb::Scale)?;
        self.gate.check(ctx, cluster, Verb::Restart)
    }

    pub async fn create_namespace(
        &self,
        ctx: &RequestContext,
        context: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<Namespace> {
        let cluster = self.cluster(context)?;
        self.check_namespace_write(ctx, cluster, name)?;
        validate_namespace_name(name)?;
        let client = self.client(cluster).await?;

        let namespace = self
            .call(ctx, "create_namespace", client.create_namespace(name, labels))
            .await
            .context_op(|| format!("create namespace {}", name))?;
        self.logger
            .log_namespace_change(ctx.actor(), context, name, "create");
        Ok(namespace)
    }

    pub async fn delete_namespace(&self, ctx: &RequestContext, context: &str, name: &str) -> Result<()> {
        let cluster = self.cluster(context)?;
        self.check_namespace_write(ctx, cluster, name)?;
        if is_system_namespace(name) {
            return Err(DashError::precondition(format!(
                "namespace {} is a system namespace and cannot be deleted",
                name
            )));
        }
        let client = self.client(cluster).await?;

        self.call(ctx, "delete_namespace", client.delete_namespace(name))
            .await
            .context_op(|| format!("delete namespace {}", name))?;
        self.logger
            .log_namespace_change(ctx.actor(), context, name, "delete");
        Ok(())
    }

    /// Deployments in `query.namespace` (all permitted namespaces when empty)
    pub async fn deployments(
        &self,
        ctx: &RequestContext,
        context: &str,
        query: &WorkloadQuery,
    ) -> Result<Page<DeploymentView>> {
        let namespace = query.namespace.as_deref().unwrap_or("").trim();
        let cluster = self.cluster(context)?;
        self.check_read(ctx, cluster, namespace)?;
        let client = self.client(cluster).await?;

        let deployments = self
            .call(ctx, "list_deployments", client.list_deployments(namespace))
            .await
            .context_op(|| format!("list deployments in cluster {}", context))?
            .into_iter()
            .filter(|d| cluster.allows_namespace(&d.namespace))
            .collect();

        let page = filter_deployments(deployments, query);
        let mut items = page.items;
        self.enrich(ctx, context, &mut items).await;
        debug!(context = %context, namespace = %namespace, total = page.total, "Listed deployments");

        Ok(Page {
            items: items.into_iter().map(DeploymentView::from).collect(),
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub async fn deployment(
        &self,
        ctx: &RequestContext,
        context: &str,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentView> {
        let cluster = self.cluster(context)?;
        self.check_read(ctx, cluster, namespace)?;
        let client = self.client(cluster).await?;

        let deployment = self
            .call(ctx, "get_deployment", client.get_deployment(namespace, name))
            .await
            .context_op(|| format!("get deployment {}/{}", namespace, name))?;
        let mut items = vec![deployment];
        self.enrich(ctx, context, &mut items).await;
        let deployment = items
            .pop()
            .ok_or_else(|| DashError::fatal("deployment lost during enrichment"))?;
        Ok(deployment.into())
    }

    async fn enrich(&self, ctx: &RequestContext, context: &str, deployments: &mut [Deployment]) {
        if let Some(resolver) = &self.resolver {
            resolver.enrich(ctx, context, deployments).await;
        }
    }

    pub async fn scale(
        &self,
        ctx: &RequestContext,
        context: &str,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<DeploymentOperation> {
        let cluster = self.cluster(context)?;
        self.check_write(ctx, cluster, namespace, Verb::Scale)?;
        validate_replicas(replicas)?;
        let client = self.client(cluster).await?;

        let outcome = self
            .call(ctx, "scale_deployment", client.scale_deployment(namespace, name, replicas))
            .await
            .context_op(|| format!("scale deployment {}/{}", namespace, name));
        self.metrics
            .record_deployment_operation("scale", outcome.is_ok());
        outcome?;

        let message = format!("deployment {} scaled to {} replicas", name, replicas);
        self.logger.log_deployment_operation(
            ctx.actor(),
            context,
            namespace,
            name,
            "scale",
            &message,
        );
        Ok(DeploymentOperation {
            context: context.to_string(),
            namespace: namespace.to_string(),
            deployment: name.to_string(),
            operation: "scale".to_string(),
            success: true,
            message,
            replicas: Some(replicas),
        })
    }

    pub async fn restart(
        &self,
        ctx: &RequestContext,
        context: &str,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentOperation> {
        let cluster = self.cluster(context)?;
        self.check_write(ctx, cluster, namespace, Verb::Restart)?;
        let client = self.client(cluster).await?;

        let outcome = self
            .call(ctx, "restart_deployment", client.restart_deployment(namespace, name))
            .await
            .context_op(|| format!("restart deployment {}/{}", namespace, name));
        self.metrics
            .record_deployment_operation("restart", outcome.is_ok());
        outcome?;

        let message = format!("deployment {} restart triggered", name);
        self.logger.log_deployment_operation(
            ctx.actor(),
            context,
            namespace,
            name,
            "restart",
            &message,
        );
        Ok(DeploymentOperation {
            context: context.to_string(),
            namespace: namespace.to_string(),
            deployment: name.to_string(),
            operation: "restart".to_string(),
            success: true,
            message,
            replicas: None,
        })
    }

    pub async fn pods(&self, ctx: &RequestContext, context: &str, query: &WorkloadQuery) -> Result<Page<Pod>> {
        let namespace = query.namespace.as_deref().unwrap_or("").trim();
        let cluster = self.cluster(context)?;
        self.check_read(ctx, cluster, namespace)?;
        let client = self.client(cluster).await?;

        let pods = self
            .call(ctx, "list_pods", client.list_pods(namespace))
            .await
            .context_op(|| format!("list pods in cluster {}", context))?
            .into_iter()
            .filter(|p| cluster.allows_namespace(&p.namespace))
            .collect();
        Ok(filter_pods(pods, query))
    }

    pub async fn pod(&self, ctx: &RequestContext, context: &str, namespace: &str, name: &str) -> Result<Pod> {
        let cluster = self.cluster(context)?;
        self.check_read(ctx, cluster, namespace)?;
        let client = self.client(cluster).await?;
        self.call(ctx, "get_pod", client.get_pod(namespace, name))
            .await
            .context_op(|| format!("get pod {}/{}", namespace, name))
    }

    /// Deleting a pod lets its controller replace it, so it counts as a restart
    pub async fn delete_pod(
        &self,
        ctx: &RequestContext,
        context: &str,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentOperation> {
        let cluster = self.cluster(context)?;
        self.check_write(ctx, cluster, namespace, Verb::Restart)?;
        let client = self.client(cluster).await?;

        self.call(ctx, "delete_pod", client.delete_pod(namespace, name))
            .await
            .context_op(|| format!("delete pod {}/{}", namespace, name))?;

        let message = format!("pod {} deleted", name);
        self.logger.log_deployment_operation(
            ctx.actor(),
            context,
            namespace,
            name,
            "delete_pod",
            &message,
        );
        Ok(DeploymentOperation {
            context: context.to_string(),
            namespace: namespace.to_string(),
            deployment: name.to_string(),
            operation: "delete_pod".to_string(),
            success: true,
            message,
            replicas: None,
        })
    }

    pub async fn pod_logs(
        &self,
        ctx: &RequestContext,
        context: &str,
        namespace: &str,
        name: &str,
        options: &LogOptions,
    ) -> Result<LogStream> {
        if let Some(tail) = options.tail_lines {
            if tail < 0 {
                return Err(DashError::invalid("tailLines must not be negative"));
            }
        }
        let cluster = self.cluster(context)?;
        self.check_read(ctx, cluster, namespace)?;
        let client = self.client(cluster).await?;
        self.call(ctx, "pod_logs", client.pod_logs(namespace, name, options))
            .await
            .context_op(|| format!("logs for pod {}/{}", namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FilesystemStorage, ServiceCatalog};
    use crate::models::{fixtures, NodeStatus, PodPhase, ReplicaStatus, ServiceTier};
    use crate::permission::UserContext;
    use crate::provider::{InMemoryCloudFactory, InMemoryOrchestrator, InMemoryOrchestratorFactory, LogSince};
    use tempfile::TempDir;
    use tokio_stream::StreamExt;

    const CONTEXT: &str = "docker-desktop";

    fn replicas(ready: i32, desired: i32) -> ReplicaStatus {
        ReplicaStatus {
            desired,
            current: desired,
            ready,
            available: ready,
        }
    }

    fn local_cluster(namespaces: &[&str]) -> Cluster {
        Cluster::new("local", CONTEXT).with_permissions(DeploymentPermissions {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            restart: vec!["sre".into()],
            scale: vec!["sre".into(), "dev".into()],
        })
    }

    fn controller_with(
        cluster: Cluster,
        orchestrator: InMemoryOrchestrator,
    ) -> (ClusterController, Arc<InMemoryOrchestrator>) {
        let orchestrator = Arc::new(orchestrator);
        let factory = Arc::new(InMemoryOrchestratorFactory::new());
        factory.insert(CONTEXT, orchestrator.clone());
        let registry = Arc::new(ClientRegistry::new(Arc::new(InMemoryCloudFactory::new()), factory));
        (ClusterController::new(vec![cluster], registry), orchestrator)
    }

    fn sample() -> InMemoryOrchestrator {
        InMemoryOrchestrator::new()
            .with_deployments(vec![
                Deployment::new("auth-api", "auth", replicas(2, 2)),
                Deployment::new("billing", "payments", replicas(1, 3)),
            ])
            .with_pods(vec![
                Pod::new("auth-api-1", "auth", PodPhase::Running, vec![]),
                Pod::new("billing-1", "payments", PodPhase::Pending, vec![]),
            ])
            .with_logs("auth", "auth-api-1", "one\ntwo\nthree")
    }

    fn user(groups: &[&str]) -> RequestContext {
        RequestContext::for_user(UserContext::new("tester", groups))
    }

    #[tokio::test]
    async fn test_listing_needs_no_io() {
        let (controller, orchestrator) = controller_with(local_cluster(&[]), sample());
        let clusters = controller.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].status, ConnectionStatus::Unknown);
        assert!(orchestrator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_detail_records_status() {
        let (controller, _) = controller_with(local_cluster(&[]), sample());
        let detail = controller.cluster_detail(&user(&["dev"]), CONTEXT).await.unwrap();
        assert_eq!(detail.info.status, ConnectionStatus::Connected);
        assert_eq!(detail.info.server_version.as_deref(), Some("v1.28.2"));
        assert_eq!(controller.clusters()[0].status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_disconnected_cluster() {
        let (controller, _) = controller_with(local_cluster(&[]), InMemoryOrchestrator::disconnected());
        let detail = controller.cluster_detail(&user(&["dev"]), CONTEXT).await.unwrap();
        assert_eq!(detail.info.status, ConnectionStatus::Disconnected);

        let health = controller.cluster_health(&user(&["dev"]), CONTEXT).await.unwrap();
        assert_eq!(health.status, crate::health::ClusterStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_cluster_health_from_nodes() {
        let orchestrator = sample().with_nodes(vec![
            Node::new("a", NodeStatus::Ready, vec!["control-plane".into()]),
            Node::new("b", NodeStatus::NotReady, vec!["worker".into()]),
        ]);
        let (controller, _) = controller_with(local_cluster(&[]), orchestrator);
        let health = controller.cluster_health(&user(&["dev"]), CONTEXT).await.unwrap();
        assert_eq!(health.status, crate::health::ClusterStatus::Unhealthy);
        assert_eq!(health.ready_nodes, 1);
    }

    #[tokio::test]
    async fn test_whitelist_filters_reads() {
        let (controller, _) = controller_with(local_cluster(&["auth"]), sample());
        let ctx = user(&["dev"]);

        let page = controller
            .deployments(&ctx, CONTEXT, &WorkloadQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].deployment.name, "auth-api");

        let query = WorkloadQuery {
            namespace: Some("payments".into()),
            ..Default::default()
        };
        assert!(matches!(
            controller.deployments(&ctx, CONTEXT, &query).await,
            Err(DashError::PermissionDenied(_))
        ));

        let namespaces = controller.namespaces(&ctx, CONTEXT).await.unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].name, "auth");
    }

    #[tokio::test]
    async fn test_deployment_view_fields() {
        let (controller, _) = controller_with(local_cluster(&[]), sample());
        let view = controller
            .deployment(&user(&["dev"]), CONTEXT, "payments", "billing")
            .await
            .unwrap();
        assert_eq!(view.status, DeploymentStatus::Degraded);
        assert!(!view.healthy);
        assert!((view.availability_percent - 100.0 / 3.0).abs() < 1e-9);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["name"], "billing");
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn test_scale_validation_and_permissions() {
        let (controller, orchestrator) = controller_with(local_cluster(&[]), sample());

        assert!(matches!(
            controller.scale(&user(&["dev"]), CONTEXT, "auth", "auth-api", 101).await,
            Err(DashError::InvalidArgument(_))
        ));
        assert!(matches!(
            controller.scale(&user(&["dev"]), CONTEXT, "auth", "auth-api", -1).await,
            Err(DashError::PreconditionFailed(_))
        ));
        assert!(matches!(
            controller.scale(&user(&["viewer"]), CONTEXT, "auth", "auth-api", 3).await,
            Err(DashError::PermissionDenied(_))
        ));
        assert!(orchestrator.calls().is_empty());

        let op = controller
            .scale(&user(&["dev"]), CONTEXT, "auth", "auth-api", 0)
            .await
            .unwrap();
        assert_eq!(op.replicas, Some(0));
        let view = controller
            .deployment(&user(&["dev"]), CONTEXT, "auth", "auth-api")
            .await
            .unwrap();
        assert_eq!(view.status, DeploymentStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_sets_annotation() {
        let (controller, orchestrator) = controller_with(local_cluster(&[]), sample());
        assert!(controller
            .restart(&user(&["dev"]), CONTEXT, "auth", "auth-api")
            .await
            .is_err());

        controller
            .restart(&user(&["sre"]), CONTEXT, "auth", "auth-api")
            .await
            .unwrap();
        assert!(orchestrator
            .template_annotations("auth", "auth-api")
            .contains_key(crate::provider::RESTARTED_AT_ANNOTATION));
    }

    #[tokio::test]
    async fn test_namespace_lifecycle() {
        let (controller, _) = controller_with(local_cluster(&[]), sample());
        let sre = user(&["sre"]);

        assert!(matches!(
            controller.create_namespace(&user(&["dev"]), CONTEXT, "team-a", BTreeMap::new()).await,
            Err(DashError::PermissionDenied(_))
        ));
        assert!(matches!(
            controller.create_namespace(&sre, CONTEXT, "Team_A", BTreeMap::new()).await,
            Err(DashError::InvalidArgument(_))
        ));

        controller
            .create_namespace(&sre, CONTEXT, "team-a", BTreeMap::new())
            .await
            .unwrap();
        controller.delete_namespace(&sre, CONTEXT, "team-a").await.unwrap();
        assert!(matches!(
            controller.delete_namespace(&sre, CONTEXT, "kube-system").await,
            Err(DashError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_pod_delete_needs_restart_permission() {
        let (controller, _) = controller_with(local_cluster(&[]), sample());
        assert!(controller
            .delete_pod(&user(&["dev"]), CONTEXT, "auth", "auth-api-1")
            .await
            .is_err());
        controller
            .delete_pod(&user(&["sre"]), CONTEXT, "auth", "auth-api-1")
            .await
            .unwrap();
        let pods = controller
            .pods(&user(&["dev"]), CONTEXT, &WorkloadQuery::default())
            .await
            .unwrap();
        assert_eq!(pods.total, 1);
    }

    #[tokio::test]
    async fn test_pod_logs_tail() {
        let (controller, _) = controller_with(local_cluster(&[]), sample());
        let options = LogOptions {
            tail_lines: Some(2),
            ..Default::default()
        };
        let mut stream = controller
            .pod_logs(&user(&["dev"]), CONTEXT, "auth", "auth-api-1", &options)
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend(chunk.unwrap());
        }
        assert_eq!(String::from_utf8(body).unwrap(), "two\nthree\n");
    }

    #[tokio::test]
    async fn test_pod_logs_pass_follow_and_since_through() {
        let (controller, orchestrator) = controller_with(local_cluster(&[]), sample());
        let options = LogOptions {
            follow: true,
            since: Some(LogSince::Seconds(90)),
            ..Default::default()
        };
        controller
            .pod_logs(&user(&["dev"]), CONTEXT, "auth", "auth-api-1", &options)
            .await
            .unwrap();
        assert_eq!(orchestrator.log_requests(), vec![options]);
    }

    #[tokio::test]
    async fn test_unknown_cluster() {
        let (controller, _) = controller_with(local_cluster(&[]), sample());
        assert!(matches!(
            controller.nodes(&user(&["dev"]), "nope").await,
            Err(DashError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deployments_enriched_with_service_context() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(ServiceCatalog::new(Arc::new(FilesystemStorage::new(dir.path()))));
        catalog
            .create(
                &RequestContext::internal(),
                fixtures::manifest(
                    "user-authentication",
                    ServiceTier::Tier1,
                    vec![fixtures::environment(
                        "local",
                        CONTEXT,
                        "auth",
                        vec![fixtures::deployment("auth-api", 2)],
                    )],
                ),
            )
            .await
            .unwrap();

        let (controller, _) = controller_with(local_cluster(&[]), sample());
        let controller = controller.with_resolver(Arc::new(ServiceResolver::new(catalog)));

        let page = controller
            .deployments(&user(&["dev"]), CONTEXT, &WorkloadQuery::default())
            .await
            .unwrap();
        let auth = page.items.iter().find(|d| d.deployment.name == "auth-api").unwrap();
        let billing = page.items.iter().find(|d| d.deployment.name == "billing").unwrap();

        let context = auth.deployment.service_context.as_ref().unwrap();
        assert!(context.found);
        assert_eq!(context.service_name, "user-authentication");
        assert!(!billing.deployment.service_context.as_ref().unwrap().found);
    }
}
