//! Health reduction for deployments, environments, services and clusters,
//! plus the process health registry behind the liveness and readiness probes
//!
//! Every roll-up is a fold over a totally ordered lattice where the worst
//! status wins: healthy < degraded < unknown < critical.

use crate::catalog::ServiceCatalog;
use crate::error::{DashError, Result};
use crate::models::{Cluster, Deployment, EnvironmentSpec, Node, ReplicaStatus};
use crate::observability::DashMetrics;
use crate::permission::RequestContext;
use crate::provider::instrumented;
use crate::registry::ClientRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Catalog health lattice, ordered best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unknown,
    #[serde(alias = "unhealthy")]
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Worst status in `statuses`; nothing to reduce is `Unknown`
pub fn worst<I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    statuses.into_iter().max().unwrap_or(HealthStatus::Unknown)
}

/// Per-deployment status, which also knows about scaled-down workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Healthy,
    Degraded,
    Critical,
    Stopped,
    Unknown,
}

impl DeploymentStatus {
    pub fn from_replicas(replicas: Option<&ReplicaStatus>) -> Self {
        let Some(r) = replicas else {
            return DeploymentStatus::Unknown;
        };
        if r.desired <= 0 {
            DeploymentStatus::Stopped
        } else if r.ready == r.desired {
            DeploymentStatus::Healthy
        } else if r.ready > 0 {
            DeploymentStatus::Degraded
        } else {
            DeploymentStatus::Critical
        }
    }

    /// Collapse onto the catalog lattice; `stopped` reads as `unknown`
    pub fn to_health(self) -> HealthStatus {
        match self {
            DeploymentStatus::Healthy => HealthStatus::Healthy,
            DeploymentStatus::Degraded => HealthStatus::Degraded,
            DeploymentStatus::Critical => HealthStatus::Critical,
            DeploymentStatus::Stopped | DeploymentStatus::Unknown => HealthStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentHealth {
    pub name: String,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeploymentHealth {
    pub fn observed(name: &str, replicas: &ReplicaStatus) -> Self {
        Self {
            name: name.to_string(),
            ready_replicas: replicas.ready,
            desired_replicas: replicas.desired,
            status: DeploymentStatus::from_replicas(Some(replicas)).to_health(),
            message: None,
        }
    }

    pub fn missing(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ready_replicas: 0,
            desired_replicas: 0,
            status: HealthStatus::Unknown,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentHealth {
    pub name: String,
    pub context: String,
    pub namespace: String,
    pub status: HealthStatus,
    pub deployments: Vec<DeploymentHealth>,
}

impl EnvironmentHealth {
    pub fn new(env: &EnvironmentSpec, deployments: Vec<DeploymentHealth>) -> Self {
        Self {
            name: env.name.clone(),
            context: env.context.clone(),
            namespace: env.namespace.clone(),
            status: worst(deployments.iter().map(|d| d.status)),
            deployments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub overall_status: HealthStatus,
    pub environments: Vec<EnvironmentHealth>,
    pub last_updated: DateTime<Utc>,
}

impl ServiceHealth {
    pub fn new(service_name: &str, environments: Vec<EnvironmentHealth>) -> Self {
        Self {
            service_name: service_name.to_string(),
            overall_status: worst(environments.iter().map(|e| e.status)),
            environments,
            last_updated: Utc::now(),
        }
    }
}

/// Cluster overview status, derived from the ready-node ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
    Unknown,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub context: String,
    pub status: ClusterStatus,
    pub ready_nodes: usize,
    pub total_nodes: usize,
    pub ready_ratio: f64,
}

impl ClusterHealth {
    pub fn from_nodes(context: &str, connected: bool, nodes: &[Node]) -> Self {
        let ready = nodes.iter().filter(|n| n.is_ready()).count();
        let total = nodes.len();
        let ratio = if total == 0 {
            0.0
        } else {
            ready as f64 / total as f64
        };

        let status = if !connected {
            ClusterStatus::Disconnected
        } else if total == 0 {
            ClusterStatus::Unknown
        } else if ratio >= 0.9 {
            ClusterStatus::Healthy
        } else if ratio >= 0.7 {
            ClusterStatus::Degraded
        } else if ratio >= 0.5 {
            ClusterStatus::Unhealthy
        } else {
            ClusterStatus::Critical
        };

        Self {
            context: context.to_string(),
            status,
            ready_nodes: ready,
            total_nodes: total,
            ready_ratio: ratio,
        }
    }
}

/// Builds service health from the catalog and live deployment state
pub struct HealthAggregator {
    catalog: Arc<ServiceCatalog>,
    registry: Arc<ClientRegistry>,
    clusters: Vec<Cluster>,
    metrics: DashMetrics,
}

impl HealthAggregator {
    pub fn new(catalog: Arc<ServiceCatalog>, registry: Arc<ClientRegistry>, clusters: Vec<Cluster>) -> Self {
        Self {
            catalog,
            registry,
            clusters,
            metrics: DashMetrics::new(),
        }
    }

    pub async fn service_health(&self, ctx: &RequestContext, service: &str) -> Result<ServiceHealth> {
        let manifest = self.catalog.get(ctx, service).await?;

        let mut environments = Vec::new();
        for env in manifest.environments() {
            environments.push(self.environment_health(ctx, env).await?);
        }

        let health = ServiceHealth::new(manifest.name(), environments);
        debug!(service = %service, status = health.overall_status.as_str(), "Service health computed");
        Ok(health)
    }

    /// Observed health of one declared environment. Live-state failures
    /// mark its deployments unknown; only cancellation aborts.
    async fn environment_health(&self, ctx: &RequestContext, env: &EnvironmentSpec) -> Result<EnvironmentHealth> {
        let declared = &env.resources.deployments;

        let Some(cluster) = self.clusters.iter().find(|c| c.context == env.context) else {
            let message = format!("cluster {} is not configured", env.context);
            let unknown = declared.iter().map(|d| DeploymentHealth::missing(&d.name, &message)).collect();
            return Ok(EnvironmentHealth::new(env, unknown));
        };

        let live = match self.list_live(ctx, cluster, &env.namespace).await {
            Ok(live) => live,
            Err(DashError::Cancelled) => return Err(DashError::Cancelled),
            Err(e) => {
                warn!(context = %env.context, namespace = %env.namespace, error = %e, "Deployment state unavailable");
                let message = e.to_string();
                let unknown = declared.iter().map(|d| DeploymentHealth::missing(&d.name, &message)).collect();
                return Ok(EnvironmentHealth::new(env, unknown));
            }
        };

        let deployments = declared
            .iter()
            .map(|spec| {
                match live.iter().find(|d| d.name.eq_ignore_ascii_case(&spec.name)) {
                    Some(d) => DeploymentHealth::observed(&spec.name, &d.replicas),
                    None => DeploymentHealth::missing(
                        &spec.name,
                        format!("deployment {} not found in namespace {}", spec.name, env.namespace),
                    ),
                }
            })
            .collect();
        Ok(EnvironmentHealth::new(env, deployments))
    }

    async fn list_live(&self, ctx: &RequestContext, cluster: &Cluster, namespace: &str) -> Result<Vec<Deployment>> {
        let client = self.registry.orchestrator(Some(cluster)).await?;
        instrumented(
            &self.metrics,
            "orchestrator",
            "list_deployments",
            &ctx.cancel,
            client.list_deployments(namespace),
        )
        .await
    }
}

/// Liveness and readiness bookkeeping for the server process
pub mod components {
    pub const CONFIG: &str = "config";
    pub const CATALOG: &str = "catalog";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Critical,
            message: Some(message.into()),
            last_check_timestamp: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_critical(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::critical(message)).await;
    }

    /// Liveness: an empty registry counts as healthy
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = if components.is_empty() {
            HealthStatus::Healthy
        } else {
            worst(components.values().map(|c| c.status))
        };
        HealthResponse { status, components }
    }

    /// Ready once configuration loaded and every component is healthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let current = self.components.read().await;
        if !current.contains_key(components::CONFIG) {
            return ReadinessResponse {
                ready: false,
                reason: Some("configuration not loaded".to_string()),
            };
        }
        match current.iter().find(|(_, c)| c.status != HealthStatus::Healthy) {
            Some((name, c)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} is {}{}",
                    name,
                    c.status.as_str(),
                    c.message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
                )),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
