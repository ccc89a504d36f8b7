//! Orchestrator entities: clusters, nodes, namespaces, deployments and pods

use super::catalog::ServiceContext;
use crate::error::{DashError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Namespaces the control plane refuses to delete
pub const SYSTEM_NAMESPACES: &[&str] = &["default", "kube-system", "kube-public", "kube-node-lease"];

/// Label prefix carrying node roles
pub const NODE_ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

pub fn is_system_namespace(name: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[serde(alias = "ready")]
    Connected,
    Disconnected,
    Error,
    #[default]
    Unknown,
}

/// Group allow-lists for deployment verbs plus the namespace whitelist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPermissions {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub restart: Vec<String>,
    #[serde(default)]
    pub scale: Vec<String>,
}

/// Orchestrator connection descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub context: String,
    #[serde(skip_serializing)]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub permissions: DeploymentPermissions,
}

impl Cluster {
    pub fn new(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            kubeconfig: None,
            server_version: None,
            status: ConnectionStatus::Unknown,
            permissions: DeploymentPermissions::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: DeploymentPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DashError::invalid("cluster name is required"));
        }
        if self.context.trim().is_empty() {
            return Err(DashError::invalid(format!(
                "cluster {} has no context",
                self.name
            )));
        }
        Ok(())
    }

    /// An empty whitelist admits every namespace
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.permissions.namespaces.is_empty()
            || self.permissions.namespaces.iter().any(|n| n == namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub desired: i32,
    pub current: i32,
    pub ready: i32,
    pub available: i32,
}

/// Pod roll-up for a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub running: i32,
    pub pending: i32,
    pub failed: i32,
    pub total: i32,
}

impl PodInfo {
    /// Derive the roll-up from replica counts; `failed` never goes negative
    pub fn from_replicas(replicas: &ReplicaStatus) -> Self {
        Self {
            running: replicas.ready,
            pending: (replicas.current - replicas.ready).max(0),
            failed: (replicas.desired - replicas.available).max(0),
            total: replicas.desired,
        }
    }
}

/// Orchestrator workload snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: ReplicaStatus,
    pub pods: PodInfo,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service_context: Option<ServiceContext>,
}

impl Deployment {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, replicas: ReplicaStatus) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            pods: PodInfo::from_replicas(&replicas),
            replicas,
            conditions: Vec::new(),
            created_at: None,
            service_context: None,
        }
    }

    /// ready / desired x 100, zero when nothing is desired
    pub fn availability_percent(&self) -> f64 {
        if self.replicas.desired <= 0 {
            return 0.0;
        }
        f64::from(self.replicas.ready) / f64::from(self.replicas.desired) * 100.0
    }

    pub fn is_healthy(&self) -> bool {
        self.replicas.desired > 0 && self.replicas.ready == self.replicas.desired
    }

    pub fn age(&self) -> Option<String> {
        self.created_at.map(format_age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Running" => PodPhase::Running,
            "Pending" => PodPhase::Pending,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Per-container state as reported by the kubelet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ContainerState {
    Running {
        started_at: Option<DateTime<Utc>>,
    },
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Terminated {
        exit_code: i32,
        reason: Option<String>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    pub node: Option<String>,
    pub containers: Vec<ContainerStatus>,
    pub restarts: i32,
    /// "ready/total" container ratio
    pub ready: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Pod {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        phase: PodPhase,
        containers: Vec<ContainerStatus>,
    ) -> Self {
        let ready_count = containers.iter().filter(|c| c.ready).count();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase,
            node: None,
            restarts: containers.iter().map(|c| c.restart_count).sum(),
            ready: format!("{}/{}", ready_count, containers.len()),
            containers,
            created_at: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| c.ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    pub pods: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResources {
    pub capacity: ResourceQuantities,
    pub allocatable: ResourceQuantities,
    pub used: ResourceQuantities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub status: NodeStatus,
    pub roles: Vec<String>,
    pub conditions: Vec<Condition>,
    pub resources: NodeResources,
    pub version: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(name: impl Into<String>, status: NodeStatus, roles: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status,
            roles,
            conditions: Vec::new(),
            resources: NodeResources::default(),
            version: None,
            created_at: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }

    pub fn is_master(&self) -> bool {
        self.roles
            .iter()
            .any(|r| r == "master" || r == "control-plane")
    }
}

/// Roles named by `node-role.kubernetes.io/<role>` labels; "worker" when none
pub fn roles_from_labels(labels: &BTreeMap<String, String>) -> Vec<String> {
    let roles: Vec<String> = labels
        .keys()
        .filter_map(|k| k.strip_prefix(NODE_ROLE_LABEL_PREFIX))
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    if roles.is_empty() {
        vec!["worker".to_string()]
    } else {
        roles
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "Active".to_string(),
            labels: BTreeMap::new(),
            created_at: None,
        }
    }
}

/// Human-readable age such as "3d", "5h" or "42s"
pub fn format_age(created_at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - created_at).num_seconds().max(0);
    match secs {
        s if s >= 86_400 => format!("{}d", s / 86_400),
        s if s >= 3_600 => format!("{}h", s / 3_600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicas(desired: i32, current: i32, ready: i32, available: i32) -> ReplicaStatus {
        ReplicaStatus {
            desired,
            current,
            ready,
            available,
        }
    }

    #[test]
    fn test_availability_percent() {
        let d = Deployment::new("api", "default", replicas(4, 4, 3, 3));
        assert!((d.availability_percent() - 75.0).abs() < f64::EPSILON);

        let scaled_down = Deployment::new("api", "default", replicas(0, 0, 0, 0));
        assert_eq!(scaled_down.availability_percent(), 0.0);
        assert!(!scaled_down.is_healthy());
    }

    #[test]
    fn test_pod_info_failed_is_clamped() {
        // availableReplicas can exceed replicas while a rollout churns
        let info = PodInfo::from_replicas(&replicas(2, 3, 3, 3));
        assert_eq!(info.failed, 0);
        assert_eq!(info.running, 3);
    }

    #[test]
    fn test_pod_ready_requires_containers() {
        let empty = Pod::new("p", "ns", PodPhase::Pending, vec![]);
        assert!(!empty.is_ready());
        assert_eq!(empty.ready, "0/0");

        let container = |ready| ContainerStatus {
            name: "app".to_string(),
            ready,
            restart_count: 2,
            state: ContainerState::Running { started_at: None },
        };
        let pod = Pod::new("p", "ns", PodPhase::Running, vec![container(true), container(false)]);
        assert!(!pod.is_ready());
        assert_eq!(pod.ready, "1/2");
        assert_eq!(pod.restarts, 4);
    }

    #[test]
    fn test_node_roles_and_master() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "node-role.kubernetes.io/control-plane".to_string(),
            String::new(),
        );
        labels.insert("kubernetes.io/os".to_string(), "linux".to_string());
        let roles = roles_from_labels(&labels);
        assert_eq!(roles, vec!["control-plane".to_string()]);
        assert!(Node::new("n1", NodeStatus::Ready, roles).is_master());

        let worker = roles_from_labels(&BTreeMap::new());
        assert!(!Node::new("n2", NodeStatus::Ready, worker).is_master());
    }

    #[test]
    fn test_cluster_validation_and_whitelist() {
        assert!(Cluster::new("local", "").validate().is_err());
        let cluster = Cluster::new("local", "docker-desktop").with_permissions(DeploymentPermissions {
            namespaces: vec!["auth".to_string()],
            ..Default::default()
        });
        assert!(cluster.validate().is_ok());
        assert!(cluster.allows_namespace("auth"));
        assert!(!cluster.allows_namespace("billing"));
    }

    #[test]
    fn test_connection_status_ready_alias() {
        let status: ConnectionStatus = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(status, ConnectionStatus::Connected);
    }
}
