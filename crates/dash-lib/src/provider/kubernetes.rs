//! Orchestrator adapter backed by the Kubernetes API via `kube`
//!
//! One client per kubeconfig context. Kubernetes object types are converted
//! into [`crate::models`] entities here and never leave this module.

use super::{
    LogOptions, LogSince, LogStream, Orchestrator, OrchestratorFactory, RESTARTED_AT_ANNOTATION,
};
use crate::error::{DashError, Result};
use crate::models::{
    is_system_namespace, roles_from_labels, Cluster, Condition, ContainerState, ContainerStatus,
    Deployment, Namespace, Node, NodeResources, NodeStatus, Pod, PodPhase, ReplicaStatus,
    ResourceQuantities,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::{
    ContainerStatus as KubeContainerStatus, Namespace as KubeNamespace, Node as KubeNode,
    Pod as KubePod,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Lines buffered between the Kubernetes log stream and the HTTP body
const LOG_CHANNEL_CAPACITY: usize = 256;

/// Translate a `kube` error into the provider error kinds
fn map_kube_error(err: kube::Error, what: &str) -> DashError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => DashError::not_found(format!("{} not found", what)),
            401 | 403 => DashError::denied(format!("cluster denied access to {}", what)),
            409 => DashError::conflict(format!("{} already exists", what)),
            400 | 422 => DashError::invalid(format!("{}: {}", what, response.message)),
            429 | 500..=599 => DashError::transient(format!("{}: {}", what, response.message)),
            _ => DashError::fatal(format!("{}: {}", what, response.message)),
        },
        other => {
            debug!(error = %other, resource = %what, "Kubernetes transport error");
            DashError::transient(format!("cluster unreachable while accessing {}", what))
        }
    }
}

/// Orchestrator bound to a single kubeconfig context
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    context: String,
}

impl KubeOrchestrator {
    pub fn new(client: Client, context: impl Into<String>) -> Self {
        Self {
            client,
            context: context.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Namespaced API, or cluster-wide when `namespace` is empty
    fn scoped<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    /// Resource requests of scheduled, non-terminated pods summed per node
    async fn requested_by_node(&self, field_selector: Option<&str>) -> Result<HashMap<String, ResourceQuantities>> {
        let api: Api<KubePod> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(selector) = field_selector {
            params = params.fields(selector);
        }
        let pods = api
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "pods"))?;

        let mut used: HashMap<String, ResourceQuantities> = HashMap::new();
        for pod in pods.items {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            if matches!(phase, Some("Succeeded") | Some("Failed")) {
                continue;
            }
            let Some(spec) = pod.spec else { continue };
            let Some(node_name) = spec.node_name.clone() else { continue };
            let entry = used.entry(node_name).or_default();
            entry.pods += 1;
            for container in &spec.containers {
                let requests = container
                    .resources
                    .as_ref()
                    .and_then(|r| r.requests.as_ref());
                if let Some(requests) = requests {
                    entry.cpu_millicores += requests.get("cpu").map(parse_cpu_millicores).unwrap_or(0);
                    entry.memory_bytes += requests.get("memory").map(parse_memory_bytes).unwrap_or(0);
                }
            }
        }
        Ok(used)
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "nodes"))?;
        let used = match self.requested_by_node(None).await {
            Ok(used) => used,
            Err(e) => {
                warn!(context = %self.context, error = %e, "Could not compute node usage");
                HashMap::new()
            }
        };
        Ok(nodes
            .items
            .into_iter()
            .map(|n| {
                let mut node = convert_node(n);
                node.resources.used = used.get(&node.name).copied().unwrap_or_default();
                node
            })
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        let node = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, &format!("node {}", name)))?;
        let mut node = convert_node(node);
        let selector = format!("spec.nodeName={}", name);
        if let Ok(used) = self.requested_by_node(Some(&selector)).await {
            node.resources.used = used.get(name).copied().unwrap_or_default();
        }
        Ok(node)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api: Api<KubeNamespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "namespaces"))?;
        Ok(namespaces.items.into_iter().map(convert_namespace).collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<KubeNamespace> = Api::all(self.client.clone());
        let namespace = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, &format!("namespace {}", name)))?;
        Ok(convert_namespace(namespace))
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<Namespace> {
        let api: Api<KubeNamespace> = Api::all(self.client.clone());
        let namespace = KubeNamespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: if labels.is_empty() { None } else { Some(labels) },
                ..Default::default()
            },
            ..Default::default()
        };
        let created = api
            .create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| map_kube_error(e, &format!("namespace {}", name)))?;
        Ok(convert_namespace(created))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        if is_system_namespace(name) {
            return Err(DashError::precondition(format!(
                "namespace {} is a system namespace and cannot be deleted",
                name
            )));
        }
        let api: Api<KubeNamespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("namespace {}", name)))?;
        Ok(())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<KubeDeployment> = self.scoped(namespace);
        let deployments = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "deployments"))?;
        Ok(deployments.items.into_iter().map(convert_deployment).collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, &format!("deployment {}/{}", namespace, name)))?;
        Ok(convert_deployment(deployment))
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, &format!("deployment {}/{}", namespace, name)))?;
        Ok(())
    }

    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let mut annotations = BTreeMap::new();
        annotations.insert(RESTARTED_AT_ANNOTATION.to_string(), Utc::now().to_rfc3339());
        let patch = json!({
            "spec": { "template": { "metadata": { "annotations": annotations } } }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, &format!("deployment {}/{}", namespace, name)))?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<KubePod> = self.scoped(namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "pods"))?;
        Ok(pods.items.into_iter().map(convert_pod).collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, &format!("pod {}/{}", namespace, name)))?;
        Ok(convert_pod(pod))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("pod {}/{}", namespace, name)))?;
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<LogStream> {
        let api: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        let params = log_params(options);
        let what = format!("pod {}/{}", namespace, pod);
        let pod = pod.to_string();

        // The reader borrows `api`, so a task owns both and forwards lines.
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (tx, rx) = mpsc::channel::<Result<Vec<u8>>>(LOG_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let reader = match api.log_stream(&pod, &params).await {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    reader
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(map_kube_error(e, &what)));
                    return;
                }
            };
            let mut lines = Box::pin(reader.lines());
            loop {
                let line = tokio::select! {
                    _ = tx.closed() => break,
                    line = lines.next() => line,
                };
                let Some(line) = line else { break };
                let chunk = line.map(|l| format!("{}\n", l).into_bytes()).map_err(|e| {
                    DashError::transient(format!("log stream for {} interrupted: {}", what, e))
                });
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
            debug!(resource = %what, "Log stream finished");
        });

        ready_rx
            .await
            .map_err(|_| DashError::fatal("log stream task ended before connecting"))??;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| map_kube_error(e, "server version"))?;
        Ok(info.git_version)
    }

    async fn test_connection(&self) -> Result<()> {
        self.version().await.map(|_| ())
    }
}

/// Builds [`KubeOrchestrator`]s from the cluster's kubeconfig and context
#[derive(Debug, Default, Clone)]
pub struct KubeOrchestratorFactory;

#[async_trait]
impl OrchestratorFactory for KubeOrchestratorFactory {
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn Orchestrator>> {
        let options = KubeConfigOptions {
            context: Some(cluster.context.clone()),
            ..Default::default()
        };
        let load_failed = |e: kube::config::KubeconfigError| {
            warn!(context = %cluster.context, error = %e, "Failed to load kubeconfig");
            DashError::fatal(format!(
                "failed to load kubeconfig for context {}",
                cluster.context
            ))
        };

        let config = match &cluster.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(load_failed)?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(load_failed)?
            }
            None => Config::from_kubeconfig(&options).await.map_err(load_failed)?,
        };

        let client = Client::try_from(config)
            .map_err(|e| map_kube_error(e, &format!("cluster {}", cluster.context)))?;
        let orchestrator: Arc<dyn Orchestrator> =
            Arc::new(KubeOrchestrator::new(client, cluster.context.clone()));
        Ok(orchestrator)
    }
}

fn log_params(options: &LogOptions) -> LogParams {
    let since_seconds = options.since.map(|since| match since {
        LogSince::Seconds(secs) => secs,
        LogSince::Time(time) => (Utc::now() - time).num_seconds().max(1),
    });
    LogParams {
        container: options.container.clone(),
        follow: options.follow,
        previous: options.previous,
        tail_lines: options.tail_lines,
        since_seconds,
        timestamps: options.timestamps,
        ..Default::default()
    }
}

fn convert_conditions<I>(conditions: I) -> Vec<Condition>
where
    I: IntoIterator<Item = (String, String, Option<String>, Option<String>)>,
{
    conditions
        .into_iter()
        .map(|(type_, status, reason, message)| Condition {
            type_,
            status,
            reason,
            message,
        })
        .collect()
}

fn convert_deployment(deployment: KubeDeployment) -> Deployment {
    let meta = deployment.metadata;
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let status = deployment.status.unwrap_or_default();
    let replicas = ReplicaStatus {
        desired,
        current: status.replicas.unwrap_or(0),
        ready: status.ready_replicas.unwrap_or(0),
        available: status.available_replicas.unwrap_or(0),
    };

    let mut converted = Deployment::new(
        meta.name.unwrap_or_default(),
        meta.namespace.unwrap_or_default(),
        replicas,
    );
    converted.conditions = convert_conditions(
        status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .map(|c| (c.type_, c.status, c.reason, c.message)),
    );
    converted.created_at = meta.creation_timestamp.map(|t| t.0);
    converted
}

fn convert_container(status: KubeContainerStatus) -> ContainerStatus {
    let state = status.state.unwrap_or_default();
    let state = if let Some(running) = state.running {
        ContainerState::Running {
            started_at: running.started_at.map(|t| t.0),
        }
    } else if let Some(terminated) = state.terminated {
        ContainerState::Terminated {
            exit_code: terminated.exit_code,
            reason: terminated.reason,
            started_at: terminated.started_at.map(|t| t.0),
            finished_at: terminated.finished_at.map(|t| t.0),
        }
    } else {
        let waiting = state.waiting.unwrap_or_default();
        ContainerState::Waiting {
            reason: waiting.reason,
            message: waiting.message,
        }
    };

    ContainerStatus {
        name: status.name,
        ready: status.ready,
        restart_count: status.restart_count,
        state,
    }
}

fn convert_pod(pod: KubePod) -> Pod {
    let meta = pod.metadata;
    let node = pod.spec.and_then(|s| s.node_name);
    let status = pod.status.unwrap_or_default();
    let phase = PodPhase::parse(status.phase.as_deref().unwrap_or("Unknown"));
    let containers = status
        .container_statuses
        .unwrap_or_default()
        .into_iter()
        .map(convert_container)
        .collect();

    let mut converted = Pod::new(
        meta.name.unwrap_or_default(),
        meta.namespace.unwrap_or_default(),
        phase,
        containers,
    );
    converted.node = node;
    converted.created_at = meta.creation_timestamp.map(|t| t.0);
    converted
}

fn quantities(resources: Option<&BTreeMap<String, Quantity>>) -> ResourceQuantities {
    let Some(resources) = resources else {
        return ResourceQuantities::default();
    };
    ResourceQuantities {
        cpu_millicores: resources.get("cpu").map(parse_cpu_millicores).unwrap_or(0),
        memory_bytes: resources.get("memory").map(parse_memory_bytes).unwrap_or(0),
        pods: resources
            .get("pods")
            .and_then(|q| q.0.parse().ok())
            .unwrap_or(0),
    }
}

fn convert_node(node: KubeNode) -> Node {
    let meta = node.metadata;
    let labels = meta.labels.unwrap_or_default();
    let status = node.status.unwrap_or_default();
    let conditions = status.conditions.unwrap_or_default();

    let ready = conditions
        .iter()
        .find(|c| c.type_ == "Ready")
        .map(|c| match c.status.as_str() {
            "True" => NodeStatus::Ready,
            "False" => NodeStatus::NotReady,
            _ => NodeStatus::Unknown,
        })
        .unwrap_or(NodeStatus::Unknown);

    let mut converted = Node::new(meta.name.unwrap_or_default(), ready, roles_from_labels(&labels));
    converted.conditions = convert_conditions(
        conditions
            .into_iter()
            .map(|c| (c.type_, c.status, c.reason, c.message)),
    );
    converted.resources = NodeResources {
        capacity: quantities(status.capacity.as_ref()),
        allocatable: quantities(status.allocatable.as_ref()),
        used: ResourceQuantities::default(),
    };
    converted.version = status.node_info.map(|i| i.kubelet_version);
    converted.created_at = meta.creation_timestamp.map(|t| t.0);
    converted
}

fn convert_namespace(namespace: KubeNamespace) -> Namespace {
    let meta = namespace.metadata;
    Namespace {
        name: meta.name.unwrap_or_default(),
        status: namespace
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string()),
        labels: meta.labels.unwrap_or_default(),
        created_at: meta.creation_timestamp.map(|t| t.0),
    }
}

/// "250m" -> 250, "2" -> 2000, "1.5" -> 1500
pub(crate) fn parse_cpu_millicores(quantity: &Quantity) -> u64 {
    let raw = quantity.0.trim();
    if let Some(milli) = raw.strip_suffix('m') {
        return milli.parse::<f64>().map(|v| v.max(0.0) as u64).unwrap_or(0);
    }
    raw.parse::<f64>()
        .map(|v| (v.max(0.0) * 1000.0).round() as u64)
        .unwrap_or(0)
}

/// Binary ("Ki", "Mi", "Gi", "Ti") and decimal ("k", "M", "G", "T") suffixes
pub(crate) fn parse_memory_bytes(quantity: &Quantity) -> u64 {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];
    let raw = quantity.0.trim();
    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number
                .parse::<f64>()
                .map(|v| (v.max(0.0) * multiplier) as u64)
                .unwrap_or(0);
        }
    }
    raw.parse::<f64>().map(|v| v.max(0.0) as u64).unwrap_or(0)
}
