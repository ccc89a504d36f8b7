//! In-memory providers
//!
//! Deterministic stand-ins for the cloud and orchestrator SDKs. They keep a
//! mutable inventory, apply the same state transitions the real providers do,
//! and record every call so tests can assert that rejected requests never
//! reached a provider.

use super::{
    CloudCompute, CloudComputeFactory, InstanceFilter, LogOptions, LogStream, Orchestrator,
    OrchestratorFactory, RESTARTED_AT_ANNOTATION,
};
use crate::error::{DashError, Result};
use crate::models::{
    is_system_namespace, Account, Cluster, Datapoint, Deployment, Instance, InstanceMetrics,
    InstanceTypeInfo, Namespace, Node, OperationResult, Pod, Region, StateName,
};
use crate::lifecycle::pricing;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Upper bound on synthesized metric datapoints per series
const MAX_DATAPOINTS: i64 = 1440;

const REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "sa-east-1",
    "ap-southeast-1",
];

fn poisoned() -> DashError {
    DashError::fatal("in-memory provider state poisoned")
}

/// Cloud compute provider backed by an in-process inventory
#[derive(Default)]
pub struct InMemoryCloud {
    instances: RwLock<Vec<Instance>>,
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<DashError>>,
    reject_credentials: bool,
}

impl InMemoryCloud {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: RwLock::new(instances),
            ..Default::default()
        }
    }

    /// Provider that fails credential validation
    pub fn with_rejected_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    /// Every subsequent call fails with `error` until cleared
    pub fn set_failure(&self, error: Option<DashError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    /// Names of the provider operations invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Overwrite an instance's state, as if changed out of band
    pub fn set_state(&self, instance_id: &str, state: StateName) {
        if let Ok(mut instances) = self.instances.write() {
            if let Some(instance) = instances.iter_mut().find(|i| i.instance_id == instance_id) {
                instance.state = state.into();
            }
        }
    }

    fn record(&self, call: impl Into<String>) -> Result<()> {
        self.calls.lock().map_err(|_| poisoned())?.push(call.into());
        match self.failure.lock().map_err(|_| poisoned())?.as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn transition(
        &self,
        operation: &str,
        instance_ids: &[String],
        from: StateName,
        to: StateName,
    ) -> Result<Vec<OperationResult>> {
        let mut instances = self.instances.write().map_err(|_| poisoned())?;

        for id in instance_ids {
            let instance = instances
                .iter()
                .find(|i| &i.instance_id == id)
                .ok_or_else(|| DashError::not_found(format!("instance {} not found", id)))?;
            if instance.state.name != from {
                return Err(DashError::precondition(format!(
                    "instance {} is in state {} and cannot {}",
                    id, instance.state.name, operation
                )));
            }
        }

        let mut results = Vec::with_capacity(instance_ids.len());
        for id in instance_ids {
            if let Some(instance) = instances.iter_mut().find(|i| &i.instance_id == id) {
                let previous = instance.state.name;
                instance.state = to.into();
                results.push(OperationResult {
                    instance_id: id.clone(),
                    operation: operation.to_string(),
                    current_state: to,
                    previous_state: previous,
                    success: true,
                    message: format!("instance {} {} initiated", id, operation),
                });
            }
        }
        Ok(results)
    }
}

fn matches_filter(instance: &Instance, filter: &InstanceFilter) -> bool {
    (filter.instance_ids.is_empty() || filter.instance_ids.contains(&instance.instance_id))
        && (filter.states.is_empty() || filter.states.contains(&instance.state.name))
        && (filter.instance_types.is_empty()
            || filter
                .instance_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&instance.instance_type)))
        && filter.tags.iter().all(|wanted| {
            instance
                .tags
                .iter()
                .any(|t| t.key == wanted.key && (wanted.value.is_empty() || t.value == wanted.value))
        })
}

#[async_trait]
impl CloudCompute for InMemoryCloud {
    async fn describe_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        self.record("describe_instances")?;
        let instances = self.instances.read().map_err(|_| poisoned())?;
        let mut matched: Vec<Instance> = instances
            .iter()
            .filter(|i| matches_filter(i, filter))
            .cloned()
            .collect();
        if let Some(max) = filter.max_results {
            matched.truncate(max as usize);
        }
        Ok(matched)
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Instance> {
        self.record(format!("describe_instance:{}", instance_id))?;
        self.instances
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .find(|i| i.instance_id == instance_id)
            .cloned()
            .ok_or_else(|| DashError::not_found(format!("instance {} not found", instance_id)))
    }

    async fn start_instances(&self, instance_ids: &[String]) -> Result<Vec<OperationResult>> {
        self.record(format!("start_instances:{}", instance_ids.join(",")))?;
        self.transition("start", instance_ids, StateName::Stopped, StateName::Pending)
    }

    async fn stop_instances(&self, instance_ids: &[String]) -> Result<Vec<OperationResult>> {
        self.record(format!("stop_instances:{}", instance_ids.join(",")))?;
        self.transition("stop", instance_ids, StateName::Running, StateName::Stopping)
    }

    async fn reboot_instances(&self, instance_ids: &[String]) -> Result<Vec<OperationResult>> {
        self.record(format!("reboot_instances:{}", instance_ids.join(",")))?;
        let instances = self.instances.read().map_err(|_| poisoned())?;
        instance_ids
            .iter()
            .map(|id| -> Result<OperationResult> {
                let state = instances
                    .iter()
                    .find(|i| &i.instance_id == id)
                    .map(|i| i.state.name)
                    .ok_or_else(|| DashError::not_found(format!("instance {} not found", id)))?;
                Ok(OperationResult {
                    instance_id: id.clone(),
                    operation: "reboot".to_string(),
                    current_state: state,
                    previous_state: state,
                    success: true,
                    message: format!("reboot requested for instance {}", id),
                })
            })
            .collect()
    }

    async fn describe_regions(&self) -> Result<Vec<Region>> {
        self.record("describe_regions")?;
        Ok(REGIONS
            .iter()
            .map(|r| Region {
                name: r.to_string(),
                endpoint: format!("ec2.{}.amazonaws.com", r),
            })
            .collect())
    }

    async fn describe_instance_types(&self) -> Result<Vec<InstanceTypeInfo>> {
        self.record("describe_instance_types")?;
        Ok(pricing::known_instance_types())
    }

    async fn instance_metrics(
        &self,
        instance_id: &str,
        period_secs: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<InstanceMetrics> {
        self.record(format!("instance_metrics:{}", instance_id))?;
        let instance = self.describe_instance(instance_id).await?;
        let period = i64::from(period_secs.max(60));
        let count = ((end - start).num_seconds() / period).clamp(0, MAX_DATAPOINTS);
        let utilization = if instance.is_running() { 12.5 } else { 0.0 };

        let series = |value: f64| -> Vec<Datapoint> {
            (0..count)
                .map(|n| Datapoint {
                    timestamp: start + Duration::seconds(n * period),
                    value,
                })
                .collect()
        };

        Ok(InstanceMetrics {
            instance_id: instance_id.to_string(),
            period_secs: period as u32,
            start,
            end,
            cpu_utilization: series(utilization),
            network_in: series(0.0),
            network_out: series(0.0),
        })
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.record("validate_credentials")?;
        if self.reject_credentials {
            return Err(DashError::denied("credentials rejected by provider"));
        }
        Ok(())
    }
}

/// Hands out one [`InMemoryCloud`] per account key
#[derive(Default)]
pub struct InMemoryCloudFactory {
    clouds: DashMap<String, Arc<InMemoryCloud>>,
    connects: AtomicUsize,
}

impl InMemoryCloudFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the provider returned for `account_key`
    pub fn insert(&self, account_key: impl Into<String>, cloud: Arc<InMemoryCloud>) {
        self.clouds.insert(account_key.into(), cloud);
    }

    pub fn get(&self, account_key: &str) -> Option<Arc<InMemoryCloud>> {
        self.clouds.get(account_key).map(|c| c.value().clone())
    }

    /// Number of clients constructed so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudComputeFactory for InMemoryCloudFactory {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn CloudCompute>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let cloud: Arc<dyn CloudCompute> = self
            .clouds
            .entry(account.key.clone())
            .or_insert_with(|| Arc::new(InMemoryCloud::default()))
            .clone();
        Ok(cloud)
    }
}

/// Orchestrator backed by an in-process object store
pub struct InMemoryOrchestrator {
    version: String,
    connected: bool,
    nodes: RwLock<Vec<Node>>,
    namespaces: RwLock<Vec<Namespace>>,
    deployments: RwLock<Vec<Deployment>>,
    pods: RwLock<Vec<Pod>>,
    logs: RwLock<HashMap<(String, String), String>>,
    restarts: RwLock<HashMap<(String, String), BTreeMap<String, String>>>,
    log_requests: Mutex<Vec<LogOptions>>,
    calls: Mutex<Vec<String>>,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self {
            version: "v1.28.2".to_string(),
            connected: true,
            nodes: RwLock::new(Vec::new()),
            namespaces: RwLock::new(vec![
                Namespace::new("default"),
                Namespace::new("kube-system"),
            ]),
            deployments: RwLock::new(Vec::new()),
            pods: RwLock::new(Vec::new()),
            logs: RwLock::new(HashMap::new()),
            restarts: RwLock::new(HashMap::new()),
            log_requests: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orchestrator whose API server cannot be reached
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Default::default()
        }
    }

    pub fn with_nodes(self, nodes: Vec<Node>) -> Self {
        if let Ok(mut guard) = self.nodes.write() {
            *guard = nodes;
        }
        self
    }

    pub fn with_deployments(self, deployments: Vec<Deployment>) -> Self {
        if let Ok(mut namespaces) = self.namespaces.write() {
            for d in &deployments {
                if !namespaces.iter().any(|n| n.name == d.namespace) {
                    namespaces.push(Namespace::new(d.namespace.clone()));
                }
            }
        }
        if let Ok(mut guard) = self.deployments.write() {
            *guard = deployments;
        }
        self
    }

    pub fn with_pods(self, pods: Vec<Pod>) -> Self {
        if let Ok(mut guard) = self.pods.write() {
            *guard = pods;
        }
        self
    }

    pub fn with_logs(self, namespace: &str, pod: &str, logs: &str) -> Self {
        if let Ok(mut guard) = self.logs.write() {
            guard.insert((namespace.to_string(), pod.to_string()), logs.to_string());
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Options received by every `pod_logs` call, in order
    pub fn log_requests(&self) -> Vec<LogOptions> {
        self.log_requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Pod template annotations written by restarts of `namespace/name`
    pub fn template_annotations(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.restarts
            .read()
            .ok()
            .and_then(|r| r.get(&(namespace.to_string(), name.to_string())).cloned())
            .unwrap_or_default()
    }

    fn record(&self, call: impl Into<String>) -> Result<()> {
        self.calls.lock().map_err(|_| poisoned())?.push(call.into());
        if !self.connected {
            return Err(DashError::transient("connection refused"));
        }
        Ok(())
    }
}

fn in_namespace(namespace: &str, candidate: &str) -> bool {
    namespace.is_empty() || namespace == candidate
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.record("list_nodes")?;
        Ok(self.nodes.read().map_err(|_| poisoned())?.clone())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.record(format!("get_node:{}", name))?;
        self.nodes
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| DashError::not_found(format!("node {} not found", name)))
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.record("list_namespaces")?;
        Ok(self.namespaces.read().map_err(|_| poisoned())?.clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.record(format!("get_namespace:{}", name))?;
        self.namespaces
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| DashError::not_found(format!("namespace {} not found", name)))
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<Namespace> {
        self.record(format!("create_namespace:{}", name))?;
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        if namespaces.iter().any(|n| n.name == name) {
            return Err(DashError::conflict(format!("namespace {} already exists", name)));
        }
        let namespace = Namespace {
            labels,
            created_at: Some(Utc::now()),
            ..Namespace::new(name)
        };
        namespaces.push(namespace.clone());
        Ok(namespace)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.record(format!("delete_namespace:{}", name))?;
        if is_system_namespace(name) {
            return Err(DashError::precondition(format!(
                "namespace {} is a system namespace and cannot be deleted",
                name
            )));
        }
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        let before = namespaces.len();
        namespaces.retain(|n| n.name != name);
        if namespaces.len() == before {
            return Err(DashError::not_found(format!("namespace {} not found", name)));
        }
        Ok(())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        self.record(format!("list_deployments:{}", namespace))?;
        Ok(self
            .deployments
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|d| in_namespace(namespace, &d.namespace))
            .cloned()
            .collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.record(format!("get_deployment:{}/{}", namespace, name))?;
        self.deployments
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .find(|d| d.namespace == namespace && d.name == name)
            .cloned()
            .ok_or_else(|| {
                DashError::not_found(format!("deployment {}/{} not found", namespace, name))
            })
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        self.record(format!("scale_deployment:{}/{}={}", namespace, name, replicas))?;
        let mut deployments = self.deployments.write().map_err(|_| poisoned())?;
        let deployment = deployments
            .iter_mut()
            .find(|d| d.namespace == namespace && d.name == name)
            .ok_or_else(|| {
                DashError::not_found(format!("deployment {}/{} not found", namespace, name))
            })?;
        deployment.replicas.desired = replicas;
        Ok(())
    }

    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("restart_deployment:{}/{}", namespace, name))?;
        let exists = self
            .deployments
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .any(|d| d.namespace == namespace && d.name == name);
        if !exists {
            return Err(DashError::not_found(format!(
                "deployment {}/{} not found",
                namespace, name
            )));
        }
        self.restarts
            .write()
            .map_err(|_| poisoned())?
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(RESTARTED_AT_ANNOTATION.to_string(), Utc::now().to_rfc3339());
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        self.record(format!("list_pods:{}", namespace))?;
        Ok(self
            .pods
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|p| in_namespace(namespace, &p.namespace))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.record(format!("get_pod:{}/{}", namespace, name))?;
        self.pods
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned()
            .ok_or_else(|| DashError::not_found(format!("pod {}/{} not found", namespace, name)))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_pod:{}/{}", namespace, name))?;
        let mut pods = self.pods.write().map_err(|_| poisoned())?;
        let before = pods.len();
        pods.retain(|p| !(p.namespace == namespace && p.name == name));
        if pods.len() == before {
            return Err(DashError::not_found(format!("pod {}/{} not found", namespace, name)));
        }
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<LogStream> {
        self.record(format!("pod_logs:{}/{}", namespace, pod))?;
        self.log_requests
            .lock()
            .map_err(|_| poisoned())?
            .push(options.clone());
        let logs = self
            .logs
            .read()
            .map_err(|_| poisoned())?
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .ok_or_else(|| DashError::not_found(format!("pod {}/{} not found", namespace, pod)))?;

        let lines: Vec<&str> = logs.lines().collect();
        let skip = match options.tail_lines {
            Some(tail) if tail >= 0 => lines.len().saturating_sub(tail as usize),
            _ => 0,
        };
        let chunks: Vec<Result<Vec<u8>>> = lines[skip..]
            .iter()
            .map(|line| Ok(format!("{}\n", line).into_bytes()))
            .collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn version(&self) -> Result<String> {
        self.record("version")?;
        Ok(self.version.clone())
    }

    async fn test_connection(&self) -> Result<()> {
        self.record("test_connection")
    }
}

/// Hands out one [`InMemoryOrchestrator`] per cluster context
#[derive(Default)]
pub struct InMemoryOrchestratorFactory {
    orchestrators: DashMap<String, Arc<InMemoryOrchestrator>>,
    connects: AtomicUsize,
}

impl InMemoryOrchestratorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: impl Into<String>, orchestrator: Arc<InMemoryOrchestrator>) {
        self.orchestrators.insert(context.into(), orchestrator);
    }

    pub fn get(&self, context: &str) -> Option<Arc<InMemoryOrchestrator>> {
        self.orchestrators.get(context).map(|o| o.value().clone())
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrchestratorFactory for InMemoryOrchestratorFactory {
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn Orchestrator>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let orchestrator: Arc<dyn Orchestrator> = self
            .orchestrators
            .entry(cluster.context.clone())
            .or_insert_with(|| Arc::new(InMemoryOrchestrator::default()))
            .clone();
        Ok(orchestrator)
    }
}
