//! Provider capability interfaces
//!
//! The core only ever talks to the cloud and the orchestrator through the
//! [`CloudCompute`] and [`Orchestrator`] traits. Vendor SDK types never cross
//! this boundary; adapters translate them into [`crate::models`] entities and
//! [`DashError`] kinds.
//!
//! Implementations are produced per account / cluster by a factory, which the
//! [`crate::registry::ClientRegistry`] caches for the process lifetime.

mod kubernetes;
mod memory;

pub use kubernetes::{KubeOrchestrator, KubeOrchestratorFactory};
pub use memory::{InMemoryCloud, InMemoryCloudFactory, InMemoryOrchestrator, InMemoryOrchestratorFactory};

use crate::error::{DashError, Result};
use crate::observability::DashMetrics;
use crate::models::{
    Account, Cluster, Deployment, Instance, InstanceMetrics, InstanceTypeInfo, Namespace, Node,
    OperationResult, Pod, Region, StateName, Tag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// Pod template annotation that triggers a rolling restart; shared with kubectl
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Server-side selection for `describe_instances`
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub instance_ids: Vec<String>,
    pub states: Vec<StateName>,
    pub instance_types: Vec<String>,
    pub tags: Vec<Tag>,
    pub max_results: Option<u32>,
}

impl InstanceFilter {
    pub fn ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            instance_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSince {
    Seconds(i64),
    Time(DateTime<Utc>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogOptions {
    pub container: Option<String>,
    pub follow: bool,
    pub previous: bool,
    pub tail_lines: Option<i64>,
    pub since: Option<LogSince>,
    pub timestamps: bool,
}

/// Chunked pod log output
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Cloud compute capability bound to one account and region
#[async_trait]
pub trait CloudCompute: Send + Sync {
    async fn describe_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>>;

    /// Fails with `NotFound` if the instance does not exist
    async fn describe_instance(&self, instance_id: &str) -> Result<Instance>;

    async fn start_instances(&self, instance_ids: &[String]) -> Result<Vec<OperationResult>>;

    async fn stop_instances(&self, instance_ids: &[String]) -> Result<Vec<OperationResult>>;

    /// Reboot has no state-change response; results are synthesized as successful
    async fn reboot_instances(&self, instance_ids: &[String]) -> Result<Vec<OperationResult>>;

    async fn describe_regions(&self) -> Result<Vec<Region>>;

    async fn describe_instance_types(&self) -> Result<Vec<InstanceTypeInfo>>;

    async fn instance_metrics(
        &self,
        instance_id: &str,
        period_secs: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<InstanceMetrics>;

    async fn validate_credentials(&self) -> Result<()>;
}

/// Orchestrator capability bound to one cluster context.
///
/// An empty `namespace` argument on list calls means cluster-wide.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn get_node(&self, name: &str) -> Result<Node>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<Namespace>;
    /// Refuses system namespaces
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;
    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
    async fn pod_logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<LogStream>;

    async fn version(&self) -> Result<String>;
    async fn test_connection(&self) -> Result<()>;
}

/// Builds a cloud client from an account descriptor
#[async_trait]
pub trait CloudComputeFactory: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn CloudCompute>>;
}

/// Builds an orchestrator client from a cluster descriptor
#[async_trait]
pub trait OrchestratorFactory: Send + Sync {
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn Orchestrator>>;
}

/// Cloud factory for builds without a cloud SDK; every account fails to connect
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlinkedCloudFactory;

#[async_trait]
impl CloudComputeFactory for UnlinkedCloudFactory {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn CloudCompute>> {
        Err(DashError::fatal(format!(
            "no cloud provider linked for account {}",
            account.key
        )))
    }
}

/// Race a provider call against the caller's cancellation token
pub async fn cancellable<T, F>(token: &CancellationToken, call: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(DashError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DashError::Cancelled),
        result = call => result,
    }
}

/// [`cancellable`] plus latency and error-kind metrics for the call
pub async fn instrumented<T, F>(
    metrics: &DashMetrics,
    provider: &str,
    call: &str,
    token: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = cancellable(token, fut).await;
    metrics.observe_provider_call(provider, call, started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        metrics.inc_provider_error(provider, e.kind().as_str());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_passes_through_result() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { Ok::<_, DashError>(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_cancellable_short_circuits_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let value = cancellable(&token, async { Ok::<_, DashError>(7) }).await;
        assert_eq!(value, Err(DashError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellable_interrupts_in_flight_call() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let value = cancellable(&token, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, DashError>(1)
        })
        .await;
        assert_eq!(value, Err(DashError::Cancelled));
    }

    #[tokio::test]
    async fn test_unlinked_cloud_refuses_every_account() {
        let account = Account::new("prod", "us-east-1", "AKIAEXAMPLE", "bogus-secret");
        let err = match UnlinkedCloudFactory.connect(&account).await {
            Err(e) => e,
            Ok(_) => panic!("unlinked factory must not hand out a client"),
        };
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
        assert!(err.to_string().contains("no cloud provider linked for account prod"));
    }
}
