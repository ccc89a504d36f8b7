//! Process-wide cache of provider clients
//!
//! Cloud clients are keyed by account key and region, orchestrator clients by
//! cluster context. Lookups are read-through: a miss builds the client through
//! the configured factory and stores it. Two callers racing on the same key
//! may both build a client; only the first insert is kept and every caller
//! receives the stored one.

use crate::error::{DashError, Result};
use crate::models::{normalize_region, Account, Cluster};
use crate::observability::DashMetrics;
use crate::provider::{CloudCompute, CloudComputeFactory, Orchestrator, OrchestratorFactory};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ClientRegistry {
    cloud_factory: Arc<dyn CloudComputeFactory>,
    orchestrator_factory: Arc<dyn OrchestratorFactory>,
    cloud: DashMap<String, Arc<dyn CloudCompute>>,
    orchestrators: DashMap<String, Arc<dyn Orchestrator>>,
    metrics: DashMetrics,
}

impl ClientRegistry {
    pub fn new(
        cloud_factory: Arc<dyn CloudComputeFactory>,
        orchestrator_factory: Arc<dyn OrchestratorFactory>,
    ) -> Self {
        Self {
            cloud_factory,
            orchestrator_factory,
            cloud: DashMap::new(),
            orchestrators: DashMap::new(),
            metrics: DashMetrics::new(),
        }
    }

    /// Cloud client for `account`, bound to `region` or the account's default region
    pub async fn cloud_client(
        &self,
        account: Option<&Account>,
        region: Option<&str>,
    ) -> Result<Arc<dyn CloudCompute>> {
        let account =
            account.ok_or_else(|| DashError::invalid("account descriptor is required"))?;
        let region = region
            .map(normalize_region)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| account.region.clone());
        let key = format!("{}/{}", account.key, region);

        if let Some(client) = self.cloud.get(&key) {
            return Ok(client.value().clone());
        }

        debug!(account = %account.key, region = %region, "Building cloud client");
        let mut bound = account.clone();
        bound.region = region;
        let client = self.cloud_factory.connect(&bound).await?;

        let stored = self.cloud.entry(key).or_insert(client).value().clone();
        self.update_gauge();
        info!(account = %account.key, region = %bound.region, "Cloud client cached");
        Ok(stored)
    }

    /// Orchestrator client for `cluster`, keyed by its context
    pub async fn orchestrator(&self, cluster: Option<&Cluster>) -> Result<Arc<dyn Orchestrator>> {
        let cluster =
            cluster.ok_or_else(|| DashError::invalid("cluster descriptor is required"))?;

        if let Some(client) = self.orchestrators.get(&cluster.context) {
            return Ok(client.value().clone());
        }

        debug!(context = %cluster.context, "Building orchestrator client");
        let client = self.orchestrator_factory.connect(cluster).await?;

        let stored = self
            .orchestrators
            .entry(cluster.context.clone())
            .or_insert(client)
            .value()
            .clone();
        self.update_gauge();
        info!(context = %cluster.context, "Orchestrator client cached");
        Ok(stored)
    }

    /// Number of cached clients of both kinds
    pub fn len(&self) -> usize {
        self.cloud.len() + self.orchestrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update_gauge(&self) {
        self.metrics.set_cached_clients(self.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InMemoryCloudFactory, InMemoryOrchestratorFactory};

    fn registry() -> (ClientRegistry, Arc<InMemoryCloudFactory>, Arc<InMemoryOrchestratorFactory>) {
        let cloud = Arc::new(InMemoryCloudFactory::new());
        let orchestrators = Arc::new(InMemoryOrchestratorFactory::new());
        (
            ClientRegistry::new(cloud.clone(), orchestrators.clone()),
            cloud,
            orchestrators,
        )
    }

    #[tokio::test]
    async fn test_same_key_returns_same_client() {
        let (registry, factory, _) = registry();
        let account = Account::new("prod", "us-east-1", "AKIA", "secret");

        let first = registry.cloud_client(Some(&account), None).await.unwrap();
        let second = registry.cloud_client(Some(&account), None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connect_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_region_override_is_a_separate_entry() {
        let (registry, _, _) = registry();
        let account = Account::new("prod", "us-east-1", "AKIA", "secret");

        registry.cloud_client(Some(&account), None).await.unwrap();
        registry
            .cloud_client(Some(&account), Some("EU-WEST-1 "))
            .await
            .unwrap();
        registry
            .cloud_client(Some(&account), Some("us-east-1"))
            .await
            .unwrap();

        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_invalid_argument() {
        let (registry, _, _) = registry();
        assert!(matches!(
            registry.cloud_client(None, None).await,
            Err(DashError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.orchestrator(None).await,
            Err(DashError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_client() {
        let (registry, _, _) = registry();
        let registry = Arc::new(registry);
        let cluster = Cluster::new("local", "docker-desktop");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let cluster = cluster.clone();
            handles.push(tokio::spawn(async move {
                registry.orchestrator(Some(&cluster)).await.unwrap()
            }));
        }

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }
        let stored = registry.orchestrator(Some(&cluster)).await.unwrap();
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &stored)));
    }
}
