//! Deployment to service lookups over the catalog
//!
//! Resolution is a pure scan over a manifest snapshot, so a listing of many
//! deployments costs one catalog read however long it is.

use super::ServiceCatalog;
use crate::error::{DashError, Result};
use crate::models::{Deployment, DeploymentRef, ServiceContext, ServiceManifest};
use crate::observability::DashMetrics;
use crate::permission::RequestContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Which deployment to resolve; empty `namespace` or `context` match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveQuery {
    pub deployment: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub context: String,
}

impl ResolveQuery {
    pub fn new(deployment: &str, namespace: &str, context: &str) -> Self {
        Self {
            deployment: deployment.to_string(),
            namespace: namespace.to_string(),
            context: context.to_string(),
        }
    }
}

/// First manifest environment declaring the deployment, or `found = false`
pub fn resolve_in(manifests: &[ServiceManifest], query: &ResolveQuery) -> ServiceContext {
    for manifest in manifests {
        for env in manifest.environments() {
            if !query.context.is_empty() && env.context != query.context {
                continue;
            }
            if !query.namespace.is_empty() && env.namespace != query.namespace {
                continue;
            }
            if env
                .resources
                .deployments
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(&query.deployment))
            {
                return ServiceContext::matched(manifest, env);
            }
        }
    }
    ServiceContext::not_found()
}

/// Flatten a manifest's environments into deployment references
pub fn deployments_in(manifest: &ServiceManifest) -> Vec<DeploymentRef> {
    manifest
        .environments()
        .iter()
        .flat_map(|env| {
            env.resources.deployments.iter().map(move |d| DeploymentRef {
                name: d.name.clone(),
                namespace: env.namespace.clone(),
                context: env.context.clone(),
                environment: env.name.clone(),
            })
        })
        .collect()
}

pub struct ServiceResolver {
    catalog: Arc<ServiceCatalog>,
    metrics: DashMetrics,
}

impl ServiceResolver {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        Self {
            catalog,
            metrics: DashMetrics::new(),
        }
    }

    fn count(&self, context: &ServiceContext) {
        self.metrics
            .inc_context_lookup(if context.found { "found" } else { "not_found" });
    }

    pub async fn resolve(&self, ctx: &RequestContext, query: &ResolveQuery) -> Result<ServiceContext> {
        if query.deployment.trim().is_empty() {
            return Err(DashError::invalid("deployment name is required"));
        }
        let manifests = self.catalog.list(ctx).await?;
        let context = resolve_in(&manifests, query);
        self.count(&context);
        Ok(context)
    }

    /// Resolve every query against a single catalog read
    pub async fn resolve_many(
        &self,
        ctx: &RequestContext,
        queries: &[ResolveQuery],
    ) -> Result<Vec<ServiceContext>> {
        let manifests = self.catalog.list(ctx).await?;
        Ok(queries
            .iter()
            .map(|q| {
                let context = resolve_in(&manifests, q);
                self.count(&context);
                context
            })
            .collect())
    }

    pub async fn deployments_of(&self, ctx: &RequestContext, service: &str) -> Result<Vec<DeploymentRef>> {
        let manifest = self.catalog.get(ctx, service).await?;
        Ok(deployments_in(&manifest))
    }

    /// Attach service context to each deployment; catalog failures degrade
    /// every entry to `found = false` instead of failing the listing
    pub async fn enrich(&self, ctx: &RequestContext, cluster_context: &str, deployments: &mut [Deployment]) {
        let queries: Vec<ResolveQuery> = deployments
            .iter()
            .map(|d| ResolveQuery::new(&d.name, &d.namespace, cluster_context))
            .collect();

        let contexts = match self.resolve_many(ctx, &queries).await {
            Ok(contexts) => contexts,
            Err(e) => {
                warn!(context = %cluster_context, error = %e, "Service context enrichment unavailable");
                self.metrics.inc_context_lookup("error");
                vec![ServiceContext::not_found(); deployments.len()]
            }
        };

        for (deployment, context) in deployments.iter_mut().zip(contexts) {
            deployment.service_context = Some(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FilesystemStorage, ManifestStorage};
    use crate::models::{fixtures, ReplicaStatus, ServiceTier};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn auth_manifest() -> ServiceManifest {
        fixtures::manifest(
            "user-authentication",
            ServiceTier::Tier1,
            vec![
                fixtures::environment(
                    "local",
                    "docker-desktop",
                    "auth",
                    vec![fixtures::deployment("auth-api", 1), fixtures::deployment("auth-worker", 1)],
                ),
                fixtures::environment(
                    "prod",
                    "prod-eks",
                    "auth",
                    vec![fixtures::deployment("auth-api", 3)],
                ),
            ],
        )
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let manifests = vec![auth_manifest()];
        let context = resolve_in(
            &manifests,
            &ResolveQuery::new("AUTH-API", "auth", "docker-desktop"),
        );

        assert!(context.found);
        assert_eq!(context.service_name, "user-authentication");
        assert_eq!(context.service_tier, "TIER-1");
        assert_eq!(context.environment, "local");
        assert_eq!(context.team, "platform");
    }

    #[test]
    fn test_context_selects_environment() {
        let manifests = vec![auth_manifest()];
        let context = resolve_in(&manifests, &ResolveQuery::new("auth-api", "auth", "prod-eks"));
        assert_eq!(context.environment, "prod");
    }

    #[test]
    fn test_empty_filters_match_any_environment() {
        let manifests = vec![auth_manifest()];
        let context = resolve_in(&manifests, &ResolveQuery::new("auth-api", "", ""));
        assert_eq!(context.environment, "local");
    }

    #[test]
    fn test_mismatched_namespace_is_not_found() {
        let manifests = vec![auth_manifest()];
        let context = resolve_in(&manifests, &ResolveQuery::new("auth-api", "payments", ""));
        assert_eq!(context, ServiceContext::not_found());
    }

    #[test]
    fn test_manifest_without_kubernetes_is_ignored() {
        let mut manifest = auth_manifest();
        manifest.spec.kubernetes = None;
        let context = resolve_in(&[manifest], &ResolveQuery::new("auth-api", "", ""));
        assert!(!context.found);
    }

    #[test]
    fn test_deployments_in_flattens_environments() {
        let refs = deployments_in(&auth_manifest());
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[2].context, "prod-eks");
        assert_eq!(refs[2].environment, "prod");
    }

    #[tokio::test]
    async fn test_round_trip_through_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(ServiceCatalog::new(Arc::new(FilesystemStorage::new(dir.path()))));
        catalog
            .create(&RequestContext::internal(), auth_manifest())
            .await
            .unwrap();
        let resolver = ServiceResolver::new(catalog);

        let ctx = RequestContext::internal();
        let context = resolver
            .resolve(&ctx, &ResolveQuery::new("auth-worker", "auth", "docker-desktop"))
            .await
            .unwrap();
        assert_eq!(context.service_name, "user-authentication");

        let many = resolver
            .resolve_many(
                &ctx,
                &[
                    ResolveQuery::new("auth-api", "auth", "prod-eks"),
                    ResolveQuery::new("unknown", "", ""),
                ],
            )
            .await
            .unwrap();
        assert!(many[0].found);
        assert!(!many[1].found);
    }

    struct BrokenStorage;

    #[async_trait]
    impl ManifestStorage for BrokenStorage {
        async fn read(&self, _: &str) -> Result<Option<ServiceManifest>> {
            Err(DashError::transient("storage offline"))
        }
        async fn write(&self, _: &ServiceManifest) -> Result<()> {
            Err(DashError::transient("storage offline"))
        }
        async fn remove(&self, _: &str) -> Result<bool> {
            Err(DashError::transient("storage offline"))
        }
        async fn list(&self) -> Result<Vec<ServiceManifest>> {
            Err(DashError::transient("storage offline"))
        }
        async fn exists(&self, _: &str) -> Result<bool> {
            Err(DashError::transient("storage offline"))
        }
        async fn probe(&self) -> Result<()> {
            Err(DashError::transient("storage offline"))
        }
    }

    #[tokio::test]
    async fn test_enrich_degrades_when_catalog_unavailable() {
        let resolver = ServiceResolver::new(Arc::new(ServiceCatalog::new(Arc::new(BrokenStorage))));
        let mut deployments = vec![Deployment::new("auth-api", "auth", ReplicaStatus::default())];

        resolver
            .enrich(&RequestContext::internal(), "docker-desktop", &mut deployments)
            .await;

        assert_eq!(deployments[0].service_context, Some(ServiceContext::not_found()));
    }
}
