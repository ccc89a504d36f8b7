//! Service catalog store
//!
//! [`ManifestStorage`] is the raw CRUD contract a backend implements.
//! [`ServiceCatalog`] sits on top and owns the audit stamping: creation time,
//! author, version counter and defaults. Updates are last-writer-wins.

mod filesystem;
pub mod resolver;

pub use filesystem::FilesystemStorage;
pub use resolver::{deployments_in, resolve_in, ResolveQuery, ServiceResolver};

use crate::error::{DashError, Result, ResultExt};
use crate::models::{validate_service_name, ServiceManifest};
use crate::observability::{DashMetrics, StructuredLogger};
use crate::permission::RequestContext;
use crate::provider::cancellable;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// CRUD over named manifests
#[async_trait]
pub trait ManifestStorage: Send + Sync {
    /// `None` when no manifest has that name
    async fn read(&self, name: &str) -> Result<Option<ServiceManifest>>;

    /// Create or replace
    async fn write(&self, manifest: &ServiceManifest) -> Result<()>;

    /// `false` when nothing was there to remove
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Every readable manifest; malformed entries are skipped
    async fn list(&self) -> Result<Vec<ServiceManifest>>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Check the backend is reachable
    async fn probe(&self) -> Result<()>;
}

pub struct ServiceCatalog {
    storage: Arc<dyn ManifestStorage>,
    metrics: DashMetrics,
    logger: StructuredLogger,
}

impl ServiceCatalog {
    pub fn new(storage: Arc<dyn ManifestStorage>) -> Self {
        Self {
            storage,
            metrics: DashMetrics::new(),
            logger: StructuredLogger::new("catalog"),
        }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        mut manifest: ServiceManifest,
    ) -> Result<ServiceManifest> {
        manifest.apply_defaults();
        manifest.validate()?;
        let name = manifest.name().to_string();

        if cancellable(&ctx.cancel, self.storage.exists(&name)).await? {
            return Err(DashError::conflict(format!("service {} already exists", name)));
        }

        let now = Utc::now();
        manifest.metadata.created_at = Some(now);
        manifest.metadata.updated_at = Some(now);
        manifest.metadata.created_by = Some(ctx.actor().to_string());
        manifest.metadata.updated_by = Some(ctx.actor().to_string());
        manifest.metadata.version = 1;

        cancellable(&ctx.cancel, self.storage.write(&manifest))
            .await
            .context_op(|| format!("create service {}", name))?;

        self.metrics.inc_catalog_write("create");
        self.logger.log_catalog_change(ctx.actor(), &name, "create", 1);
        Ok(manifest)
    }

    /// Replace the manifest named `name`, keeping its creation stamp
    pub async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        mut manifest: ServiceManifest,
    ) -> Result<ServiceManifest> {
        validate_service_name(name)?;
        if manifest.metadata.name.is_empty() {
            manifest.metadata.name = name.to_string();
        }
        if manifest.metadata.name != name {
            return Err(DashError::invalid(format!(
                "manifest name {} does not match service {}",
                manifest.metadata.name, name
            )));
        }
        manifest.apply_defaults();
        manifest.validate()?;

        let existing = cancellable(&ctx.cancel, self.storage.read(name))
            .await
            .context_op(|| format!("update service {}", name))?
            .ok_or_else(|| DashError::not_found(format!("service {} not found", name)))?;

        let mut now = Utc::now();
        if let Some(previous) = existing.metadata.updated_at {
            if now <= previous {
                now = previous + Duration::nanoseconds(1);
            }
        }
        manifest.metadata.created_at = existing.metadata.created_at;
        manifest.metadata.created_by = existing.metadata.created_by;
        manifest.metadata.updated_at = Some(now);
        manifest.metadata.updated_by = Some(ctx.actor().to_string());
        manifest.metadata.version = existing.metadata.version + 1;

        cancellable(&ctx.cancel, self.storage.write(&manifest))
            .await
            .context_op(|| format!("update service {}", name))?;

        self.metrics.inc_catalog_write("update");
        self.logger
            .log_catalog_change(ctx.actor(), name, "update", manifest.metadata.version);
        Ok(manifest)
    }

    pub async fn delete(&self, ctx: &RequestContext, name: &str) -> Result<()> {
        validate_service_name(name)?;
        let removed = cancellable(&ctx.cancel, self.storage.remove(name))
            .await
            .context_op(|| format!("delete service {}", name))?;
        if !removed {
            return Err(DashError::not_found(format!("service {} not found", name)));
        }

        self.metrics.inc_catalog_write("delete");
        self.logger.log_catalog_change(ctx.actor(), name, "delete", 0);
        Ok(())
    }

    pub async fn get(&self, ctx: &RequestContext, name: &str) -> Result<ServiceManifest> {
        validate_service_name(name)?;
        cancellable(&ctx.cancel, self.storage.read(name))
            .await?
            .ok_or_else(|| DashError::not_found(format!("service {} not found", name)))
    }

    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<ServiceManifest>> {
        let manifests = cancellable(&ctx.cancel, self.storage.list())
            .await
            .context_op(|| "list services")?;
        self.metrics.set_catalog_services(manifests.len() as i64);
        Ok(manifests)
    }

    pub async fn exists(&self, ctx: &RequestContext, name: &str) -> Result<bool> {
        validate_service_name(name)?;
        cancellable(&ctx.cancel, self.storage.exists(name)).await
    }

    pub async fn probe(&self) -> Result<()> {
        self.storage.probe().await
    }
}
