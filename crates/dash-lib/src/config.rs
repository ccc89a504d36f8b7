//! Control-plane configuration file
//!
//! A single YAML document lists cloud accounts, orchestrator clusters and the
//! catalog storage backend. Environment references (`${VAR}` and `$VAR`) are
//! expanded in the raw text before parsing; unset variables expand to nothing.

use crate::catalog::{FilesystemStorage, ManifestStorage};
use crate::error::{DashError, Result};
use crate::models::{Account, Cluster, DeploymentPermissions, Ec2Permissions, Tag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "./dash-ops.yaml";
pub const DEFAULT_CATALOG_DIRECTORY: &str = "./services";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashConfig {
    #[serde(default)]
    pub aws: Vec<AwsAccountConfig>,
    #[serde(default)]
    pub kubernetes: Vec<KubernetesConfig>,
    #[serde(default)]
    pub service_catalog: ServiceCatalogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsAccountConfig {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub permission: AwsPermissionConfig,
    #[serde(default)]
    pub ec2_config: Ec2Config,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsPermissionConfig {
    #[serde(default)]
    pub ec2: Ec2Permissions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ec2Config {
    #[serde(default)]
    pub skip_list: Vec<String>,
    #[serde(default)]
    pub default_tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesConfig {
    pub name: String,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    pub context: String,
    #[serde(default)]
    pub permission: KubernetesPermissionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesPermissionConfig {
    #[serde(default)]
    pub deployments: DeploymentPermissions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalogConfig {
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Filesystem,
    Github,
    S3,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default)]
    pub filesystem: Option<FilesystemStorageConfig>,
    #[serde(default)]
    pub github: Option<GithubStorageConfig>,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemStorageConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubStorageConfig {
    pub repository: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3StorageConfig {
    pub bucket: String,
}

/// Substitute `${VAR}` and `$VAR` references from `lookup`
pub fn expand_env_with<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some((start, '{')) => {
                chars.next();
                let rest = &raw[start + 1..];
                match rest.find('}') {
                    Some(end) => {
                        out.push_str(&lookup(&rest[..end]).unwrap_or_default());
                        for _ in 0..=rest[..end].chars().count() {
                            chars.next();
                        }
                    }
                    // Unterminated reference is kept literally
                    None => out.push_str("${"),
                }
            }
            Some((start, next)) if next == '_' || next.is_ascii_alphabetic() => {
                let len = raw[start..]
                    .find(|ch: char| !(ch == '_' || ch.is_ascii_alphanumeric()))
                    .unwrap_or(raw.len() - start);
                out.push_str(&lookup(&raw[start..start + len]).unwrap_or_default());
                for _ in 0..len {
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

pub fn expand_env(raw: &str) -> String {
    expand_env_with(raw, |name| std::env::var(name).ok())
}

/// Resolve a leading `~` against the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(path.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

impl DashConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(&expand_env(raw))
            .map_err(|e| DashError::invalid(format!("invalid configuration: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DashError::fatal(format!(
                "failed to read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::parse(&raw)?;
        info!(
            path = %path.display(),
            accounts = config.aws.len(),
            clusters = config.kubernetes.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validated account descriptors; keys must be unique
    pub fn accounts(&self) -> Result<Vec<Account>> {
        let mut seen = HashSet::new();
        let mut accounts = Vec::with_capacity(self.aws.len());
        for entry in &self.aws {
            let mut account = Account::new(
                &entry.name,
                &entry.region,
                &entry.access_key_id,
                &entry.secret_access_key,
            )
            .with_permissions(entry.permission.ec2.clone())
            .with_skip_list(entry.ec2_config.skip_list.clone());
            account.default_tags = entry.ec2_config.default_tags.clone();
            account.validate()?;

            if !seen.insert(account.key.clone()) {
                return Err(DashError::invalid(format!(
                    "duplicate account key {}",
                    account.key
                )));
            }
            accounts.push(account);
        }
        Ok(accounts)
    }

    /// Validated cluster descriptors; contexts must be unique
    pub fn clusters(&self) -> Result<Vec<Cluster>> {
        let mut seen = HashSet::new();
        let mut clusters = Vec::with_capacity(self.kubernetes.len());
        for entry in &self.kubernetes {
            let mut cluster = Cluster::new(&entry.name, &entry.context)
                .with_permissions(entry.permission.deployments.clone());
            cluster.kubeconfig = entry
                .kubeconfig
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(expand_home);
            cluster.validate()?;

            if !seen.insert(cluster.context.clone()) {
                return Err(DashError::invalid(format!(
                    "duplicate cluster context {}",
                    cluster.context
                )));
            }
            clusters.push(cluster);
        }
        Ok(clusters)
    }

    /// Build the configured manifest storage; only the filesystem backend ships
    pub fn catalog_storage(&self) -> Result<Arc<dyn ManifestStorage>> {
        let storage = &self.service_catalog.storage;
        match storage.provider {
            StorageProvider::Filesystem => {
                let directory = storage
                    .filesystem
                    .as_ref()
                    .map(|fs| fs.directory.trim())
                    .filter(|d| !d.is_empty())
                    .unwrap_or(DEFAULT_CATALOG_DIRECTORY);
                debug!(directory = %directory, "Using filesystem catalog storage");
                Ok(Arc::new(FilesystemStorage::new(expand_home(directory))))
            }
            StorageProvider::Github => Err(DashError::invalid(
                "catalog storage provider github is not supported by this build",
            )),
            StorageProvider::S3 => Err(DashError::invalid(
                "catalog storage provider s3 is not supported by this build",
            )),
        }
    }
}
