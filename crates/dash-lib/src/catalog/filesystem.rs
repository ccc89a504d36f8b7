//! Directory-backed manifest storage: one `<name>.yaml` file per service

use super::ManifestStorage;
use crate::error::{DashError, Result};
use crate::models::{validate_service_name, ServiceManifest};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const EXTENSION: &str = "yaml";

/// Storage errors never expose the directory layout to callers
fn storage_error(action: &str, e: io::Error) -> DashError {
    DashError::fatal(format!("catalog storage failed to {}: {}", action, e.kind()))
}

pub struct FilesystemStorage {
    directory: PathBuf,
}

impl FilesystemStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_service_name(name)?;
        Ok(self.directory.join(format!("{}.{}", name, EXTENSION)))
    }

    async fn parse(path: &Path) -> io::Result<std::result::Result<ServiceManifest, serde_yaml::Error>> {
        let raw = fs::read_to_string(path).await?;
        Ok(serde_yaml::from_str(&raw))
    }
}

#[async_trait]
impl ManifestStorage for FilesystemStorage {
    async fn read(&self, name: &str) -> Result<Option<ServiceManifest>> {
        let path = self.path_for(name)?;
        match Self::parse(&path).await {
            Ok(Ok(manifest)) => Ok(Some(manifest)),
            Ok(Err(e)) => {
                warn!(service = %name, error = %e, "Malformed service manifest");
                Err(DashError::fatal(format!("service manifest {} is malformed", name)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read manifest", e)),
        }
    }

    async fn write(&self, manifest: &ServiceManifest) -> Result<()> {
        let path = self.path_for(manifest.name())?;
        let body = serde_yaml::to_string(manifest)
            .map_err(|e| DashError::fatal(format!("failed to encode manifest: {}", e)))?;

        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| storage_error("create catalog directory", e))?;

        let tmp = self
            .directory
            .join(format!(".{}.{}.tmp", manifest.name(), EXTENSION));
        fs::write(&tmp, body)
            .await
            .map_err(|e| storage_error("write manifest", e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("commit manifest", e))?;

        debug!(service = %manifest.name(), "Manifest written");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error("delete manifest", e)),
        }
    }

    async fn list(&self) -> Result<Vec<ServiceManifest>> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list manifests", e)),
        };

        let mut manifests = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list manifests", e))?
        {
            let path = entry.path();
            let is_manifest = path.extension().is_some_and(|ext| ext == EXTENSION)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_manifest {
                continue;
            }

            match Self::parse(&path).await {
                Ok(Ok(manifest)) => manifests.push(manifest),
                Ok(Err(e)) => {
                    warn!(file = ?path.file_name(), error = %e, "Skipping malformed manifest");
                }
                Err(e) => {
                    warn!(file = ?path.file_name(), error = %e, "Skipping unreadable manifest");
                }
            }
        }

        manifests.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(manifests)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| storage_error("probe manifest", e))
    }

    async fn probe(&self) -> Result<()> {
        match fs::metadata(&self.directory).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DashError::fatal("catalog storage is not a directory")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.directory)
                    .await
                    .map_err(|e| storage_error("create catalog directory", e))
            }
            Err(e) => Err(storage_error("probe catalog", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures, ServiceTier};
    use tempfile::TempDir;

    fn storage() -> (FilesystemStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        (FilesystemStorage::new(dir.path().join("services")), dir)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (storage, _dir) = storage();
        let manifest = fixtures::manifest("billing", ServiceTier::Tier2, vec![]);

        storage.write(&manifest).await.unwrap();

        assert!(storage.directory().join("billing.yaml").exists());
        assert_eq!(storage.read("billing").await.unwrap(), Some(manifest));
        assert!(storage.exists("billing").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let (storage, _dir) = storage();
        assert_eq!(storage.read("ghost").await.unwrap(), None);
        assert!(!storage.exists("ghost").await.unwrap());
        assert!(!storage.remove("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_skips_malformed_and_foreign_files() {
        let (storage, _dir) = storage();
        storage
            .write(&fixtures::manifest("b-svc", ServiceTier::Tier1, vec![]))
            .await
            .unwrap();
        storage
            .write(&fixtures::manifest("a-svc", ServiceTier::Tier3, vec![]))
            .await
            .unwrap();
        std::fs::write(storage.directory().join("broken.yaml"), "metadata: [unclosed").unwrap();
        std::fs::write(storage.directory().join("notes.txt"), "ignore me").unwrap();

        let names: Vec<String> = storage
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.metadata.name)
            .collect();
        assert_eq!(names, vec!["a-svc", "b-svc"]);
    }

    #[tokio::test]
    async fn test_list_of_missing_directory_is_empty() {
        let (storage, _dir) = storage();
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (storage, _dir) = storage();
        assert!(matches!(
            storage.read("../etc/passwd").await,
            Err(DashError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_creates_directory() {
        let (storage, _dir) = storage();
        storage.probe().await.unwrap();
        assert!(storage.directory().is_dir());
    }
}
