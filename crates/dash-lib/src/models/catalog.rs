//! Service catalog manifests and the derived service context

use crate::error::{DashError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MANIFEST_API_VERSION: &str = "v1";
pub const MANIFEST_KIND: &str = "Service";
pub const MAX_SERVICE_NAME_LEN: usize = 100;

const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceTier {
    #[serde(rename = "TIER-1")]
    Tier1,
    #[serde(rename = "TIER-2")]
    Tier2,
    #[serde(rename = "TIER-3")]
    Tier3,
}

impl ServiceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTier::Tier1 => "TIER-1",
            ServiceTier::Tier2 => "TIER-2",
            ServiceTier::Tier3 => "TIER-3",
        }
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative service definition, stored as one YAML document per service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ServiceMetadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    pub name: String,
    pub tier: ServiceTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub description: String,
    pub team: TeamSpec,
    #[serde(default)]
    pub business: BusinessSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    pub github_team: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSpec {
    #[serde(default)]
    pub sla_target: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesSpec {
    #[serde(default)]
    pub environments: Vec<EnvironmentSpec>,
}

/// A (context, namespace) pair the service is deployed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,
    pub context: String,
    pub namespace: String,
    #[serde(default)]
    pub resources: EnvironmentResources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentResources {
    #[serde(default)]
    pub deployments: Vec<DeploymentSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub name: String,
    pub replicas: i32,
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceAmounts,
    #[serde(default)]
    pub limits: ResourceAmounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAmounts {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
}

impl ResourceAmounts {
    fn is_complete(&self) -> bool {
        !self.cpu.trim().is_empty() && !self.memory.trim().is_empty()
    }
}

impl ServiceManifest {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn environments(&self) -> &[EnvironmentSpec] {
        self.spec
            .kubernetes
            .as_ref()
            .map(|k| k.environments.as_slice())
            .unwrap_or(&[])
    }

    /// Fill `apiVersion` and `kind` when the author left them empty
    pub fn apply_defaults(&mut self) {
        if self.api_version.is_empty() {
            self.api_version = MANIFEST_API_VERSION.to_string();
        }
        if self.kind.is_empty() {
            self.kind = MANIFEST_KIND.to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_service_name(&self.metadata.name)?;
        let name = &self.metadata.name;

        if self.spec.description.trim().is_empty() {
            return Err(DashError::invalid(format!(
                "service {}: description is required",
                name
            )));
        }
        if self.spec.team.github_team.trim().is_empty() {
            return Err(DashError::invalid(format!(
                "service {}: team.githubTeam is required",
                name
            )));
        }

        for env in self.environments() {
            if env.context.trim().is_empty() || env.namespace.trim().is_empty() {
                return Err(DashError::invalid(format!(
                    "service {}: environment {} needs both context and namespace",
                    name, env.name
                )));
            }
            for deployment in &env.resources.deployments {
                if deployment.name.trim().is_empty() {
                    return Err(DashError::invalid(format!(
                        "service {}: environment {} declares a deployment without a name",
                        name, env.name
                    )));
                }
                if deployment.replicas <= 0 {
                    return Err(DashError::invalid(format!(
                        "service {}: deployment {} must declare at least one replica",
                        name, deployment.name
                    )));
                }
                if !deployment.resources.requests.is_complete()
                    || !deployment.resources.limits.is_complete()
                {
                    return Err(DashError::invalid(format!(
                        "service {}: deployment {} must set cpu and memory requests and limits",
                        name, deployment.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Non-empty, at most 100 characters, no path separators or shell metacharacters
pub fn validate_service_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DashError::invalid("service name is required"));
    }
    if name.chars().count() > MAX_SERVICE_NAME_LEN {
        return Err(DashError::invalid(format!(
            "service name exceeds {} characters",
            MAX_SERVICE_NAME_LEN
        )));
    }
    if name.contains(FORBIDDEN_NAME_CHARS) || name == "." || name == ".." {
        return Err(DashError::invalid(format!(
            "service name contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}

/// Binding between a live deployment and the manifest declaring it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub service_name: String,
    pub service_tier: String,
    pub environment: String,
    pub context: String,
    pub team: String,
    pub description: String,
    pub found: bool,
}

impl ServiceContext {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn matched(manifest: &ServiceManifest, env: &EnvironmentSpec) -> Self {
        Self {
            service_name: manifest.metadata.name.clone(),
            service_tier: manifest.metadata.tier.as_str().to_string(),
            environment: env.name.clone(),
            context: env.context.clone(),
            team: manifest.spec.team.github_team.clone(),
            description: manifest.spec.description.clone(),
            found: true,
        }
    }
}

/// Flattened forward-lookup entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRef {
    pub name: String,
    pub namespace: String,
    pub context: String,
    pub environment: String,
}
