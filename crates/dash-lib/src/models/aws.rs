//! Cloud compute entities: accounts, instances and operation results

use crate::error::{DashError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an account's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Unknown,
    Active,
    Error,
}

/// Per-verb group allow-lists for EC2 actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ec2Permissions {
    #[serde(default)]
    pub view: Vec<String>,
    #[serde(default)]
    pub start: Vec<String>,
    #[serde(default)]
    pub stop: Vec<String>,
}

/// Key/value resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Cloud provider credentials container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub key: String,
    pub name: String,
    pub region: String,
    pub access_key_id: String,
    #[serde(skip_serializing)]
    pub secret_access_key: String,
    pub permissions: Ec2Permissions,
    #[serde(default)]
    pub skip_list: Vec<String>,
    #[serde(default)]
    pub default_tags: Vec<Tag>,
    #[serde(default)]
    pub status: AccountStatus,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            key: account_key(&name),
            name,
            region: normalize_region(&region.into()),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            permissions: Ec2Permissions::default(),
            skip_list: Vec::new(),
            default_tags: Vec::new(),
            status: AccountStatus::Unknown,
        }
    }

    pub fn with_permissions(mut self, permissions: Ec2Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_skip_list(mut self, skip_list: Vec<String>) -> Self {
        self.skip_list = skip_list;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DashError::invalid("account name is required"));
        }
        if self.region.trim().is_empty() {
            return Err(DashError::invalid(format!(
                "account {} has no region",
                self.key
            )));
        }
        if self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty() {
            return Err(DashError::invalid(format!(
                "account {} is missing credentials",
                self.key
            )));
        }
        Ok(())
    }
}

/// Derive the account key: lowercase, whitespace mapped to underscore
pub fn account_key(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn normalize_region(region: &str) -> String {
    region.trim().to_lowercase()
}

pub fn normalize_instance_type(instance_type: &str) -> String {
    instance_type.trim().to_lowercase()
}

/// Accepts `i-` followed by 8 or 17 lowercase hex digits
pub fn validate_instance_id(id: &str) -> Result<()> {
    let invalid = || DashError::invalid(format!("invalid instance id: {}", id));
    let digits = id.strip_prefix("i-").ok_or_else(invalid)?;
    if !matches!(id.len(), 10 | 19) {
        return Err(invalid());
    }
    if !digits
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(invalid());
    }
    Ok(())
}

/// Symbolic instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateName {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl StateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::Pending => "pending",
            StateName::Running => "running",
            StateName::ShuttingDown => "shutting-down",
            StateName::Terminated => "terminated",
            StateName::Stopping => "stopping",
            StateName::Stopped => "stopped",
            StateName::Unknown => "unknown",
        }
    }

    /// Provider numeric code for the state
    pub fn code(&self) -> i32 {
        match self {
            StateName::Pending => 0,
            StateName::Running => 16,
            StateName::ShuttingDown => 32,
            StateName::Terminated => 48,
            StateName::Stopping => 64,
            StateName::Stopped => 80,
            StateName::Unknown => -1,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "pending" => StateName::Pending,
            "running" => StateName::Running,
            "shutting-down" => StateName::ShuttingDown,
            "terminated" => StateName::Terminated,
            "stopping" => StateName::Stopping,
            "stopped" => StateName::Stopped,
            _ => StateName::Unknown,
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub name: StateName,
    pub code: i32,
}

impl InstanceState {
    pub fn new(name: StateName) -> Self {
        Self {
            name,
            code: name.code(),
        }
    }
}

impl From<StateName> for InstanceState {
    fn from(name: StateName) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSpec {
    pub vcpus: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySpec {
    pub total_mib: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRef {
    pub id: String,
    pub name: String,
}

/// Cloud VM snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub name: String,
    pub state: InstanceState,
    pub platform: String,
    pub instance_type: String,
    pub cpu: CpuSpec,
    pub memory: MemorySpec,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub tags: Vec<Tag>,
    pub launch_time: Option<DateTime<Utc>>,
    pub region: String,
    pub security_groups: Vec<SecurityGroupRef>,
}

impl Instance {
    /// Minimal instance; the display name comes from the `Name` tag when one is set
    pub fn new(instance_id: impl Into<String>, state: StateName, tags: Vec<Tag>) -> Self {
        let instance_id = instance_id.into();
        Self {
            name: display_name(&tags, &instance_id),
            instance_id,
            state: state.into(),
            platform: "linux".to_string(),
            instance_type: String::new(),
            cpu: CpuSpec::default(),
            memory: MemorySpec::default(),
            public_ip: None,
            private_ip: None,
            tags,
            launch_time: None,
            region: String::new(),
            security_groups: Vec::new(),
        }
    }

    pub fn with_type(mut self, instance_type: &str) -> Self {
        self.instance_type = normalize_instance_type(instance_type);
        self
    }

    pub fn is_running(&self) -> bool {
        self.state.name == StateName::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state.name == StateName::Stopped
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(
            self.state.name,
            StateName::Pending | StateName::Stopping | StateName::ShuttingDown
        )
    }

    pub fn may_start(&self) -> bool {
        self.is_stopped()
    }

    pub fn may_stop(&self) -> bool {
        self.is_running()
    }

    pub fn may_restart(&self) -> bool {
        self.is_running()
    }
}

/// `Name` tag value, falling back to the instance id
pub fn display_name(tags: &[Tag], instance_id: &str) -> String {
    tags.iter()
        .find(|t| t.key == "Name" && !t.value.is_empty())
        .map(|t| t.value.clone())
        .unwrap_or_else(|| instance_id.to_string())
}

/// Lifecycle verbs accepted by the instance controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
}

impl InstanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceAction::Start => "start",
            InstanceAction::Stop => "stop",
            InstanceAction::Restart => "restart",
        }
    }

    pub fn parse(operation: &str) -> Result<Self> {
        match operation.trim().to_lowercase().as_str() {
            "start" => Ok(InstanceAction::Start),
            "stop" => Ok(InstanceAction::Stop),
            "restart" | "reboot" => Ok(InstanceAction::Restart),
            other => Err(DashError::invalid(format!(
                "unsupported operation: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw provider response for a state-changing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub instance_id: String,
    pub operation: String,
    pub current_state: StateName,
    pub previous_state: StateName,
    pub success: bool,
    pub message: String,
}

/// Normalized outcome of an instance operation as returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOperation {
    pub instance_id: String,
    pub operation: String,
    pub current_state: StateName,
    pub previous_state: StateName,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl InstanceOperation {
    pub fn from_result(result: OperationResult) -> Self {
        Self {
            instance_id: result.instance_id,
            operation: result.operation,
            current_state: result.current_state,
            previous_state: result.previous_state,
            success: result.success,
            message: result.message,
            timestamp: Utc::now(),
        }
    }

    /// Failed record for an item that never reached the provider
    pub fn rejected(
        instance_id: impl Into<String>,
        action: InstanceAction,
        state: StateName,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            operation: action.as_str().to_string(),
            current_state: state,
            previous_state: state,
            success: false,
            message: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTypeInfo {
    pub instance_type: String,
    pub vcpus: u32,
    pub memory_mib: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Monitoring series for one instance over a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub instance_id: String,
    pub period_secs: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cpu_utilization: Vec<Datapoint>,
    pub network_in: Vec<Datapoint>,
    pub network_out: Vec<Datapoint>,
}
