//! Control-plane core for cloud instances, orchestrator workloads and the
//! service catalog
//!
//! This crate provides:
//! - Provider capability traits with in-memory and Kubernetes implementations
//! - Client registry, permission gate and instance lifecycle control
//! - Filtering, pagination and batch coordination
//! - Service catalog storage, service-context resolution and health roll-up
//! - Configuration loading and observability

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod permission;
pub mod provider;
pub mod registry;

pub use catalog::{ServiceCatalog, ServiceResolver};
pub use cluster::ClusterController;
pub use config::DashConfig;
pub use error::{DashError, ErrorKind, Result};
pub use health::{
    ComponentHealth, HealthAggregator, HealthRegistry, HealthResponse, HealthStatus,
    ReadinessResponse,
};
pub use lifecycle::InstanceController;
pub use models::*;
pub use observability::{DashMetrics, StructuredLogger};
pub use permission::{Gate, RequestContext, UserContext, Verb};
pub use registry::ClientRegistry;
