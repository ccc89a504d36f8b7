//! Observability infrastructure for the control plane
//!
//! Provides:
//! - Prometheus metrics (provider call latency, cached clients, operation outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for provider round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static GLOBAL_METRICS: OnceLock<DashMetricsInner> = OnceLock::new();

struct DashMetricsInner {
    provider_latency_seconds: HistogramVec,
    provider_errors: IntCounterVec,
    cached_clients: IntGauge,
    instance_operations: IntCounterVec,
    deployment_operations: IntCounterVec,
    permission_denials: IntCounterVec,
    catalog_writes: IntCounterVec,
    context_lookups: IntCounterVec,
    catalog_services: IntGauge,
}

impl DashMetricsInner {
    fn new() -> Self {
        Self {
            provider_latency_seconds: register_histogram_vec!(
                "dash_ops_provider_latency_seconds",
                "Time spent waiting on cloud and orchestrator calls",
                &["provider", "call"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register provider_latency_seconds"),

            provider_errors: register_int_counter_vec!(
                "dash_ops_provider_errors_total",
                "Provider calls that returned an error, by error kind",
                &["provider", "kind"]
            )
            .expect("Failed to register provider_errors"),

            cached_clients: register_int_gauge!(
                "dash_ops_cached_clients",
                "Provider clients currently held by the registry"
            )
            .expect("Failed to register cached_clients"),

            instance_operations: register_int_counter_vec!(
                "dash_ops_instance_operations_total",
                "Per-instance start/stop/restart outcomes",
                &["operation", "outcome"]
            )
            .expect("Failed to register instance_operations"),

            deployment_operations: register_int_counter_vec!(
                "dash_ops_deployment_operations_total",
                "Deployment scale and restart outcomes",
                &["operation", "outcome"]
            )
            .expect("Failed to register deployment_operations"),

            permission_denials: register_int_counter_vec!(
                "dash_ops_permission_denials_total",
                "Requests refused by the permission gate",
                &["verb"]
            )
            .expect("Failed to register permission_denials"),

            catalog_writes: register_int_counter_vec!(
                "dash_ops_catalog_writes_total",
                "Service manifest writes by action",
                &["action"]
            )
            .expect("Failed to register catalog_writes"),

            context_lookups: register_int_counter_vec!(
                "dash_ops_service_context_lookups_total",
                "Deployment to service resolutions by result",
                &["result"]
            )
            .expect("Failed to register context_lookups"),

            catalog_services: register_int_gauge!(
                "dash_ops_catalog_services",
                "Service manifests seen on the last catalog listing"
            )
            .expect("Failed to register catalog_services"),
        }
    }
}

/// Control plane metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct DashMetrics {
    _private: (),
}

impl Default for DashMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DashMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DashMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DashMetricsInner {
        GLOBAL_METRICS.get_or_init(DashMetricsInner::new)
    }

    pub fn observe_provider_call(&self, provider: &str, call: &str, duration_secs: f64) {
        self.inner()
            .provider_latency_seconds
            .with_label_values(&[provider, call])
            .observe(duration_secs);
    }

    pub fn inc_provider_error(&self, provider: &str, kind: &str) {
        self.inner()
            .provider_errors
            .with_label_values(&[provider, kind])
            .inc();
    }

    pub fn set_cached_clients(&self, count: i64) {
        self.inner().cached_clients.set(count);
    }

    pub fn record_instance_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .instance_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_deployment_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .deployment_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn inc_permission_denied(&self, verb: &str) {
        self.inner()
            .permission_denials
            .with_label_values(&[verb])
            .inc();
    }

    pub fn inc_catalog_write(&self, action: &str) {
        self.inner().catalog_writes.with_label_values(&[action]).inc();
    }

    /// `result` is one of found, not_found, error
    pub fn inc_context_lookup(&self, result: &str) {
        self.inner().context_lookups.with_label_values(&[result]).inc();
    }

    pub fn set_catalog_services(&self, count: i64) {
        self.inner().catalog_services.set(count);
    }
}

/// Structured logger for control plane events
///
/// Mutating operations are logged with the acting user so the JSON log
/// stream doubles as an audit trail.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log one instance lifecycle outcome
    pub fn log_instance_operation(
        &self,
        user: &str,
        account: &str,
        instance_id: &str,
        operation: &str,
        success: bool,
        message: &str,
    ) {
        if success {
            info!(
                event = "instance_operation",
                component = %self.component,
                user = %user,
                account = %account,
                instance_id = %instance_id,
                operation = %operation,
                success = true,
                "Instance operation accepted"
            );
        } else {
            warn!(
                event = "instance_operation",
                component = %self.component,
                user = %user,
                account = %account,
                instance_id = %instance_id,
                operation = %operation,
                success = false,
                message = %message,
                "Instance operation failed"
            );
        }
    }

    /// Log a batch summary
    pub fn log_batch(
        &self,
        user: &str,
        account: &str,
        operation: &str,
        total: usize,
        successful: usize,
        duration_ms: i64,
    ) {
        info!(
            event = "batch_operation",
            component = %self.component,
            user = %user,
            account = %account,
            operation = %operation,
            total = total,
            successful = successful,
            failed = total - successful,
            duration_ms = duration_ms,
            "Batch operation completed"
        );
    }

    pub fn log_deployment_operation(
        &self,
        user: &str,
        context: &str,
        namespace: &str,
        deployment: &str,
        operation: &str,
        detail: &str,
    ) {
        info!(
            event = "deployment_operation",
            component = %self.component,
            user = %user,
            context = %context,
            namespace = %namespace,
            deployment = %deployment,
            operation = %operation,
            detail = %detail,
            "Deployment operation applied"
        );
    }

    pub fn log_namespace_change(&self, user: &str, context: &str, namespace: &str, action: &str) {
        info!(
            event = "namespace_change",
            component = %self.component,
            user = %user,
            context = %context,
            namespace = %namespace,
            action = %action,
            "Namespace changed"
        );
    }

    pub fn log_permission_denied(&self, user: &str, verb: &str, resource: &str) {
        warn!(
            event = "permission_denied",
            component = %self.component,
            user = %user,
            verb = %verb,
            resource = %resource,
            "Permission denied"
        );
    }

    /// Log a catalog write
    pub fn log_catalog_change(&self, user: &str, service: &str, action: &str, version: u64) {
        info!(
            event = "catalog_change",
            component = %self.component,
            user = %user,
            service = %service,
            action = %action,
            version = version,
            "Service catalog updated"
        );
    }

    pub fn log_startup(&self, version: &str, accounts: usize, clusters: usize) {
        info!(
            event = "server_started",
            component = %self.component,
            version = %version,
            accounts = accounts,
            clusters = clusters,
            "dash-ops started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            component = %self.component,
            reason = %reason,
            "dash-ops shutting down"
        );
    }
}
