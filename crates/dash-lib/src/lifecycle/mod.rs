//! Instance lifecycle controller
//!
//! Every mutating call runs the same pipeline: resolve the account, pass the
//! permission gate, fetch the instance, check the transition against the
//! lifecycle predicates and only then dispatch to the provider. Requests that
//! fail any step never reach the provider's mutating API.

pub mod batch;
pub mod filter;
pub mod pricing;

pub use batch::{Batch, BatchItem, BatchOperationResult};
pub use filter::{
    filter_deployments, filter_instances, filter_pods, paginate, InstancePage, InstanceQuery,
    Page, TagFilter, WorkloadQuery,
};

use crate::error::{DashError, Result, ResultExt};
use crate::models::{
    validate_instance_id, Account, AccountStatus, Ec2Permissions, Instance, InstanceAction,
    InstanceMetrics, InstanceOperation, InstanceTypeInfo, OperationResult, Region, StateName,
};
use crate::observability::{DashMetrics, StructuredLogger};
use crate::permission::{Gate, RequestContext, Verb};
use crate::provider::{instrumented, CloudCompute, InstanceFilter};
use crate::registry::ClientRegistry;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_METRICS_PERIOD_SECS: u32 = 300;
const MAX_METRICS_WINDOW_HOURS: u32 = 168;

/// Account as listed to callers; credentials never leave the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub name: String,
    pub key: String,
    pub region: String,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: String,
    pub region: String,
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    /// Instances in pending, stopping or shutting-down
    pub pending: usize,
    pub estimated_monthly_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub account: String,
    pub status: AccountStatus,
    pub message: String,
}

/// Sampling window for instance metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsWindow {
    pub period_secs: u32,
    pub hours: u32,
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_METRICS_PERIOD_SECS,
            hours: 1,
        }
    }
}

impl MetricsWindow {
    fn validate(&self) -> Result<()> {
        if self.period_secs == 0 || self.period_secs % 60 != 0 {
            return Err(DashError::invalid(format!(
                "period must be a positive multiple of 60 seconds, got {}",
                self.period_secs
            )));
        }
        if self.hours == 0 || self.hours > MAX_METRICS_WINDOW_HOURS {
            return Err(DashError::invalid(format!(
                "metrics window must be between 1 and {} hours",
                MAX_METRICS_WINDOW_HOURS
            )));
        }
        Ok(())
    }
}

fn verb_for(action: InstanceAction) -> Verb {
    match action {
        InstanceAction::Start => Verb::Start,
        InstanceAction::Stop => Verb::Stop,
        InstanceAction::Restart => Verb::Restart,
    }
}

/// Reject transitions the instance's current state does not allow
pub fn check_transition(instance: &Instance, action: InstanceAction) -> Result<()> {
    let (allowed, required) = match action {
        InstanceAction::Start => (instance.may_start(), StateName::Stopped),
        InstanceAction::Stop => (instance.may_stop(), StateName::Running),
        InstanceAction::Restart => (instance.may_restart(), StateName::Running),
    };
    if allowed {
        return Ok(());
    }
    Err(DashError::precondition(format!(
        "cannot {} instance {}: instance is {}, {} requires a {} instance",
        action, instance.instance_id, instance.state.name, action, required
    )))
}

fn to_operation(result: OperationResult, action: InstanceAction) -> InstanceOperation {
    let mut operation = InstanceOperation::from_result(result);
    operation.operation = action.as_str().to_string();
    operation
}

pub struct InstanceController {
    accounts: Vec<Account>,
    statuses: DashMap<String, AccountStatus>,
    registry: Arc<ClientRegistry>,
    gate: Gate,
    metrics: DashMetrics,
    logger: StructuredLogger,
}

impl InstanceController {
    pub fn new(accounts: Vec<Account>, registry: Arc<ClientRegistry>) -> Self {
        let statuses = accounts
            .iter()
            .map(|a| (a.key.clone(), a.status))
            .collect();
        Self {
            accounts,
            statuses,
            registry,
            gate: Gate::new(),
            metrics: DashMetrics::new(),
            logger: StructuredLogger::new("lifecycle"),
        }
    }

    pub fn accounts(&self) -> Vec<AccountInfo> {
        self.accounts
            .iter()
            .map(|a| AccountInfo {
                name: a.name.clone(),
                key: a.key.clone(),
                region: a.region.clone(),
                status: self
                    .statuses
                    .get(&a.key)
                    .map(|s| *s.value())
                    .unwrap_or(a.status),
            })
            .collect()
    }

    pub fn account(&self, key: &str) -> Result<&Account> {
        self.accounts
            .iter()
            .find(|a| a.key == key)
            .ok_or_else(|| DashError::not_found(format!("account {} not found", key)))
    }

    pub fn permissions(&self, ctx: &RequestContext, key: &str) -> Result<Ec2Permissions> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        Ok(account.permissions.clone())
    }

    async fn client(&self, account: &Account, region: Option<&str>) -> Result<Arc<dyn CloudCompute>> {
        self.registry.cloud_client(Some(account), region).await
    }

    async fn call<T, F>(&self, ctx: &RequestContext, call: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        instrumented(&self.metrics, "cloud", call, &ctx.cancel, fut).await
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        client: &Arc<dyn CloudCompute>,
        action: InstanceAction,
        ids: &[String],
    ) -> Result<Vec<OperationResult>> {
        match action {
            InstanceAction::Start => self.call(ctx, "start_instances", client.start_instances(ids)).await,
            InstanceAction::Stop => self.call(ctx, "stop_instances", client.stop_instances(ids)).await,
            InstanceAction::Restart => {
                self.call(ctx, "reboot_instances", client.reboot_instances(ids)).await
            }
        }
    }

    /// Filtered, paginated instance listing
    pub async fn list_instances(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        query: &InstanceQuery,
    ) -> Result<InstancePage> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        let client = self.client(account, region).await?;

        let instances = self
            .call(ctx, "describe_instances", client.describe_instances(&InstanceFilter::default()))
            .await
            .context_op(|| format!("list instances in account {}", key))?;
        debug!(account = %key, fetched = instances.len(), "Listing instances");

        Ok(filter_instances(instances, &account.skip_list, query))
    }

    pub async fn get_instance(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        instance_id: &str,
    ) -> Result<Instance> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        validate_instance_id(instance_id)?;
        let client = self.client(account, region).await?;

        self.call(ctx, "describe_instance", client.describe_instance(instance_id))
            .await
            .context_op(|| format!("get instance {}", instance_id))
    }

    pub async fn start_instance(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        instance_id: &str,
    ) -> Result<InstanceOperation> {
        self.operate(ctx, key, region, instance_id, InstanceAction::Start)
            .await
    }

    pub async fn stop_instance(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        instance_id: &str,
    ) -> Result<InstanceOperation> {
        self.operate(ctx, key, region, instance_id, InstanceAction::Stop)
            .await
    }

    pub async fn restart_instance(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        instance_id: &str,
    ) -> Result<InstanceOperation> {
        self.operate(ctx, key, region, instance_id, InstanceAction::Restart)
            .await
    }

    /// Single-instance pipeline: account, gate, fetch, legality, dispatch
    pub async fn operate(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        instance_id: &str,
        action: InstanceAction,
    ) -> Result<InstanceOperation> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, verb_for(action))?;
        validate_instance_id(instance_id)?;
        let client = self.client(account, region).await?;

        let instance = self
            .call(ctx, "describe_instance", client.describe_instance(instance_id))
            .await
            .context_op(|| format!("{} instance {}", action, instance_id))?;

        if let Err(e) = check_transition(&instance, action) {
            self.metrics.record_instance_operation(action.as_str(), false);
            return Err(e);
        }

        let ids = [instance_id.to_string()];
        let outcome = self
            .dispatch(ctx, &client, action, &ids)
            .await
            .context_op(|| format!("{} instance {}", action, instance_id))
            .and_then(|results| {
                results
                    .into_iter()
                    .find(|r| r.instance_id == instance_id)
                    .ok_or_else(|| {
                        DashError::fatal(format!(
                            "provider returned no result for instance {}",
                            instance_id
                        ))
                    })
            });

        match outcome {
            Ok(result) => {
                let operation = to_operation(result, action);
                self.metrics
                    .record_instance_operation(action.as_str(), operation.success);
                self.logger.log_instance_operation(
                    ctx.actor(),
                    key,
                    instance_id,
                    action.as_str(),
                    operation.success,
                    &operation.message,
                );
                Ok(operation)
            }
            Err(e) => {
                self.metrics.record_instance_operation(action.as_str(), false);
                self.logger.log_instance_operation(
                    ctx.actor(),
                    key,
                    instance_id,
                    action.as_str(),
                    false,
                    &e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// Apply `operation` to every id, validating each before one provider call
    pub async fn batch(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        operation: &str,
        instance_ids: &[String],
    ) -> Result<BatchOperationResult<InstanceOperation>> {
        let action = InstanceAction::parse(operation)?;
        if instance_ids.is_empty() {
            return Err(DashError::invalid("instance_ids must not be empty"));
        }
        let account = self.account(key)?;
        self.gate.check(ctx, account, verb_for(action))?;
        let client = self.client(account, region).await?;

        let mut batch = Batch::new(action.as_str());
        let mut seen = HashSet::new();
        let reject = |id: &str, state: StateName, reason: String| {
            InstanceOperation::rejected(id, action, state, reason)
        };

        for id in instance_ids {
            if ctx.cancel.is_cancelled() {
                batch.record(reject(id, StateName::Unknown, DashError::Cancelled.to_string()));
                continue;
            }
            if !seen.insert(id.as_str()) {
                batch.record(reject(id, StateName::Unknown, format!("duplicate instance id: {}", id)));
                continue;
            }
            if let Err(e) = validate_instance_id(id) {
                batch.record(reject(id, StateName::Unknown, e.to_string()));
                continue;
            }
            match self
                .call(ctx, "describe_instance", client.describe_instance(id))
                .await
            {
                Ok(instance) => match check_transition(&instance, action) {
                    Ok(()) => batch.defer(batch::unanswered(action, id, instance.state.name)),
                    Err(e) => batch.record(reject(id, instance.state.name, e.to_string())),
                },
                Err(e) => batch.record(reject(id, StateName::Unknown, e.to_string())),
            }
        }

        let pending = batch.pending();
        if !pending.is_empty() {
            match self.dispatch(ctx, &client, action, &pending).await {
                Ok(results) => batch.resolve(
                    results
                        .into_iter()
                        .map(|r| to_operation(r, action))
                        .collect(),
                ),
                Err(e) => {
                    warn!(account = %key, operation = %action, error = %e, "Batch dispatch failed");
                    let message = e.to_string();
                    batch.fail_pending(|item| {
                        let mut failed = item.clone();
                        failed.message = message.clone();
                        failed
                    });
                }
            }
        }

        let result = batch.finish();
        for item in &result.results {
            self.metrics
                .record_instance_operation(action.as_str(), item.success);
        }
        self.logger.log_batch(
            ctx.actor(),
            key,
            action.as_str(),
            result.total_count,
            result.success_count,
            result.duration_ms,
        );
        Ok(result)
    }

    /// Instance counts and the estimated monthly cost of running instances
    pub async fn account_summary(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
    ) -> Result<AccountSummary> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        let client = self.client(account, region).await?;

        let instances = self
            .call(ctx, "describe_instances", client.describe_instances(&InstanceFilter::default()))
            .await
            .context_op(|| format!("summarize account {}", key))?;
        let visible = filter_instances(instances, &account.skip_list, &InstanceQuery::default());

        let mut summary = AccountSummary {
            account: account.key.clone(),
            region: region
                .map(crate::models::normalize_region)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| account.region.clone()),
            total: visible.instances.len(),
            running: 0,
            stopped: 0,
            pending: 0,
            estimated_monthly_cost: 0.0,
        };
        for instance in &visible.instances {
            if instance.is_running() {
                summary.running += 1;
                summary.estimated_monthly_cost += pricing::monthly_rate(&instance.instance_type);
            } else if instance.is_stopped() {
                summary.stopped += 1;
            } else if instance.is_transitioning() {
                summary.pending += 1;
            }
        }
        summary.estimated_monthly_cost = (summary.estimated_monthly_cost * 100.0).round() / 100.0;
        Ok(summary)
    }

    pub async fn regions(&self, ctx: &RequestContext, key: &str) -> Result<Vec<Region>> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        let client = self.client(account, None).await?;
        self.call(ctx, "describe_regions", client.describe_regions())
            .await
            .context_op(|| format!("list regions for account {}", key))
    }

    pub async fn instance_types(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
    ) -> Result<Vec<InstanceTypeInfo>> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        let client = self.client(account, region).await?;
        self.call(ctx, "describe_instance_types", client.describe_instance_types())
            .await
            .context_op(|| format!("list instance types for account {}", key))
    }

    pub async fn instance_metrics(
        &self,
        ctx: &RequestContext,
        key: &str,
        region: Option<&str>,
        instance_id: &str,
        window: MetricsWindow,
    ) -> Result<InstanceMetrics> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        validate_instance_id(instance_id)?;
        window.validate()?;
        let client = self.client(account, region).await?;

        let end = Utc::now();
        let start = end - Duration::hours(i64::from(window.hours));
        self.call(
            ctx,
            "instance_metrics",
            client.instance_metrics(instance_id, window.period_secs, start, end),
        )
        .await
        .context_op(|| format!("metrics for instance {}", instance_id))
    }

    /// Probe the account's credentials and record the resulting status
    pub async fn verify(&self, ctx: &RequestContext, key: &str) -> Result<VerifyResult> {
        let account = self.account(key)?;
        self.gate.check(ctx, account, Verb::View)?;
        let client = match self.client(account, None).await {
            Ok(client) => client,
            Err(e) => {
                self.statuses.insert(account.key.clone(), AccountStatus::Error);
                return Err(e);
            }
        };

        let (status, message) = match self
            .call(ctx, "validate_credentials", client.validate_credentials())
            .await
        {
            Ok(()) => (AccountStatus::Active, "credentials verified".to_string()),
            Err(DashError::Cancelled) => return Err(DashError::Cancelled),
            Err(e) => {
                warn!(account = %key, error = %e, "Credential validation failed");
                (AccountStatus::Error, e.to_string())
            }
        };
        self.statuses.insert(account.key.clone(), status);

        Ok(VerifyResult {
            account: account.key.clone(),
            status,
            message,
        })
    }
}
