//! Batch operation bookkeeping
//!
//! A [`Batch`] keeps one slot per requested identifier, in request order.
//! Items rejected during validation are recorded immediately; survivors are
//! parked with a fallback failure record until the provider's results are
//! merged back in. No rollback happens on partial failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{InstanceAction, InstanceOperation, StateName};

/// A per-item outcome that can be tallied
pub trait BatchItem {
    fn item_id(&self) -> &str;
    fn succeeded(&self) -> bool;
}

impl BatchItem for InstanceOperation {
    fn item_id(&self) -> &str {
        &self.instance_id
    }

    fn succeeded(&self) -> bool {
        self.success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationResult<T> {
    pub operation: String,
    pub results: Vec<T>,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

enum Slot<T> {
    Done(T),
    /// Awaiting a provider result; holds the record used if none arrives
    Pending(T),
}

pub struct Batch<T> {
    operation: String,
    started_at: DateTime<Utc>,
    slots: Vec<Slot<T>>,
}

impl<T: BatchItem> Batch<T> {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started_at: Utc::now(),
            slots: Vec::new(),
        }
    }

    /// Record a final outcome for an item that will not reach the provider
    pub fn record(&mut self, item: T) {
        self.slots.push(Slot::Done(item));
    }

    /// Park an item that passed validation
    pub fn defer(&mut self, fallback: T) {
        self.slots.push(Slot::Pending(fallback));
    }

    /// Identifiers still waiting on the provider, in request order
    pub fn pending(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Pending(item) => Some(item.item_id().to_string()),
                Slot::Done(_) => None,
            })
            .collect()
    }

    /// Merge provider results into the pending slots by identifier
    pub fn resolve(&mut self, results: Vec<T>) {
        let mut results: Vec<Option<T>> = results.into_iter().map(Some).collect();
        for slot in self.slots.iter_mut() {
            let Slot::Pending(fallback) = slot else {
                continue;
            };
            let found = results
                .iter_mut()
                .find(|r| r.as_ref().is_some_and(|r| r.item_id() == fallback.item_id()))
                .and_then(Option::take);
            if let Some(result) = found {
                *slot = Slot::Done(result);
            }
        }
    }

    /// Finalize every pending slot through `fail`
    pub fn fail_pending(&mut self, fail: impl Fn(&T) -> T) {
        for slot in self.slots.iter_mut() {
            if let Slot::Pending(fallback) = slot {
                *slot = Slot::Done(fail(fallback));
            }
        }
    }

    pub fn finish(self) -> BatchOperationResult<T> {
        let completed_at = Utc::now();
        let results: Vec<T> = self
            .slots
            .into_iter()
            .map(|s| match s {
                Slot::Done(item) | Slot::Pending(item) => item,
            })
            .collect();
        let success_count = results.iter().filter(|r| r.succeeded()).count();

        BatchOperationResult {
            operation: self.operation,
            total_count: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            started_at: self.started_at,
            completed_at,
            duration_ms: (completed_at - self.started_at).num_milliseconds(),
            results,
        }
    }
}

/// Failure record for an instance that never got a provider result
pub fn unanswered(action: InstanceAction, id: &str, state: StateName) -> InstanceOperation {
    InstanceOperation::rejected(id, action, state, "no result returned by provider")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str) -> InstanceOperation {
        let mut op = InstanceOperation::rejected(id, InstanceAction::Stop, StateName::Stopping, "");
        op.success = true;
        op.message = format!("instance {} stop initiated", id);
        op
    }

    #[test]
    fn test_merge_preserves_request_order() {
        let mut batch = Batch::new("stop");
        batch.defer(unanswered(InstanceAction::Stop, "i-aaaaaaaa", StateName::Running));
        batch.record(InstanceOperation::rejected(
            "bad",
            InstanceAction::Stop,
            StateName::Unknown,
            "invalid instance id: bad",
        ));
        batch.defer(unanswered(InstanceAction::Stop, "i-bbbbbbbb", StateName::Running));

        assert_eq!(batch.pending(), vec!["i-aaaaaaaa", "i-bbbbbbbb"]);
        batch.resolve(vec![ok("i-bbbbbbbb"), ok("i-aaaaaaaa")]);

        let result = batch.finish();
        let ids: Vec<&str> = result.results.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["i-aaaaaaaa", "bad", "i-bbbbbbbb"]);
        assert_eq!(result.total_count, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert!(result.completed_at >= result.started_at);
    }

    #[test]
    fn test_missing_provider_result_is_a_failure() {
        let mut batch = Batch::new("start");
        batch.defer(unanswered(InstanceAction::Start, "i-aaaaaaaa", StateName::Stopped));
        batch.resolve(Vec::new());

        let result = batch.finish();
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.results[0].message, "no result returned by provider");
    }

    #[test]
    fn test_fail_pending_rewrites_message() {
        let mut batch = Batch::new("start");
        batch.defer(unanswered(InstanceAction::Start, "i-aaaaaaaa", StateName::Stopped));
        batch.fail_pending(|item| {
            let mut item = item.clone();
            item.message = "operation cancelled".into();
            item
        });
        assert!(batch.pending().is_empty());
        assert_eq!(batch.finish().results[0].message, "operation cancelled");
    }
}
