//! Core data models for the control plane
//!
//! Entities are per-request snapshots: providers construct them and nothing
//! mutates them afterwards. Lifecycle classification goes through the
//! predicates defined here rather than through string comparisons.

mod aws;
mod catalog;
mod k8s;

pub use aws::*;
pub use catalog::*;
pub use k8s::*;

#[cfg(test)]
pub(crate) use catalog::fixtures;
