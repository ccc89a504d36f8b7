//! Listing filters and pagination
//!
//! Instance listings pass through a fixed pipeline: skip-list, state, type,
//! free-text search, tags, then the pagination window. `total` always counts
//! the filtered set before the window is applied.

use crate::models::{normalize_instance_type, Deployment, Instance, Pod};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    /// Empty matches any value
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceQuery {
    pub state: Option<String>,
    pub instance_type: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagFilter>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl InstanceQuery {
    pub fn state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    pub fn search(mut self, search: &str) -> Self {
        self.search = Some(search.to_string());
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push(TagFilter {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// One page of a filtered listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Instance listing; `instances` is always present, empty when nothing matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstancePage {
    pub instances: Vec<Instance>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub offset: usize,
}

impl From<Page<Instance>> for InstancePage {
    fn from(page: Page<Instance>) -> Self {
        Self {
            instances: page.items,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn matches_search(instance: &Instance, needle: &str) -> bool {
    let hit = |s: &str| s.to_lowercase().contains(needle);
    hit(&instance.instance_id)
        || hit(&instance.name)
        || hit(&instance.instance_type)
        || hit(&instance.platform)
        || instance.public_ip.as_deref().is_some_and(hit)
        || instance.private_ip.as_deref().is_some_and(hit)
        || instance.tags.iter().any(|t| hit(&t.key) || hit(&t.value))
}

fn matches_tags(instance: &Instance, filters: &[TagFilter]) -> bool {
    filters.iter().all(|f| {
        instance.tags.iter().any(|t| {
            t.key.eq_ignore_ascii_case(&f.key)
                && (f.value.is_empty() || t.value.eq_ignore_ascii_case(&f.value))
        })
    })
}

/// Run the full instance pipeline
pub fn filter_instances(
    instances: Vec<Instance>,
    skip_list: &[String],
    query: &InstanceQuery,
) -> InstancePage {
    let state = non_empty(&query.state).map(str::to_lowercase);
    let instance_type = non_empty(&query.instance_type).map(normalize_instance_type);
    let search = non_empty(&query.search).map(str::to_lowercase);

    let filtered: Vec<Instance> = instances
        .into_iter()
        .filter(|i| !skip_list.iter().any(|s| s == &i.name))
        .filter(|i| state.as_deref().map_or(true, |s| i.state.name.as_str() == s))
        .filter(|i| {
            instance_type
                .as_deref()
                .map_or(true, |t| i.instance_type.eq_ignore_ascii_case(t))
        })
        .filter(|i| search.as_deref().map_or(true, |s| matches_search(i, s)))
        .filter(|i| matches_tags(i, &query.tags))
        .collect();

    paginate(filtered, query.limit, query.offset).into()
}

/// Apply a `limit`/`offset` window; `limit` of 0 or none returns everything
pub fn paginate<T>(items: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Page<T> {
    let total = items.len();
    let offset = offset.unwrap_or(0);
    let limit = limit.filter(|l| *l > 0);

    let items = match limit {
        Some(_) if offset >= total => Vec::new(),
        Some(limit) => items.into_iter().skip(offset).take(limit).collect(),
        None => items,
    };

    Page {
        items,
        total,
        limit,
        offset,
    }
}

/// Free-text and window filter for workload listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadQuery {
    pub namespace: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub fn filter_deployments(deployments: Vec<Deployment>, query: &WorkloadQuery) -> Page<Deployment> {
    let search = non_empty(&query.search).map(str::to_lowercase);
    let filtered = deployments
        .into_iter()
        .filter(|d| {
            search.as_deref().map_or(true, |s| {
                d.name.to_lowercase().contains(s) || d.namespace.to_lowercase().contains(s)
            })
        })
        .collect();
    paginate(filtered, query.limit, query.offset)
}

pub fn filter_pods(pods: Vec<Pod>, query: &WorkloadQuery) -> Page<Pod> {
    let search = non_empty(&query.search).map(str::to_lowercase);
    let filtered = pods
        .into_iter()
        .filter(|p| {
            search.as_deref().map_or(true, |s| {
                p.name.to_lowercase().contains(s)
                    || p.node.as_deref().is_some_and(|n| n.to_lowercase().contains(s))
            })
        })
        .collect();
    paginate(filtered, query.limit, query.offset)
}
