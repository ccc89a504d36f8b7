//! Group-membership permission gate
//!
//! Authorization is a pure function of (user, resource, verb). A resource
//! declares which allow-lists a verb needs; the user is granted when their
//! groups intersect every required list.

use crate::error::{DashError, Result};
use crate::models::{Account, Cluster};
use crate::observability::{DashMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    View,
    Start,
    Stop,
    Scale,
    Restart,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::View => "view",
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Scale => "scale",
            Verb::Restart => "restart",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Already-authenticated caller identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserContext {
    pub fn new(username: impl Into<String>, groups: &[&str]) -> Self {
        Self {
            username: username.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn in_any(&self, allowed: &[String]) -> bool {
        self.groups.iter().any(|g| allowed.contains(g))
    }
}

/// Allow-lists a verb requires on a resource
#[derive(Debug, PartialEq, Eq)]
pub enum Requirement<'a> {
    /// Verb is not gated on this resource
    Open,
    /// Caller must belong to a group in each list
    AllOf(Vec<&'a [String]>),
    /// Verb does not apply to this resource
    Unsupported,
}

/// A resource carrying per-verb allow-lists
pub trait Protected {
    /// "account" or "cluster"
    fn kind(&self) -> &'static str;
    fn key(&self) -> &str;
    /// What the verbs act on, used in denial messages
    fn subject(&self) -> &'static str;
    fn requirement(&self, verb: Verb) -> Requirement<'_>;
}

impl Protected for Account {
    fn kind(&self) -> &'static str {
        "account"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn subject(&self) -> &'static str {
        "instances"
    }

    fn requirement(&self, verb: Verb) -> Requirement<'_> {
        let p = &self.permissions;
        match verb {
            // accounts without a view list are readable by anyone authenticated
            Verb::View if p.view.is_empty() => Requirement::Open,
            Verb::View => Requirement::AllOf(vec![&p.view]),
            Verb::Start => Requirement::AllOf(vec![&p.start]),
            Verb::Stop => Requirement::AllOf(vec![&p.stop]),
            Verb::Restart => Requirement::AllOf(vec![&p.start, &p.stop]),
            Verb::Scale => Requirement::Unsupported,
        }
    }
}

impl Protected for Cluster {
    fn kind(&self) -> &'static str {
        "cluster"
    }

    fn key(&self) -> &str {
        &self.context
    }

    fn subject(&self) -> &'static str {
        "deployments"
    }

    fn requirement(&self, verb: Verb) -> Requirement<'_> {
        let p = &self.permissions;
        match verb {
            Verb::View => Requirement::Open,
            Verb::Scale => Requirement::AllOf(vec![&p.scale]),
            Verb::Restart => Requirement::AllOf(vec![&p.restart]),
            Verb::Start | Verb::Stop => Requirement::Unsupported,
        }
    }
}

/// Grant or deny `verb` on `resource` for `user`.
///
/// A missing user is an internal caller and is always granted.
pub fn authorize<R: Protected + ?Sized>(
    user: Option<&UserContext>,
    resource: &R,
    verb: Verb,
) -> Result<()> {
    let Some(user) = user else {
        return Ok(());
    };

    let granted = match resource.requirement(verb) {
        Requirement::Open => true,
        Requirement::AllOf(lists) => lists.iter().all(|list| user.in_any(list)),
        Requirement::Unsupported => false,
    };

    if granted {
        Ok(())
    } else {
        Err(DashError::denied(format!(
            "user does not have permission to {} {} in {} {}",
            verb,
            resource.subject(),
            resource.kind(),
            resource.key()
        )))
    }
}

/// Per-request caller identity and cancellation token
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: Option<UserContext>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(user: Option<UserContext>) -> Self {
        Self {
            user,
            cancel: CancellationToken::new(),
        }
    }

    pub fn for_user(user: UserContext) -> Self {
        Self::new(Some(user))
    }

    /// Internal caller; bypasses the permission gate
    pub fn internal() -> Self {
        Self::new(None)
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn user(&self) -> Option<&UserContext> {
        self.user.as_ref()
    }

    /// Name recorded in audit logs
    pub fn actor(&self) -> &str {
        self.user
            .as_ref()
            .map(|u| u.username.as_str())
            .unwrap_or("internal")
    }
}

/// [`authorize`] with denial metrics and audit logging
#[derive(Clone)]
pub struct Gate {
    metrics: DashMetrics,
    logger: StructuredLogger,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Self {
            metrics: DashMetrics::new(),
            logger: StructuredLogger::new("permission"),
        }
    }

    pub fn check<R: Protected + ?Sized>(
        &self,
        ctx: &RequestContext,
        resource: &R,
        verb: Verb,
    ) -> Result<()> {
        authorize(ctx.user(), resource, verb).map_err(|e| {
            self.metrics.inc_permission_denied(verb.as_str());
            self.logger.log_permission_denied(
                ctx.actor(),
                verb.as_str(),
                &format!("{}/{}", resource.kind(), resource.key()),
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentPermissions, Ec2Permissions};

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn prod() -> Account {
        Account::new("prod", "us-east-1", "AKIA", "secret").with_permissions(Ec2Permissions {
            view: groups(&["dev", "sre"]),
            start: groups(&["sre", "oncall"]),
            stop: groups(&["sre"]),
        })
    }

    #[test]
    fn test_denial_message_names_verb_and_account() {
        let user = UserContext::new("alice", &["dev"]);
        let err = authorize(Some(&user), &prod(), Verb::Stop).unwrap_err();
        assert_eq!(
            err,
            DashError::PermissionDenied(
                "user does not have permission to stop instances in account prod".into()
            )
        );
    }

    #[test]
    fn test_group_intersection_grants() {
        let user = UserContext::new("bob", &["oncall", "dev"]);
        assert!(authorize(Some(&user), &prod(), Verb::Start).is_ok());
        assert!(authorize(Some(&user), &prod(), Verb::View).is_ok());
        assert!(authorize(Some(&user), &prod(), Verb::Stop).is_err());
    }

    #[test]
    fn test_restart_needs_start_and_stop() {
        let oncall = UserContext::new("carol", &["oncall"]);
        let sre = UserContext::new("dave", &["sre"]);
        assert!(authorize(Some(&oncall), &prod(), Verb::Restart).is_err());
        assert!(authorize(Some(&sre), &prod(), Verb::Restart).is_ok());
    }

    #[test]
    fn test_missing_user_short_circuits() {
        assert!(authorize(None, &prod(), Verb::Stop).is_ok());
    }

    #[test]
    fn test_empty_write_list_denies_everyone() {
        let account = Account::new("dev", "us-east-1", "AKIA", "secret");
        let user = UserContext::new("eve", &["sre"]);
        assert!(authorize(Some(&user), &account, Verb::View).is_ok());
        assert!(authorize(Some(&user), &account, Verb::Start).is_err());
    }

    #[test]
    fn test_cluster_verbs() {
        let cluster = Cluster::new("local", "docker-desktop").with_permissions(
            DeploymentPermissions {
                namespaces: vec![],
                restart: groups(&["sre"]),
                scale: groups(&["sre", "dev"]),
            },
        );
        let dev = UserContext::new("frank", &["dev"]);

        assert!(authorize(Some(&dev), &cluster, Verb::View).is_ok());
        assert!(authorize(Some(&dev), &cluster, Verb::Scale).is_ok());
        let err = authorize(Some(&dev), &cluster, Verb::Restart).unwrap_err();
        assert_eq!(
            err.to_string(),
            "user does not have permission to restart deployments in cluster docker-desktop"
        );
        assert!(authorize(Some(&dev), &cluster, Verb::Start).is_err());
    }

    #[test]
    fn test_user_without_groups_is_denied_writes() {
        let user = UserContext::new("nobody", &[]);
        assert!(authorize(Some(&user), &prod(), Verb::Start).is_err());
    }
}
