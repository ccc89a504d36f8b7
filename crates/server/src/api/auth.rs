//! Caller identity forwarded by the fronting auth proxy

use super::{ApiError, AppState};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use dash_lib::{DashError, RequestContext, UserContext};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub const USER_HEADER: &str = "x-forwarded-user";
pub const GROUPS_HEADER: &str = "x-forwarded-groups";

/// Request context for a handler. The cancellation token fires when the
/// handler future is dropped, e.g. on client disconnect.
pub struct Caller {
    pub ctx: RequestContext,
    _guard: DropGuard,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn user_from_parts(parts: &Parts) -> Option<UserContext> {
    let username = header(parts, USER_HEADER)?;
    let groups = header(parts, GROUPS_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(UserContext {
        username: username.to_string(),
        groups,
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user = user_from_parts(parts);
        if user.is_none() && !state.allow_anonymous {
            return Err(ApiError(DashError::denied("missing forwarded user identity")));
        }

        let token = CancellationToken::new();
        Ok(Self {
            ctx: RequestContext::new(user).with_cancel(token.clone()),
            _guard: token.drop_guard(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_user_and_groups_parsed() {
        let user = user_from_parts(&parts(&[
            ("X-Forwarded-User", "alice"),
            ("X-Forwarded-Groups", "ops, sre,,"),
        ]))
        .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.groups, vec!["ops", "sre"]);
    }

    #[test]
    fn test_missing_user_is_anonymous() {
        assert!(user_from_parts(&parts(&[("X-Forwarded-Groups", "ops")])).is_none());
        assert!(user_from_parts(&parts(&[("X-Forwarded-User", "  ")])).is_none());
    }
}
