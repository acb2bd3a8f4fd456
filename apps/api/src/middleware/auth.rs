//! Control token authentication
//!
//! Every control route except the health probes runs behind
//! [`require_token`]. A token may be presented as:
//!
//! - `Authorization: Bearer <token>`
//! - `X-Control-Token: <token>`
//! - `?token=<token>`
//!
//! Configured tokens are kept as SHA-256 digests and compared digest to
//! digest.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use librarian_shared_config::ControlConfig;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{ApiError, ApiResult};

/// Header accepted as an alternative to `Authorization`
pub const CONTROL_TOKEN_HEADER: &str = "x-control-token";

type TokenDigest = [u8; 32];

fn digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

/// How requests are authenticated
#[derive(Clone)]
pub enum AuthPolicy {
    /// No tokens and none required: loopback only, requests pass
    Open,
    /// Requests must carry one of these tokens
    Tokens(Arc<Vec<TokenDigest>>),
    /// Tokens are required but none are configured; every request is refused
    Unconfigured,
}

impl std::fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Tokens(tokens) => write!(f, "Tokens({})", tokens.len()),
            Self::Unconfigured => write!(f, "Unconfigured"),
        }
    }
}

impl AuthPolicy {
    pub fn from_config(config: &ControlConfig) -> Self {
        if config.has_tokens() {
            Self::with_tokens(&config.api_tokens)
        } else if config.require_auth {
            Self::Unconfigured
        } else {
            Self::Open
        }
    }

    pub fn with_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let digests = tokens
            .iter()
            .map(AsRef::as_ref)
            .filter(|t| !t.trim().is_empty())
            .map(digest)
            .collect::<Vec<_>>();
        if digests.is_empty() {
            Self::Unconfigured
        } else {
            Self::Tokens(Arc::new(digests))
        }
    }

    /// Check a presented token against the policy
    pub fn check(&self, presented: Option<&str>) -> ApiResult<()> {
        match self {
            Self::Open => Ok(()),
            Self::Unconfigured => Err(ApiError::AuthNotConfigured(
                "the control server has no tokens configured".to_string(),
            )),
            Self::Tokens(digests) => {
                let token = presented.ok_or(ApiError::Unauthorized)?;
                let presented = digest(token);
                if digests.iter().any(|known| *known == presented) {
                    Ok(())
                } else {
                    Err(ApiError::Forbidden)
                }
            }
        }
    }
}

/// Extract bearer token from Authorization header (case-insensitive)
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;

    // Reject malformed values like "Bearer <token> <extra>"
    if parts.next().is_some() {
        return None;
    }

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Token from whichever place the caller put it
pub fn presented_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    extract_bearer_token(headers)
        .or_else(|| {
            headers
                .get(CONTROL_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|t| !t.is_empty())
        })
        .or_else(|| query.filter(|t| !t.is_empty()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// Middleware rejecting requests that do not satisfy the [`AuthPolicy`]
pub async fn require_token(
    State(policy): State<AuthPolicy>,
    query: Option<Query<TokenQuery>>,
    request: Request,
    next: Next,
) -> Response {
    let query_token = query.as_ref().and_then(|q| q.token.as_deref());
    let token = presented_token(request.headers(), query_token);
    let token_present = token.is_some();

    match policy.check(token) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::debug!(
                path = %request.uri().path(),
                token_present = token_present,
                "Control request rejected"
            );
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_policy_from_config() {
        let open = ControlConfig::default();
        assert_matches!(AuthPolicy::from_config(&open), AuthPolicy::Open);

        let required = ControlConfig {
            require_auth: true,
            ..ControlConfig::default()
        };
        assert_matches!(AuthPolicy::from_config(&required), AuthPolicy::Unconfigured);

        let tokens = ControlConfig {
            api_tokens: vec!["alpha".to_string()],
            ..ControlConfig::default()
        };
        assert_matches!(AuthPolicy::from_config(&tokens), AuthPolicy::Tokens(_));
    }

    #[test]
    fn test_token_check() {
        let policy = AuthPolicy::with_tokens(&["alpha", "beta"]);
        assert!(policy.check(Some("alpha")).is_ok());
        assert!(policy.check(Some("beta")).is_ok());
        assert_matches!(policy.check(None), Err(ApiError::Unauthorized));
        assert_matches!(policy.check(Some("gamma")), Err(ApiError::Forbidden));
    }

    #[test]
    fn test_blank_tokens_leave_policy_unconfigured() {
        let policy = AuthPolicy::with_tokens(&["", "  "]);
        assert_matches!(
            policy.check(Some("anything")),
            Err(ApiError::AuthNotConfigured(_))
        );
    }

    #[test]
    fn test_token_sources() {
        let bearer = headers(&[("authorization", "bearer alpha")]);
        assert_eq!(presented_token(&bearer, None), Some("alpha"));

        let custom = headers(&[(CONTROL_TOKEN_HEADER, " beta ")]);
        assert_eq!(presented_token(&custom, None), Some("beta"));

        let empty = HeaderMap::new();
        assert_eq!(presented_token(&empty, Some("gamma")), Some("gamma"));
        assert_eq!(presented_token(&empty, Some("")), None);

        // Header wins over query
        assert_eq!(presented_token(&bearer, Some("gamma")), Some("alpha"));
    }

    #[test]
    fn test_malformed_bearer_is_ignored() {
        let extra = headers(&[("authorization", "Bearer alpha extra")]);
        assert_eq!(presented_token(&extra, None), None);

        let basic = headers(&[("authorization", "Basic YWxwaGE=")]);
        assert_eq!(presented_token(&basic, None), None);
    }
}
