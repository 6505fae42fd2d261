// ABOUTME: Inbound bearer-token validation for the request-time proxy path
// ABOUTME: Verifies RS256 JWTs against tenant issuers using the JWKS key cache
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Inbound Authorizer
//!
//! Validates the bearer token the MCP client presents on forwarded
//! requests: parse the `Authorization` header, peek at the unverified
//! header and payload for `kid` and `iss`, reject tokens from the wrong
//! issuer, then verify signature and expiry against the issuer's
//! published key. Parse, verification, and key-fetch failures are 401;
//! semantic mismatches (issuer, audience, scope) are 403.

use crate::jwks::JwksKeyCache;
use crate::tenant::TenantConfig;
use axum::http::{header, HeaderMap, Method, StatusCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// A validated inbound request
#[derive(Debug, Clone)]
pub struct AuthorizedRequest {
    /// The raw bearer token, forwarded into the vault exchange
    pub token: String,
    /// Scopes carried by the token
    pub scopes: Vec<String>,
}

/// A rejected inbound request, with the RFC 6750 error fields the
/// forwarder places into `WWW-Authenticate`
#[derive(Debug, Clone)]
pub struct AuthDenied {
    /// 401 for parse/verify failures, 403 for semantic mismatches
    pub status: StatusCode,
    /// Bearer error code (`invalid_token`, `insufficient_scope`)
    pub error: &'static str,
    /// Human-readable detail
    pub message: String,
}

impl AuthDenied {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "invalid_token",
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            error: "invalid_token",
            message: message.into(),
        }
    }

    fn insufficient_scope(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            error: "insufficient_scope",
            message: message.into(),
        }
    }
}

/// Audience claim, which issuers publish as a string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AudienceClaim {
    /// Single audience
    One(String),
    /// Multiple audiences
    Many(Vec<String>),
}

impl AudienceClaim {
    fn values(&self) -> Vec<&str> {
        match self {
            Self::One(aud) => vec![aud.as_str()],
            Self::Many(auds) => auds.iter().map(String::as_str).collect(),
        }
    }
}

/// Claims this proxy reads from inbound tokens; everything else is ignored
#[derive(Debug, Deserialize)]
struct InboundClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<AudienceClaim>,
    /// Space-separated scope string, the RFC 8693 form
    #[serde(default)]
    scope: Option<String>,
    /// Scope array, the form some issuers use instead
    #[serde(default)]
    scp: Option<Vec<String>>,
}

impl InboundClaims {
    fn scopes(&self) -> Vec<String> {
        if let Some(scope) = &self.scope {
            return scope.split_whitespace().map(str::to_owned).collect();
        }
        self.scp.clone().unwrap_or_default()
    }
}

/// Scope enforcement policy for forwarded requests.
///
/// The default is permissive: the hook exists so deployments (and test
/// suites) can require scopes without touching the validation path.
#[derive(Debug, Clone, Default)]
pub enum ScopePolicy {
    /// Accept any scope set
    #[default]
    Permissive,
    /// Require every listed scope to be present
    Require(Vec<String>),
}

impl ScopePolicy {
    /// Evaluate the policy for a token's scopes and the request method
    #[must_use]
    pub fn allows(&self, scopes: &[String], _method: &Method) -> bool {
        match self {
            Self::Permissive => true,
            Self::Require(required) => required.iter().all(|r| scopes.iter().any(|s| s == r)),
        }
    }
}

/// Validates inbound bearer JWTs for the proxy forwarder
pub struct InboundAuthorizer {
    jwks: Arc<JwksKeyCache>,
    expected_audience: Option<String>,
    audience_prefix_match: bool,
    scope_policy: ScopePolicy,
}

impl InboundAuthorizer {
    /// Create an authorizer over the shared JWKS cache
    #[must_use]
    pub fn new(
        jwks: Arc<JwksKeyCache>,
        expected_audience: Option<String>,
        audience_prefix_match: bool,
    ) -> Self {
        Self {
            jwks,
            expected_audience,
            audience_prefix_match,
            scope_policy: ScopePolicy::Permissive,
        }
    }

    /// Replace the scope policy
    #[must_use]
    pub fn with_scope_policy(mut self, policy: ScopePolicy) -> Self {
        self.scope_policy = policy;
        self
    }

    /// Validate the bearer token on an inbound request for `tenant`.
    ///
    /// # Errors
    /// `AuthDenied` with 401 on any parse/verify/key-fetch failure and
    /// 403 on issuer, audience, or scope mismatch.
    pub async fn authorize(
        &self,
        tenant: &TenantConfig,
        headers: &HeaderMap,
        method: &Method,
    ) -> Result<AuthorizedRequest, AuthDenied> {
        let token = extract_bearer(headers)
            .ok_or_else(|| AuthDenied::invalid("Missing or malformed Authorization header"))?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthDenied::invalid(format!("Malformed token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthDenied::invalid("Token header missing kid"))?;

        // Unverified peek at the issuer so we can pick the right JWKS
        // and reject cross-tenant tokens before any network I/O.
        let unverified = peek_claims(token)
            .ok_or_else(|| AuthDenied::invalid("Token payload is not decodable"))?;
        let issuer = unverified
            .iss
            .as_deref()
            .ok_or_else(|| AuthDenied::invalid("Token missing iss claim"))?;
        if issuer != tenant.issuer {
            debug!(tenant = %tenant.id, issuer, "issuer mismatch on inbound token");
            return Err(AuthDenied::forbidden("Token issuer not valid for tenant"));
        }

        let decoding_key = self
            .jwks
            .signing_key(&tenant.jwks_url, &kid)
            .await
            .map_err(|e| AuthDenied::invalid(format!("Signing key unavailable: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        // Audience is checked below so prefix laxity stays configurable
        validation.validate_aud = false;

        let data = decode::<InboundClaims>(token, &decoding_key, &validation)
            .map_err(|e| AuthDenied::invalid(format!("Token verification failed: {e}")))?;
        let claims = data.claims;

        if let Some(expected) = &self.expected_audience {
            if !self.audience_matches(claims.aud.as_ref(), expected) {
                return Err(AuthDenied::forbidden("Token audience not acceptable"));
            }
        }

        let scopes = claims.scopes();
        if !self.scope_policy.allows(&scopes, method) {
            return Err(AuthDenied::insufficient_scope(
                "Token scope insufficient for this request",
            ));
        }

        Ok(AuthorizedRequest {
            token: token.to_owned(),
            scopes,
        })
    }

    fn audience_matches(&self, aud: Option<&AudienceClaim>, expected: &str) -> bool {
        let Some(aud) = aud else { return false };
        aud.values().iter().any(|value| {
            value == &expected || (self.audience_prefix_match && value.starts_with(expected))
        })
    }
}

/// Extract the bearer token, scheme case-insensitive, single capture
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Decode the payload segment without verifying the signature
fn peek_claims(token: &str) -> Option<InboundClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_extraction_is_case_insensitive() {
        assert_eq!(extract_bearer(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(&headers_with("bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(&headers_with("BEARER abc")), Some("abc"));
    }

    #[test]
    fn non_bearer_schemes_are_rejected() {
        assert_eq!(extract_bearer(&headers_with("Basic dXNlcg==")), None);
        assert_eq!(extract_bearer(&headers_with("Bearer")), None);
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn scope_policy_defaults_open() {
        let policy = ScopePolicy::default();
        assert!(policy.allows(&[], &Method::GET));
        assert!(policy.allows(&["anything".into()], &Method::DELETE));
    }

    #[test]
    fn scope_policy_requires_all_listed_scopes() {
        let policy = ScopePolicy::Require(vec!["repo".into()]);
        assert!(policy.allows(&["repo".into(), "user".into()], &Method::GET));
        assert!(!policy.allows(&["user".into()], &Method::GET));
    }

    #[test]
    fn audience_claim_handles_string_and_list() {
        let one: AudienceClaim = serde_json::from_str("\"api://a\"").unwrap();
        assert_eq!(one.values(), vec!["api://a"]);
        let many: AudienceClaim = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(many.values(), vec!["a", "b"]);
    }
}
