// ABOUTME: Data models for the browser-driven authorization flow
// ABOUTME: Correlation payloads, token endpoint wire types, and OAuth error responses
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::errors::{AppError, UpstreamError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The client's original authorization request, captured at
/// `/authorize/{tenant}` and replayed when the flow returns to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundAuthorizeContext {
    /// Tenant the client addressed
    pub tenant_id: String,
    /// Client CSRF state, returned byte-for-byte on the final redirect
    pub state: Option<String>,
    /// Client id presented inbound; rebound at /token
    pub client_id: Option<String>,
    /// Where the client wants the authorization code delivered
    pub redirect_uri: String,
    /// PKCE challenge; verification at /token is mandatory
    pub code_challenge: Option<String>,
    /// PKCE challenge method; only S256 is accepted
    pub code_challenge_method: Option<String>,
    /// Full raw parameter bag for later replay
    pub raw: BTreeMap<String, String>,
}

impl InboundAuthorizeContext {
    /// Capture the inbound query of `/authorize/{tenant}`.
    ///
    /// # Errors
    /// Returns `invalid_request` if `redirect_uri` is missing.
    pub fn from_query(
        tenant_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, OAuthError> {
        let redirect_uri = params
            .get("redirect_uri")
            .cloned()
            .ok_or_else(|| OAuthError::invalid_request("Missing redirect_uri parameter"))?;

        Ok(Self {
            tenant_id: tenant_id.to_owned(),
            state: params.get("state").cloned(),
            client_id: params.get("client_id").cloned(),
            redirect_uri,
            code_challenge: params.get("code_challenge").cloned(),
            code_challenge_method: params.get("code_challenge_method").cloned(),
            raw: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }
}

/// Agent access token obtained from the ID-JAG chain, staged until the
/// flow can hand a return code to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedAgentToken {
    /// The agent-bound access token
    pub access_token: String,
    /// Scope granted by the tenant's authorization server
    pub scope: Option<String>,
    /// Lifetime in seconds, as reported upstream
    pub expires_in: Option<u64>,
    /// ID token from the interactive login leg
    pub id_token: Option<String>,
}

/// Correlation entry for an in-flight OIDC flow, keyed by outbound_state.
///
/// Written without tokens at `/authorize`; the staged token is added in
/// place only by the OIDC callback when linking is required.
#[derive(Debug, Clone)]
pub struct OidcOutboundEntry {
    /// Tenant that owns this flow
    pub tenant_id: String,
    /// The client's captured request
    pub inbound: InboundAuthorizeContext,
    /// Agent token parked while the user links an account
    pub staged: Option<StagedAgentToken>,
}

/// Correlation entry for a connected-accounts linking session, keyed by
/// link_state.
#[derive(Debug, Clone)]
pub struct LinkSession {
    /// Key under which this session is stored
    pub link_state: String,
    /// The outbound_state of the OIDC flow that required linking
    pub oidc_state: String,
    /// Opaque session handle issued by the vault at link start
    pub auth_session: String,
    /// The agent access token on whose behalf linking runs
    pub user_token: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Correlation entry for an issued authorization code, keyed by the code.
/// Consumed exactly once by `/token`.
#[derive(Debug, Clone)]
pub struct ReturnCode {
    /// The staged agent token the client will receive
    pub agent_access_token: String,
    /// Scope of the agent token
    pub scope: Option<String>,
    /// Lifetime of the agent token in seconds
    pub expires_in: Option<u64>,
    /// ID token from the login leg
    pub id_token: Option<String>,
    /// The original inbound request, for client_id and PKCE rebinding
    pub inbound: InboundAuthorizeContext,
}

/// Token endpoint request; accepted as form or JSON
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// Must be `authorization_code`
    pub grant_type: Option<String>,
    /// The return code issued on the final browser redirect
    pub code: Option<String>,
    /// Must match the client id captured at /authorize
    pub client_id: Option<String>,
    /// PKCE verifier; `base64url(sha256(verifier))` must equal the
    /// captured challenge
    pub code_verifier: Option<String>,
    /// Redirect URI, required by the OAuth grant shape
    pub redirect_uri: Option<String>,
}

/// Token endpoint success response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// The agent access token
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Scope granted, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Lifetime in seconds, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// ID token, when the login leg produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// OAuth 2.0 error response shape (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize)]
pub struct OAuthError {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self {
            error: "invalid_request".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self {
            error: "invalid_grant".to_owned(),
            error_description: Some(description.to_owned()),
        }
    }

    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self {
            error: "unsupported_grant_type".to_owned(),
            error_description: Some("Only authorization_code is supported".to_owned()),
        }
    }

    /// The callback arrived with a state this proxy no longer knows
    #[must_use]
    pub fn invalid_state() -> Self {
        Self {
            error: "invalid_state".to_owned(),
            error_description: Some("Unknown or expired state parameter".to_owned()),
        }
    }
}

/// Failure surfaced by a flow transition: either an OAuth-shaped 400 or
/// a taxonomy error carrying its own status.
#[derive(Debug)]
pub enum FlowError {
    /// OAuth 2.0 error-response shape, HTTP 400
    OAuth(OAuthError),
    /// Everything else (404 tenant, 403 vault refusal, 5xx upstream)
    App(AppError),
}

impl From<OAuthError> for FlowError {
    fn from(err: OAuthError) -> Self {
        Self::OAuth(err)
    }
}

impl From<AppError> for FlowError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<UpstreamError> for FlowError {
    fn from(err: UpstreamError) -> Self {
        Self::App(err.into())
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        match self {
            Self::OAuth(err) => (StatusCode::BAD_REQUEST, Json(err)).into_response(),
            Self::App(err) => err.into_response(),
        }
    }
}
