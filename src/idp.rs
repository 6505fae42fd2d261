// ABOUTME: Upstream identity provider client for login and token-exchange legs
// ABOUTME: Implements authorization-code, RFC 8693 ID-JAG, and JWT-bearer grants
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # IdP Exchange Client
//!
//! Three outbound token operations chain an interactive login into an
//! agent-bound access token:
//!
//! 1. authorization code → ID token (interactive login leg)
//! 2. ID token → ID-JAG via RFC 8693 token exchange, client
//!    authenticated by a private-key JWT assertion
//! 3. ID-JAG → agent access token via the JWT-bearer grant at the
//!    tenant's own authorization server
//!
//! All three speak `application/x-www-form-urlencoded`; responses decode
//! tolerantly so upstream additions do not break the chain.

use crate::config::ServerConfig;
use crate::constants::{oauth, timeouts, ttl};
use crate::errors::UpstreamError;
use crate::tenant::TenantConfig;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Agent access token with its advertised scope and lifetime
#[derive(Debug, Clone)]
pub struct AgentTokenSet {
    /// The agent-bound access token
    pub access_token: String,
    /// Scope granted
    pub scope: Option<String>,
    /// Lifetime in seconds
    pub expires_in: Option<u64>,
}

/// The IdP operations the flow orchestrator depends on
#[async_trait]
pub trait IdpExchange: Send + Sync {
    /// Redeem the authorization code from the login leg for an ID token
    async fn complete_oidc_login(&self, code: &str) -> Result<String, UpstreamError>;

    /// Exchange the ID token for an identity-assertion JWT authorization
    /// grant scoped to the tenant's authorization server
    async fn id_token_to_id_jag(
        &self,
        tenant: &TenantConfig,
        id_token: &str,
    ) -> Result<String, UpstreamError>;

    /// Redeem the ID-JAG for an agent access token at the tenant's
    /// authorization server
    async fn id_jag_to_access_token(
        &self,
        tenant: &TenantConfig,
        id_jag: &str,
    ) -> Result<AgentTokenSet, UpstreamError>;
}

/// Concrete client talking to the configured upstream IdP
pub struct IdpExchangeClient {
    http: reqwest::Client,
    config: Arc<ServerConfig>,
}

/// Claims of the RFC 7523 private-key JWT client assertion
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Issuer, the client id
    pub iss: String,
    /// Subject, also the client id
    pub sub: String,
    /// Audience, the token endpoint being called
    pub aud: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, five minutes after issuance
    pub exp: i64,
    /// Unique token id preventing replay
    pub jti: String,
}

/// Tolerant decode of the login-leg token response
#[derive(Debug, Deserialize)]
struct OidcTokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// Tolerant decode of exchange and JWT-bearer responses
#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Tolerant decode of upstream OAuth error bodies
#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl IdpExchangeClient {
    /// Create a client with the standard upstream timeout
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeouts::UPSTREAM)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    fn client_assertion(&self, token_endpoint: &str) -> Result<String, UpstreamError> {
        build_client_assertion(
            &self.config.agent.client_id,
            token_endpoint,
            &self.config.agent.private_key_path,
            &self.config.agent.key_id,
        )
    }
}

#[async_trait]
impl IdpExchange for IdpExchangeClient {
    async fn complete_oidc_login(&self, code: &str) -> Result<String, UpstreamError> {
        let endpoint = self.config.idp.token_endpoint();
        let redirect_uri = self.config.oidc_callback_uri();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", oauth::IDP_LOGIN_SCOPES),
            ("client_id", self.config.idp.client_id.as_str()),
            ("client_secret", self.config.idp.client_secret.as_str()),
        ];

        let response: OidcTokenResponse = post_form(&self.http, &endpoint, &params).await?;
        response
            .id_token
            .ok_or_else(|| UpstreamError::Local("IdP token response carried no id_token".into()))
    }

    async fn id_token_to_id_jag(
        &self,
        tenant: &TenantConfig,
        id_token: &str,
    ) -> Result<String, UpstreamError> {
        let endpoint = self.config.idp.token_endpoint();
        let assertion = self.client_assertion(&endpoint)?;
        let scope = tenant.external_scope_string();
        let params = [
            ("grant_type", oauth::GRANT_TYPE_TOKEN_EXCHANGE),
            ("requested_token_type", oauth::TOKEN_TYPE_ID_JAG),
            ("audience", tenant.issuer.as_str()),
            ("scope", scope.as_str()),
            ("subject_token_type", oauth::TOKEN_TYPE_ID_TOKEN),
            ("subject_token", id_token),
            (
                "client_assertion_type",
                oauth::CLIENT_ASSERTION_TYPE_JWT_BEARER,
            ),
            ("client_assertion", assertion.as_str()),
        ];

        debug!(tenant = %tenant.id, "exchanging id_token for ID-JAG");
        let response: ExchangeResponse = post_form(&self.http, &endpoint, &params).await?;
        response
            .access_token
            .ok_or_else(|| UpstreamError::Local("token exchange returned no ID-JAG".into()))
    }

    async fn id_jag_to_access_token(
        &self,
        tenant: &TenantConfig,
        id_jag: &str,
    ) -> Result<AgentTokenSet, UpstreamError> {
        let endpoint = tenant.token_endpoint();
        let assertion = self.client_assertion(&endpoint)?;
        let params = [
            ("grant_type", oauth::GRANT_TYPE_JWT_BEARER),
            ("assertion", id_jag),
            (
                "client_assertion_type",
                oauth::CLIENT_ASSERTION_TYPE_JWT_BEARER,
            ),
            ("client_assertion", assertion.as_str()),
        ];

        debug!(tenant = %tenant.id, "redeeming ID-JAG for agent access token");
        let response: ExchangeResponse = post_form(&self.http, &endpoint, &params).await?;
        let access_token = response
            .access_token
            .ok_or_else(|| UpstreamError::Local("JWT-bearer grant returned no token".into()))?;

        Ok(AgentTokenSet {
            access_token,
            scope: response.scope,
            expires_in: response.expires_in,
        })
    }
}

/// Sign an RFC 7523 client assertion for `token_endpoint`.
///
/// RS256, `iss = sub = client_id`, five-minute lifetime, random UUID
/// `jti`, `kid` set in the header.
///
/// # Errors
/// Returns a local error if the key file is unreadable or not an RSA
/// private key in PEM form.
pub fn build_client_assertion(
    client_id: &str,
    token_endpoint: &str,
    private_key_path: &str,
    kid: &str,
) -> Result<String, UpstreamError> {
    let pem = fs::read(private_key_path).map_err(|e| {
        UpstreamError::Local(format!("cannot read agent key {private_key_path}: {e}"))
    })?;
    let key = EncodingKey::from_rsa_pem(&pem)
        .map_err(|e| UpstreamError::Local(format!("agent key is not RSA PEM: {e}")))?;

    let now = Utc::now().timestamp();
    let claims = ClientAssertionClaims {
        iss: client_id.to_owned(),
        sub: client_id.to_owned(),
        aud: token_endpoint.to_owned(),
        iat: now,
        exp: now + ttl::CLIENT_ASSERTION_SECS,
        jti: Uuid::new_v4().to_string(),
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_owned());

    encode(&header, &claims, &key)
        .map_err(|e| UpstreamError::Local(format!("failed to sign client assertion: {e}")))
}

/// POST a form-encoded token request, classifying failures: transport
/// errors by kind, error statuses with the upstream's own body.
pub(crate) async fn post_form<T: DeserializeOwned>(
    http: &reqwest::Client,
    endpoint: &str,
    params: &[(&str, &str)],
) -> Result<T, UpstreamError> {
    let response = http
        .post(endpoint)
        .form(params)
        .send()
        .await
        .map_err(|e| UpstreamError::from_transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        let body: UpstreamErrorBody = response.json().await.unwrap_or(UpstreamErrorBody {
            error: None,
            error_description: None,
        });
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            code: body.error.unwrap_or_else(|| "upstream_error".to_owned()),
            description: body.error_description.unwrap_or_default(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| UpstreamError::Local(format!("undecodable upstream response: {e}")))
}
