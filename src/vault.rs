// ABOUTME: Token vault client for federated credential exchange and account linking
// ABOUTME: Wraps the vault's custom token exchange, connect, and complete endpoints
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Vault Client
//!
//! The vault holds the user's connected accounts and mints federated
//! downstream access tokens from them. Every operation first trades the
//! agent access token for a vault-scoped token through the vault's
//! custom token-exchange profile, then calls the actual endpoint.
//!
//! A 401 carrying `federated_connection_refresh_token_not_found` is not
//! a failure: it is the vault saying the user has never linked this
//! connection, and the flow must detour through account linking.

use crate::config::ServerConfig;
use crate::constants::{oauth, timeouts};
use crate::correlation::generate_correlation_key;
use crate::errors::UpstreamError;
use crate::tenant::TenantConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Vault error code signalling that no connected account exists
const LINKING_REQUIRED_ERROR: &str = "federated_connection_refresh_token_not_found";

/// Outcome of a federated credential exchange
#[derive(Debug, Clone)]
pub enum VaultExchangeOutcome {
    /// The vault minted a downstream access token
    Token(String),
    /// The user must link a connected account first
    NeedsLinking,
}

/// A started connected-accounts linking session
#[derive(Debug, Clone)]
pub struct LinkStart {
    /// URL to send the user's browser to
    pub link_url: String,
    /// Opaque vault session handle, needed at completion
    pub auth_session: String,
    /// Fresh state key identifying this linking session
    pub link_state: String,
}

/// The vault operations the orchestrator and forwarder depend on
#[async_trait]
pub trait VaultExchange: Send + Sync {
    /// Exchange the agent token for the user's federated downstream
    /// credential on `tenant`'s connection
    async fn exchange(
        &self,
        agent_token: &str,
        tenant: &TenantConfig,
    ) -> Result<VaultExchangeOutcome, UpstreamError>;

    /// Start a connected-accounts linking session for `tenant`'s
    /// connection, returning the URL to redirect the user to
    async fn begin_link(
        &self,
        agent_token: &str,
        tenant: &TenantConfig,
        redirect_uri: &str,
    ) -> Result<LinkStart, UpstreamError>;

    /// Complete a linking session with the code the provider returned
    async fn complete_link(
        &self,
        auth_session: &str,
        connect_code: &str,
        redirect_uri: &str,
        user_token: &str,
    ) -> Result<(), UpstreamError>;
}

/// Concrete client for the configured vault
pub struct VaultClient {
    http: reqwest::Client,
    config: Arc<ServerConfig>,
}

#[derive(Debug, Deserialize)]
struct VaultTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VaultErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    ticket: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    #[serde(default)]
    auth_session: Option<String>,
    #[serde(default)]
    connect_uri: Option<String>,
    #[serde(default)]
    connect_params: Option<ConnectParams>,
}

impl VaultClient {
    /// Create a client with the standard upstream timeout
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeouts::UPSTREAM)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Trade the agent token for a vault-scoped token via the vault's
    /// custom token-exchange profile
    async fn vault_scoped_token(
        &self,
        agent_token: &str,
        audience: &str,
        scope: &str,
    ) -> Result<String, UpstreamError> {
        let vault = &self.config.vault;
        let body = json!({
            "grant_type": oauth::GRANT_TYPE_TOKEN_EXCHANGE,
            "subject_token_type": oauth::SUBJECT_TOKEN_TYPE_AGENT,
            "subject_token": agent_token,
            "client_id": vault.cte_client_id,
            "client_secret": vault.cte_client_secret,
            "audience": audience,
            "scope": rewrite_scope_string(scope),
        });

        let response = self
            .http
            .post(vault.token_endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_status_error(status.as_u16(), response).await);
        }

        let token: VaultTokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Local(format!("undecodable vault response: {e}")))?;
        token
            .access_token
            .ok_or_else(|| UpstreamError::Local("vault exchange returned no token".into()))
    }
}

#[async_trait]
impl VaultExchange for VaultClient {
    async fn exchange(
        &self,
        agent_token: &str,
        tenant: &TenantConfig,
    ) -> Result<VaultExchangeOutcome, UpstreamError> {
        let connection = tenant.vault_connection.as_deref().ok_or_else(|| {
            UpstreamError::Local(format!("tenant {} has no vault connection", tenant.id))
        })?;
        let vault = &self.config.vault;

        let vault_token = self
            .vault_scoped_token(agent_token, &vault.audience, &vault.scope)
            .await?;

        let body = json!({
            "grant_type": oauth::GRANT_TYPE_FEDERATED_CONNECTION,
            "subject_token_type": oauth::TOKEN_TYPE_ACCESS_TOKEN,
            "subject_token": vault_token,
            "requested_token_type": oauth::REQUESTED_TOKEN_TYPE_FEDERATED,
            "connection": connection,
            "client_id": vault.client_id,
            "client_secret": vault.client_secret,
        });

        let response = self
            .http
            .post(vault.token_endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(&e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let parsed: VaultErrorBody = response.json().await.unwrap_or(VaultErrorBody {
                error: None,
                error_description: None,
            });
            if is_linking_required(status, parsed.error.as_deref()) {
                debug!(tenant = %tenant.id, "vault has no connected account, linking required");
                return Ok(VaultExchangeOutcome::NeedsLinking);
            }
            return Err(UpstreamError::Status {
                status,
                code: parsed.error.unwrap_or_else(|| "upstream_error".to_owned()),
                description: parsed.error_description.unwrap_or_default(),
            });
        }

        let token: VaultTokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Local(format!("undecodable vault response: {e}")))?;
        let downstream = token
            .access_token
            .ok_or_else(|| UpstreamError::Local("federated exchange returned no token".into()))?;
        Ok(VaultExchangeOutcome::Token(downstream))
    }

    async fn begin_link(
        &self,
        agent_token: &str,
        tenant: &TenantConfig,
        redirect_uri: &str,
    ) -> Result<LinkStart, UpstreamError> {
        let connection = tenant.vault_connection.as_deref().ok_or_else(|| {
            UpstreamError::Local(format!("tenant {} has no vault connection", tenant.id))
        })?;
        let vault = &self.config.vault;

        let me_token = self
            .vault_scoped_token(
                agent_token,
                &vault.me_audience(),
                oauth::CONNECTED_ACCOUNTS_SCOPES,
            )
            .await?;

        let link_state =
            generate_correlation_key().map_err(|e| UpstreamError::Local(e.to_string()))?;
        let scopes = rewrite_scopes(&tenant.external_scopes);
        let body = json!({
            "connection": connection,
            "redirect_uri": redirect_uri,
            "state": link_state,
            "scopes": scopes,
        });

        let response = self
            .http
            .post(vault.connect_endpoint())
            .bearer_auth(&me_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_status_error(status.as_u16(), response).await);
        }

        let connect: ConnectResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Local(format!("undecodable connect response: {e}")))?;

        let auth_session = connect
            .auth_session
            .ok_or_else(|| UpstreamError::Local("connect response missing auth_session".into()))?;
        let connect_uri = connect
            .connect_uri
            .ok_or_else(|| UpstreamError::Local("connect response missing connect_uri".into()))?;
        let ticket = connect
            .connect_params
            .and_then(|p| p.ticket)
            .ok_or_else(|| UpstreamError::Local("connect response missing ticket".into()))?;

        let mut link_url = Url::parse(&connect_uri)
            .map_err(|e| UpstreamError::Local(format!("vault returned bad connect_uri: {e}")))?;
        link_url.query_pairs_mut().append_pair("ticket", &ticket);

        Ok(LinkStart {
            link_url: link_url.into(),
            auth_session,
            link_state,
        })
    }

    async fn complete_link(
        &self,
        auth_session: &str,
        connect_code: &str,
        redirect_uri: &str,
        user_token: &str,
    ) -> Result<(), UpstreamError> {
        let vault = &self.config.vault;
        let me_token = self
            .vault_scoped_token(
                user_token,
                &vault.me_audience(),
                oauth::CONNECTED_ACCOUNTS_SCOPES,
            )
            .await?;

        let body = json!({
            "auth_session": auth_session,
            "connect_code": connect_code,
            "redirect_uri": redirect_uri,
        });

        let response = self
            .http
            .post(vault.complete_endpoint())
            .bearer_auth(&me_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_status_error(status.as_u16(), response).await);
        }
        Ok(())
    }
}

/// Whether a federated-exchange failure means "link an account first"
#[must_use]
pub fn is_linking_required(status: u16, error_code: Option<&str>) -> bool {
    status == 401 && error_code == Some(LINKING_REQUIRED_ERROR)
}

/// Rewrite the legacy `refresh_token` scope placeholder to
/// `offline_access` before transmission. Callers that predate the vault
/// still request `refresh_token`; the vault only understands the OIDC
/// spelling.
#[must_use]
pub fn rewrite_scopes(scopes: &[String]) -> Vec<String> {
    scopes
        .iter()
        .map(|s| {
            if s == "refresh_token" {
                "offline_access".to_owned()
            } else {
                s.clone()
            }
        })
        .collect()
}

/// Space-separated form of the scope rewrite
#[must_use]
pub fn rewrite_scope_string(scope: &str) -> String {
    scope
        .split_whitespace()
        .map(|s| {
            if s == "refresh_token" {
                "offline_access"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn upstream_status_error(status: u16, response: reqwest::Response) -> UpstreamError {
    let parsed: VaultErrorBody = response.json().await.unwrap_or(VaultErrorBody {
        error: None,
        error_description: None,
    });
    UpstreamError::Status {
        status,
        code: parsed.error.unwrap_or_else(|| "upstream_error".to_owned()),
        description: parsed.error_description.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linking_detection_requires_401_and_exact_code() {
        assert!(is_linking_required(
            401,
            Some("federated_connection_refresh_token_not_found")
        ));
        assert!(!is_linking_required(
            403,
            Some("federated_connection_refresh_token_not_found")
        ));
        assert!(!is_linking_required(401, Some("invalid_grant")));
        assert!(!is_linking_required(401, None));
    }

    #[test]
    fn refresh_token_scope_is_rewritten() {
        let scopes = vec!["repo".to_owned(), "refresh_token".to_owned()];
        assert_eq!(rewrite_scopes(&scopes), vec!["repo", "offline_access"]);
        assert_eq!(
            rewrite_scope_string("openid refresh_token email"),
            "openid offline_access email"
        );
    }
}
