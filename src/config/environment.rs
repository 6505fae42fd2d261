// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Loads and validates all server, IdP, vault, and agent settings from env vars
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

//! Environment-based configuration for production deployment.
//!
//! Everything the proxy needs at runtime comes from environment
//! variables, validated once at startup. Missing required variables
//! fail fast with the variable name in the error.

use crate::constants::env_config;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Externally visible base URL of this proxy (no trailing slash)
    pub proxy_base_url: String,
    /// Path of the tenant configuration file
    pub config_path: String,
    /// Upstream identity provider settings
    pub idp: IdpConfig,
    /// Token vault settings
    pub vault: VaultConfig,
    /// Agent identity used for token exchange
    pub agent: AgentConfig,
    /// Expected audience for inbound bearer tokens, when enforced
    pub expected_audience: Option<String>,
    /// Accept audience values that merely start with the expected one.
    /// Off by default; matches a laxity some upstream deployments rely on.
    pub audience_prefix_match: bool,
}

/// Upstream identity provider (authorization server) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// IdP domain, e.g. `dev-123.okta.com`
    pub domain: String,
    /// Client id the proxy uses for the interactive login leg
    pub client_id: String,
    /// Client secret for the interactive login leg
    pub client_secret: String,
}

impl IdpConfig {
    /// Authorization endpoint for the interactive login leg
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("https://{}/oauth2/v1/authorize", self.domain)
    }

    /// Token endpoint for the interactive login leg and ID-JAG exchange
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("https://{}/oauth2/v1/token", self.domain)
    }
}

/// Token vault settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault domain, e.g. `tenant.us.auth0.com`
    pub domain: String,
    /// Client id for the custom token-exchange profile
    pub cte_client_id: String,
    /// Client secret for the custom token-exchange profile
    pub cte_client_secret: String,
    /// Client id for the federated-connection grant
    pub client_id: String,
    /// Client secret for the federated-connection grant
    pub client_secret: String,
    /// Audience requested when minting vault-scoped tokens
    pub audience: String,
    /// Scopes requested when minting vault-scoped tokens
    pub scope: String,
}

impl VaultConfig {
    /// The vault's token endpoint
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("https://{}/oauth/token", self.domain)
    }

    /// Audience for connected-account management calls
    #[must_use]
    pub fn me_audience(&self) -> String {
        format!("https://{}/me/", self.domain)
    }

    /// Connected-accounts connect endpoint
    #[must_use]
    pub fn connect_endpoint(&self) -> String {
        format!("https://{}/me/v1/connected-accounts/connect", self.domain)
    }

    /// Connected-accounts complete endpoint
    #[must_use]
    pub fn complete_endpoint(&self) -> String {
        format!("https://{}/me/v1/connected-accounts/complete", self.domain)
    }
}

/// Agent identity used for private-key JWT client authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// OAuth client id of the agent
    pub client_id: String,
    /// Filesystem path of the RS256 private key (PEM)
    pub private_key_path: String,
    /// Key id advertised in the assertion header
    pub key_id: String,
}

fn required(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::config(format!("missing required env var {name}")))
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` naming the first missing required variable.
    pub fn from_env() -> AppResult<Self> {
        let http_port = env_config::port();
        let proxy_base_url = env_config::proxy_base_url()
            .trim_end_matches('/')
            .to_owned();

        Ok(Self {
            http_port,
            proxy_base_url,
            config_path: env_config::config_path(),
            idp: IdpConfig {
                domain: required("OKTA_DOMAIN")?,
                client_id: required("VSCODE_CLIENT")?,
                client_secret: required("VSCODE_SECRET")?,
            },
            vault: VaultConfig {
                domain: required("AUTH0_DOMAIN")?,
                cte_client_id: required("AUTH0_CTE_CLIENT_ID")?,
                cte_client_secret: required("AUTH0_CTE_CLIENT_SECRET")?,
                client_id: required("AUTH0_VAULT_CLIENT_ID")?,
                client_secret: required("AUTH0_VAULT_CLIENT_SECRET")?,
                audience: required("AUTH0_VAULT_AUDIENCE")?,
                scope: required("AUTH0_VAULT_SCOPE")?,
            },
            agent: AgentConfig {
                client_id: required("AGENT_CLIENT_ID")?,
                private_key_path: required("AGENT_PRIVATE_KEY_PATH")?,
                key_id: required("AGENT_PRIVATE_KEY_ID")?,
            },
            expected_audience: env::var("EXPECTED_AUDIENCE").ok(),
            audience_prefix_match: env::var("AUDIENCE_PREFIX_MATCH")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    /// Redirect URI the IdP sends the browser back to
    #[must_use]
    pub fn oidc_callback_uri(&self) -> String {
        format!("{}/callback", self.proxy_base_url)
    }

    /// Redirect URI the vault's link provider sends the browser back to
    #[must_use]
    pub fn link_callback_uri(&self) -> String {
        format!("{}/connected_account_callback", self.proxy_base_url)
    }
}
