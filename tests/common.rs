// ABOUTME: Shared test utilities and fake collaborators for integration tests
// ABOUTME: Provides config builders, tenant fixtures, and scripted IdP/vault fakes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org
#![allow(dead_code)]

use async_trait::async_trait;
use mcp_auth_proxy::config::{AgentConfig, IdpConfig, ServerConfig, VaultConfig};
use mcp_auth_proxy::errors::UpstreamError;
use mcp_auth_proxy::idp::{AgentTokenSet, IdpExchange};
use mcp_auth_proxy::tenant::TenantConfig;
use mcp_auth_proxy::vault::{LinkStart, VaultExchange, VaultExchangeOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic agent token handed out by the fake IdP
pub const AGENT_TOKEN: &str = "agent-token-1";
/// Deterministic link state handed out by the fake vault
pub const LINK_STATE: &str = "link-state-1";
/// Deterministic link URL handed out by the fake vault
pub const LINK_URL: &str = "http://vault.example/connect?ticket=T1";

/// Server configuration pointing at example hosts; no network calls are
/// made through it in tests
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 5000,
        proxy_base_url: "http://proxy.example".to_owned(),
        config_path: "config.json".to_owned(),
        idp: IdpConfig {
            domain: "idp.example".to_owned(),
            client_id: "proxy-login-client".to_owned(),
            client_secret: "proxy-login-secret".to_owned(),
        },
        vault: VaultConfig {
            domain: "vault.example".to_owned(),
            cte_client_id: "cte-client".to_owned(),
            cte_client_secret: "cte-secret".to_owned(),
            client_id: "vault-client".to_owned(),
            client_secret: "vault-secret".to_owned(),
            audience: "https://vault.example/api/".to_owned(),
            scope: "openid".to_owned(),
        },
        agent: AgentConfig {
            client_id: "agent-client".to_owned(),
            private_key_path: "/nonexistent/agent.pem".to_owned(),
            key_id: "agent-key-1".to_owned(),
        },
        expected_audience: None,
        audience_prefix_match: false,
    }
}

/// Tenant fixture with a vault connection
pub fn test_tenant(id: &str) -> TenantConfig {
    TenantConfig {
        id: id.to_owned(),
        name: format!("{id} backend"),
        backend_url: format!("http://backend.example/{id}"),
        issuer: "https://issuer.example".to_owned(),
        jwks_url: "https://issuer.example/oauth2/v1/keys".to_owned(),
        vault_connection: Some(id.to_owned()),
        external_scopes: vec!["repo".to_owned()],
    }
}

/// Scripted IdP fake: either succeeds with deterministic tokens or
/// fails every call with the configured error
pub struct FakeIdp {
    pub fail_with: Option<fn() -> UpstreamError>,
    pub login_calls: AtomicUsize,
}

impl FakeIdp {
    pub fn ok() -> Self {
        Self {
            fail_with: None,
            login_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: fn() -> UpstreamError) -> Self {
        Self {
            fail_with: Some(err),
            login_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdpExchange for FakeIdp {
    async fn complete_oidc_login(&self, _code: &str) -> Result<String, UpstreamError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(err) => Err(err()),
            None => Ok("id-token-1".to_owned()),
        }
    }

    async fn id_token_to_id_jag(
        &self,
        _tenant: &TenantConfig,
        _id_token: &str,
    ) -> Result<String, UpstreamError> {
        match self.fail_with {
            Some(err) => Err(err()),
            None => Ok("id-jag-1".to_owned()),
        }
    }

    async fn id_jag_to_access_token(
        &self,
        _tenant: &TenantConfig,
        _id_jag: &str,
    ) -> Result<AgentTokenSet, UpstreamError> {
        match self.fail_with {
            Some(err) => Err(err()),
            None => Ok(AgentTokenSet {
                access_token: AGENT_TOKEN.to_owned(),
                scope: Some("repo".to_owned()),
                expires_in: Some(3600),
            }),
        }
    }
}

/// What the fake vault should do on `exchange`
#[derive(Debug, Clone, Copy)]
pub enum VaultScript {
    /// Return a downstream token
    Token,
    /// Report that linking is required
    NeedsLinking,
    /// Refuse with an upstream 400
    Refuse,
    /// Fail as unreachable
    Unreachable,
}

/// Scripted vault fake
pub struct FakeVault {
    pub script: VaultScript,
    pub fail_begin_link: bool,
    pub fail_complete_link: bool,
    pub exchange_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
}

impl FakeVault {
    pub fn with_script(script: VaultScript) -> Self {
        Self {
            script,
            fail_begin_link: false,
            fail_complete_link: false,
            exchange_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VaultExchange for FakeVault {
    async fn exchange(
        &self,
        _agent_token: &str,
        _tenant: &TenantConfig,
    ) -> Result<VaultExchangeOutcome, UpstreamError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            VaultScript::Token => Ok(VaultExchangeOutcome::Token("downstream-1".to_owned())),
            VaultScript::NeedsLinking => Ok(VaultExchangeOutcome::NeedsLinking),
            VaultScript::Refuse => Err(UpstreamError::Status {
                status: 400,
                code: "invalid_grant".to_owned(),
                description: "subject token rejected".to_owned(),
            }),
            VaultScript::Unreachable => {
                Err(UpstreamError::Unreachable("connection refused".to_owned()))
            }
        }
    }

    async fn begin_link(
        &self,
        _agent_token: &str,
        _tenant: &TenantConfig,
        _redirect_uri: &str,
    ) -> Result<LinkStart, UpstreamError> {
        if self.fail_begin_link {
            return Err(UpstreamError::Status {
                status: 400,
                code: "invalid_request".to_owned(),
                description: "connect rejected".to_owned(),
            });
        }
        Ok(LinkStart {
            link_url: LINK_URL.to_owned(),
            auth_session: "auth-session-1".to_owned(),
            link_state: LINK_STATE.to_owned(),
        })
    }

    async fn complete_link(
        &self,
        _auth_session: &str,
        _connect_code: &str,
        _redirect_uri: &str,
        _user_token: &str,
    ) -> Result<(), UpstreamError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_complete_link {
            return Err(UpstreamError::Status {
                status: 403,
                code: "access_denied".to_owned(),
                description: "completion rejected".to_owned(),
            });
        }
        Ok(())
    }
}
