// ABOUTME: Flow orchestrator binding inbound client flows to IdP, vault, and link flows
// ABOUTME: Implements the authorize, OIDC callback, link callback, and token transitions
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Flow Orchestrator
//!
//! The state machine at the heart of the proxy. A flow begins when the
//! client hits `/authorize/{tenant}` and ends when `/token` consumes the
//! single-use return code:
//!
//! ```text
//! INIT -> AWAIT_IDP -> EVALUATING -> ISSUED -> CONSUMED
//!                          \-> AWAIT_LINK -> ISSUED
//! ```
//!
//! State never lives in the URL: each transition writes a correlation
//! entry under a fresh CSPRNG key and the next hop looks it up again.
//! Every error transition evicts the flow's entries so nothing dangles.

pub mod models;

use crate::config::ServerConfig;
use crate::constants::oauth;
use crate::correlation::{generate_correlation_key, CorrelationStore};
use crate::errors::{AppError, UpstreamError};
use crate::idp::IdpExchange;
use crate::tenant::{TenantConfig, TenantRegistry};
use crate::vault::{VaultExchange, VaultExchangeOutcome};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use models::{
    FlowError, InboundAuthorizeContext, LinkSession, OAuthError, OidcOutboundEntry, ReturnCode,
    StagedAgentToken, TokenRequest, TokenResponse,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

/// Query parameters of the IdP callback
#[derive(Debug, Default, Deserialize)]
pub struct OidcCallbackParams {
    /// The outbound_state this proxy generated
    pub state: Option<String>,
    /// Authorization code from the IdP
    pub code: Option<String>,
    /// Error code, when the IdP declined
    pub error: Option<String>,
    /// Error detail, when the IdP declined
    pub error_description: Option<String>,
}

/// Query parameters of the vault link callback
#[derive(Debug, Default, Deserialize)]
pub struct LinkCallbackParams {
    /// The link_state generated at link start
    pub state: Option<String>,
    /// Completion code from the link provider
    pub connect_code: Option<String>,
}

/// The state machine tying authorize, callbacks, and token together
pub struct FlowOrchestrator {
    config: Arc<ServerConfig>,
    registry: Arc<TenantRegistry>,
    store: Arc<CorrelationStore>,
    idp: Arc<dyn IdpExchange>,
    vault: Arc<dyn VaultExchange>,
}

impl FlowOrchestrator {
    /// Wire the orchestrator to its collaborators
    #[must_use]
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<TenantRegistry>,
        store: Arc<CorrelationStore>,
        idp: Arc<dyn IdpExchange>,
        vault: Arc<dyn VaultExchange>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            idp,
            vault,
        }
    }

    /// INIT → AWAIT_IDP at `GET /authorize/{tenant}`.
    ///
    /// Captures the client's request, parks it under a fresh
    /// outbound_state, and returns the IdP authorization URL to
    /// redirect the browser to.
    ///
    /// # Errors
    /// 404 for unknown tenants, `invalid_request` for missing parameters.
    pub async fn authorize(
        &self,
        tenant_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<String, FlowError> {
        let tenant = self.resolve_tenant(tenant_id)?;
        let inbound = InboundAuthorizeContext::from_query(tenant_id, params)?;

        let outbound_state = generate_correlation_key()?;
        let outbound_nonce = generate_correlation_key()?;

        self.store
            .oidc
            .put(
                &outbound_state,
                OidcOutboundEntry {
                    tenant_id: tenant.id.clone(),
                    inbound,
                    staged: None,
                },
            )
            .await;

        let mut authorize_url = Url::parse(&self.config.idp.authorize_endpoint())
            .map_err(|e| AppError::config(format!("bad IdP authorize endpoint: {e}")))?;
        authorize_url
            .query_pairs_mut()
            .append_pair("client_id", &self.config.idp.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", oauth::IDP_LOGIN_SCOPES)
            .append_pair("state", &outbound_state)
            .append_pair("nonce", &outbound_nonce)
            .append_pair("redirect_uri", &self.config.oidc_callback_uri());

        info!(tenant = %tenant.id, "starting authorization flow");
        Ok(authorize_url.into())
    }

    /// AWAIT_IDP → EVALUATING at `GET /callback`.
    ///
    /// Runs the IdP exchange chain and the vault exchange, then either
    /// issues a return code or detours into account linking. Returns the
    /// URL to redirect the browser to.
    ///
    /// # Errors
    /// 400 for IdP-reported errors and unknown state; vault refusals
    /// surface as 403; transport failures as 502/504.
    pub async fn oidc_callback(&self, params: &OidcCallbackParams) -> Result<String, FlowError> {
        if let Some(error) = &params.error {
            warn!(error, "IdP returned an error on callback");
            return Err(OAuthError {
                error: error.clone(),
                error_description: params.error_description.clone(),
            }
            .into());
        }

        let state = params
            .state
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("Missing state parameter"))?;
        let code = params
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("Missing code parameter"))?;

        let entry = self
            .store
            .oidc
            .get(state)
            .await
            .ok_or_else(|| FlowError::from(OAuthError::invalid_state()))?;

        let result = self.evaluate_callback(state, code, &entry).await;
        if result.is_err() {
            // A failed flow must leave no retrievable correlation state
            self.store.oidc.delete(state).await;
        }
        result
    }

    async fn evaluate_callback(
        &self,
        state: &str,
        code: &str,
        entry: &OidcOutboundEntry,
    ) -> Result<String, FlowError> {
        let tenant = self.resolve_tenant_mid_flow(&entry.tenant_id)?;

        let id_token = self.idp.complete_oidc_login(code).await?;
        let id_jag = self.idp.id_token_to_id_jag(tenant, &id_token).await?;
        let agent = self.idp.id_jag_to_access_token(tenant, &id_jag).await?;

        let staged = StagedAgentToken {
            access_token: agent.access_token,
            scope: agent.scope,
            expires_in: agent.expires_in,
            id_token: Some(id_token),
        };

        // Tenants without a vault connection skip credential brokering
        // entirely; the agent token is the deliverable.
        if tenant.vault_connection.is_none() {
            let redirect = self.issue_return_code(&entry.inbound, &staged).await?;
            self.store.oidc.delete(state).await;
            return Ok(redirect);
        }

        match self.vault.exchange(&staged.access_token, tenant).await {
            Ok(VaultExchangeOutcome::Token(_)) => {
                // The downstream credential itself is discarded here; a
                // successful exchange proves the connected account
                // exists, and the forwarder re-exchanges per request.
                let redirect = self.issue_return_code(&entry.inbound, &staged).await?;
                self.store.oidc.delete(state).await;
                info!(tenant = %tenant.id, "flow complete without linking");
                Ok(redirect)
            }
            Ok(VaultExchangeOutcome::NeedsLinking) => {
                self.start_linking(state, entry, tenant, staged).await
            }
            Err(UpstreamError::Status {
                code, description, ..
            }) => {
                warn!(tenant = %tenant.id, code, "vault refused the exchange");
                Err(AppError::permission_denied(format!("{code}: {description}")).into())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// EVALUATING → AWAIT_LINK: begin the connected-accounts detour.
    ///
    /// The OIDC entry is updated with the staged token and the link
    /// session is persisted BEFORE the redirect is returned, so the link
    /// callback always observes both no matter how fast the user
    /// completes linking.
    async fn start_linking(
        &self,
        state: &str,
        entry: &OidcOutboundEntry,
        tenant: &TenantConfig,
        staged: StagedAgentToken,
    ) -> Result<String, FlowError> {
        let redirect_uri = self.config.link_callback_uri();
        let link = self
            .vault
            .begin_link(&staged.access_token, tenant, &redirect_uri)
            .await
            .map_err(|e| {
                warn!(tenant = %tenant.id, error = %e, "failed to start account linking");
                FlowError::from(AppError::permission_denied("Could not start account linking"))
            })?;

        let user_token = staged.access_token.clone();
        self.store
            .oidc
            .put(
                state,
                OidcOutboundEntry {
                    tenant_id: entry.tenant_id.clone(),
                    inbound: entry.inbound.clone(),
                    staged: Some(staged),
                },
            )
            .await;
        self.store
            .links
            .put(
                &link.link_state,
                LinkSession {
                    link_state: link.link_state.clone(),
                    oidc_state: state.to_owned(),
                    auth_session: link.auth_session,
                    user_token,
                    created_at: Utc::now(),
                },
            )
            .await;

        info!(tenant = %tenant.id, "redirecting user to account linking");
        Ok(link.link_url)
    }

    /// AWAIT_LINK → ISSUED at `GET /connected_account_callback`.
    ///
    /// # Errors
    /// 400 for unknown link state; completion failures mirror the
    /// vault's status.
    pub async fn link_callback(&self, params: &LinkCallbackParams) -> Result<String, FlowError> {
        let state = params
            .state
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("Missing state parameter"))?;
        let connect_code = params
            .connect_code
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("Missing connect_code parameter"))?;

        // The session is consumed no matter how completion goes
        let session = self
            .store
            .links
            .take(state)
            .await
            .ok_or_else(|| FlowError::from(OAuthError::invalid_state()))?;

        let result = self.complete_linking(&session, connect_code).await;
        if result.is_err() {
            self.store.oidc.delete(&session.oidc_state).await;
        }
        result
    }

    async fn complete_linking(
        &self,
        session: &LinkSession,
        connect_code: &str,
    ) -> Result<String, FlowError> {
        self.vault
            .complete_link(
                &session.auth_session,
                connect_code,
                &self.config.link_callback_uri(),
                &session.user_token,
            )
            .await?;

        let entry = self
            .store
            .oidc
            .take(&session.oidc_state)
            .await
            .ok_or_else(|| FlowError::from(OAuthError::invalid_state()))?;

        // Invariant: the tenant must still resolve at every step
        self.resolve_tenant_mid_flow(&entry.tenant_id)?;

        let staged = entry
            .staged
            .ok_or_else(|| FlowError::from(OAuthError::invalid_state()))?;

        let redirect = self.issue_return_code(&entry.inbound, &staged).await?;
        info!(tenant = %entry.tenant_id, "flow complete after linking");
        Ok(redirect)
    }

    /// ISSUED → CONSUMED at `POST /token`.
    ///
    /// # Errors
    /// OAuth-shaped 400s: `unsupported_grant_type`, `invalid_request`
    /// for missing fields, `invalid_grant` for unknown/replayed codes,
    /// PKCE failures, and client_id mismatches.
    pub async fn token(&self, request: &TokenRequest) -> Result<TokenResponse, FlowError> {
        match request.grant_type.as_deref() {
            Some("authorization_code") => {}
            _ => return Err(OAuthError::unsupported_grant_type().into()),
        }

        let code = required_field(request.code.as_deref(), "code")?;
        let client_id = required_field(request.client_id.as_deref(), "client_id")?;
        let code_verifier = required_field(request.code_verifier.as_deref(), "code_verifier")?;
        let _redirect_uri = required_field(request.redirect_uri.as_deref(), "redirect_uri")?;

        // Single atomic read-and-delete enforces one-time use
        let return_code = self
            .store
            .codes
            .take(code)
            .await
            .ok_or_else(|| OAuthError::invalid_grant("Invalid or expired authorization code"))?;

        let challenge = return_code
            .inbound
            .code_challenge
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_grant("Authorization was issued without PKCE"))?;
        let method = return_code
            .inbound
            .code_challenge_method
            .as_deref()
            .unwrap_or(oauth::PKCE_METHOD_S256);
        if method != oauth::PKCE_METHOD_S256 {
            return Err(OAuthError::invalid_grant(
                "Only the S256 code_challenge_method is supported",
            )
            .into());
        }
        verify_pkce_s256(code_verifier, challenge)?;

        match return_code.inbound.client_id.as_deref() {
            Some(original) if original == client_id => {}
            _ => {
                return Err(
                    OAuthError::invalid_grant("Code was issued to a different client").into(),
                )
            }
        }

        debug!(tenant = %return_code.inbound.tenant_id, "return code consumed");
        Ok(TokenResponse {
            access_token: return_code.agent_access_token,
            token_type: "Bearer".to_owned(),
            scope: return_code.scope,
            expires_in: return_code.expires_in,
            id_token: return_code.id_token,
        })
    }

    /// Mint a fresh return code carrying the staged token and build the
    /// final redirect back to the client
    async fn issue_return_code(
        &self,
        inbound: &InboundAuthorizeContext,
        staged: &StagedAgentToken,
    ) -> Result<String, FlowError> {
        // Parse the client redirect first; a bad URI must not leave an
        // orphaned code entry behind
        let mut redirect = Url::parse(&inbound.redirect_uri)
            .map_err(|_| OAuthError::invalid_request("Client redirect_uri is not a valid URL"))?;

        let code = generate_correlation_key()?;
        self.store
            .codes
            .put(
                &code,
                ReturnCode {
                    agent_access_token: staged.access_token.clone(),
                    scope: staged.scope.clone(),
                    expires_in: staged.expires_in,
                    id_token: staged.id_token.clone(),
                    inbound: inbound.clone(),
                },
            )
            .await;
        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &inbound.state {
                query.append_pair("state", state);
            }
        }
        Ok(redirect.into())
    }

    fn resolve_tenant(&self, tenant_id: &str) -> Result<&TenantConfig, FlowError> {
        self.registry
            .lookup(tenant_id)
            .ok_or_else(|| AppError::not_found(format!("Unknown tenant: {tenant_id}")).into())
    }

    /// Mid-flow the tenant was already valid once; it vanishing is a
    /// request-level failure, not a 404
    fn resolve_tenant_mid_flow(&self, tenant_id: &str) -> Result<&TenantConfig, FlowError> {
        self.registry.lookup(tenant_id).ok_or_else(|| {
            OAuthError::invalid_request("Tenant is no longer configured").into()
        })
    }
}

fn required_field<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, FlowError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(OAuthError::invalid_request(&format!("Missing {name}")).into()),
    }
}

/// Verify a PKCE S256 verifier against the stored challenge (RFC 7636).
///
/// The verifier format is checked first (43–128 chars, unreserved
/// characters only), then `base64url(sha256(verifier))` is compared to
/// the challenge in constant time.
///
/// # Errors
/// `invalid_grant` on any format or comparison failure.
pub fn verify_pkce_s256(code_verifier: &str, code_challenge: &str) -> Result<(), OAuthError> {
    if code_verifier.len() < 43 || code_verifier.len() > 128 {
        return Err(OAuthError::invalid_grant(
            "code_verifier must be between 43 and 128 characters",
        ));
    }
    if !code_verifier
        .chars()
        .all(|c| matches!(c, 'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '.' | '_' | '~'))
    {
        return Err(OAuthError::invalid_grant(
            "code_verifier contains characters outside the RFC 7636 set",
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(hasher.finalize());

    if computed.as_bytes().ct_eq(code_challenge.as_bytes()).into() {
        Ok(())
    } else {
        Err(OAuthError::invalid_grant("Invalid code_verifier"))
    }
}
