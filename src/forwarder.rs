// ABOUTME: Request-time proxy path exchanging inbound bearers for vaulted credentials
// ABOUTME: Validates, brokers the downstream token, and relays the request to the backend
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Proxy Forwarder
//!
//! The hot path. For every `/{tenant}/{rest...}` request: validate the
//! inbound bearer against the tenant's issuer, exchange it at the vault
//! for the user's federated downstream credential, and forward the
//! request to the tenant's backend with that credential as the bearer.
//! The inbound `Authorization` and `Host` headers never cross the proxy;
//! response headers come back through a fixed allowlist.

use crate::auth::{AuthDenied, InboundAuthorizer};
use crate::config::ServerConfig;
use crate::constants::{timeouts, FORWARD_RESPONSE_HEADER_ALLOWLIST};
use crate::errors::{AppError, UpstreamError};
use crate::tenant::{TenantConfig, TenantRegistry};
use crate::vault::{VaultExchange, VaultExchangeOutcome};
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, warn};

/// Forwards validated requests to tenant backends
pub struct ProxyForwarder {
    http: reqwest::Client,
    config: Arc<ServerConfig>,
    registry: Arc<TenantRegistry>,
    authorizer: Arc<InboundAuthorizer>,
    vault: Arc<dyn VaultExchange>,
}

impl ProxyForwarder {
    /// Create a forwarder with the standard 30-second backend timeout
    #[must_use]
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<TenantRegistry>,
        authorizer: Arc<InboundAuthorizer>,
        vault: Arc<dyn VaultExchange>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeouts::FORWARD)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            registry,
            authorizer,
            vault,
        }
    }

    /// Handle one inbound request addressed to `tenant_id`
    pub async fn forward(
        &self,
        tenant_id: &str,
        rest: &str,
        method: Method,
        headers: &HeaderMap,
        query: Option<&str>,
        body: Bytes,
    ) -> Response {
        let Some(tenant) = self.registry.lookup(tenant_id) else {
            return AppError::not_found(format!("Unknown tenant: {tenant_id}")).into_response();
        };

        let authorized = match self.authorizer.authorize(tenant, headers, &method).await {
            Ok(authorized) => authorized,
            Err(denied) => return self.denied_response(tenant, &denied),
        };

        // Tenants with a vault connection get the user's federated
        // credential; others are forwarded without credentials.
        let downstream_bearer = if tenant.vault_connection.is_some() {
            match self.vault.exchange(&authorized.token, tenant).await {
                Ok(VaultExchangeOutcome::Token(token)) => Some(token),
                Ok(VaultExchangeOutcome::NeedsLinking) => {
                    let denied = AuthDenied {
                        status: StatusCode::UNAUTHORIZED,
                        error: "invalid_token",
                        message: "Account linking required".to_owned(),
                    };
                    return self.denied_response(tenant, &denied);
                }
                // Any exchange failure, transport included, denies the
                // request; gateway-status mapping is reserved for the
                // backend relay below
                Err(err) => {
                    warn!(tenant = %tenant.id, error = %err, "vault exchange failed at request time");
                    let message = match err {
                        UpstreamError::Status {
                            code, description, ..
                        } => format!("{code}: {description}"),
                        _ => "Credential exchange failed".to_owned(),
                    };
                    return AppError::permission_denied(message).into_response();
                }
            }
        } else {
            None
        };

        self.relay(tenant, rest, method, headers, query, body, downstream_bearer)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn relay(
        &self,
        tenant: &TenantConfig,
        rest: &str,
        method: Method,
        headers: &HeaderMap,
        query: Option<&str>,
        body: Bytes,
        bearer: Option<String>,
    ) -> Response {
        let mut url = format!(
            "{}/{}",
            tenant.backend_url.trim_end_matches('/'),
            rest.trim_start_matches('/')
        );
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }

        debug!(tenant = %tenant.id, method = %method, url = %url, "forwarding request");

        let mut request = self.http.request(method.clone(), url.as_str());
        if let Some(bearer) = bearer {
            request = request.bearer_auth(bearer);
        }
        for name in [header::CONTENT_TYPE, header::ACCEPT] {
            if let Some(value) = headers.get(&name) {
                request = request.header(name, value);
            }
        }
        if should_forward_body(&method) {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let response_headers = filter_response_headers(response.headers());
                let bytes = response.bytes().await.unwrap_or_default();

                let mut builder = Response::builder().status(status);
                for (name, value) in response_headers {
                    builder = builder.header(name, value);
                }
                builder
                    .body(Body::from(bytes))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            Err(e) => map_relay_error(&e).into_response(),
        }
    }

    /// Build the denial response with `WWW-Authenticate` pointing at
    /// this tenant's protected-resource metadata
    fn denied_response(&self, tenant: &TenantConfig, denied: &AuthDenied) -> Response {
        let resource_metadata = format!(
            "{}/.well-known/oauth-protected-resource/{}",
            self.config.proxy_base_url, tenant.id
        );
        let challenge = www_authenticate_value(denied.error, &denied.message, &resource_metadata);

        let mut response = (
            denied.status,
            axum::Json(serde_json::json!({
                "error": denied.error,
                "message": denied.message,
            })),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Only entity-bearing methods carry the inbound body onward
#[must_use]
pub fn should_forward_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Keep only the allowlisted backend response headers
#[must_use]
pub fn filter_response_headers(headers: &HeaderMap) -> Vec<(header::HeaderName, HeaderValue)> {
    FORWARD_RESPONSE_HEADER_ALLOWLIST
        .iter()
        .copied()
        .filter_map(|name| {
            let name = header::HeaderName::from_static(name);
            headers.get(&name).map(|value| (name, value.clone()))
        })
        .collect()
}

/// RFC 9728 bearer challenge for 401/403 responses
#[must_use]
pub fn www_authenticate_value(error: &str, description: &str, resource_metadata: &str) -> String {
    format!(
        "Bearer error=\"{error}\", error_description=\"{}\", resource_metadata=\"{resource_metadata}\"",
        description.replace('"', "'")
    )
}

/// Map transport failures to gateway statuses: refused connections are
/// 502, timeouts 504, anything else 500
#[must_use]
pub fn map_relay_error(err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::new(
            crate::errors::ErrorCode::ExternalTimeout,
            "Backend request timed out",
        )
    } else if err.is_connect() {
        AppError::new(
            crate::errors::ErrorCode::ExternalServiceUnavailable,
            "Backend connection refused",
        )
    } else {
        AppError::internal(format!("Backend relay failed: {err}"))
    }
}
