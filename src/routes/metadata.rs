// ABOUTME: OAuth discovery documents and the fixed client registration response
// ABOUTME: Serves RFC 9728, RFC 8414, and RFC 7591 shaped metadata per tenant
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::config::ServerConfig;
use crate::constants::DEFAULT_CLIENT_REDIRECT_URIS;
use crate::errors::AppError;
use crate::resources::ServerResources;
use crate::tenant::TenantConfig;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// RFC 9728 protected resource metadata for one tenant
#[must_use]
pub fn protected_resource_document(config: &ServerConfig, tenant: &TenantConfig) -> Value {
    let base = &config.proxy_base_url;
    json!({
        "resource": format!("{base}/{}", tenant.id),
        "authorization_servers": [format!("{base}/{}", tenant.id)],
        "resource_name": tenant.name,
    })
}

/// RFC 8414 authorization server metadata for one tenant.
///
/// The proxy is the authorization server the client sees; tokens it
/// hands out are signed upstream, so `jwks_uri` points at the tenant's
/// issuer keys.
#[must_use]
pub fn authorization_server_document(config: &ServerConfig, tenant: &TenantConfig) -> Value {
    let base = &config.proxy_base_url;
    json!({
        "issuer": format!("{base}/{}", tenant.id),
        "authorization_endpoint": format!("{base}/authorize/{}", tenant.id),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": tenant.jwks_url,
        "registration_endpoint": format!("{base}/register"),
        "scopes_supported": tenant.external_scopes,
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": ["S256"],
        "protected_resources": [format!("{base}/{}", tenant.id)],
    })
}

/// RFC 7591 shaped registration response for the preconfigured client
#[must_use]
pub fn registration_document(config: &ServerConfig) -> Value {
    json!({
        "client_id": config.idp.client_id,
        "client_id_issued_at": Utc::now().timestamp(),
        "client_name": "MCP client",
        "token_endpoint_auth_method": "none",
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "redirect_uris": DEFAULT_CLIENT_REDIRECT_URIS,
    })
}

/// GET /.well-known/oauth-protected-resource/{tenant}
pub async fn protected_resource(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
) -> Response {
    serve_protected_resource(&resources, &tenant_id)
}

/// GET /.well-known/oauth-protected-resource/{tenant}/{rest...}
pub async fn protected_resource_nested(
    State(resources): State<Arc<ServerResources>>,
    Path((tenant_id, _rest)): Path<(String, String)>,
) -> Response {
    serve_protected_resource(&resources, &tenant_id)
}

/// GET /.well-known/oauth-authorization-server/{tenant}
pub async fn authorization_server(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
) -> Response {
    serve_authorization_server(&resources, &tenant_id)
}

/// GET /.well-known/oauth-authorization-server/{tenant}/{rest...}
pub async fn authorization_server_nested(
    State(resources): State<Arc<ServerResources>>,
    Path((tenant_id, _rest)): Path<(String, String)>,
) -> Response {
    serve_authorization_server(&resources, &tenant_id)
}

/// POST /register — returns the preconfigured client record
pub async fn register(State(resources): State<Arc<ServerResources>>) -> Response {
    (
        StatusCode::CREATED,
        Json(registration_document(&resources.config)),
    )
        .into_response()
}

fn serve_protected_resource(resources: &ServerResources, tenant_id: &str) -> Response {
    match resources.registry.lookup(tenant_id) {
        Some(tenant) => {
            Json(protected_resource_document(&resources.config, tenant)).into_response()
        }
        None => AppError::not_found(format!("Unknown tenant: {tenant_id}")).into_response(),
    }
}

fn serve_authorization_server(resources: &ServerResources, tenant_id: &str) -> Response {
    match resources.registry.lookup(tenant_id) {
        Some(tenant) => {
            Json(authorization_server_document(&resources.config, tenant)).into_response()
        }
        None => AppError::not_found(format!("Unknown tenant: {tenant_id}")).into_response(),
    }
}
