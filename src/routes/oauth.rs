// ABOUTME: Thin handlers for the browser-driven OAuth flow endpoints
// ABOUTME: Extracts requests and delegates to the flow orchestrator
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::flow::models::{FlowError, OAuthError, TokenRequest};
use crate::flow::{LinkCallbackParams, OidcCallbackParams};
use crate::resources::ServerResources;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;
use std::sync::Arc;

/// GET /authorize/{tenant} — INIT → AWAIT_IDP
pub async fn authorize(
    State(resources): State<Arc<ServerResources>>,
    Path(tenant_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match resources.flow.authorize(&tenant_id, &params).await {
        Ok(location) => found(&location),
        Err(err) => err.into_response(),
    }
}

/// GET /callback — AWAIT_IDP → EVALUATING → {ISSUED | AWAIT_LINK}
pub async fn oidc_callback(
    State(resources): State<Arc<ServerResources>>,
    Query(params): Query<OidcCallbackParams>,
) -> Response {
    match resources.flow.oidc_callback(&params).await {
        Ok(location) => found(&location),
        Err(err) => err.into_response(),
    }
}

/// GET /connected_account_callback — AWAIT_LINK → ISSUED
pub async fn link_callback(
    State(resources): State<Arc<ServerResources>>,
    Query(params): Query<LinkCallbackParams>,
) -> Response {
    match resources.flow.link_callback(&params).await {
        Ok(location) => found(&location),
        Err(err) => err.into_response(),
    }
}

/// POST /token — ISSUED → CONSUMED. Accepts form-encoded or JSON bodies.
pub async fn token(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request = match parse_token_body(&headers, &body) {
        Ok(request) => request,
        Err(err) => return FlowError::from(err).into_response(),
    };

    match resources.flow.token(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Parse the token request from a form or JSON body by Content-Type,
/// defaulting to form encoding when the header is absent
pub fn parse_token_body(headers: &HeaderMap, body: &str) -> Result<TokenRequest, OAuthError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/x-www-form-urlencoded");

    if content_type.starts_with("application/json") {
        serde_json::from_str(body)
            .map_err(|_| OAuthError::invalid_request("Request body is not valid JSON"))
    } else {
        serde_urlencoded::from_str(body)
            .map_err(|_| OAuthError::invalid_request("Request body is not valid form encoding"))
    }
}

/// 302 Found redirect for the browser-driven hops
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
