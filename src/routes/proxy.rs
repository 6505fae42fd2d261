// ABOUTME: Catch-all handler relaying tenant-addressed requests through the forwarder
// ABOUTME: Extracts method, headers, query, and body, then delegates to ProxyForwarder
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::resources::ServerResources;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use std::sync::Arc;

/// ANY /{tenant}/{rest...} — the request-time forwarding path
pub async fn forward(
    State(resources): State<Arc<ServerResources>>,
    Path((tenant_id, rest)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    resources
        .forwarder
        .forward(
            &tenant_id,
            &rest,
            method,
            &headers,
            query.as_deref(),
            body,
        )
        .await
}
