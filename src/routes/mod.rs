// ABOUTME: Route module organization and router assembly for the auth proxy
// ABOUTME: Maps the OAuth surface, metadata documents, and the forwarding catch-all
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! HTTP routes for the auth proxy.
//!
//! Handlers here are thin: they extract, delegate to the domain modules,
//! and convert results into responses. Static well-known paths take
//! priority over the `/{tenant}/{rest}` forwarding catch-all.

pub mod metadata;
pub mod oauth;
pub mod proxy;

use crate::resources::ServerResources;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

/// Build the complete application router
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(metadata::register))
        .route(
            "/.well-known/oauth-protected-resource/:tenant_id",
            get(metadata::protected_resource),
        )
        .route(
            "/.well-known/oauth-protected-resource/:tenant_id/*rest",
            get(metadata::protected_resource_nested),
        )
        .route(
            "/.well-known/oauth-authorization-server/:tenant_id",
            get(metadata::authorization_server),
        )
        .route(
            "/.well-known/oauth-authorization-server/:tenant_id/*rest",
            get(metadata::authorization_server_nested),
        )
        .route("/authorize/:tenant_id", get(oauth::authorize))
        .route("/callback", get(oauth::oidc_callback))
        .route("/connected_account_callback", get(oauth::link_callback))
        .route("/token", post(oauth::token))
        .route("/:tenant_id/*rest", any(proxy::forward))
        .with_state(resources)
}

/// Liveness endpoint
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
