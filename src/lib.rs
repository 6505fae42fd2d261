// ABOUTME: Main library entry point for the multi-tenant MCP auth proxy
// ABOUTME: Presents an OAuth authorization server to clients and brokers vaulted credentials
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![deny(unsafe_code)]

//! # MCP Auth Proxy
//!
//! A multi-tenant authentication proxy between OAuth-capable MCP clients
//! and downstream APIs that require externally-issued credentials.
//!
//! To the client this is a standards-compliant OAuth 2.0 / OIDC
//! authorization server plus resource server. Internally it chains an
//! upstream IdP login, an RFC 8693 identity-assertion token exchange,
//! a JWT-bearer grant for an agent access token, and a token-vault
//! exchange for the user's federated downstream credential — with a
//! connected-accounts linking detour when the vault has none.
//!
//! ## Architecture
//!
//! - **tenant**: read-only registry of tenant configurations
//! - **correlation**: TTL-bounded state binding the redirect hops
//! - **jwks / auth**: signing-key cache and inbound bearer validation
//! - **idp / vault**: outbound clients for the identity provider and
//!   the token vault
//! - **flow**: the state machine tying the endpoints together
//! - **forwarder**: the request-time token-brokering proxy path
//! - **routes**: axum surface, metadata documents, registration stub
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mcp_auth_proxy::config::ServerConfig;
//! use mcp_auth_proxy::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("proxy will listen on port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Inbound bearer-token validation
pub mod auth;

/// Environment-driven configuration
pub mod config;

/// Protocol constants and policy values
pub mod constants;

/// Correlation store for in-flight flows
pub mod correlation;

/// Error taxonomy and response mapping
pub mod errors;

/// The browser-flow state machine
pub mod flow;

/// Request-time forwarding path
pub mod forwarder;

/// Upstream identity provider client
pub mod idp;

/// JWKS signing-key cache
pub mod jwks;

/// Shared resource container
pub mod resources;

/// HTTP routes and handlers
pub mod routes;

/// Tenant registry
pub mod tenant;

/// Token vault client
pub mod vault;
