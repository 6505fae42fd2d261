// ABOUTME: Centralized resource container for dependency injection across handlers
// ABOUTME: Wires config, tenant registry, correlation store, and collaborator clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use crate::auth::InboundAuthorizer;
use crate::config::ServerConfig;
use crate::correlation::CorrelationStore;
use crate::flow::FlowOrchestrator;
use crate::forwarder::ProxyForwarder;
use crate::idp::{IdpExchange, IdpExchangeClient};
use crate::jwks::JwksKeyCache;
use crate::tenant::TenantRegistry;
use crate::vault::{VaultClient, VaultExchange};
use std::sync::Arc;

/// Shared server resources, built once at startup and cloned into
/// handlers through axum state
pub struct ServerResources {
    /// Server configuration loaded from the environment
    pub config: Arc<ServerConfig>,
    /// Read-only tenant registry
    pub registry: Arc<TenantRegistry>,
    /// Correlation store for in-flight flows
    pub store: Arc<CorrelationStore>,
    /// JWKS signing-key cache
    pub jwks: Arc<JwksKeyCache>,
    /// The browser-flow state machine
    pub flow: FlowOrchestrator,
    /// The request-time forwarding path
    pub forwarder: ProxyForwarder,
}

impl ServerResources {
    /// Wire the production collaborators
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, registry: Arc<TenantRegistry>) -> Self {
        let idp: Arc<dyn IdpExchange> = Arc::new(IdpExchangeClient::new(config.clone()));
        let vault: Arc<dyn VaultExchange> = Arc::new(VaultClient::new(config.clone()));
        Self::with_collaborators(config, registry, idp, vault)
    }

    /// Wire explicit collaborators; tests inject fakes here
    #[must_use]
    pub fn with_collaborators(
        config: Arc<ServerConfig>,
        registry: Arc<TenantRegistry>,
        idp: Arc<dyn IdpExchange>,
        vault: Arc<dyn VaultExchange>,
    ) -> Self {
        let store = Arc::new(CorrelationStore::new());
        let jwks = Arc::new(JwksKeyCache::new());
        let authorizer = Arc::new(InboundAuthorizer::new(
            jwks.clone(),
            config.expected_audience.clone(),
            config.audience_prefix_match,
        ));

        let flow = FlowOrchestrator::new(
            config.clone(),
            registry.clone(),
            store.clone(),
            idp,
            vault.clone(),
        );
        let forwarder = ProxyForwarder::new(
            config.clone(),
            registry.clone(),
            authorizer,
            vault,
        );

        Self {
            config,
            registry,
            store,
            jwks,
            flow,
            forwarder,
        }
    }
}
