// ABOUTME: Tenant registry mapping tenant ids to backend and identity configuration
// ABOUTME: Loads an immutable set of TenantConfig records from a JSON file at startup
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Per-tenant configuration, immutable after startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant identifier used in URL paths
    pub id: String,
    /// Display name for metadata documents
    pub name: String,
    /// Base URL of the tenant's backend API
    pub backend_url: String,
    /// Issuer URL of the tenant's upstream authorization server
    pub issuer: String,
    /// JWKS URL publishing the issuer's signing keys
    pub jwks_url: String,
    /// Federated connection name at the token vault, when the tenant's
    /// backend needs vaulted credentials
    #[serde(default)]
    pub vault_connection: Option<String>,
    /// Scopes requested for the downstream credential
    #[serde(default)]
    pub external_scopes: Vec<String>,
}

impl TenantConfig {
    /// Token endpoint of the tenant's authorization server
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/v1/token", self.issuer.trim_end_matches('/'))
    }

    /// External scopes as the space-separated wire form
    #[must_use]
    pub fn external_scope_string(&self) -> String {
        self.external_scopes.join(" ")
    }
}

/// Read-only tenant lookup, loaded once at startup
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    tenants: HashMap<String, TenantConfig>,
}

impl TenantRegistry {
    /// Load the registry from a JSON file holding an array of
    /// `TenantConfig` records.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is unreadable or not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read tenant config {}: {e}", path.display()))
        })?;
        let records: Vec<TenantConfig> = serde_json::from_str(&raw).map_err(|e| {
            AppError::config(format!(
                "tenant config {} is not a valid tenant array: {e}",
                path.display()
            ))
        })?;

        let mut tenants = HashMap::with_capacity(records.len());
        for record in records {
            tenants.insert(record.id.clone(), record);
        }
        info!(count = tenants.len(), "loaded tenant registry");

        Ok(Self { tenants })
    }

    /// Build a registry from in-memory records
    #[must_use]
    pub fn from_records(records: Vec<TenantConfig>) -> Self {
        let tenants = records.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self { tenants }
    }

    /// Look up a tenant by id
    #[must_use]
    pub fn lookup(&self, tenant_id: &str) -> Option<&TenantConfig> {
        self.tenants.get(tenant_id)
    }

    /// Number of configured tenants
    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
