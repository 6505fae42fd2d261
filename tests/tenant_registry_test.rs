// ABOUTME: Tests for loading and querying the file-backed tenant registry
// ABOUTME: Covers lookup, optional fields, and malformed configuration files
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use mcp_auth_proxy::tenant::TenantRegistry;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_tenants_and_looks_them_up() {
    let file = write_config(
        r#"[
            {
                "id": "github",
                "name": "GitHub API",
                "backend_url": "https://api.github.com",
                "issuer": "https://tenant.okta.com/oauth2/abc",
                "jwks_url": "https://tenant.okta.com/oauth2/abc/v1/keys",
                "vault_connection": "github",
                "external_scopes": ["repo"]
            },
            {
                "id": "docs",
                "name": "Docs service",
                "backend_url": "http://docs.internal",
                "issuer": "https://tenant.okta.com/oauth2/def",
                "jwks_url": "https://tenant.okta.com/oauth2/def/v1/keys"
            }
        ]"#,
    );

    let registry = TenantRegistry::load(file.path()).unwrap();
    assert_eq!(registry.len(), 2);

    let github = registry.lookup("github").unwrap();
    assert_eq!(github.name, "GitHub API");
    assert_eq!(github.vault_connection.as_deref(), Some("github"));
    assert_eq!(github.external_scopes, vec!["repo"]);
    assert_eq!(
        github.token_endpoint(),
        "https://tenant.okta.com/oauth2/abc/v1/token"
    );

    // Optional fields default
    let docs = registry.lookup("docs").unwrap();
    assert!(docs.vault_connection.is_none());
    assert!(docs.external_scopes.is_empty());

    assert!(registry.lookup("missing").is_none());
}

#[test]
fn scope_string_joins_with_spaces() {
    let file = write_config(
        r#"[{
            "id": "github",
            "name": "GitHub API",
            "backend_url": "https://api.github.com",
            "issuer": "https://issuer.example",
            "jwks_url": "https://issuer.example/keys",
            "external_scopes": ["repo", "read:user"]
        }]"#,
    );
    let registry = TenantRegistry::load(file.path()).unwrap();
    assert_eq!(
        registry.lookup("github").unwrap().external_scope_string(),
        "repo read:user"
    );
}

#[test]
fn malformed_file_is_a_config_error() {
    let file = write_config("{ not json");
    assert!(TenantRegistry::load(file.path()).is_err());
}

#[test]
fn missing_file_is_a_config_error() {
    assert!(TenantRegistry::load("/nonexistent/tenants.json").is_err());
}
