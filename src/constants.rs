// ABOUTME: Protocol constants, cache policy values, and environment accessors
// ABOUTME: Groups OAuth URN identifiers, TTLs, timeouts, and env-var lookups by domain
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use std::env;
use std::time::Duration;

/// OAuth 2.0 / token-exchange protocol identifiers.
///
/// These values are wire constants; the upstream identity provider and the
/// token vault match on them byte-for-byte.
pub mod oauth {
    /// RFC 8693 token exchange grant type
    pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
    /// RFC 7523 JWT bearer grant type
    pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
    /// Vault grant type minting federated connection access tokens
    pub const GRANT_TYPE_FEDERATED_CONNECTION: &str =
        "urn:auth0:params:oauth:grant-type:token-exchange:federated-connection-access-token";
    /// Identity-assertion JWT authorization grant token type
    pub const TOKEN_TYPE_ID_JAG: &str = "urn:ietf:params:oauth:token-type:id-jag";
    /// OIDC ID token subject type for RFC 8693 exchanges
    pub const TOKEN_TYPE_ID_TOKEN: &str = "urn:ietf:params:oauth:token-type:id_token";
    /// Plain access token subject type
    pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
    /// RFC 7523 private-key JWT client authentication
    pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
    /// Requested token type for the vault's federated-connection grant
    pub const REQUESTED_TOKEN_TYPE_FEDERATED: &str =
        "http://auth0.com/oauth/token-type/federated-connection-access-token";
    /// Subject token type the vault's custom token-exchange action is
    /// configured to trust for agent access tokens
    pub const SUBJECT_TOKEN_TYPE_AGENT: &str = "urn:okta:agent-access-token";
    /// The only supported PKCE challenge method
    pub const PKCE_METHOD_S256: &str = "S256";
    /// Scopes requested on the initial IdP login leg
    pub const IDP_LOGIN_SCOPES: &str = "openid profile";
    /// Scopes required for connected-account management at the vault
    pub const CONNECTED_ACCOUNTS_SCOPES: &str =
        "create:me:connected_accounts read:me:connected_accounts delete:me:connected_accounts";
}

/// Time-to-live policy for the correlation caches.
pub mod ttl {
    use super::Duration;

    /// Browser-flow correlation entries (outbound state, link sessions,
    /// return codes) live for 15 minutes
    pub const CORRELATION: Duration = Duration::from_secs(15 * 60);
    /// JWKS signing keys are cached for one hour per (url, kid)
    pub const JWKS_KEY: Duration = Duration::from_secs(60 * 60);
    /// Private-key JWT client assertions are valid for five minutes
    pub const CLIENT_ASSERTION_SECS: i64 = 300;
}

/// Outbound HTTP timeouts. Every outbound call carries a bound.
pub mod timeouts {
    use super::Duration;

    /// JWKS document fetch
    pub const JWKS_FETCH: Duration = Duration::from_secs(5);
    /// IdP and vault token endpoints
    pub const UPSTREAM: Duration = Duration::from_secs(10);
    /// Backend forwarding
    pub const FORWARD: Duration = Duration::from_secs(30);
}

/// Capacity bound per correlation family; LRU-evicted beyond this.
pub const CORRELATION_CAPACITY: usize = 10_000;

/// Length in bytes of correlation keys and return codes before base64url
pub const CORRELATION_KEY_BYTES: usize = 32;

/// Response headers the forwarder copies back from the backend
pub const FORWARD_RESPONSE_HEADER_ALLOWLIST: [&str; 4] =
    ["content-type", "cache-control", "etag", "last-modified"];

/// Redirect URIs registered for the recognized editor client
pub const DEFAULT_CLIENT_REDIRECT_URIS: [&str; 2] =
    ["http://127.0.0.1:33418", "https://vscode.dev/redirect"];

/// Environment-based configuration accessors
pub mod env_config {
    use super::env;

    /// HTTP listen port
    #[must_use]
    pub fn port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000)
    }

    /// Externally visible base URL of this proxy
    #[must_use]
    pub fn proxy_base_url() -> String {
        env::var("PROXY_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}", port()))
    }

    /// Path of the tenant configuration file
    #[must_use]
    pub fn config_path() -> String {
        env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_owned())
    }
}
