// ABOUTME: Integration tests for the flow orchestrator state machine
// ABOUTME: Exercises authorize, callbacks, linking, and token against scripted fakes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

mod common;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use common::{
    test_config, test_tenant, FakeIdp, FakeVault, VaultScript, AGENT_TOKEN, LINK_STATE, LINK_URL,
};
use mcp_auth_proxy::correlation::CorrelationStore;
use mcp_auth_proxy::errors::{AppError, UpstreamError};
use mcp_auth_proxy::flow::models::{FlowError, OAuthError, TokenRequest};
use mcp_auth_proxy::flow::{FlowOrchestrator, LinkCallbackParams, OidcCallbackParams};
use mcp_auth_proxy::tenant::TenantRegistry;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

fn challenge() -> String {
    let mut hasher = Sha256::new();
    hasher.update(VERIFIER.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn build(
    idp: FakeIdp,
    vault: FakeVault,
    store: Arc<CorrelationStore>,
) -> (Arc<CorrelationStore>, FlowOrchestrator) {
    let registry = Arc::new(TenantRegistry::from_records(vec![test_tenant("github")]));
    let flow = FlowOrchestrator::new(
        Arc::new(test_config()),
        registry,
        store.clone(),
        Arc::new(idp),
        Arc::new(vault),
    );
    (store, flow)
}

fn standard(script: VaultScript) -> (Arc<CorrelationStore>, FlowOrchestrator) {
    build(
        FakeIdp::ok(),
        FakeVault::with_script(script),
        Arc::new(CorrelationStore::new()),
    )
}

fn authorize_params() -> HashMap<String, String> {
    HashMap::from([
        ("state".to_owned(), "S1".to_owned()),
        ("client_id".to_owned(), "C".to_owned()),
        ("redirect_uri".to_owned(), "http://client.example/cb".to_owned()),
        ("code_challenge".to_owned(), challenge()),
        ("code_challenge_method".to_owned(), "S256".to_owned()),
    ])
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url).expect("redirect must be a valid URL");
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn expect_oauth(err: FlowError) -> OAuthError {
    match err {
        FlowError::OAuth(e) => e,
        FlowError::App(e) => panic!("expected OAuth error, got app error: {e}"),
    }
}

fn expect_app(err: FlowError) -> AppError {
    match err {
        FlowError::App(e) => e,
        FlowError::OAuth(e) => panic!("expected app error, got OAuth error: {}", e.error),
    }
}

async fn run_to_callback(flow: &FlowOrchestrator) -> (String, String) {
    let authorize_url = flow.authorize("github", &authorize_params()).await.unwrap();
    let outbound_state = query_param(&authorize_url, "state").unwrap();
    let redirect = flow
        .oidc_callback(&OidcCallbackParams {
            state: Some(outbound_state.clone()),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap();
    (outbound_state, redirect)
}

fn token_request(code: &str, verifier: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".to_owned()),
        code: Some(code.to_owned()),
        client_id: Some("C".to_owned()),
        code_verifier: Some(verifier.to_owned()),
        redirect_uri: Some("http://client.example/cb".to_owned()),
    }
}

#[tokio::test]
async fn authorize_redirects_to_idp_with_fresh_state() {
    let (store, flow) = standard(VaultScript::Token);

    let url = flow.authorize("github", &authorize_params()).await.unwrap();
    let parsed = Url::parse(&url).unwrap();
    assert_eq!(parsed.host_str(), Some("idp.example"));
    assert_eq!(parsed.path(), "/oauth2/v1/authorize");
    assert_eq!(
        query_param(&url, "client_id").as_deref(),
        Some("proxy-login-client")
    );
    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(&url, "scope").as_deref(), Some("openid profile"));
    assert_eq!(
        query_param(&url, "redirect_uri").as_deref(),
        Some("http://proxy.example/callback")
    );

    let state = query_param(&url, "state").unwrap();
    let nonce = query_param(&url, "nonce").unwrap();
    assert_eq!(state.len(), 43);
    assert_eq!(nonce.len(), 43);
    assert_ne!(state, nonce);
    assert!(store.oidc.get(&state).await.is_some());

    // A second flow draws fresh correlation keys
    let url2 = flow.authorize("github", &authorize_params()).await.unwrap();
    assert_ne!(query_param(&url2, "state"), Some(state));
}

#[tokio::test]
async fn unknown_tenant_is_rejected_with_404() {
    let (_, flow) = standard(VaultScript::Token);
    let err = expect_app(
        flow.authorize("nope", &authorize_params())
            .await
            .unwrap_err(),
    );
    assert_eq!(err.http_status().as_u16(), 404);
}

#[tokio::test]
async fn authorize_requires_redirect_uri() {
    let (_, flow) = standard(VaultScript::Token);
    let mut params = authorize_params();
    params.remove("redirect_uri");
    let err = expect_oauth(flow.authorize("github", &params).await.unwrap_err());
    assert_eq!(err.error, "invalid_request");
}

#[tokio::test]
async fn happy_path_round_trips_state_and_issues_single_use_code() {
    let (store, flow) = standard(VaultScript::Token);

    let (outbound_state, redirect) = run_to_callback(&flow).await;
    assert!(redirect.starts_with("http://client.example/cb?"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("S1"));
    let code = query_param(&redirect, "code").unwrap();
    assert_eq!(code.len(), 43);

    // The outbound entry is gone once the code is issued
    assert!(store.oidc.get(&outbound_state).await.is_none());

    let response = flow.token(&token_request(&code, VERIFIER)).await.unwrap();
    assert_eq!(response.access_token, AGENT_TOKEN);
    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.scope.as_deref(), Some("repo"));
    assert_eq!(response.id_token.as_deref(), Some("id-token-1"));

    // Replay of the same code must fail
    let err = expect_oauth(flow.token(&token_request(&code, VERIFIER)).await.unwrap_err());
    assert_eq!(err.error, "invalid_grant");
}

#[tokio::test]
async fn return_codes_differ_across_runs() {
    let (_, flow) = standard(VaultScript::Token);
    let (_, redirect1) = run_to_callback(&flow).await;
    let (_, redirect2) = run_to_callback(&flow).await;
    assert_ne!(query_param(&redirect1, "code"), query_param(&redirect2, "code"));
}

#[tokio::test]
async fn pkce_mismatch_is_rejected() {
    let (_, flow) = standard(VaultScript::Token);
    let (_, redirect) = run_to_callback(&flow).await;
    let code = query_param(&redirect, "code").unwrap();

    let wrong = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let err = expect_oauth(flow.token(&token_request(&code, wrong)).await.unwrap_err());
    assert_eq!(err.error, "invalid_grant");
}

#[tokio::test]
async fn token_rejects_wrong_client_id() {
    let (_, flow) = standard(VaultScript::Token);
    let (_, redirect) = run_to_callback(&flow).await;
    let code = query_param(&redirect, "code").unwrap();

    let mut request = token_request(&code, VERIFIER);
    request.client_id = Some("someone-else".to_owned());
    let err = expect_oauth(flow.token(&request).await.unwrap_err());
    assert_eq!(err.error, "invalid_grant");
}

#[tokio::test]
async fn token_requires_authorization_code_grant_and_all_fields() {
    let (_, flow) = standard(VaultScript::Token);

    let mut request = token_request("whatever", VERIFIER);
    request.grant_type = Some("client_credentials".to_owned());
    let err = expect_oauth(flow.token(&request).await.unwrap_err());
    assert_eq!(err.error, "unsupported_grant_type");

    for missing in ["code", "client_id", "code_verifier", "redirect_uri"] {
        let mut request = token_request("whatever", VERIFIER);
        match missing {
            "code" => request.code = None,
            "client_id" => request.client_id = None,
            "code_verifier" => request.code_verifier = None,
            _ => request.redirect_uri = None,
        }
        let err = expect_oauth(flow.token(&request).await.unwrap_err());
        assert_eq!(err.error, "invalid_request", "missing {missing}");
    }
}

#[tokio::test]
async fn callback_with_unknown_state_is_invalid_state() {
    let (_, flow) = standard(VaultScript::Token);
    let err = expect_oauth(
        flow.oidc_callback(&OidcCallbackParams {
            state: Some("never-issued".to_owned()),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.error, "invalid_state");
}

#[tokio::test]
async fn callback_honors_idp_reported_errors() {
    let (_, flow) = standard(VaultScript::Token);
    let err = expect_oauth(
        flow.oidc_callback(&OidcCallbackParams {
            error: Some("access_denied".to_owned()),
            error_description: Some("user cancelled".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.error, "access_denied");
}

#[tokio::test]
async fn expired_outbound_state_is_rejected() {
    let (_, flow) = build(
        FakeIdp::ok(),
        FakeVault::with_script(VaultScript::Token),
        Arc::new(CorrelationStore::with_ttl(Duration::from_millis(30))),
    );

    let url = flow.authorize("github", &authorize_params()).await.unwrap();
    let state = query_param(&url, "state").unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let err = expect_oauth(
        flow.oidc_callback(&OidcCallbackParams {
            state: Some(state),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.error, "invalid_state");
}

#[tokio::test]
async fn idp_outage_maps_to_gateway_error_and_evicts_the_flow() {
    let (store, flow) = build(
        FakeIdp::failing(|| UpstreamError::Unreachable("connection refused".to_owned())),
        FakeVault::with_script(VaultScript::Token),
        Arc::new(CorrelationStore::new()),
    );

    let url = flow.authorize("github", &authorize_params()).await.unwrap();
    let state = query_param(&url, "state").unwrap();

    let err = expect_app(
        flow.oidc_callback(&OidcCallbackParams {
            state: Some(state.clone()),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.http_status().as_u16(), 502);
    assert!(store.oidc.get(&state).await.is_none());
}

#[tokio::test]
async fn upstream_status_is_preserved_from_the_idp_chain() {
    let (_, flow) = build(
        FakeIdp::failing(|| UpstreamError::Status {
            status: 401,
            code: "invalid_client".to_owned(),
            description: "assertion rejected".to_owned(),
        }),
        FakeVault::with_script(VaultScript::Token),
        Arc::new(CorrelationStore::new()),
    );

    let url = flow.authorize("github", &authorize_params()).await.unwrap();
    let state = query_param(&url, "state").unwrap();
    let err = expect_app(
        flow.oidc_callback(&OidcCallbackParams {
            state: Some(state),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.http_status().as_u16(), 401);
}

#[tokio::test]
async fn vault_refusal_maps_to_403_and_evicts_the_flow() {
    let (store, flow) = standard(VaultScript::Refuse);

    let url = flow.authorize("github", &authorize_params()).await.unwrap();
    let state = query_param(&url, "state").unwrap();
    let err = expect_app(
        flow.oidc_callback(&OidcCallbackParams {
            state: Some(state.clone()),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.http_status().as_u16(), 403);
    assert!(store.oidc.get(&state).await.is_none());
}

#[tokio::test]
async fn needs_link_flow_detours_and_completes() {
    let (store, flow) = standard(VaultScript::NeedsLinking);

    let authorize_url = flow.authorize("github", &authorize_params()).await.unwrap();
    let outbound_state = query_param(&authorize_url, "state").unwrap();

    let link_redirect = flow
        .oidc_callback(&OidcCallbackParams {
            state: Some(outbound_state.clone()),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(link_redirect, LINK_URL);

    // The staged token is parked in place and the link session exists
    // before the browser is redirected
    let entry = store.oidc.get(&outbound_state).await.unwrap();
    assert_eq!(
        entry.staged.as_ref().map(|s| s.access_token.as_str()),
        Some(AGENT_TOKEN)
    );
    let session = store.links.get(LINK_STATE).await.unwrap();
    assert_eq!(session.oidc_state, outbound_state);
    assert_eq!(session.user_token, AGENT_TOKEN);

    let redirect = flow
        .link_callback(&LinkCallbackParams {
            state: Some(LINK_STATE.to_owned()),
            connect_code: Some("CC".to_owned()),
        })
        .await
        .unwrap();
    assert!(redirect.starts_with("http://client.example/cb?"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("S1"));

    // Both correlation entries are consumed
    assert!(store.oidc.get(&outbound_state).await.is_none());
    assert!(store.links.get(LINK_STATE).await.is_none());

    let code = query_param(&redirect, "code").unwrap();
    let response = flow.token(&token_request(&code, VERIFIER)).await.unwrap();
    assert_eq!(response.access_token, AGENT_TOKEN);
}

#[tokio::test]
async fn link_callback_with_unknown_state_is_rejected() {
    let (_, flow) = standard(VaultScript::NeedsLinking);
    let err = expect_oauth(
        flow.link_callback(&LinkCallbackParams {
            state: Some("never-issued".to_owned()),
            connect_code: Some("CC".to_owned()),
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.error, "invalid_state");
}

#[tokio::test]
async fn link_completion_failure_mirrors_vault_status_and_evicts() {
    let mut vault = FakeVault::with_script(VaultScript::NeedsLinking);
    vault.fail_complete_link = true;
    let (store, flow) = build(FakeIdp::ok(), vault, Arc::new(CorrelationStore::new()));

    let authorize_url = flow.authorize("github", &authorize_params()).await.unwrap();
    let outbound_state = query_param(&authorize_url, "state").unwrap();
    flow.oidc_callback(&OidcCallbackParams {
        state: Some(outbound_state.clone()),
        code: Some("AUTH1".to_owned()),
        ..Default::default()
    })
    .await
    .unwrap();

    let err = expect_app(
        flow.link_callback(&LinkCallbackParams {
            state: Some(LINK_STATE.to_owned()),
            connect_code: Some("CC".to_owned()),
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.http_status().as_u16(), 403);

    // Error transitions leave nothing retrievable
    assert!(store.links.get(LINK_STATE).await.is_none());
    assert!(store.oidc.get(&outbound_state).await.is_none());
}

#[tokio::test]
async fn begin_link_failure_is_a_403() {
    let mut vault = FakeVault::with_script(VaultScript::NeedsLinking);
    vault.fail_begin_link = true;
    let (store, flow) = build(FakeIdp::ok(), vault, Arc::new(CorrelationStore::new()));

    let authorize_url = flow.authorize("github", &authorize_params()).await.unwrap();
    let state = query_param(&authorize_url, "state").unwrap();
    let err = expect_app(
        flow.oidc_callback(&OidcCallbackParams {
            state: Some(state.clone()),
            code: Some("AUTH1".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err(),
    );
    assert_eq!(err.http_status().as_u16(), 403);
    assert!(store.oidc.get(&state).await.is_none());
}
