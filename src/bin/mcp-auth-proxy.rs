// ABOUTME: Server binary for the multi-tenant MCP auth proxy
// ABOUTME: Loads configuration and tenants, wires resources, and serves the axum router
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use mcp_auth_proxy::{
    config::ServerConfig, resources::ServerResources, routes, tenant::TenantRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcp-auth-proxy")]
#[command(about = "Multi-tenant OAuth token-brokering proxy for MCP clients")]
struct Args {
    /// Tenant configuration file path (overrides CONFIG_PATH)
    #[arg(short, long)]
    config: Option<String>,

    /// Override HTTP listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::from_env().context("configuration is incomplete")?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(path) = args.config {
        config.config_path = path;
    }

    let registry = TenantRegistry::load(&config.config_path)
        .with_context(|| format!("cannot load tenant registry from {}", config.config_path))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let resources = Arc::new(ServerResources::new(
        Arc::new(config),
        Arc::new(registry),
    ));

    info!(
        %addr,
        tenants = resources.registry.len(),
        base_url = %resources.config.proxy_base_url,
        "mcp-auth-proxy listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(listener, routes::router(resources))
        .await
        .context("server terminated")?;

    Ok(())
}
