// ABOUTME: Configuration module organization for the auth proxy
// ABOUTME: Re-exports the environment-driven server configuration types

pub mod environment;

pub use environment::{AgentConfig, IdpConfig, ServerConfig, VaultConfig};
