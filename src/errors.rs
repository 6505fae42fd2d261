// ABOUTME: Centralized error types and HTTP response mapping for the auth proxy
// ABOUTME: Defines the error taxonomy shared by the flow orchestrator, forwarder, and clients
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Unified Error Handling
//!
//! One taxonomy covers every failure the proxy can surface: inbound
//! validation, bearer authentication, issuer/audience authorization,
//! missing tenants and codes, upstream IdP/vault failures (with the
//! upstream status preserved where one was received), gateway-level
//! unreachability, and internal faults. `AppError` converts into an
//! `axum` response with an `{error, message}` JSON body; the token
//! endpoint uses the OAuth-shaped error in `flow::models` instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt::{self, Display};
use thiserror::Error;
use tracing::error;

/// Result alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Standard error codes used throughout the application
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Request parameters are missing or malformed
    InvalidInput,
    /// Bearer token or correlation state is missing or invalid
    AuthInvalid,
    /// Token is valid but not acceptable here (issuer, audience, scope)
    PermissionDenied,
    /// The user must link a connected account before this call can succeed
    LinkingRequired,
    /// Tenant or code does not exist
    ResourceNotFound,
    /// An upstream service returned an error response
    ExternalServiceError,
    /// An upstream service could not be reached
    ExternalServiceUnavailable,
    /// An upstream call timed out or was aborted
    ExternalTimeout,
    /// Required configuration is missing or invalid
    ConfigError,
    /// Unexpected internal failure
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::AuthInvalid | Self::LinkingRequired => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::ResourceNotFound => StatusCode::NOT_FOUND,
            Self::ExternalServiceError | Self::ExternalServiceUnavailable => {
                StatusCode::BAD_GATEWAY
            }
            Self::ExternalTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ConfigError | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable string form used in JSON bodies
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_request",
            Self::AuthInvalid => "invalid_token",
            Self::PermissionDenied => "access_denied",
            Self::LinkingRequired => "linking_required",
            Self::ResourceNotFound => "not_found",
            Self::ExternalServiceError => "upstream_error",
            Self::ExternalServiceUnavailable => "upstream_unavailable",
            Self::ExternalTimeout => "upstream_timeout",
            Self::ConfigError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }
}

/// Application error carrying a taxonomy code and a user-facing message
#[derive(Debug, Clone)]
pub struct AppError {
    /// Error classification
    pub code: ErrorCode,
    /// Human-readable message, safe to return to callers
    pub message: String,
    /// Status received from an upstream service, when one responded
    pub upstream_status: Option<u16>,
}

impl AppError {
    /// Create a new error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            upstream_status: None,
        }
    }

    /// Bad inbound parameters (400)
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Bearer or correlation state invalid (401)
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Issuer/audience/scope mismatch (403)
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Connected-account linking required (401 with explanatory body)
    #[must_use]
    pub fn linking_required() -> Self {
        Self::new(ErrorCode::LinkingRequired, "Account linking required")
    }

    /// Tenant or code absent (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, message)
    }

    /// Missing or invalid configuration (500 at startup)
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Unexpected internal failure (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The HTTP status this error maps to, preferring a status the
    /// upstream actually returned
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        if let Some(status) = self.upstream_status {
            if let Ok(code) = StatusCode::from_u16(status) {
                return code;
            }
        }
        self.code.http_status()
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}

/// JSON body shape for resource-forwarder and general failures
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log the detail, return a generic body
            error!(error = %self, "internal error surfaced to client");
            let body = ErrorBody {
                error: ErrorCode::InternalError.as_str(),
                message: "An internal server error occurred",
            };
            return (status, Json(body)).into_response();
        }
        let body = ErrorBody {
            error: self.code.as_str(),
            message: &self.message,
        };
        (status, Json(body)).into_response()
    }
}

/// Failure from the IdP or the vault, carrying what the upstream said
/// when a response was received at all.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream responded with an error status
    #[error("upstream returned {status}: {code}: {description}")]
    Status {
        /// HTTP status the upstream returned
        status: u16,
        /// OAuth error code from the response body, when present
        code: String,
        /// Human-readable description from the response body
        description: String,
    },
    /// A connection was attempted but no response came back
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
    /// The call timed out or was aborted mid-flight
    #[error("upstream timeout: {0}")]
    Timeout(String),
    /// The failure happened before the request left this process
    #[error("local failure during upstream call: {0}")]
    Local(String),
}

impl UpstreamError {
    /// Map a transport-level `reqwest` failure onto the taxonomy.
    /// Status-bearing responses are handled by the callers, which read
    /// the body before classifying.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::Unreachable(err.to_string())
        } else {
            Self::Local(err.to_string())
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status {
                status,
                code,
                description,
            } => Self {
                code: ErrorCode::ExternalServiceError,
                message: format!("{code}: {description}"),
                upstream_status: Some(status),
            },
            UpstreamError::Unreachable(msg) => {
                Self::new(ErrorCode::ExternalServiceUnavailable, msg)
            }
            UpstreamError::Timeout(msg) => Self::new(ErrorCode::ExternalTimeout, msg),
            UpstreamError::Local(msg) => Self::new(ErrorCode::InternalError, msg),
        }
    }
}
