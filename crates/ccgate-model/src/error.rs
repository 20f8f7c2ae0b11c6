// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::Serialize;

/// Canonical error taxonomy (§7). Every layer of the gateway — dialect
/// translation, policy pipeline, tool loop, orchestrator dispatch — reports
/// failure through this type so the HTTP edge can render one consistent
/// envelope regardless of where the failure originated.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Permission(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Authentication(_) => "authentication_error",
            Self::Permission(_) => "permission_error",
            Self::Quota(_) => "quota_error",
            Self::NotFound(_) => "not_found_error",
            Self::Conflict(_) => "conflict",
            Self::Upstream(_) => "api_error",
            Self::NotImplemented(_) => "api_error",
            Self::Internal(_) => "api_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Authentication(_) => 401,
            Self::Permission(_) => 403,
            Self::Quota(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Upstream(_) => 502,
            Self::NotImplemented(_) => 501,
            Self::Internal(_) => 500,
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Wire envelope shape: `{"type":"error","error":{"type":..,"message":..}}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: &'static str,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
}

impl From<&GatewayError> for ErrorEnvelope {
    fn from(err: &GatewayError) -> Self {
        Self {
            envelope_type: "error",
            error: ErrorBody {
                error_type: err.kind(),
                message: err.to_string(),
            },
        }
    }
}
