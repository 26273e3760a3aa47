// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the aiobs collector.
//!
//! This module provides strongly-typed errors for different parts of the crate,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation.

use thiserror::Error;

/// Errors that can occur while validating or mutating session labels.
#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Invalid label key '{0}': must match ^[a-z][a-z0-9_]{{0,62}}$")]
    InvalidKey(String),

    #[error("Label key '{0}' uses the reserved prefix")]
    ReservedKey(String),

    #[error("Value for label '{key}' is {len} chars, max is {max}")]
    ValueTooLong { key: String, len: usize, max: usize },

    #[error("Too many labels: {count} exceeds the limit of {max}")]
    TooMany { count: usize, max: usize },
}

/// Errors from the remote usage/quota service.
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("No API key configured")]
    MissingCredential,

    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("Rate limit exceeded{}", tier_suffix(.tier))]
    RateLimited {
        tier: Option<String>,
        traces_used: Option<u64>,
        traces_limit: Option<u64>,
    },

    #[error("Quota service unreachable: {0}")]
    Unreachable(String),

    #[error("Usage report failed: {0}")]
    ReportFailed(String),
}

fn tier_suffix(tier: &Option<String>) -> String {
    match tier {
        Some(t) => format!(" (tier: {})", t),
        None => String::new(),
    }
}

impl QuotaError {
    /// Check if this error is an authentication failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::InvalidApiKey(_) | Self::MissingCredential)
    }
}

/// Errors that can occur during export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export handler failed: {0}")]
    HandlerFailed(String),

    #[error("Failed to write export artifact: {0}")]
    WriteFailed(String),

    #[error("Failed to serialize export payload: {0}")]
    SerializeFailed(String),

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        Self::WriteFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializeFailed(err.to_string())
    }
}

/// Errors surfaced by collector operations.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("No active session")]
    NoActiveSession,

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_error_display() {
        let err = LabelError::ValueTooLong {
            key: "env".to_string(),
            len: 300,
            max: 256,
        };
        let display = format!("{}", err);
        assert!(display.contains("env"));
        assert!(display.contains("300"));
        assert!(display.contains("256"));
    }

    #[test]
    fn test_quota_error_auth_failure() {
        assert!(QuotaError::InvalidApiKey("bad".to_string()).is_auth_failure());
        assert!(QuotaError::MissingCredential.is_auth_failure());
        assert!(!QuotaError::Unreachable("timeout".to_string()).is_auth_failure());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = QuotaError::RateLimited {
            tier: Some("free".to_string()),
            traces_used: Some(100),
            traces_limit: Some(100),
        };
        assert!(format!("{}", err).contains("free"));

        let bare = QuotaError::RateLimited {
            tier: None,
            traces_used: None,
            traces_limit: None,
        };
        assert_eq!(format!("{}", bare), "Rate limit exceeded");
    }

    #[test]
    fn test_export_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let export_err: ExportError = io_err.into();
        assert!(matches!(export_err, ExportError::WriteFailed(_)));
    }

    #[test]
    fn test_collector_error_from_label() {
        let label_err = LabelError::InvalidKey("Bad-Key".to_string());
        let collector_err: CollectorError = label_err.into();
        assert!(matches!(collector_err, CollectorError::Label(_)));
    }
}
