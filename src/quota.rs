// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Usage/quota client.
//!
//! Talks to the remote authorization service to validate a credential and
//! report trace consumption. Both operations use a bounded 10-second timeout
//! and are skipped entirely when the collector runs without a credential.

use std::time::Duration;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::metrics::GLOBAL_METRICS;

use crate::error::QuotaError;
use crate::types::UsageInfo;

/// Timeout for quota operations.
const QUOTA_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    #[allow(dead_code)]
    success: bool,
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    #[allow(dead_code)]
    error: Option<String>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Serialize)]
struct ReportRequest {
    trace_count: u64,
}

/// Client for the remote usage/quota endpoints.
pub struct QuotaClient {
    client: Client,
    base_url: String,
}

impl QuotaClient {
    /// Create a client against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(QUOTA_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Validate a credential against `GET /v1/usage`.
    ///
    /// Returns the current usage envelope on success. HTTP 401 is an
    /// `InvalidApiKey`; any other non-2xx response, and transport-level
    /// failures including timeouts, are `Unreachable`. A successful response
    /// whose `is_rate_limited` flag is set fails with `RateLimited`.
    pub async fn validate(&self, api_key: &str) -> Result<UsageInfo, QuotaError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        debug!(base_url = %self.base_url, "Validating API key");

        let response = self
            .client
            .get(format!("{}/v1/usage", self.base_url))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("quota.validate", start.elapsed());

        let usage = Self::parse_validate_response(status, &body)?;
        if usage.is_rate_limited {
            return Err(rate_limited(Some(&usage)));
        }
        Ok(usage)
    }

    /// Report consumed traces against `POST /v1/usage`.
    ///
    /// Callers only invoke this when `trace_count > 0`. HTTP 401 is an
    /// `InvalidApiKey`; HTTP 429 is a `RateLimited` carrying the
    /// server-reported usage; anything else non-2xx is a `ReportFailed`.
    pub async fn report_usage(
        &self,
        api_key: &str,
        trace_count: u64,
    ) -> Result<UsageInfo, QuotaError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        debug!(trace_count, "Reporting usage");

        let response = self
            .client
            .post(format!("{}/v1/usage", self.base_url))
            .bearer_auth(api_key)
            .json(&ReportRequest { trace_count })
            .send()
            .await
            .map_err(|e| QuotaError::ReportFailed(describe_transport(&e)))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("quota.report_usage", start.elapsed());

        Self::parse_report_response(status, &body)
    }

    /// Classify a validation response by status and body.
    fn parse_validate_response(status: u16, body: &str) -> Result<UsageInfo, QuotaError> {
        match status {
            200..=299 => serde_json::from_str::<UsageEnvelope>(body)
                .map(|envelope| envelope.usage)
                .map_err(|e| QuotaError::Unreachable(format!("malformed usage response: {}", e))),
            401 => Err(QuotaError::InvalidApiKey(
                "rejected by the quota service".to_string(),
            )),
            _ => Err(QuotaError::Unreachable(format!(
                "quota service returned HTTP {}",
                status
            ))),
        }
    }

    /// Classify a usage-report response by status and body.
    fn parse_report_response(status: u16, body: &str) -> Result<UsageInfo, QuotaError> {
        match status {
            200..=299 => serde_json::from_str::<UsageEnvelope>(body)
                .map(|envelope| envelope.usage)
                .map_err(|e| QuotaError::ReportFailed(format!("malformed usage response: {}", e))),
            401 => Err(QuotaError::InvalidApiKey(
                "rejected by the quota service".to_string(),
            )),
            429 => {
                let usage = serde_json::from_str::<RateLimitBody>(body)
                    .ok()
                    .and_then(|b| b.usage);
                Err(rate_limited(usage.as_ref()))
            }
            _ => Err(QuotaError::ReportFailed(format!(
                "quota service returned HTTP {}",
                status
            ))),
        }
    }
}

fn rate_limited(usage: Option<&UsageInfo>) -> QuotaError {
    QuotaError::RateLimited {
        tier: usage.map(|u| u.tier.clone()),
        traces_used: usage.map(|u| u.traces_used),
        traces_limit: usage.map(|u| u.traces_limit),
    }
}

fn transport_error(err: reqwest::Error) -> QuotaError {
    QuotaError::Unreachable(describe_transport(&err))
}

fn describe_transport(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out after {}s", QUOTA_TIMEOUT_SECS)
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USAGE_OK: &str = r#"{
        "success": true,
        "usage": {
            "tier": "pro",
            "traces_used": 10,
            "traces_limit": 1000,
            "traces_remaining": 990,
            "is_rate_limited": false
        }
    }"#;

    #[test]
    fn test_validate_success() {
        let usage = QuotaClient::parse_validate_response(200, USAGE_OK).unwrap();
        assert_eq!(usage.tier, "pro");
        assert_eq!(usage.traces_remaining, 990);
        assert!(!usage.is_rate_limited);
    }

    #[test]
    fn test_validate_unauthorized() {
        let err = QuotaClient::parse_validate_response(401, "").unwrap_err();
        assert!(matches!(err, QuotaError::InvalidApiKey(_)));
    }

    #[test]
    fn test_validate_server_error_is_unreachable() {
        let err = QuotaClient::parse_validate_response(503, "oops").unwrap_err();
        assert!(matches!(err, QuotaError::Unreachable(_)));
    }

    #[test]
    fn test_validate_malformed_body() {
        let err = QuotaClient::parse_validate_response(200, "not json").unwrap_err();
        assert!(matches!(err, QuotaError::Unreachable(_)));
    }

    #[test]
    fn test_report_unauthorized() {
        let err = QuotaClient::parse_report_response(401, "").unwrap_err();
        assert!(matches!(err, QuotaError::InvalidApiKey(_)));
    }

    #[test]
    fn test_report_rate_limited_carries_usage() {
        let body = r#"{
            "error": "rate limited",
            "usage": {
                "tier": "free",
                "traces_used": 100,
                "traces_limit": 100,
                "traces_remaining": 0,
                "is_rate_limited": true
            }
        }"#;
        let err = QuotaClient::parse_report_response(429, body).unwrap_err();
        match err {
            QuotaError::RateLimited {
                tier,
                traces_used,
                traces_limit,
            } => {
                assert_eq!(tier.as_deref(), Some("free"));
                assert_eq!(traces_used, Some(100));
                assert_eq!(traces_limit, Some(100));
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_report_rate_limited_without_body() {
        let err = QuotaClient::parse_report_response(429, "").unwrap_err();
        assert!(matches!(err, QuotaError::RateLimited { tier: None, .. }));
    }

    #[test]
    fn test_report_other_failure() {
        let err = QuotaClient::parse_report_response(500, "").unwrap_err();
        assert!(matches!(err, QuotaError::ReportFailed(_)));
    }
}
