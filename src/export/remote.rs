// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace transmission to the remote collection endpoint.
//!
//! Delivery is best effort: transport failures and non-2xx responses other
//! than 401 are soft and swallowed by the caller. There is no retry.

use std::time::Duration;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::metrics::GLOBAL_METRICS;

use crate::error::QuotaError;
use crate::types::ExportPayload;

/// Timeout for trace transmission.
const TRACE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TraceResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Client for `POST /v1/traces`.
pub struct RemoteSink {
    client: Client,
    base_url: String,
}

impl RemoteSink {
    /// Create a sink against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(TRACE_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Transmit the export payload.
    ///
    /// HTTP 401 is an `InvalidApiKey` the caller must surface; everything
    /// else maps to `Unreachable` for the caller to log and swallow.
    pub async fn send_traces(
        &self,
        api_key: &str,
        payload: &ExportPayload,
    ) -> Result<(), QuotaError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/v1/traces", self.base_url))
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuotaError::Unreachable(format!("timed out after {}s", TRACE_TIMEOUT_SECS))
                } else {
                    QuotaError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("export.send_traces", start.elapsed());

        if status.as_u16() == 401 {
            return Err(QuotaError::InvalidApiKey(
                "rejected by the collection service".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(QuotaError::Unreachable(format!(
                "collection service returned HTTP {}",
                status.as_u16()
            )));
        }

        if let Ok(body) = response.json::<TraceResponse>().await {
            if let Some(message) = body.message {
                debug!(%message, "Traces accepted");
            }
        }
        Ok(())
    }
}
