// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pluggable export destinations.
//!
//! An [`Exporter`] receives the assembled [`ExportPayload`] and ships it
//! somewhere the built-in local-file and remote-transmission paths do not
//! cover. Every implementation returns an explicit [`ExportResult`]; there is
//! no runtime shape-sniffing of callback return values.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ExportError;
use crate::types::ExportPayload;

/// Free-form options passed through to an exporter.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    values: BTreeMap<String, Value>,
}

impl ExportOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up an option value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Outcome of a successful export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    /// Where the payload went (path, URL, bucket key, ...).
    pub destination: String,
    /// Bytes written to the destination.
    pub bytes_written: u64,
    /// Exporter-specific extras.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ExportResult {
    /// Create a result with no metadata.
    pub fn new(destination: impl Into<String>, bytes_written: u64) -> Self {
        Self {
            destination: destination.into(),
            bytes_written,
            metadata: BTreeMap::new(),
        }
    }
}

/// A pluggable destination for the export payload.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Name used in logs and composite aggregation.
    fn name(&self) -> &str;

    /// Ship the payload. Failures are surfaced to `flush()` wrapped as
    /// [`ExportError::HandlerFailed`].
    async fn export(
        &self,
        payload: &ExportPayload,
        options: &ExportOptions,
    ) -> Result<ExportResult, ExportError>;
}

/// Runs several exporters in sequence and aggregates their results.
///
/// The first failing child fails the whole composite.
pub struct CompositeExporter {
    exporters: Vec<Box<dyn Exporter>>,
}

impl CompositeExporter {
    /// Create a composite over the given exporters.
    pub fn new(exporters: Vec<Box<dyn Exporter>>) -> Self {
        Self { exporters }
    }

    /// Number of child exporters.
    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    /// Whether the composite has no children.
    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }
}

#[async_trait]
impl Exporter for CompositeExporter {
    fn name(&self) -> &str {
        "composite"
    }

    async fn export(
        &self,
        payload: &ExportPayload,
        options: &ExportOptions,
    ) -> Result<ExportResult, ExportError> {
        let mut destinations = Vec::with_capacity(self.exporters.len());
        let mut bytes_total = 0u64;
        let mut metadata = BTreeMap::new();

        for exporter in &self.exporters {
            debug!(exporter = exporter.name(), "Running child exporter");
            let result = exporter.export(payload, options).await.map_err(|e| {
                ExportError::HandlerFailed(format!("{}: {}", exporter.name(), e))
            })?;
            bytes_total += result.bytes_written;
            metadata.insert(
                exporter.name().to_string(),
                serde_json::to_value(&result).unwrap_or(Value::Null),
            );
            destinations.push(result.destination);
        }

        Ok(ExportResult {
            destination: destinations.join(","),
            bytes_written: bytes_total,
            metadata,
        })
    }
}

/// Boxed future returned by a callback exporter's closure.
pub type CallbackFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<ExportResult>>> + Send>>;

/// Wraps an arbitrary async callback and normalizes its outcome.
///
/// A callback returning `Ok(None)` is treated as a success with no artifact;
/// a synthesized result naming the callback is returned in its place. Errors
/// become [`ExportError::HandlerFailed`] carrying the original cause.
pub struct CallbackExporter {
    name: String,
    callback: Box<dyn Fn(ExportPayload) -> CallbackFuture + Send + Sync>,
}

impl CallbackExporter {
    /// Wrap a callback under the given name.
    pub fn new(
        name: impl Into<String>,
        callback: impl Fn(ExportPayload) -> CallbackFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl Exporter for CallbackExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(
        &self,
        payload: &ExportPayload,
        _options: &ExportOptions,
    ) -> Result<ExportResult, ExportError> {
        match (self.callback)(payload.clone()).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Ok(ExportResult::new(self.name.clone(), 0)),
            Err(e) => Err(ExportError::HandlerFailed(e.to_string())),
        }
    }
}
