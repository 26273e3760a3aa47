// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Aiobs - observability collector for AI-model calls.
//!
//! Collects telemetry about calls made to external AI-model providers and to
//! arbitrary instrumented functions, correlates those calls into a causal
//! trace tree, and ships the result to local storage and/or a remote
//! collection endpoint.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (Session, TelemetryEvent, TraceNode, ExportPayload)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Collector configuration and environment loading
//! - [`labels`] - Label validation, system/environment labels, merging
//! - [`span`] - Process-wide span context with scoped acquisition
//! - [`trace`] - Trace-tree reconstruction from correlated events
//! - [`quota`] - Remote usage/quota client
//! - [`export`] - Export pipeline: exporters, local artifacts, remote flush
//! - [`collector`] - The stateful session/event collector
//! - [`logging`] - Tracing-subscriber initialization
//! - [`metrics`] - Internal operation metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use aiobs::{Collector, CollectorConfig, FlushOptions};
//!
//! let collector = Collector::new(CollectorConfig::from_env());
//! let session = collector.observe("nightly-eval").await?;
//! // ... adapters call collector.record_event(..) ...
//! collector.end().await;
//! let outcome = collector.flush(FlushOptions::new()).await?;
//! ```
//!
//! # Span correlation
//!
//! Event producers read [`span::current`] before minting a new span id and
//! attach the value as `parent_span_id`; [`span::SpanScope`] installs a span
//! as current for the duration of a scope and restores the previous value on
//! drop. Provider adapters and function wrappers share this single slot, so
//! a provider call nested inside an instrumented function links to it.

pub mod collector;
pub mod config;
pub mod error;
pub mod export;
pub mod labels;
pub mod logging;
pub mod metrics;
pub mod quota;
pub mod span;
pub mod trace;
pub mod types;

// Re-export commonly used types at crate root
pub use collector::{Collector, ObserveOptions};
pub use config::CollectorConfig;
pub use error::{CollectorError, ExportError, LabelError, QuotaError, Result};
pub use export::{
    CallbackExporter, CompositeExporter, ExportOptions, ExportResult, Exporter, FlushOptions,
    FlushOutcome,
};
pub use span::SpanScope;
pub use trace::{build_trace_tree, extract_enh_prompt_traces};
pub use types::{
    EventRecord, ExportPayload, FunctionEvent, Session, SessionId, SpanId, TelemetryEvent,
    TraceNode, UsageInfo,
};

/// Aiobs version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        // Verify key types are accessible
        let _session = Session::new("smoke");
        let _options = FlushOptions::new();
        let _config = CollectorConfig::default();
    }
}
