// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Export pipeline.
//!
//! Assembles the export payload from the collector's accumulated state and
//! ships it to a pluggable exporter, a local JSON artifact, and/or the remote
//! collection endpoint. Usage reporting rides along when a credential is
//! configured.

mod exporter;
mod remote;

pub use exporter::{
    CallbackExporter, CallbackFuture, CompositeExporter, ExportOptions, ExportResult, Exporter,
};
pub use remote::RemoteSink;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{resolve_export_path, CollectorConfig};
use crate::error::ExportError;
use crate::quota::QuotaClient;
use crate::trace::{build_trace_tree, extract_enh_prompt_traces};
use crate::types::{ExportPayload, Session, SessionId, TelemetryEvent};

/// Per-flush options.
#[derive(Clone, Default)]
pub struct FlushOptions {
    /// Explicit local artifact path; wins over env and per-session defaults.
    pub export_path: Option<PathBuf>,
    /// Override the config's `persist` setting for this flush.
    pub persist: Option<bool>,
    /// Override the config's `build_tree` setting for this flush.
    pub build_tree: Option<bool>,
    /// Pluggable destination; suppresses the local-file path.
    pub exporter: Option<Arc<dyn Exporter>>,
    /// Options handed to the exporter.
    pub exporter_options: ExportOptions,
}

impl FlushOptions {
    /// Default options: persist per config, tree per config, no exporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit export path.
    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    /// Override the persist setting.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Override trace-tree construction.
    pub fn with_build_tree(mut self, build_tree: bool) -> Self {
        self.build_tree = Some(build_tree);
        self
    }

    /// Supply a pluggable exporter.
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Supply exporter options.
    pub fn with_exporter_options(mut self, options: ExportOptions) -> Self {
        self.exporter_options = options;
        self
    }
}

impl std::fmt::Debug for FlushOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushOptions")
            .field("export_path", &self.export_path)
            .field("persist", &self.persist)
            .field("build_tree", &self.build_tree)
            .field("exporter", &self.exporter.as_ref().map(|e| e.name()))
            .finish()
    }
}

/// What a flush produced.
#[derive(Debug)]
pub enum FlushOutcome {
    /// A pluggable exporter handled the payload.
    Exported(ExportResult),
    /// The payload was written to a local artifact.
    Persisted(PathBuf),
    /// Nothing was written locally (`persist == false`, no exporter).
    Skipped,
}

impl FlushOutcome {
    /// The local artifact path, when one was written.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Persisted(path) => Some(path),
            _ => None,
        }
    }
}

/// Assemble the export payload from flushed sessions and their events.
///
/// Events are partitioned per session into provider and function lists,
/// preserving recording order; the trace tree spans all sessions.
pub fn assemble_payload(
    mut sessions: Vec<Session>,
    events_by_session: Vec<(SessionId, Vec<TelemetryEvent>)>,
    build_tree: bool,
) -> ExportPayload {
    sessions.sort_by_key(|s| s.started_at);

    let mut events = BTreeMap::new();
    let mut function_events = BTreeMap::new();
    let mut all_events = Vec::new();

    for (session_id, session_events) in events_by_session {
        let provider_list = events.entry(session_id.clone()).or_insert_with(Vec::new);
        let function_list = function_events.entry(session_id).or_insert_with(Vec::new);
        for event in session_events {
            match &event {
                TelemetryEvent::Provider(record) => provider_list.push(record.clone()),
                TelemetryEvent::Function(function) => function_list.push(function.clone()),
            }
            all_events.push(event);
        }
    }

    let trace_tree = if build_tree {
        build_trace_tree(all_events)
    } else {
        Vec::new()
    };
    let enh_prompt_traces = extract_enh_prompt_traces(&trace_tree);

    ExportPayload {
        sessions,
        events,
        function_events,
        trace_tree,
        enh_prompt_traces,
        generated_at: Utc::now(),
        version: crate::VERSION.to_string(),
    }
}

/// Write the payload as pretty JSON, creating intermediate directories.
///
/// Returns the number of bytes written.
pub fn write_payload(payload: &ExportPayload, path: &Path) -> Result<u64, ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(payload)?;
    std::fs::write(path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote export artifact");
    Ok(bytes.len() as u64)
}

/// Drive one flush over an assembled payload.
///
/// The caller owns state clearing; this function only performs the export
/// sub-operations in order and reports the first fatal failure.
pub async fn run_flush(
    payload: &ExportPayload,
    options: &FlushOptions,
    config: &CollectorConfig,
    quota: &QuotaClient,
    remote: &RemoteSink,
    default_session_id: &str,
) -> Result<FlushOutcome, ExportError> {
    if let Some(exporter) = &options.exporter {
        debug!(exporter = exporter.name(), "Dispatching to exporter");
        let handler_result = exporter
            .export(payload, &options.exporter_options)
            .await
            .map_err(|e| match e {
                ExportError::HandlerFailed(_) => e,
                other => ExportError::HandlerFailed(other.to_string()),
            });
        // Remote flush and usage reporting run regardless of the handler's
        // outcome; a fatal failure there takes precedence.
        ship_remote(payload, config, quota, remote).await?;
        return handler_result.map(FlushOutcome::Exported);
    }

    let persist = options.persist.unwrap_or(config.persist);
    if persist {
        let explicit = options
            .export_path
            .as_deref()
            .or(config.export_path.as_deref());
        let path = resolve_export_path(explicit, default_session_id);
        write_payload(payload, &path)?;
        // The artifact is durable at this point; a usage-report failure still
        // propagates to the caller.
        ship_remote(payload, config, quota, remote).await?;
        Ok(FlushOutcome::Persisted(path))
    } else {
        ship_remote(payload, config, quota, remote).await?;
        Ok(FlushOutcome::Skipped)
    }
}

/// Best-effort trace transmission followed by a hard usage report.
///
/// Skipped entirely in local-only mode. A 401 from either endpoint is fatal;
/// other transmission failures are logged and swallowed, while any
/// usage-report failure propagates.
async fn ship_remote(
    payload: &ExportPayload,
    config: &CollectorConfig,
    quota: &QuotaClient,
    remote: &RemoteSink,
) -> Result<(), ExportError> {
    let Some(api_key) = &config.api_key else {
        debug!("No credential configured; skipping remote flush and usage report");
        return Ok(());
    };

    if let Err(err) = remote.send_traces(api_key, payload).await {
        if err.is_auth_failure() {
            return Err(ExportError::Quota(err));
        }
        warn!(error = %err, "Remote trace flush failed; continuing");
    }

    let trace_count = payload.trace_count();
    if trace_count > 0 {
        quota
            .report_usage(api_key, trace_count)
            .await
            .map_err(ExportError::Quota)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventRecord, FunctionEvent};
    use chrono::Duration;
    use tempfile::TempDir;

    fn provider_event(span: &str, parent: Option<&str>) -> TelemetryEvent {
        let start = Utc::now();
        TelemetryEvent::Provider(
            EventRecord::new(
                "openai",
                "chat.completions",
                serde_json::json!({}),
                None,
                None,
                start,
                start + Duration::milliseconds(1),
            )
            .with_span(Some(span.to_string()), parent.map(String::from)),
        )
    }

    fn function_event(span: &str, parent: Option<&str>) -> TelemetryEvent {
        let start = Utc::now();
        let record = EventRecord::new(
            "function",
            "call",
            serde_json::json!({}),
            None,
            None,
            start,
            start,
        )
        .with_span(Some(span.to_string()), parent.map(String::from));
        TelemetryEvent::Function(FunctionEvent::new(record, "step"))
    }

    #[test]
    fn test_assemble_partitions_per_session() {
        let session = Session::new("s");
        let id = session.id.clone();
        let events = vec![(
            id.clone(),
            vec![
                provider_event("a", None),
                function_event("b", Some("a")),
                provider_event("c", Some("a")),
            ],
        )];

        let payload = assemble_payload(vec![session], events, true);

        assert_eq!(payload.events[&id].len(), 2);
        assert_eq!(payload.function_events[&id].len(), 1);
        assert_eq!(payload.trace_tree.len(), 1);
        assert_eq!(payload.trace_tree[0].children.len(), 2);
        assert_eq!(payload.version, crate::VERSION);
    }

    #[test]
    fn test_assemble_without_tree() {
        let session = Session::new("s");
        let id = session.id.clone();
        let events = vec![(id, vec![provider_event("a", None)])];

        let payload = assemble_payload(vec![session], events, false);

        assert!(payload.trace_tree.is_empty());
        assert!(payload.enh_prompt_traces.is_empty());
        // Usage accounting falls back to raw event count.
        assert_eq!(payload.trace_count(), 1);
    }

    #[test]
    fn test_write_payload_creates_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/export.json");
        let payload = assemble_payload(vec![Session::new("s")], Vec::new(), true);

        let bytes = write_payload(&payload, &path).unwrap();

        assert!(path.exists());
        assert!(bytes > 0);
        let read_back: ExportPayload =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back.sessions.len(), 1);
    }

    #[test]
    fn test_sessions_sorted_by_start() {
        let mut late = Session::new("late");
        late.started_at = Utc::now() + Duration::seconds(10);
        let early = Session::new("early");

        let payload = assemble_payload(vec![late, early], Vec::new(), true);
        assert_eq!(payload.sessions[0].name, "early");
        assert_eq!(payload.sessions[1].name, "late");
    }
}
