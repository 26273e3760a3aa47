// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions for sessions, events, trace nodes, and export payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session identifier.
pub type SessionId = String;

/// Span identifier. Opaque strings minted by the call-interception adapters.
pub type SpanId = String;

/// Process metadata captured when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// OS process id of the instrumented application.
    pub process_id: u32,
    /// Working directory at session start.
    pub working_directory: String,
}

impl SessionMeta {
    /// Capture metadata from the current process.
    pub fn capture() -> Self {
        Self {
            process_id: std::process::id(),
            working_directory: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| String::from("unknown")),
        }
    }
}

/// A bounded window of telemetry collection.
///
/// Created by [`Collector::observe`](crate::collector::Collector::observe),
/// closed by `end()`, and removed from memory only by a successful `flush()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Human-readable session name.
    pub name: String,
    /// Session start timestamp.
    pub started_at: DateTime<Utc>,
    /// Session end timestamp, set by `end()`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Process metadata.
    pub meta: SessionMeta,
    /// Key/value labels attached to the session.
    pub labels: Option<BTreeMap<String, String>>,
}

impl Session {
    /// Create a new session with a freshly generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Self::generate_id(),
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            meta: SessionMeta::capture(),
            labels: None,
        }
    }

    /// Generate a unique session ID based on timestamp and UUID.
    pub fn generate_id() -> SessionId {
        let now = Utc::now();
        let short_uuid = &uuid::Uuid::new_v4().to_string()[..8];
        format!("sess-{}-{}", now.format("%Y%m%d-%H%M%S"), short_uuid)
    }

    /// Close the session, stamping `ended_at`.
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Whether the session has been closed.
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// A single provider-call record.
///
/// Immutable once recorded; `duration_ms` is derived from the two timestamps
/// at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Provider name (e.g. "anthropic", "openai").
    pub provider: String,
    /// API surface invoked (e.g. "messages.create").
    pub api: String,
    /// Captured request payload.
    pub request: Value,
    /// Captured response payload, absent on error.
    pub response: Option<Value>,
    /// Error string when the call failed.
    pub error: Option<String>,
    /// Call start timestamp.
    pub started_at: DateTime<Utc>,
    /// Call end timestamp.
    pub ended_at: DateTime<Utc>,
    /// Call duration in milliseconds.
    pub duration_ms: u64,
    /// Source location of the call, when known.
    pub callsite: Option<String>,
    /// Span id minted for this call.
    pub span_id: Option<SpanId>,
    /// Span id of the enclosing operation.
    pub parent_span_id: Option<SpanId>,
}

impl EventRecord {
    /// Create a record for a completed call.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: impl Into<String>,
        api: impl Into<String>,
        request: Value,
        response: Option<Value>,
        error: Option<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            provider: provider.into(),
            api: api.into(),
            request,
            response,
            error,
            started_at,
            ended_at,
            duration_ms,
            callsite: None,
            span_id: None,
            parent_span_id: None,
        }
    }

    /// Attach a source location.
    pub fn with_callsite(mut self, callsite: impl Into<String>) -> Self {
        self.callsite = Some(callsite.into());
        self
    }

    /// Attach span correlation ids.
    ///
    /// A parent equal to the span's own id would create a cycle and is
    /// discarded.
    pub fn with_span(mut self, span_id: Option<SpanId>, parent_span_id: Option<SpanId>) -> Self {
        self.parent_span_id = match (&span_id, parent_span_id) {
            (Some(own), Some(parent)) if *own == parent => None,
            (_, parent) => parent,
        };
        self.span_id = span_id;
        self
    }
}

/// An instrumented-function record: everything a provider call carries, plus
/// the function identity and its prompt-enhancement flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionEvent {
    /// Shared call fields.
    #[serde(flatten)]
    pub record: EventRecord,
    /// Function name.
    pub name: String,
    /// Module the function lives in, when known.
    pub module: Option<String>,
    /// Captured positional arguments.
    pub args: Value,
    /// Captured keyword arguments.
    pub kwargs: Value,
    /// Captured return value.
    pub result: Option<Value>,
    /// Whether this invocation is flagged for prompt enhancement.
    pub enh_prompt: bool,
    /// Identifier used by downstream prompt-enhancement processing.
    pub enh_prompt_id: Option<String>,
    /// Auto-enhance threshold, when configured.
    pub auto_enhance_after: Option<u32>,
}

impl FunctionEvent {
    /// Create a function event wrapping a call record.
    pub fn new(record: EventRecord, name: impl Into<String>) -> Self {
        Self {
            record,
            name: name.into(),
            module: None,
            args: Value::Null,
            kwargs: Value::Null,
            result: None,
            enh_prompt: false,
            enh_prompt_id: None,
            auto_enhance_after: None,
        }
    }
}

/// A recorded telemetry event: either a provider call or an instrumented
/// function invocation.
///
/// Modeled as a tagged union with an `event_type` discriminant so that
/// consumers never have to guess the shape from the fields present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Provider-call record.
    Provider(EventRecord),
    /// Instrumented-function record.
    Function(FunctionEvent),
}

impl TelemetryEvent {
    /// The shared call-record fields.
    pub fn record(&self) -> &EventRecord {
        match self {
            Self::Provider(record) => record,
            Self::Function(event) => &event.record,
        }
    }

    /// Span id, when the producer minted one.
    pub fn span_id(&self) -> Option<&SpanId> {
        self.record().span_id.as_ref()
    }

    /// Parent span id, when correlated.
    pub fn parent_span_id(&self) -> Option<&SpanId> {
        self.record().parent_span_id.as_ref()
    }

    /// Event start timestamp.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.record().started_at
    }

    /// Whether this is an instrumented-function event.
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }
}

/// A node in the reconstructed trace forest.
///
/// Built only at flush time; never persisted independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceNode {
    /// The event this node represents.
    #[serde(flatten)]
    pub event: TelemetryEvent,
    /// Child nodes, ordered by `started_at`.
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    /// Wrap an event into a leaf node.
    pub fn new(event: TelemetryEvent) -> Self {
        Self {
            event,
            children: Vec::new(),
        }
    }

    /// Total node count of this subtree, including self.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TraceNode::size).sum::<usize>()
    }
}

/// Usage envelope returned by the remote quota service. Transient, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageInfo {
    /// Plan tier name.
    pub tier: String,
    /// Traces consumed in the current window.
    pub traces_used: u64,
    /// Trace quota for the current window.
    pub traces_limit: u64,
    /// Traces remaining in the current window.
    pub traces_remaining: u64,
    /// Whether the credential is currently rate limited.
    #[serde(default)]
    pub is_rate_limited: bool,
}

/// The document shipped to exporters, the local artifact, and the remote
/// trace endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    /// Every session known at flush time, active or closed.
    pub sessions: Vec<Session>,
    /// Provider events, partitioned per session.
    pub events: BTreeMap<SessionId, Vec<EventRecord>>,
    /// Function events, partitioned per session.
    pub function_events: BTreeMap<SessionId, Vec<FunctionEvent>>,
    /// Reconstructed trace forest across all flushed sessions.
    pub trace_tree: Vec<TraceNode>,
    /// Enh-prompt ids collected from the tree in pre-order.
    pub enh_prompt_traces: Vec<String>,
    /// Payload generation timestamp.
    pub generated_at: DateTime<Utc>,
    /// SDK version that produced this payload.
    pub version: String,
}

impl ExportPayload {
    /// Number of traces this payload represents, used for usage accounting.
    ///
    /// Root count of the reconstructed forest; falls back to the raw event
    /// count when tree building was disabled.
    pub fn trace_count(&self) -> u64 {
        if !self.trace_tree.is_empty() {
            self.trace_tree.len() as u64
        } else {
            let events: usize = self.events.values().map(Vec::len).sum();
            let function_events: usize = self.function_events.values().map(Vec::len).sum();
            (events + function_events) as u64
        }
    }

    /// Whether the payload carries no sessions and no events.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.events.values().all(Vec::is_empty)
            && self.function_events.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(span: Option<&str>, parent: Option<&str>) -> EventRecord {
        let start = Utc::now();
        EventRecord::new(
            "anthropic",
            "messages.create",
            serde_json::json!({"model": "claude"}),
            Some(serde_json::json!({"ok": true})),
            None,
            start,
            start + Duration::milliseconds(120),
        )
        .with_span(span.map(String::from), parent.map(String::from))
    }

    #[test]
    fn test_session_new() {
        let session = Session::new("test run");
        assert!(session.id.starts_with("sess-"));
        assert_eq!(session.name, "test run");
        assert!(session.ended_at.is_none());
        assert!(session.meta.process_id > 0);
    }

    #[test]
    fn test_session_end() {
        let mut session = Session::new("test");
        session.end();
        assert!(session.is_ended());
        assert!(session.ended_at.unwrap() >= session.started_at);
    }

    #[test]
    fn test_session_ids_unique() {
        let a = Session::generate_id();
        let b = Session::generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_duration() {
        let event = record(Some("a"), None);
        assert_eq!(event.duration_ms, 120);
    }

    #[test]
    fn test_self_parent_discarded() {
        let event = record(Some("a"), Some("a"));
        assert_eq!(event.span_id.as_deref(), Some("a"));
        assert!(event.parent_span_id.is_none());
    }

    #[test]
    fn test_event_type_tag() {
        let provider = TelemetryEvent::Provider(record(Some("a"), None));
        let json = serde_json::to_value(&provider).unwrap();
        assert_eq!(json["event_type"], "provider");

        let function =
            TelemetryEvent::Function(FunctionEvent::new(record(Some("b"), Some("a")), "step"));
        let json = serde_json::to_value(&function).unwrap();
        assert_eq!(json["event_type"], "function");
        assert_eq!(json["name"], "step");
        assert_eq!(json["span_id"], "b");
    }

    #[test]
    fn test_telemetry_event_accessors() {
        let event = TelemetryEvent::Function(FunctionEvent::new(record(Some("b"), Some("a")), "f"));
        assert!(event.is_function());
        assert_eq!(event.span_id().map(String::as_str), Some("b"));
        assert_eq!(event.parent_span_id().map(String::as_str), Some("a"));
    }

    #[test]
    fn test_trace_node_size() {
        let mut root = TraceNode::new(TelemetryEvent::Provider(record(Some("a"), None)));
        root.children
            .push(TraceNode::new(TelemetryEvent::Provider(record(
                Some("b"),
                Some("a"),
            ))));
        assert_eq!(root.size(), 2);
    }

    #[test]
    fn test_payload_trace_count_fallback() {
        let mut events = BTreeMap::new();
        events.insert("s1".to_string(), vec![record(None, None)]);
        let payload = ExportPayload {
            sessions: vec![Session::new("s")],
            events,
            function_events: BTreeMap::new(),
            trace_tree: Vec::new(),
            enh_prompt_traces: Vec::new(),
            generated_at: Utc::now(),
            version: crate::VERSION.to_string(),
        };
        assert_eq!(payload.trace_count(), 1);
        assert!(!payload.is_empty());
    }
}
