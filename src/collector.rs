// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The stateful collector.
//!
//! Owns the session registry, the in-memory event store, the active-session
//! pointer, and the API credential. Sessions are opened by [`Collector::observe`],
//! closed by [`Collector::end`], and removed from memory only by a flush. At
//! most one session is active at a time; events recorded while no session is
//! active are dropped silently, since telemetry emission must never crash the
//! instrumented application.
//!
//! There is no backpressure on the event store: unbounded growth between
//! flushes is the caller's responsibility to avoid.

use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, warn};

#[cfg(feature = "telemetry")]
use crate::metrics::GLOBAL_METRICS;

use crate::config::CollectorConfig;
use crate::error::{CollectorError, LabelError, QuotaError};
use crate::export::{self, FlushOptions, FlushOutcome, RemoteSink};
use crate::labels;
use crate::quota::QuotaClient;
use crate::types::{Session, SessionId, TelemetryEvent, UsageInfo};

/// Options for opening a session.
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    /// Explicit labels merged over the system and environment layers.
    pub labels: BTreeMap<String, String>,
}

impl ObserveOptions {
    /// No explicit labels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
struct CollectorState {
    sessions: HashMap<SessionId, Session>,
    events: HashMap<SessionId, Vec<TelemetryEvent>>,
    active: Option<SessionId>,
}

impl CollectorState {
    fn clear(&mut self) {
        self.sessions.clear();
        self.events.clear();
        self.active = None;
    }
}

/// Telemetry collector for AI-provider calls and instrumented functions.
pub struct Collector {
    state: Mutex<CollectorState>,
    config: CollectorConfig,
    quota: QuotaClient,
    remote: RemoteSink,
}

impl Collector {
    /// Create a collector with the given configuration.
    pub fn new(config: CollectorConfig) -> Self {
        let quota = QuotaClient::new(config.base_url.clone());
        let remote = RemoteSink::new(config.base_url.clone());
        Self {
            state: Mutex::new(CollectorState::default()),
            config,
            quota,
            remote,
        }
    }

    /// Create a collector configured from the environment.
    pub fn from_env() -> Self {
        Self::new(CollectorConfig::from_env())
    }

    /// The collector's configuration.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Begin a session with no explicit labels.
    pub async fn observe(&self, name: impl Into<String>) -> Result<SessionId, CollectorError> {
        self.observe_with(name, ObserveOptions::new()).await
    }

    /// Begin a session.
    ///
    /// Validates explicit labels, the merged user-label count (environment
    /// labels included) and, when a credential is configured, the credential
    /// itself; on any failure no session is registered. The new session
    /// becomes active; an already-active session keeps its queued events but
    /// loses the active pointer.
    pub async fn observe_with(
        &self,
        name: impl Into<String>,
        options: ObserveOptions,
    ) -> Result<SessionId, CollectorError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        labels::validate_labels(&options.labels)?;
        let merged = labels::merged_labels(&options.labels);
        labels::validate_user_count(&merged)?;

        if let Some(api_key) = &self.config.api_key {
            self.quota.validate(api_key).await?;
        }

        let mut session = Session::new(name);
        session.labels = Some(merged);
        let id = session.id.clone();

        let mut state = self.state.lock().await;
        if let Some(previous) = &state.active {
            warn!(
                previous = %previous,
                new = %id,
                "Starting a session while another is active; replacing the active pointer"
            );
        }
        state.events.insert(id.clone(), Vec::new());
        state.sessions.insert(id.clone(), session);
        state.active = Some(id.clone());
        drop(state);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("collector.observe", start.elapsed());

        debug!(session = %id, "Session started");
        Ok(id)
    }

    /// End the active session.
    ///
    /// Stamps `ended_at` and clears the active pointer. A deliberate no-op
    /// when no session is active.
    pub async fn end(&self) {
        let mut state = self.state.lock().await;
        let Some(id) = state.active.take() else {
            return;
        };
        if let Some(session) = state.sessions.get_mut(&id) {
            session.end();
            debug!(session = %id, "Session ended");
        }
    }

    /// The id of the active session, if any.
    pub async fn active_session(&self) -> Option<SessionId> {
        self.state.lock().await.active.clone()
    }

    /// Record an event against the active session.
    ///
    /// Dropped silently when no session is active.
    pub async fn record_event(&self, event: TelemetryEvent) {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut state = self.state.lock().await;
        let Some(id) = state.active.clone() else {
            debug!("No active session; dropping event");
            return;
        };
        state.events.entry(id).or_default().push(event);
        drop(state);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("collector.record_event", start.elapsed());
    }

    /// Number of events queued for the active session.
    pub async fn pending_events(&self) -> usize {
        let state = self.state.lock().await;
        match &state.active {
            Some(id) => state.events.get(id).map_or(0, Vec::len),
            None => 0,
        }
    }

    /// Add one label to the active session.
    pub async fn add_label(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), CollectorError> {
        let key = key.into();
        let value = value.into();
        labels::validate_key(&key)?;
        labels::validate_value(&value, &key)?;

        let mut state = self.state.lock().await;
        let session = active_session_mut(&mut state)?;
        let session_labels = session.labels.get_or_insert_with(BTreeMap::new);

        let user_count = session_labels
            .keys()
            .filter(|k| !k.starts_with(labels::RESERVED_PREFIX))
            .count();
        if !session_labels.contains_key(&key) && user_count >= labels::MAX_LABELS {
            return Err(CollectorError::Label(LabelError::TooMany {
                count: user_count + 1,
                max: labels::MAX_LABELS,
            }));
        }

        session_labels.insert(key, value);
        Ok(())
    }

    /// Remove a label from the active session.
    ///
    /// Returns whether the key existed. Reserved-prefixed keys are never
    /// removable.
    pub async fn remove_label(&self, key: &str) -> Result<bool, CollectorError> {
        if key.starts_with(labels::RESERVED_PREFIX) {
            return Err(CollectorError::Label(LabelError::ReservedKey(
                key.to_string(),
            )));
        }

        let mut state = self.state.lock().await;
        let session = active_session_mut(&mut state)?;
        Ok(session
            .labels
            .as_mut()
            .map(|l| l.remove(key).is_some())
            .unwrap_or(false))
    }

    /// Replace or merge the active session's labels.
    ///
    /// With `merge`, the new map overwrites on key collision and everything
    /// else survives. Without it, all non-reserved keys are dropped first;
    /// reserved-prefixed keys always survive. Validation happens before any
    /// mutation, so a failed call leaves the session untouched.
    pub async fn set_labels(
        &self,
        new_labels: BTreeMap<String, String>,
        merge: bool,
    ) -> Result<(), CollectorError> {
        labels::validate_labels(&new_labels)?;

        let mut state = self.state.lock().await;
        let session = active_session_mut(&mut state)?;
        let session_labels = session.labels.get_or_insert_with(BTreeMap::new);

        if merge {
            let resulting: usize = session_labels
                .keys()
                .filter(|k| !k.starts_with(labels::RESERVED_PREFIX))
                .chain(new_labels.keys())
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            if resulting > labels::MAX_LABELS {
                return Err(CollectorError::Label(LabelError::TooMany {
                    count: resulting,
                    max: labels::MAX_LABELS,
                }));
            }
        } else {
            session_labels.retain(|k, _| k.starts_with(labels::RESERVED_PREFIX));
        }

        session_labels.extend(new_labels);
        Ok(())
    }

    /// Labels of the active session.
    pub async fn session_labels(&self) -> Result<BTreeMap<String, String>, CollectorError> {
        let state = self.state.lock().await;
        let id = state.active.as_ref().ok_or(CollectorError::NoActiveSession)?;
        Ok(state
            .sessions
            .get(id)
            .and_then(|s| s.labels.clone())
            .unwrap_or_default())
    }

    /// Flush everything collected so far.
    ///
    /// Assembles the export payload, dispatches it per the options (exporter,
    /// local artifact, remote endpoint, usage report), then clears all
    /// in-memory state exactly once, regardless of sub-operation outcomes.
    /// A second flush immediately after therefore produces an empty payload.
    ///
    /// State is snapshotted before the sub-operations and cleared after them;
    /// events recorded concurrently while a flush is suspended on I/O are
    /// discarded with it. Instrumentation is expected to run on a single
    /// logical thread, where that window cannot be hit.
    pub async fn flush(&self, options: FlushOptions) -> Result<FlushOutcome, CollectorError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        // Snapshot under the lock; sub-operations below suspend on I/O.
        let (sessions, events_by_session, default_session_id) = {
            let state = self.state.lock().await;
            let default_id = state
                .active
                .clone()
                .or_else(|| {
                    let mut ids: Vec<_> = state.sessions.values().collect();
                    ids.sort_by_key(|s| s.started_at);
                    ids.first().map(|s| s.id.clone())
                })
                .unwrap_or_else(|| "export".to_string());

            let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
            sessions.sort_by_key(|s| s.started_at);
            let events: Vec<(SessionId, Vec<TelemetryEvent>)> = sessions
                .iter()
                .map(|s| (s.id.clone(), state.events.get(&s.id).cloned().unwrap_or_default()))
                .collect();
            (sessions, events, default_id)
        };

        let build_tree = options.build_tree.unwrap_or(self.config.build_tree);
        let payload = export::assemble_payload(sessions, events_by_session, build_tree);

        let result = export::run_flush(
            &payload,
            &options,
            &self.config,
            &self.quota,
            &self.remote,
            &default_session_id,
        )
        .await;

        // Unconditional, exactly once, after all sub-operations.
        self.state.lock().await.clear();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("collector.flush", start.elapsed());

        result.map_err(CollectorError::Export)
    }

    /// Query current usage for the configured credential.
    pub async fn usage(&self) -> Result<UsageInfo, CollectorError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(CollectorError::Quota(QuotaError::MissingCredential))?;
        Ok(self.quota.validate(api_key).await?)
    }
}

fn active_session_mut(state: &mut CollectorState) -> Result<&mut Session, CollectorError> {
    let id = state.active.clone().ok_or(CollectorError::NoActiveSession)?;
    state
        .sessions
        .get_mut(&id)
        .ok_or(CollectorError::NoActiveSession)
}
