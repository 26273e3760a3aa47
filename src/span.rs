// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide span context.
//!
//! A single slot holds the "current" span id. Event producers read
//! [`current`] before minting a new span and attach the value as
//! `parent_span_id`; they then advance the slot if descendants should see
//! them as parent. Both provider-call adapters and instrumented-function
//! wrappers use this same slot, so nesting links correctly across the two
//! kinds of events.
//!
//! The slot is shared mutable state: two interleaved async chains that
//! read-then-write it across their own await points can misattribute
//! parentage. Prefer [`SpanScope`], which snapshots the previous value and
//! restores it on drop, over raw [`set_current`].

use once_cell::sync::Lazy;
use std::sync::Mutex;

use crate::types::SpanId;

static CURRENT_SPAN: Lazy<Mutex<Option<SpanId>>> = Lazy::new(|| Mutex::new(None));

/// Get the current span id, if any.
pub fn current() -> Option<SpanId> {
    CURRENT_SPAN.lock().unwrap().clone()
}

/// Overwrite the slot and return the previous value.
///
/// Escape hatch for adapters bridging foreign context carriers; the caller
/// is responsible for restoring the returned value. Most code should use
/// [`SpanScope`] instead.
pub fn set_current(span: Option<SpanId>) -> Option<SpanId> {
    let mut slot = CURRENT_SPAN.lock().unwrap();
    std::mem::replace(&mut slot, span)
}

/// Mint a fresh span id.
pub fn next_span_id() -> SpanId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Scoped span acquisition with guaranteed release.
///
/// Entering a scope installs the given span id as current and remembers the
/// previous value; dropping the scope restores it. Scopes nest.
#[derive(Debug)]
pub struct SpanScope {
    id: SpanId,
    previous: Option<SpanId>,
}

impl SpanScope {
    /// Install `id` as the current span, remembering the previous one.
    pub fn enter(id: impl Into<SpanId>) -> Self {
        let id = id.into();
        let previous = set_current(Some(id.clone()));
        Self { id, previous }
    }

    /// The span id this scope installed.
    pub fn id(&self) -> &SpanId {
        &self.id
    }

    /// The span id that was current before this scope, i.e. this span's parent.
    pub fn parent(&self) -> Option<&SpanId> {
        self.previous.as_ref()
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        set_current(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The slot is process-global; serialize tests that touch it.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_set_returns_previous() {
        let _guard = TEST_LOCK.lock().unwrap();
        let saved = set_current(None);
        assert_eq!(set_current(Some("a".to_string())), None);
        assert_eq!(set_current(Some("b".to_string())), Some("a".to_string()));
        assert_eq!(current(), Some("b".to_string()));
        set_current(saved);
    }

    #[test]
    fn test_scope_restores_on_drop() {
        let _guard = TEST_LOCK.lock().unwrap();
        let saved = set_current(None);
        {
            let scope = SpanScope::enter("outer");
            assert_eq!(scope.id(), "outer");
            assert_eq!(scope.parent(), None);
            assert_eq!(current(), Some("outer".to_string()));
        }
        assert_eq!(current(), None);
        set_current(saved);
    }

    #[test]
    fn test_nested_scopes() {
        let _guard = TEST_LOCK.lock().unwrap();
        let saved = set_current(None);
        {
            let _outer = SpanScope::enter("outer");
            {
                let inner = SpanScope::enter("inner");
                assert_eq!(inner.parent(), Some(&"outer".to_string()));
                assert_eq!(current(), Some("inner".to_string()));
            }
            assert_eq!(current(), Some("outer".to_string()));
        }
        set_current(saved);
    }

    #[test]
    fn test_next_span_id_unique() {
        assert_ne!(next_span_id(), next_span_id());
    }
}
