// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace-tree reconstruction.
//!
//! Turns the flat list of correlated events accumulated across sessions into
//! a forest linked by span/parent-span ids and ordered by start time. Built
//! only at flush time.

use std::collections::HashMap;

use crate::types::{TelemetryEvent, TraceNode};

/// Build the trace forest from an unordered batch of events.
///
/// Every input event appears in the output exactly once. An event whose
/// `parent_span_id` does not resolve within the batch becomes a root instead
/// of being dropped, as does an event that names itself as parent. Siblings
/// (and roots) are ordered by `started_at` with a stable sort, so events with
/// identical timestamps keep their insertion order.
pub fn build_trace_tree(events: Vec<TelemetryEvent>) -> Vec<TraceNode> {
    let n = events.len();

    let (children, roots) = {
        // First pass: one node owner per distinct span id. On a duplicate
        // span id (invalid input) the first event keeps the id.
        let mut owner: HashMap<&str, usize> = HashMap::new();
        for (i, event) in events.iter().enumerate() {
            if let Some(span) = event.span_id() {
                owner.entry(span.as_str()).or_insert(i);
            }
        }

        // Second pass: link children to resolved parents; everything else roots.
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut roots: Vec<usize> = Vec::new();
        for (i, event) in events.iter().enumerate() {
            let parent = event
                .parent_span_id()
                .and_then(|p| owner.get(p.as_str()))
                .copied();
            match parent {
                Some(p) if p != i => children[p].push(i),
                _ => roots.push(i),
            }
        }
        (children, roots)
    };

    let mut slots: Vec<Option<TelemetryEvent>> = events.into_iter().map(Some).collect();

    let mut forest: Vec<TraceNode> = roots
        .into_iter()
        .filter_map(|i| build_node(i, &children, &mut slots))
        .collect();

    // A parent/child cycle in invalid input leaves its members unreachable
    // from any root; surface them as roots so no event is lost.
    for i in 0..n {
        if slots[i].is_some() {
            if let Some(node) = build_node(i, &children, &mut slots) {
                forest.push(node);
            }
        }
    }

    forest.sort_by_key(|node| node.event.started_at());
    forest
}

fn build_node(
    index: usize,
    children: &[Vec<usize>],
    slots: &mut Vec<Option<TelemetryEvent>>,
) -> Option<TraceNode> {
    let event = slots[index].take()?;
    let mut node = TraceNode::new(event);
    for &child in &children[index] {
        if let Some(child_node) = build_node(child, children, slots) {
            node.children.push(child_node);
        }
    }
    node.children.sort_by_key(|n| n.event.started_at());
    Some(node)
}

/// Collect `enh_prompt_id` values from the forest in pre-order.
///
/// Only function events explicitly flagged with `enh_prompt` contribute.
pub fn extract_enh_prompt_traces(tree: &[TraceNode]) -> Vec<String> {
    let mut ids = Vec::new();
    for node in tree {
        collect_enh_prompt(node, &mut ids);
    }
    ids
}

fn collect_enh_prompt(node: &TraceNode, ids: &mut Vec<String>) {
    if let TelemetryEvent::Function(event) = &node.event {
        if event.enh_prompt {
            if let Some(id) = &event.enh_prompt_id {
                ids.push(id.clone());
            }
        }
    }
    for child in &node.children {
        collect_enh_prompt(child, ids);
    }
}
