//! Milestones and decision traces (spec.md §4.10).
//!
//! Two event kinds, both best-effort: milestones are process-lifetime
//! progress notes, decision traces explain why a particular URL took the
//! path it did. Both are pushed into small bounded in-memory ring buffers —
//! a plain `Mutex`-guarded `VecDeque` that drops its oldest entry once full,
//! the same "never block, never fail the caller" shape
//! `hitbox`'s `OffloadManager` gives its background tasks
//! (`hitbox/src/offload/manager.rs`: spawn, track, forget) — and decision
//! traces are additionally persisted to the store when configured, fired
//! off as a detached `tokio::spawn` so a slow store write never holds up the
//! pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crawl_backend::Store;
use crawl_core::{DecisionFields, DecisionKind, DecisionTrace};

/// A progress note emitted at scheduler state transitions and periodically
/// during a run.
#[derive(Clone, Debug)]
pub struct Milestone {
    /// When the milestone was recorded.
    pub ts: DateTime<Utc>,
    /// Human-readable message.
    pub message: String,
    /// Structured context, e.g. `visited`, `queued`.
    pub fields: DecisionFields,
}

struct Inner {
    store: Arc<dyn Store>,
    persist_decisions: bool,
    decisions: Mutex<VecDeque<DecisionTrace>>,
    milestones: Mutex<VecDeque<Milestone>>,
    capacity: usize,
}

/// Shared handle injected into the queue, pipeline, and worker pool so none
/// of them need a back-reference to the orchestrator (spec.md §9: cyclic
/// queue↔telemetry dependencies resolve via a handle injected into both
/// sides, not mutual construction).
#[derive(Clone)]
pub struct TelemetrySink(Arc<Inner>);

impl TelemetrySink {
    /// Builds a sink persisting decision traces to `store` when
    /// `persist_decisions` is set, keeping at most `capacity` of each kind
    /// in memory.
    pub fn new(store: Arc<dyn Store>, persist_decisions: bool, capacity: usize) -> Self {
        TelemetrySink(Arc::new(Inner {
            store,
            persist_decisions,
            decisions: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            milestones: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }))
    }

    /// Records a decision trace: always kept in the in-memory ring buffer
    /// and logged; persisted to the store only when configured.
    pub fn decision(&self, kind: DecisionKind, url: Option<String>, host: Option<String>, fields: DecisionFields) {
        let trace = DecisionTrace::new(Utc::now(), kind, url, host, fields);
        tracing::info!(
            kind = ?trace.kind,
            url = trace.url.as_deref(),
            host = trace.host.as_deref(),
            "decision"
        );

        {
            let mut buf = self.0.decisions.lock().expect("decisions buffer poisoned");
            if buf.len() >= self.0.capacity {
                buf.pop_front();
            }
            buf.push_back(trace.clone());
        }

        if self.0.persist_decisions {
            let store = self.0.store.clone();
            tokio::spawn(async move {
                if let Err(error) = store.decision_append(trace).await {
                    tracing::warn!(%error, "failed to persist decision trace");
                }
            });
        }
    }

    /// Records a best-effort progress milestone. Never persisted.
    pub fn milestone(&self, message: impl Into<String>, fields: DecisionFields) {
        let milestone = Milestone { ts: Utc::now(), message: message.into(), fields };
        tracing::info!(message = %milestone.message, "milestone");
        let mut buf = self.0.milestones.lock().expect("milestones buffer poisoned");
        if buf.len() >= self.0.capacity {
            buf.pop_front();
        }
        buf.push_back(milestone);
    }

    /// Snapshot of the most recent decision traces, oldest first.
    pub fn recent_decisions(&self) -> Vec<DecisionTrace> {
        self.0.decisions.lock().expect("decisions buffer poisoned").iter().cloned().collect()
    }

    /// Snapshot of the most recent milestones, oldest first.
    pub fn recent_milestones(&self) -> Vec<Milestone> {
        self.0.milestones.lock().expect("milestones buffer poisoned").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_store_memory::InMemoryStore;

    #[tokio::test]
    async fn ring_buffer_drops_oldest() {
        let sink = TelemetrySink::new(Arc::new(InMemoryStore::new()), false, 2);
        sink.milestone("a", DecisionFields::empty());
        sink.milestone("b", DecisionFields::empty());
        sink.milestone("c", DecisionFields::empty());
        let recent = sink.recent_milestones();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "b");
        assert_eq!(recent[1].message, "c");
    }

    #[tokio::test]
    async fn persists_only_when_enabled() {
        let store = Arc::new(InMemoryStore::new());
        let sink = TelemetrySink::new(store.clone(), false, 16);
        sink.decision(DecisionKind::CacheHit, Some("https://a.test/".into()), Some("a.test".into()), DecisionFields::empty());
        tokio::task::yield_now().await;
        assert!(store.decisions().is_empty());

        let sink = TelemetrySink::new(store.clone(), true, 16);
        sink.decision(DecisionKind::CacheHit, Some("https://a.test/".into()), Some("a.test".into()), DecisionFields::empty());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.decisions().len(), 1);
    }
}
