//! Burst session reassembly
//!
//! A burst is exactly 16 single images uploaded under one session
//! identifier. Images accumulate in arrival order; the contribution that
//! completes the burst claims finalization through a one-time set insertion,
//! so concurrent arrivals of the final image cannot double-finalize.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use wavecap_common::events::{EventBus, IngestEvent};

/// Fixed burst size. Not configurable per request.
pub const BURST_SIZE: usize = 16;

/// Outcome of adding one image to a burst session
#[derive(Debug)]
pub enum BurstProgress {
    /// The burst is still accumulating
    Accumulating { count: usize },
    /// This contribution completed the burst and won finalization;
    /// the snapshot must be persisted exactly once
    Finalized { images: Vec<String> },
    /// The burst re-filled after its one-time finalization; accepted but
    /// never persisted again
    AlreadyFinalized { count: usize },
}

#[derive(Debug, Default)]
struct BurstSession {
    images: Vec<String>,
    last_seen: Option<Instant>,
}

#[derive(Default)]
struct BurstInner {
    sessions: HashMap<String, BurstSession>,
    finalized: HashSet<String>,
}

/// Summary of burst state for the debug endpoint
#[derive(Debug)]
pub struct BurstStats {
    pub active_sessions: Vec<(String, usize)>,
    pub finalized_count: usize,
}

/// Thread-safe burst reassembler shared across request handlers
#[derive(Default)]
pub struct BurstTracker {
    inner: Mutex<BurstInner>,
}

impl BurstTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one image to a session in arrival order.
    ///
    /// Appending and the finalization claim happen under one lock, so the
    /// count is exact and at most one caller ever receives `Finalized` for a
    /// given session identifier.
    pub async fn add_image(&self, session_id: &str, path: String) -> BurstProgress {
        let mut inner = self.inner.lock().await;

        let session = inner.sessions.entry(session_id.to_string()).or_default();
        session.images.push(path);
        session.last_seen = Some(Instant::now());
        let count = session.images.len();

        if count < BURST_SIZE {
            return BurstProgress::Accumulating { count };
        }

        // Complete: clear in-memory tracking either way; the finalized set
        // decides whether this completion is the one that persists.
        let images = inner
            .sessions
            .remove(session_id)
            .map(|s| s.images)
            .unwrap_or_default();

        if inner.finalized.insert(session_id.to_string()) {
            debug!("Burst session {} finalized with {} images", session_id, images.len());
            BurstProgress::Finalized { images }
        } else {
            warn!(
                "Burst session {} re-filled after finalization; dropping duplicate burst",
                session_id
            );
            BurstProgress::AlreadyFinalized { count }
        }
    }

    /// Current image count for a session (0 when untracked).
    pub async fn count(&self, session_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(session_id)
            .map(|s| s.images.len())
            .unwrap_or(0)
    }

    /// Evict sessions idle longer than `idle_timeout`. Memory reclamation
    /// only; never finalizes a partial burst.
    pub async fn sweep(&self, idle_timeout: Duration, event_bus: &EventBus) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let stale: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, session)| match session.last_seen {
                Some(seen) => now.duration_since(seen) >= idle_timeout,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &stale {
            debug!("Evicting idle burst session: {}", session_id);
            inner.sessions.remove(session_id);
            event_bus.emit(IngestEvent::TrackerEvicted {
                key: session_id.clone(),
                timestamp: Utc::now(),
            });
        }
        stale.len()
    }

    /// Snapshot for the debug endpoint.
    pub async fn stats(&self) -> BurstStats {
        let inner = self.inner.lock().await;
        let mut active: Vec<(String, usize)> = inner
            .sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.images.len()))
            .collect();
        active.sort();
        BurstStats {
            active_sessions: active,
            finalized_count: inner.finalized.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn accumulates_in_arrival_order_and_finalizes_at_sixteen() {
        let tracker = BurstTracker::new();

        for i in 0..BURST_SIZE - 1 {
            match tracker.add_image("S1", format!("img_{:03}.png", i)).await {
                BurstProgress::Accumulating { count } => assert_eq!(count, i + 1),
                other => panic!("unexpected progress: {:?}", other),
            }
        }

        match tracker.add_image("S1", "img_015.png".to_string()).await {
            BurstProgress::Finalized { images } => {
                assert_eq!(images.len(), BURST_SIZE);
                assert_eq!(images[0], "img_000.png");
                assert_eq!(images[15], "img_015.png");
            }
            other => panic!("unexpected progress: {:?}", other),
        }

        // In-memory tracking is cleared on finalization.
        assert_eq!(tracker.count("S1").await, 0);
    }

    #[tokio::test]
    async fn concurrent_adds_finalize_exactly_once() {
        let tracker = Arc::new(BurstTracker::new());

        let mut handles = Vec::new();
        for i in 0..BURST_SIZE + 4 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.add_image("S1", format!("img_{:03}.png", i)).await
            }));
        }

        let mut finalized = 0;
        for handle in handles {
            if let BurstProgress::Finalized { images } = handle.await.unwrap() {
                assert_eq!(images.len(), BURST_SIZE);
                finalized += 1;
            }
        }
        assert_eq!(finalized, 1);
    }

    #[tokio::test]
    async fn refilled_session_never_finalizes_twice() {
        let tracker = BurstTracker::new();

        for i in 0..BURST_SIZE {
            tracker.add_image("S1", format!("a_{:03}.png", i)).await;
        }
        // Second accumulation under the same identifier.
        for i in 0..BURST_SIZE - 1 {
            tracker.add_image("S1", format!("b_{:03}.png", i)).await;
        }
        match tracker.add_image("S1", "b_015.png".to_string()).await {
            BurstProgress::AlreadyFinalized { count } => assert_eq!(count, BURST_SIZE),
            other => panic!("unexpected progress: {:?}", other),
        }
    }

    #[tokio::test]
    async fn sweep_clears_partial_sessions() {
        let tracker = BurstTracker::new();
        let event_bus = EventBus::new(16);
        tracker.add_image("S1", "img.png".to_string()).await;

        assert_eq!(tracker.sweep(Duration::from_secs(3600), &event_bus).await, 0);
        assert_eq!(tracker.sweep(Duration::ZERO, &event_bus).await, 1);
        assert_eq!(tracker.count("S1").await, 0);
    }
}
