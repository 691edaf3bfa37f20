//! Background write queue
//!
//! Durable commits and enrichment run after the HTTP response is sent. The
//! queue tracks its depth so `/debug` can report in-flight writes and tests
//! can wait for drain instead of sleeping. Write failures are logged and
//! swallowed: the captured files are already on local disk and can be
//! re-ingested, so availability wins over write confirmation here.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error};

/// Counter-tracked dispatcher for fire-and-forget durable writes
#[derive(Clone, Default)]
pub struct WriteQueue {
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch a write to the runtime. The future's error is logged under
    /// `label` and not propagated.
    pub fn enqueue<F>(&self, label: &'static str, fut: F)
    where
        F: Future<Output = wavecap_common::Result<()>> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::clone(&self.pending);
        let drained = Arc::clone(&self.drained);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                error!("Background write '{}' failed: {}", label, e);
            } else {
                debug!("Background write '{}' committed", label);
            }
            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
    }

    /// Number of writes currently in flight.
    pub fn depth(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until no writes are in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.depth() == 0 {
                return;
            }
            notified.await;
        }
    }
}
