//! Event types for the WaveCap ingest pipeline
//!
//! Provides the shared event definitions and EventBus used by the
//! capture-ingest service. Events are broadcast via the EventBus and can be
//! serialized for SSE transmission to the live UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Ingest pipeline events
///
/// One event is published for every accepted image contribution, plus
/// lifecycle events for finalization, renaming, and eviction. All events
/// carry the logical key they belong to so consumers can filter per
/// run/session without durable reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// A single image was accepted into a burst session
    BurstImageReceived {
        /// Burst session identifier
        session_id: String,
        /// Images accumulated so far (1..=16)
        current_count: usize,
        /// When the image was accepted
        timestamp: DateTime<Utc>,
    },

    /// A burst session reached its fixed size and was finalized
    BurstFinalized {
        /// Burst session identifier
        session_id: String,
        /// Number of images in the finalized session
        image_count: usize,
        /// When finalization was claimed
        timestamp: DateTime<Utc>,
    },

    /// An archive or raw contribution was merged into a section
    SectionMerged {
        /// Effective run identifier (post collision renaming)
        run_id: String,
        /// Section index within the run
        section_index: u32,
        /// Complete image count for the section after this merge
        current_count: usize,
        /// When the merge happened
        timestamp: DateTime<Utc>,
    },

    /// A calibration frame was stored
    CalibrationFrameStored {
        /// Calibration run identifier
        run_id: String,
        /// Channel key the frame belongs to ("dark" for dark frames)
        channel: String,
        /// When the frame was stored
        timestamp: DateTime<Utc>,
    },

    /// A reused run identifier was renamed to avoid merging into a
    /// previously persisted run
    RunRenamed {
        /// Identifier claimed by the controller
        claimed_run_id: String,
        /// Minted replacement identifier
        effective_run_id: String,
        /// When the rename happened
        timestamp: DateTime<Utc>,
    },

    /// Idle in-memory tracking state was evicted
    TrackerEvicted {
        /// Run or session identifier that was evicted
        key: String,
        /// When eviction happened
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Event type name for SSE `event:` fields
    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::BurstImageReceived { .. } => "BurstImageReceived",
            IngestEvent::BurstFinalized { .. } => "BurstFinalized",
            IngestEvent::SectionMerged { .. } => "SectionMerged",
            IngestEvent::CalibrationFrameStored { .. } => "CalibrationFrameStored",
            IngestEvent::RunRenamed { .. } => "RunRenamed",
            IngestEvent::TrackerEvicted { .. } => "TrackerEvicted",
        }
    }

    /// Logical key (run or session identifier) the event belongs to
    pub fn logical_key(&self) -> &str {
        match self {
            IngestEvent::BurstImageReceived { session_id, .. } => session_id,
            IngestEvent::BurstFinalized { session_id, .. } => session_id,
            IngestEvent::SectionMerged { run_id, .. } => run_id,
            IngestEvent::CalibrationFrameStored { run_id, .. } => run_id,
            IngestEvent::RunRenamed { claimed_run_id, .. } => claimed_run_id,
            IngestEvent::TrackerEvicted { key, .. } => key,
        }
    }
}

/// Central event distribution bus for ingest events
///
/// Backed by tokio::broadcast, providing:
/// - Non-blocking publish (slow subscribers don't block ingestion)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Old events are dropped once `capacity` unconsumed events are buffered.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or 0 when nobody is listening.
    /// A missing subscriber is not an error: the live UI may simply not be
    /// connected while the controller uploads.
    pub fn emit(&self, event: IngestEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Number of currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(IngestEvent::BurstImageReceived {
            session_id: "S1".to_string(),
            current_count: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "BurstImageReceived");
        assert_eq!(event.logical_key(), "S1");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(16);
        let delivered = bus.emit(IngestEvent::TrackerEvicted {
            key: "R9".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(delivered, 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = IngestEvent::SectionMerged {
            run_id: "R1".to_string(),
            section_index: 2,
            current_count: 5,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"SectionMerged\""));
        assert!(json.contains("\"section_index\":2"));
    }
}
