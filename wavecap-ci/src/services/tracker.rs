//! In-memory run tracking for sectioned captures
//!
//! Tracks per-run accumulated image paths, expected-frame hints, and
//! last-activity times. Controllers may reuse a run identifier across power
//! cycles; when a new run claims an identifier that already has a durable
//! record, a disambiguated identifier is minted and all subsequent
//! contributions claiming the old one follow it until the next apparent run
//! start.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use wavecap_common::events::{EventBus, IngestEvent};
use wavecap_common::Result;

use crate::db;

/// Tracking state for runs idle longer than this is evicted.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-run in-memory tracking entry
#[derive(Debug, Default)]
struct RunEntry {
    config_name: Option<String>,
    section_paths: HashMap<u32, Vec<String>>,
    expected_frames: HashMap<u32, u32>,
    last_seen: Option<Instant>,
}

#[derive(Default)]
struct TrackerInner {
    runs: HashMap<String, RunEntry>,
    /// Claimed identifier -> minted replacement, live until the next
    /// apparent run start re-evaluates the claim.
    aliases: HashMap<String, String>,
    /// `{run}:{section}:{part}` keys already contributed (monotonic).
    seen_parts: HashSet<String>,
}

/// Summary of tracker state for the debug endpoint
#[derive(Debug)]
pub struct TrackerStats {
    pub runs: Vec<RunStats>,
    pub alias_count: usize,
    pub seen_part_count: usize,
}

#[derive(Debug)]
pub struct RunStats {
    pub run_id: String,
    pub section_count: usize,
    pub image_count: usize,
    pub idle_secs: u64,
}

/// Thread-safe run tracker shared across request handlers
#[derive(Default)]
pub struct RunTracker {
    inner: Mutex<TrackerInner>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the effective run identifier for a contribution.
    ///
    /// A contribution that looks like a fresh run start (section 0, part
    /// blank/"1"/"001") re-evaluates the claimed identifier: if a durable
    /// record already exists and no in-memory tracker is active, a
    /// timestamp-suffixed replacement is minted. Other contributions follow
    /// the alias map.
    pub async fn resolve_run_id(
        &self,
        claimed: &str,
        section_index: u32,
        part: Option<&str>,
        pool: &SqlitePool,
        event_bus: &EventBus,
    ) -> Result<String> {
        if !is_run_start(section_index, part) {
            let inner = self.inner.lock().await;
            return Ok(inner
                .aliases
                .get(claimed)
                .cloned()
                .unwrap_or_else(|| claimed.to_string()));
        }

        // Fresh run start: only collide when nothing in memory is tracking
        // the identifier but the store already has it from a previous run.
        let tracker_active = {
            let inner = self.inner.lock().await;
            inner.runs.contains_key(claimed)
        };

        if !tracker_active && db::sessions::find_by_run_id(pool, claimed).await?.is_some() {
            let minted = format!("{}__{}", claimed, Utc::now().format("%Y%m%d%H%M%S"));
            info!(
                "Run identifier {} already persisted; renaming new run to {}",
                claimed, minted
            );
            let mut inner = self.inner.lock().await;
            inner
                .aliases
                .insert(claimed.to_string(), minted.clone());
            event_bus.emit(IngestEvent::RunRenamed {
                claimed_run_id: claimed.to_string(),
                effective_run_id: minted.clone(),
                timestamp: Utc::now(),
            });
            return Ok(minted);
        }

        // The claim stands; drop any stale alias from an earlier collision.
        let mut inner = self.inner.lock().await;
        inner.aliases.remove(claimed);
        Ok(claimed.to_string())
    }

    /// Follow the alias map without re-evaluating the claim. Used by
    /// contributions that carry no section/part context (metadata bodies).
    pub async fn resolve_alias(&self, claimed: &str) -> String {
        let inner = self.inner.lock().await;
        inner
            .aliases
            .get(claimed)
            .cloned()
            .unwrap_or_else(|| claimed.to_string())
    }

    /// Record activity for a run, creating its entry if absent.
    pub async fn touch(&self, run_id: &str, config_name: Option<&str>) {
        let mut inner = self.inner.lock().await;
        let entry = inner.runs.entry(run_id.to_string()).or_default();
        if entry.config_name.is_none() {
            entry.config_name = config_name.map(str::to_string);
        }
        entry.last_seen = Some(Instant::now());
    }

    /// Append newly extracted paths to a section and return the complete
    /// accumulated list (the source of truth for every durable upsert).
    pub async fn append_section_paths(
        &self,
        run_id: &str,
        section_index: u32,
        new_paths: &[String],
    ) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let entry = inner.runs.entry(run_id.to_string()).or_default();
        entry.last_seen = Some(Instant::now());
        let list = entry.section_paths.entry(section_index).or_default();
        list.extend_from_slice(new_paths);
        list.clone()
    }

    /// Record an expected-frame hint for a section.
    pub async fn set_expected_frames(&self, run_id: &str, section_index: u32, hint: u32) {
        let mut inner = self.inner.lock().await;
        let entry = inner.runs.entry(run_id.to_string()).or_default();
        entry.expected_frames.insert(section_index, hint);
    }

    /// Dedup gate for archive parts. Returns false when the part was
    /// already contributed (a retry), so its paths must not re-append.
    pub async fn mark_part_seen(&self, run_id: &str, section_index: u32, part: &str) -> bool {
        let key = format!("{}:{}:{}", run_id, section_index, part);
        let mut inner = self.inner.lock().await;
        inner.seen_parts.insert(key)
    }

    /// Evict tracking state idle longer than `idle_timeout`.
    ///
    /// Memory reclamation only: durable records are untouched and nothing is
    /// finalized. Returns the number of evicted runs.
    pub async fn sweep(&self, idle_timeout: Duration, event_bus: &EventBus) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let stale: Vec<String> = inner
            .runs
            .iter()
            .filter(|(_, entry)| match entry.last_seen {
                Some(seen) => now.duration_since(seen) >= idle_timeout,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for run_id in &stale {
            debug!("Evicting idle run tracking state: {}", run_id);
            inner.runs.remove(run_id);
            inner.aliases.retain(|_, minted| minted != run_id);
            event_bus.emit(IngestEvent::TrackerEvicted {
                key: run_id.clone(),
                timestamp: Utc::now(),
            });
        }
        stale.len()
    }

    /// Whether a run currently has in-memory tracking state.
    pub async fn is_active(&self, run_id: &str) -> bool {
        self.inner.lock().await.runs.contains_key(run_id)
    }

    /// Config name recorded for a run, if any.
    pub async fn config_name(&self, run_id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.runs.get(run_id).and_then(|e| e.config_name.clone())
    }

    /// Snapshot for the debug endpoint.
    pub async fn stats(&self) -> TrackerStats {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let mut runs: Vec<RunStats> = inner
            .runs
            .iter()
            .map(|(id, entry)| RunStats {
                run_id: id.clone(),
                section_count: entry.section_paths.len(),
                image_count: entry.section_paths.values().map(Vec::len).sum(),
                idle_secs: entry
                    .last_seen
                    .map(|seen| now.duration_since(seen).as_secs())
                    .unwrap_or(0),
            })
            .collect();
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        TrackerStats {
            runs,
            alias_count: inner.aliases.len(),
            seen_part_count: inner.seen_parts.len(),
        }
    }
}

/// A contribution starts a run when it targets section 0 with a blank or
/// first part indicator.
fn is_run_start(section_index: u32, part: Option<&str>) -> bool {
    if section_index != 0 {
        return false;
    }
    matches!(part.map(str::trim), None | Some("") | Some("1") | Some("001"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> EventBus {
        EventBus::new(64)
    }

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    #[test]
    fn run_start_detection() {
        assert!(is_run_start(0, None));
        assert!(is_run_start(0, Some("")));
        assert!(is_run_start(0, Some("1")));
        assert!(is_run_start(0, Some("001")));
        assert!(!is_run_start(0, Some("002")));
        assert!(!is_run_start(1, None));
    }

    #[tokio::test]
    async fn fresh_identifier_passes_through() {
        let tracker = RunTracker::new();
        let pool = memory_pool().await;
        let effective = tracker
            .resolve_run_id("R1", 0, Some("001"), &pool, &bus())
            .await
            .unwrap();
        assert_eq!(effective, "R1");
    }

    #[tokio::test]
    async fn persisted_identifier_is_renamed_on_run_start() {
        let tracker = RunTracker::new();
        let pool = memory_pool().await;
        db::sessions::upsert_section(&pool, "R1", 0, &[], "section 0", None, "loc", None)
            .await
            .unwrap();

        let effective = tracker
            .resolve_run_id("R1", 0, Some("001"), &pool, &bus())
            .await
            .unwrap();
        assert_ne!(effective, "R1");
        assert!(effective.starts_with("R1__"));

        // Later parts claiming the old identifier follow the alias.
        let follow_up = tracker
            .resolve_run_id("R1", 0, Some("002"), &pool, &bus())
            .await
            .unwrap();
        assert_eq!(follow_up, effective);
    }

    #[tokio::test]
    async fn active_tracker_suppresses_renaming() {
        let tracker = RunTracker::new();
        let pool = memory_pool().await;
        db::sessions::upsert_section(&pool, "R1", 0, &[], "section 0", None, "loc", None)
            .await
            .unwrap();
        tracker.touch("R1", None).await;

        let effective = tracker
            .resolve_run_id("R1", 0, Some("001"), &pool, &bus())
            .await
            .unwrap();
        assert_eq!(effective, "R1");
    }

    #[tokio::test]
    async fn append_returns_complete_list() {
        let tracker = RunTracker::new();
        let first = tracker
            .append_section_paths("R1", 0, &["a.png".to_string()])
            .await;
        assert_eq!(first, vec!["a.png"]);
        let second = tracker
            .append_section_paths("R1", 0, &["b.png".to_string()])
            .await;
        assert_eq!(second, vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn part_dedup_is_monotonic() {
        let tracker = RunTracker::new();
        assert!(tracker.mark_part_seen("R1", 0, "001").await);
        assert!(!tracker.mark_part_seen("R1", 0, "001").await);
        assert!(tracker.mark_part_seen("R1", 0, "002").await);
        assert!(tracker.mark_part_seen("R1", 1, "001").await);
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_runs() {
        let tracker = RunTracker::new();
        let event_bus = bus();
        tracker.touch("idle", None).await;
        tracker.touch("fresh", None).await;

        // Zero timeout treats everything as idle; a long timeout nothing.
        assert_eq!(tracker.sweep(Duration::from_secs(3600), &event_bus).await, 0);
        assert!(tracker.is_active("idle").await);

        let evicted = tracker.sweep(Duration::ZERO, &event_bus).await;
        assert_eq!(evicted, 2);
        assert!(!tracker.is_active("idle").await);
        assert!(!tracker.is_active("fresh").await);
    }
}
