//! Pending environment metadata cache
//!
//! Environment readings can arrive before any durable record for their run
//! exists. A reading that matches zero rows is cached and applied
//! retroactively the first time a record for the run is written; the cache
//! entry is consumed at that point. At most one entry exists per run, later
//! readings overwrite earlier uncommitted ones.

use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use wavecap_common::Result;

use crate::db;
use crate::models::EnvReading;

/// Outcome of applying an environment reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvOutcome {
    /// The durable store already had a record; the reading was written
    Applied,
    /// No record yet; the reading is cached for retroactive application
    Cached,
}

/// Thread-safe pending environment cache
#[derive(Default)]
pub struct PendingEnvCache {
    entries: Mutex<HashMap<String, EnvReading>>,
}

impl PendingEnvCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a reading to the run's durable records, caching it when none
    /// exist yet.
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        run_id: &str,
        reading: EnvReading,
    ) -> Result<EnvOutcome> {
        let affected = db::sessions::update_environment_by_run_id(pool, run_id, &reading).await?;
        if affected > 0 {
            debug!("Environment reading applied to {} row(s) of run {}", affected, run_id);
            // A late duplicate of an already-applied reading must not stay
            // cached, or it would resurrect on the next record creation.
            self.entries.lock().await.remove(run_id);
            return Ok(EnvOutcome::Applied);
        }

        debug!("No durable record for run {} yet; caching environment reading", run_id);
        self.entries.lock().await.insert(run_id.to_string(), reading);
        Ok(EnvOutcome::Cached)
    }

    /// Consume the pending reading for a run, if any. Called whenever a new
    /// durable record for the run is about to be written.
    pub async fn take(&self, run_id: &str) -> Option<EnvReading> {
        self.entries.lock().await.remove(run_id)
    }

    /// Follow a run-collision rename: a pending entry under the claimed
    /// identifier moves to the minted one.
    pub async fn rename(&self, old_run_id: &str, new_run_id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(reading) = entries.remove(old_run_id) {
            entries.insert(new_run_id.to_string(), reading);
        }
    }

    /// Number of pending entries (debug endpoint).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> EnvReading {
        EnvReading {
            temp_c: 21.5,
            humidity: 40.0,
            ts_utc: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn reading_before_record_is_cached_then_consumed() {
        let cache = PendingEnvCache::new();
        let pool = memory_pool().await;

        let outcome = cache.apply(&pool, "R2", reading()).await.unwrap();
        assert_eq!(outcome, EnvOutcome::Cached);
        assert_eq!(cache.len().await, 1);

        let taken = cache.take("R2").await.unwrap();
        assert_eq!(taken, reading());
        assert!(cache.take("R2").await.is_none());
    }

    #[tokio::test]
    async fn reading_with_existing_record_is_applied() {
        let cache = PendingEnvCache::new();
        let pool = memory_pool().await;
        db::sessions::upsert_section(&pool, "R2", 0, &[], "section 0", None, "loc", None)
            .await
            .unwrap();

        let outcome = cache.apply(&pool, "R2", reading()).await.unwrap();
        assert_eq!(outcome, EnvOutcome::Applied);
        assert_eq!(cache.len().await, 0);

        let record = db::sessions::find_by_run_id(&pool, "R2").await.unwrap().unwrap();
        assert_eq!(record.env_temp_c, Some(21.5));
        assert_eq!(record.env_humidity, Some(40.0));
        assert_eq!(record.env_timestamp_utc.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn later_reading_overwrites_cached_one() {
        let cache = PendingEnvCache::new();
        let pool = memory_pool().await;

        cache.apply(&pool, "R2", reading()).await.unwrap();
        let newer = EnvReading {
            temp_c: 25.0,
            ..reading()
        };
        cache.apply(&pool, "R2", newer.clone()).await.unwrap();

        assert_eq!(cache.take("R2").await.unwrap(), newer);
    }

    #[tokio::test]
    async fn rename_moves_pending_entry() {
        let cache = PendingEnvCache::new();
        let pool = memory_pool().await;

        cache.apply(&pool, "R1", reading()).await.unwrap();
        cache.rename("R1", "R1__20250101000000").await;

        assert!(cache.take("R1").await.is_none());
        assert_eq!(cache.take("R1__20250101000000").await.unwrap(), reading());
    }
}
