//! Diagnostic dump of in-memory ingest state

use axum::extract::State;
use chrono::Utc;
use std::fmt::Write;

use crate::AppState;

/// GET /debug
///
/// Plain-text dump of the in-memory ingest state. Diagnostic only; performs
/// no durable reads.
pub async fn debug_dump(State(state): State<AppState>) -> String {
    let tracker = state.run_tracker.stats().await;
    let bursts = state.burst_tracker.stats().await;
    let pending_env = state.env_cache.len().await;
    let uptime = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0);

    let mut out = String::new();
    let _ = writeln!(out, "wavecap-ci {} (up {}s)", env!("CARGO_PKG_VERSION"), uptime);
    let _ = writeln!(out, "pending writes: {}", state.write_queue.depth());
    let _ = writeln!(out, "pending environment entries: {}", pending_env);
    let _ = writeln!(
        out,
        "run aliases: {}, seen parts: {}",
        tracker.alias_count, tracker.seen_part_count
    );

    let _ = writeln!(out, "active runs: {}", tracker.runs.len());
    for run in &tracker.runs {
        let _ = writeln!(
            out,
            "  {} sections={} images={} idle={}s",
            run.run_id, run.section_count, run.image_count, run.idle_secs
        );
    }

    let _ = writeln!(
        out,
        "burst sessions: {} (finalized: {})",
        bursts.active_sessions.len(),
        bursts.finalized_count
    );
    for (session_id, count) in &bursts.active_sessions {
        let _ = writeln!(out, "  {} {}/16", session_id, count);
    }

    out
}
