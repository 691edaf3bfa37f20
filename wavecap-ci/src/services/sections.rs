//! Section merging for sectioned captures
//!
//! Sectioned uploads arrive as many small parts with no reliable terminal
//! marker, so every contribution is made durable immediately: the merger
//! appends to the in-memory accumulated list and upserts the section's
//! record with the complete current list after each contribution.

use chrono::Utc;
use tracing::debug;
use wavecap_common::events::IngestEvent;

use crate::db;
use crate::services::location;
use crate::AppState;

/// Merge newly extracted images into a section and make the result durable.
///
/// `new_paths` must already be in final order (archives are sorted at
/// extraction time). The durable upsert runs on the write queue with
/// location resolution and pending-environment consumption, so the caller's
/// response does not wait on them.
pub async fn merge_section(
    state: &AppState,
    run_id: &str,
    section_index: u32,
    label: &str,
    new_paths: Vec<String>,
) {
    let complete = state
        .run_tracker
        .append_section_paths(run_id, section_index, &new_paths)
        .await;
    debug!(
        "Section {}#{} now holds {} image(s)",
        run_id,
        section_index,
        complete.len()
    );

    state.event_bus.emit(IngestEvent::SectionMerged {
        run_id: run_id.to_string(),
        section_index,
        current_count: complete.len(),
        timestamp: Utc::now(),
    });

    let pool = state.db.clone();
    let env_cache = state.env_cache.clone();
    let provider = state.location.clone();
    let timeout = state.location_timeout;
    let config_name = state.run_tracker.config_name(run_id).await;
    let run_id = run_id.to_string();
    let label = label.to_string();

    state.write_queue.enqueue("upsert_section", async move {
        let resolved_location = location::resolve(provider.as_ref(), timeout).await;
        let env = env_cache.take(&run_id).await;
        db::sessions::upsert_section(
            &pool,
            &run_id,
            section_index,
            &complete,
            &label,
            config_name.as_deref(),
            &resolved_location,
            env.as_ref(),
        )
        .await?;
        Ok(())
    });
}
