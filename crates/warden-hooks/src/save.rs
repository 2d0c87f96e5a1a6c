//! The full-save path shared by pre-compact, session-end, threshold and
//! stop triggers.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;

use warden_facts::worklog::{parse_work_log, WorkLogEntry};
use warden_snapshot::{
    cleanup_session_archives, cleanup_snapshots, generate_snapshot, is_rich_snapshot,
    should_skip_save, SnapshotInput, Trigger,
};
use warden_transcript::{parse_transcript, TranscriptEntry};

use crate::payload::{snapshot_dir, HookPayload};

/// Work-log entries kept after a successful full save.
pub const WORK_LOG_KEEP: usize = 10;

/// Load the accumulated work log, oldest first.
pub fn load_work_log(snapshot_dir: &Path) -> Vec<WorkLogEntry> {
    warden_fs::read_opt(&snapshot_dir.join("work_log.jsonl"))
        .map(|content| parse_work_log(&content))
        .unwrap_or_default()
}

/// Run the full save. Returns the timestamped snapshot path, or `None`
/// when the dedup guard skipped the save.
pub fn run_save(root: &Path, payload: &HookPayload, trigger: Trigger) -> Result<Option<PathBuf>> {
    let snap_dir = snapshot_dir(root);
    std::fs::create_dir_all(&snap_dir)?;

    if should_skip_save(&snap_dir, trigger) {
        return Ok(None);
    }

    let entries = parse_transcript(Path::new(&payload.transcript_path));
    let work_log = load_work_log(&snap_dir);
    let sot = warden_sot::capture_sot(root);

    let content = generate_snapshot(&SnapshotInput {
        session_id: &payload.session_id,
        trigger,
        project_dir: root,
        entries: &entries,
        work_log: &work_log,
        sot: sot.as_ref(),
    });

    let timestamp = Local::now();
    let filename = format!(
        "{}_{}.md",
        timestamp.format("%Y%m%d_%H%M%S"),
        trigger.as_str()
    );
    let snapshot_path = snap_dir.join(&filename);
    warden_fs::atomic_write(&snapshot_path, content.as_bytes())?;

    // Empty-snapshot guard: a tool-less save must not overwrite a rich
    // latest.md. The timestamped file is still written above.
    let latest = snap_dir.join("latest.md");
    let new_tool_count = entries
        .iter()
        .filter(|e| matches!(e, TranscriptEntry::ToolUse { .. }))
        .count();
    let keep_existing = new_tool_count == 0
        && warden_fs::read_opt(&latest)
            .map(|existing| is_rich_snapshot(&existing))
            .unwrap_or(false);
    if !keep_existing {
        warden_fs::atomic_write(&latest, content.as_bytes())?;
    }

    cleanup_snapshots(&snap_dir);

    // Knowledge archive: session copy + index record. Non-blocking.
    let sessions_dir = snap_dir.join("sessions");
    let sid8: String = payload.session_id.chars().take(8).collect();
    let archive_name = format!("{}_{}.md", timestamp.format("%Y-%m-%dT%H%M%S"), sid8);
    let _ = warden_fs::atomic_write(&sessions_dir.join(archive_name), content.as_bytes());

    let estimate =
        warden_facts::estimate_tokens(Path::new(&payload.transcript_path), entries.len());
    let facts = warden_archive::extract_session_facts(
        &payload.session_id,
        root,
        &entries,
        Some(estimate.estimated_tokens),
    );
    let index_path = snap_dir.join(warden_archive::KNOWLEDGE_INDEX_FILE);
    let _ = warden_archive::replace_or_append(&index_path, &facts);

    cleanup_session_archives(&snap_dir);
    warden_archive::cleanup_knowledge_index(&index_path);

    // Shrink the work log to its trailing entries under its own lock.
    let _ = warden_fs::rewrite_locked(&snap_dir.join("work_log.jsonl"), |content| {
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(WORK_LOG_KEEP);
        let mut kept = lines[start..].join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept
    });

    Ok(Some(snapshot_path))
}
