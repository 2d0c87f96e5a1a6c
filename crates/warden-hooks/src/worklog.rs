//! Post-tool hook: append a work-log entry, estimate tokens, save when the
//! threshold is crossed.

use std::path::Path;

use chrono::Local;

use warden_facts::worklog::WorkLogEntry;
use warden_facts::{estimate_tokens, tokens::THRESHOLD_RATIO};
use warden_snapshot::Trigger;
use warden_sot::{find_sot, read_autopilot_state};
use warden_transcript::parse_transcript;

use crate::payload::{project_dir, snapshot_dir, HookPayload};
use crate::save::run_save;
use crate::EXIT_OK;

/// Post-tool entry point. Never blocks; exit 0 always.
pub fn run_post_tool(payload: &HookPayload) -> i32 {
    let root = project_dir(payload);
    post_tool_at(&root, payload);
    EXIT_OK
}

/// Hook body with an explicit project root.
pub fn post_tool_at(root: &Path, payload: &HookPayload) {
    let snap_dir = snapshot_dir(root);
    let _ = std::fs::create_dir_all(&snap_dir);

    let mut entry = WorkLogEntry::from_tool(
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        payload.session_id.clone(),
        &payload.tool_name,
        &payload.tool_input,
    );

    // Autopilot fields only when a SOT file exists (fast path: no YAML
    // parse on tool calls in plain sessions).
    if find_sot(root).is_some() {
        if let Some(state) = read_autopilot_state(root) {
            entry.autopilot_active = Some(true);
            entry.autopilot_step = Some(state.current_step);
        }
    }

    if let Ok(line) = serde_json::to_string(&entry) {
        let _ = warden_fs::append_with_lock(
            &snap_dir.join("work_log.jsonl"),
            format!("{line}\n").as_bytes(),
        );
    }

    // Threshold check: at 75% of effective capacity, save synchronously
    // in-process; no subprocess, no stdin re-plumbing.
    let transcript = Path::new(&payload.transcript_path);
    let entry_count = parse_transcript(transcript).len();
    let estimate = estimate_tokens(transcript, entry_count);
    if estimate.over_threshold {
        let _ = run_save(root, payload, Trigger::Threshold);
    }
}

/// Exposed for the setup DC checks: the threshold ratio in use here.
pub fn threshold_ratio() -> f64 {
    THRESHOLD_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::load_work_log;
    use serde_json::json;
    use tempfile::tempdir;

    fn payload(dir: &Path, tool: &str, input: serde_json::Value) -> HookPayload {
        HookPayload {
            session_id: "sess-1".to_string(),
            transcript_path: dir.join("t.jsonl").to_string_lossy().into_owned(),
            cwd: dir.to_string_lossy().into_owned(),
            tool_name: tool.to_string(),
            tool_input: input,
            ..HookPayload::default()
        }
    }

    #[test]
    fn appends_structured_entry() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("t.jsonl"), "").expect("transcript");

        let p = payload(
            td.path(),
            "Edit",
            json!({"file_path": "src/a.rs", "old_string": "x", "new_string": "y"}),
        );
        post_tool_at(td.path(), &p);
        post_tool_at(
            td.path(),
            &payload(td.path(), "Bash", json!({"command": "cargo check"})),
        );

        let entries = load_work_log(&snapshot_dir(td.path()));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_path, "src/a.rs");
        assert!(entries[1].summary.starts_with("Bash: cargo check"));
        assert!(entries[0].autopilot_active.is_none());
    }

    #[test]
    fn autopilot_fields_set_when_sot_active() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("t.jsonl"), "").expect("transcript");
        std::fs::create_dir_all(td.path().join(".claude")).expect("mkdir");
        std::fs::write(
            td.path().join(".claude/state.yaml"),
            "mode: autopilot\nworkflow_name: wf\ncurrent_step: 4\n",
        )
        .expect("sot");

        post_tool_at(
            td.path(),
            &payload(td.path(), "Bash", json!({"command": "ls"})),
        );
        let entries = load_work_log(&snapshot_dir(td.path()));
        assert_eq!(entries[0].autopilot_active, Some(true));
        assert_eq!(entries[0].autopilot_step, Some(4));
    }

    #[test]
    fn threshold_crossing_triggers_in_process_save() {
        let td = tempdir().expect("tempdir");
        // A transcript big enough to push the byte signal past 75% of
        // capacity (150k tokens ≈ 600 KB).
        let line = serde_json::to_string(&json!({
            "type": "user", "message": {"content": "x".repeat(2000)}
        }))
        .unwrap();
        let body = (0..400).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        std::fs::write(td.path().join("t.jsonl"), body).expect("transcript");

        post_tool_at(
            td.path(),
            &payload(td.path(), "Bash", json!({"command": "ls"})),
        );

        let snap_dir = snapshot_dir(td.path());
        let has_threshold_snapshot = std::fs::read_dir(&snap_dir)
            .expect("read_dir")
            .flatten()
            .any(|e| e.file_name().to_string_lossy().ends_with("_threshold.md"));
        assert!(has_threshold_snapshot);
        assert!(snap_dir.join("latest.md").exists());
    }
}
