//! Per-session fact record assembly and schema defaulting.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_facts::{
    classify_phases, extract_completion_state, extract_decisions, extract_error_patterns,
    extract_file_operations, extract_path_tags, extract_read_operations, extract_success_patterns,
    primary_language, ErrorPattern, SuccessPattern,
};
use warden_transcript::{is_slash_command, is_system_injected, truncate_chars, TranscriptEntry};

/// Keys that must exist on every index record. A record missing one of
/// these is filled with an empty container before write, never skipped.
pub const REQUIRED_KEYS: &[&str] = &[
    "session_id",
    "timestamp",
    "user_task",
    "modified_files",
    "read_files",
    "tools_used",
    "final_status",
    "tags",
    "phase",
    "completion_summary",
    "diagnosis_patterns",
];

/// One line of `knowledge-index.jsonl`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFacts {
    pub session_id: String,
    pub timestamp: String,
    pub user_task: String,
    pub modified_files: Vec<String>,
    pub read_files: Vec<String>,
    pub tools_used: Vec<String>,
    pub final_status: String,
    pub tags: Vec<String>,
    pub phase: String,
    pub completion_summary: String,
    pub diagnosis_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified_files_detail: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub design_decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_patterns: Vec<ErrorPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_patterns: Vec<SuccessPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_sequence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase_flow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacs_min: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ulw_active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub team_summaries: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration_entries: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_estimate: Option<u64>,
}

/// Fill missing required keys with empty containers and replace an empty
/// `session_id` with a generated unique identifier.
pub fn ensure_schema(record: &mut Value) {
    let Some(map) = record.as_object_mut() else {
        return;
    };
    for key in REQUIRED_KEYS {
        if !map.contains_key(*key) {
            let default = match *key {
                "modified_files" | "read_files" | "tools_used" | "tags" | "diagnosis_patterns" => {
                    Value::Array(Vec::new())
                }
                _ => Value::String(String::new()),
            };
            map.insert((*key).to_string(), default);
        }
    }
    let empty_sid = map
        .get("session_id")
        .and_then(Value::as_str)
        .map(|s| s.trim().is_empty())
        .unwrap_or(true);
    if empty_sid {
        let generated = format!(
            "gen-{}-{}",
            Utc::now().format("%Y%m%d%H%M%S%f"),
            std::process::id()
        );
        map.insert("session_id".to_string(), Value::String(generated));
    }
}

/// Build the per-session record from the parsed transcript.
pub fn extract_session_facts(
    session_id: &str,
    project_dir: &Path,
    entries: &[TranscriptEntry],
    token_estimate: Option<u64>,
) -> SessionFacts {
    let ops = extract_file_operations(entries);
    let reads = extract_read_operations(entries);
    let completion = extract_completion_state(entries, project_dir);
    let (phase, phase_flow) = classify_phases(entries);
    let errors = extract_error_patterns(entries);
    let successes = extract_success_patterns(entries);
    let decisions = extract_decisions(entries);

    let user_task = entries
        .iter()
        .find_map(|e| match e {
            TranscriptEntry::UserMessage { text, .. }
                if !is_system_injected(text) && !is_slash_command(text) && !text.trim().is_empty() =>
            {
                Some(truncate_chars(text.trim(), 300))
            }
            _ => None,
        })
        .unwrap_or_default();

    let modified_files: Vec<String> = ops.iter().map(|o| o.path.clone()).collect();
    let read_files: Vec<String> = reads.iter().map(|r| r.path.clone()).collect();

    let mut tools_used: Vec<String> = Vec::new();
    let mut tool_sequence: Vec<String> = Vec::new();
    let mut team_summaries: Vec<String> = Vec::new();
    for entry in entries {
        if let TranscriptEntry::ToolUse {
            tool_name, summary, ..
        } = entry
        {
            if !tools_used.contains(tool_name) {
                tools_used.push(tool_name.clone());
            }
            tool_sequence.push(tool_name.clone());
            if tool_name == "Task" {
                team_summaries.push(truncate_chars(summary, 150));
            }
        }
    }

    let total_fail: usize = completion.per_tool.values().map(|s| s.fail).sum();
    let final_status = if total_fail == 0 { "clean" } else { "had_errors" }.to_string();
    let completion_summary = completion
        .per_tool
        .iter()
        .filter(|(_, s)| s.calls > 0)
        .map(|(tool, s)| format!("{tool}:{}/{}", s.success, s.calls))
        .collect::<Vec<_>>()
        .join(" ");

    let ulw_active = entries.iter().any(|e| match e {
        TranscriptEntry::UserMessage { text, .. } => {
            !is_system_injected(text)
                && (text.to_lowercase().contains("ulw") || text.to_lowercase().contains("ultrawork"))
        }
        _ => false,
    });

    let git_summary = warden_git::capture_git_state(project_dir).summary();

    SessionFacts {
        session_id: session_id.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        user_task,
        tags: extract_path_tags(&modified_files),
        phase: phase.as_str().to_string(),
        phase_flow,
        completion_summary,
        final_status,
        diagnosis_patterns: Vec::new(),
        modified_files_detail: ops.iter().map(|o| truncate_chars(&o.last_summary, 200)).collect(),
        design_decisions: decisions.iter().map(|d| truncate_chars(&d.text, 200)).collect(),
        error_patterns: errors,
        success_patterns: successes,
        primary_language: primary_language(&modified_files),
        modified_files,
        read_files,
        tools_used,
        tool_sequence,
        pacs_min: None,
        ulw_active,
        team_summaries,
        git_summary,
        session_duration_entries: Some(entries.len()),
        token_estimate,
    }
}
