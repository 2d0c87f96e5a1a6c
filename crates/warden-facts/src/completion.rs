//! Deterministic completion state; the hallucination floor.
//!
//! Success and failure counts come from matched tool results, and file
//! existence is checked on disk at snapshot time. These are observable
//! facts, not model claims.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use warden_transcript::TranscriptEntry;

/// Tools covered by the per-tool call ledger.
pub const LEDGER_TOOLS: &[&str] = &["Edit", "Write", "Bash"];
/// Number of trailing tool activities rendered in the snapshot.
pub const RECENT_ACTIVITY_COUNT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStats {
    pub calls: usize,
    pub success: usize,
    pub fail: usize,
}

/// On-disk verification of one modified file at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: String,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_epoch: Option<u64>,
}

/// A recent tool activity with its observed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub summary: String,
    pub is_error: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionState {
    pub per_tool: BTreeMap<String, ToolStats>,
    pub file_verification: Vec<FileCheck>,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub recent_activities: Vec<Activity>,
}

/// Match every tool use to its result by id and assemble the ledger.
///
/// `project_dir` anchors relative paths for the on-disk file checks.
pub fn extract_completion_state(
    entries: &[TranscriptEntry],
    project_dir: &Path,
) -> CompletionState {
    let mut state = CompletionState::default();
    for tool in LEDGER_TOOLS {
        state.per_tool.insert((*tool).to_string(), ToolStats::default());
    }

    let mut results: BTreeMap<&str, bool> = BTreeMap::new();
    for entry in entries {
        if let TranscriptEntry::ToolResult {
            tool_use_id,
            is_error,
            ..
        } = entry
        {
            results.insert(tool_use_id.as_str(), *is_error);
        }
    }

    let mut modified_paths: Vec<String> = Vec::new();
    let mut activities: Vec<Activity> = Vec::new();

    for entry in entries {
        let TranscriptEntry::ToolUse {
            timestamp,
            tool_use_id,
            tool_name,
            summary,
            file_path,
            ..
        } = entry
        else {
            if state.first_timestamp.is_empty() && !entry.timestamp().is_empty() {
                state.first_timestamp = entry.timestamp().to_string();
            }
            if !entry.timestamp().is_empty() {
                state.last_timestamp = entry.timestamp().to_string();
            }
            continue;
        };

        if state.first_timestamp.is_empty() && !timestamp.is_empty() {
            state.first_timestamp = timestamp.clone();
        }
        if !timestamp.is_empty() {
            state.last_timestamp = timestamp.clone();
        }

        let outcome = results.get(tool_use_id.as_str()).copied();
        if let Some(stats) = state.per_tool.get_mut(tool_name) {
            stats.calls += 1;
            match outcome {
                Some(false) => stats.success += 1,
                Some(true) => stats.fail += 1,
                // Unmatched tool use: counted as a call, outcome unknown.
                None => {}
            }
        }

        if matches!(tool_name.as_str(), "Edit" | "Write") {
            if let Some(path) = file_path {
                if !modified_paths.contains(path) {
                    modified_paths.push(path.clone());
                }
            }
        }

        activities.push(Activity {
            summary: summary.clone(),
            is_error: outcome == Some(true),
            timestamp: timestamp.clone(),
        });
    }

    if activities.len() > RECENT_ACTIVITY_COUNT {
        activities.drain(..activities.len() - RECENT_ACTIVITY_COUNT);
    }
    state.recent_activities = activities;

    state.file_verification = modified_paths
        .into_iter()
        .map(|path| {
            let full = if Path::new(&path).is_absolute() {
                Path::new(&path).to_path_buf()
            } else {
                project_dir.join(&path)
            };
            let metadata = std::fs::metadata(&full).ok();
            FileCheck {
                exists: metadata.is_some(),
                mtime_epoch: metadata
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
                path,
            }
        })
        .collect();

    state
}
