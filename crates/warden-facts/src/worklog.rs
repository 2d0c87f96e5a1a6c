//! Structured work-log entries accumulated per tool use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_transcript::truncate_chars;

/// One line of `work_log.jsonl`.
///
/// Append-only while a session is live; the full-save path keeps only the
/// trailing entries afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkLogEntry {
    pub timestamp: String,
    pub session_id: String,
    pub tool_name: String,
    pub summary: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopilot_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopilot_step: Option<i64>,
}

impl WorkLogEntry {
    /// Build an entry from a tool's name and input, using the per-tool
    /// summary shapes of the post-tool hook.
    pub fn from_tool(timestamp: String, session_id: String, tool_name: &str, tool_input: &Value) -> Self {
        let str_field = |key: &str| {
            tool_input
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let mut entry = WorkLogEntry {
            timestamp,
            session_id,
            tool_name: tool_name.to_string(),
            summary: String::new(),
            file_path: String::new(),
            command: None,
            autopilot_active: None,
            autopilot_step: None,
        };

        match tool_name {
            "Write" => {
                let path = str_field("file_path");
                let lines = str_field("content").split('\n').count();
                entry.summary = format!("Write {path} ({lines} lines)");
                entry.file_path = path;
            }
            "Edit" => {
                let path = str_field("file_path");
                let old = str_field("old_string");
                let new = str_field("new_string");
                let old_preview = truncate_chars(old.lines().next().unwrap_or(""), 60);
                let new_preview = truncate_chars(new.lines().next().unwrap_or(""), 60);
                entry.summary = format!("Edit {path}: '{old_preview}' → '{new_preview}'");
                entry.file_path = path;
            }
            "Bash" => {
                let cmd = str_field("command");
                let desc = str_field("description");
                entry.summary = if desc.is_empty() {
                    format!("Bash: {}", truncate_chars(&cmd, 150))
                } else {
                    format!("Bash: {} ({desc})", truncate_chars(&cmd, 150))
                };
                entry.command = Some(cmd);
            }
            "Task" => {
                let desc = str_field("description");
                let agent = str_field("subagent_type");
                entry.summary = format!("Task ({agent}): {desc}");
            }
            _ => {
                let rendered = serde_json::to_string(tool_input).unwrap_or_default();
                entry.summary = format!("{tool_name}: {}", truncate_chars(&rendered, 150));
            }
        }
        entry
    }
}

/// Parse `work_log.jsonl` content, skipping malformed lines.
pub fn parse_work_log(content: &str) -> Vec<WorkLogEntry> {
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_entry_counts_lines() {
        let entry = WorkLogEntry::from_tool(
            "now".into(),
            "sid".into(),
            "Write",
            &json!({"file_path": "src/a.rs", "content": "x\ny\nz"}),
        );
        assert_eq!(entry.summary, "Write src/a.rs (3 lines)");
        assert_eq!(entry.file_path, "src/a.rs");
    }

    #[test]
    fn edit_entry_previews_first_lines() {
        let entry = WorkLogEntry::from_tool(
            "now".into(),
            "sid".into(),
            "Edit",
            &json!({"file_path": "a.rs", "old_string": "old line\nmore", "new_string": "new line"}),
        );
        assert_eq!(entry.summary, "Edit a.rs: 'old line' → 'new line'");
    }

    #[test]
    fn bash_entry_keeps_command() {
        let entry = WorkLogEntry::from_tool(
            "now".into(),
            "sid".into(),
            "Bash",
            &json!({"command": "cargo test", "description": "run tests"}),
        );
        assert_eq!(entry.summary, "Bash: cargo test (run tests)");
        assert_eq!(entry.command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn roundtrip_through_jsonl() {
        let entry = WorkLogEntry::from_tool(
            "now".into(),
            "sid".into(),
            "Bash",
            &json!({"command": "ls"}),
        );
        let line = serde_json::to_string(&entry).expect("serialize");
        let parsed = parse_work_log(&format!("{line}\nnot json\n"));
        assert_eq!(parsed, vec![entry]);
    }
}
