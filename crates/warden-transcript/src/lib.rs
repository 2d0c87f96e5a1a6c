//! Conversation transcript parsing.
//!
//! The assistant appends one JSON object per line to its transcript file.
//! This crate reads that stream into a typed [`TranscriptEntry`] list with
//! deterministic, per-tool field extraction; no interpretation of free-form
//! text happens here.
//!
//! Parsing is tolerant by contract: malformed lines are skipped, a missing
//! file yields an empty list, and partial trailing lines (the assistant may
//! be mid-write) are dropped silently.

use std::path::Path;

use serde_json::Value;

/// Tool-result bodies are cut to this budget when an error marker is found.
pub const RESULT_ERROR_BUDGET: usize = 3072;
/// Tool-result bodies without error markers are cut to this budget.
pub const RESULT_NORMAL_BUDGET: usize = 1536;
/// Edit summaries keep this many leading lines of old/new strings.
pub const EDIT_PREVIEW_LINES: usize = 5;
/// Edit previews are additionally capped to this many characters.
pub const EDIT_PREVIEW_CHARS: usize = 200;

/// Substrings that mark a tool result as an error for truncation purposes.
///
/// Shared with the completion-state extractor; both sides must agree on
/// what "looks like an error" so the ledger and the preserved excerpts line
/// up.
pub const ERROR_MARKERS: &[&str] = &[
    "Error:",
    "error:",
    "FAILED",
    "failed",
    "not found",
    "Permission denied",
    "No such file",
    "Traceback",
];

/// One parsed transcript event.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    /// A user message (raw; system-injected messages are kept here too).
    UserMessage { timestamp: String, text: String },
    /// An assistant text block.
    AssistantText { timestamp: String, text: String },
    /// An assistant tool invocation with typed per-tool fields.
    ToolUse {
        timestamp: String,
        tool_use_id: String,
        tool_name: String,
        summary: String,
        file_path: Option<String>,
        line_count: Option<usize>,
        command: Option<String>,
        description: Option<String>,
    },
    /// The runtime's report of a prior tool call's outcome.
    ///
    /// A result whose `tool_use_id` matches no `ToolUse` is orphaned but
    /// kept; dropping it would hide real failures.
    ToolResult {
        timestamp: String,
        tool_use_id: String,
        is_error: bool,
        content: String,
    },
}

impl TranscriptEntry {
    /// Timestamp string as recorded in the transcript (may be empty).
    pub fn timestamp(&self) -> &str {
        match self {
            TranscriptEntry::UserMessage { timestamp, .. }
            | TranscriptEntry::AssistantText { timestamp, .. }
            | TranscriptEntry::ToolUse { timestamp, .. }
            | TranscriptEntry::ToolResult { timestamp, .. } => timestamp,
        }
    }
}

/// True when any shared error marker appears in `text`.
pub fn contains_error_marker(text: &str) -> bool {
    ERROR_MARKERS.iter().any(|m| text.contains(m))
}

/// True for user messages injected by the runtime rather than typed by the
/// user (wrapped in `<...>` tags). They stay in the raw stream but are
/// filtered from user-visible views.
pub fn is_system_injected(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('<')
}

/// True for slash commands (`/clear`, `/help`, ...), which carry no task
/// content.
pub fn is_slash_command(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('/') && !trimmed.contains('\n') && trimmed.len() < 200
}

/// Parse a transcript JSONL file into entries.
///
/// Missing file → empty list. Malformed lines are skipped one by one.
pub fn parse_transcript(path: &Path) -> Vec<TranscriptEntry> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    parse_transcript_str(&content)
}

/// Parse transcript content already in memory. Exposed for tests and for
/// callers that tail the file themselves.
pub fn parse_transcript_str(content: &str) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        match value.get("type").and_then(Value::as_str) {
            Some("user") => parse_user(&value, &mut entries),
            Some("assistant") => parse_assistant(&value, &mut entries),
            // progress / file-history-snapshot / system are not interpreted.
            _ => {}
        }
    }
    entries
}

fn timestamp_of(value: &Value) -> String {
    value
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_user(value: &Value, out: &mut Vec<TranscriptEntry>) {
    let timestamp = timestamp_of(value);
    let content = value.pointer("/message/content");

    match content {
        Some(Value::String(text)) => out.push(TranscriptEntry::UserMessage {
            timestamp,
            text: text.clone(),
        }),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                        out.push(TranscriptEntry::UserMessage {
                            timestamp: timestamp.clone(),
                            text: text.to_string(),
                        });
                    }
                    Some("tool_result") => {
                        let tool_use_id = block
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let is_error =
                            block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                        let body = result_body(block);
                        out.push(TranscriptEntry::ToolResult {
                            timestamp: timestamp.clone(),
                            tool_use_id,
                            is_error,
                            content: truncate_result(&body),
                        });
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn parse_assistant(value: &Value, out: &mut Vec<TranscriptEntry>) {
    let timestamp = timestamp_of(value);
    let content = value.pointer("/message/content");

    match content {
        Some(Value::String(text)) => out.push(TranscriptEntry::AssistantText {
            timestamp,
            text: text.clone(),
        }),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                        out.push(TranscriptEntry::AssistantText {
                            timestamp: timestamp.clone(),
                            text: text.to_string(),
                        });
                    }
                    Some("tool_use") => {
                        let tool_name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_string();
                        let tool_use_id = block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let empty = Value::Object(Default::default());
                        let input = block.get("input").unwrap_or(&empty);
                        out.push(tool_use_entry(timestamp.clone(), tool_use_id, tool_name, input));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Extract the textual body of a `tool_result` block. The body is either a
/// plain string or a list of `{type: "text", text}` parts.
fn result_body(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => {
            let mut body = String::new();
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !body.is_empty() {
                            body.push('\n');
                        }
                        body.push_str(text);
                    }
                }
            }
            body
        }
        _ => String::new(),
    }
}

/// Cut a result body to its budget. Error-looking results keep more context
/// than routine ones.
pub fn truncate_result(body: &str) -> String {
    let budget = if contains_error_marker(body) {
        RESULT_ERROR_BUDGET
    } else {
        RESULT_NORMAL_BUDGET
    };
    truncate_chars(body, budget)
}

/// Char-boundary-safe truncation with an ellipsis suffix when cut.
pub fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let cut: String = text.chars().take(budget).collect();
    format!("{cut}…")
}

fn tool_use_entry(
    timestamp: String,
    tool_use_id: String,
    tool_name: String,
    input: &Value,
) -> TranscriptEntry {
    let str_field = |key: &str| input.get(key).and_then(Value::as_str).map(str::to_string);

    let mut file_path = None;
    let mut line_count = None;
    let mut command = None;
    let mut description = None;

    let summary = match tool_name.as_str() {
        "Write" => {
            file_path = str_field("file_path");
            let content = input.get("content").and_then(Value::as_str).unwrap_or("");
            let lines = content.split('\n').count();
            line_count = Some(lines);
            format!("Write {} ({} lines)", file_path.as_deref().unwrap_or(""), lines)
        }
        "Edit" => {
            file_path = str_field("file_path");
            let old = input.get("old_string").and_then(Value::as_str).unwrap_or("");
            let new = input.get("new_string").and_then(Value::as_str).unwrap_or("");
            format!(
                "Edit {}: '{}' → '{}'",
                file_path.as_deref().unwrap_or(""),
                edit_preview(old),
                edit_preview(new),
            )
        }
        "Bash" => {
            command = str_field("command");
            description = str_field("description");
            let cmd = truncate_chars(command.as_deref().unwrap_or(""), 150);
            match description.as_deref() {
                Some(desc) if !desc.is_empty() => format!("Bash: {cmd} ({desc})"),
                _ => format!("Bash: {cmd}"),
            }
        }
        "Read" => {
            file_path = str_field("file_path");
            format!("Read {}", file_path.as_deref().unwrap_or(""))
        }
        "Task" => {
            let desc = input.get("description").and_then(Value::as_str).unwrap_or("");
            let agent = input
                .get("subagent_type")
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("Task ({agent}): {desc}")
        }
        _ => {
            // Grep, Glob, WebSearch, WebFetch and unknown tools: best-effort.
            let rendered = serde_json::to_string(input).unwrap_or_default();
            format!("{tool_name}: {}", truncate_chars(&rendered, 150))
        }
    };

    TranscriptEntry::ToolUse {
        timestamp,
        tool_use_id,
        tool_name,
        summary,
        file_path,
        line_count,
        command,
        description,
    }
}

/// First [`EDIT_PREVIEW_LINES`] lines, capped to [`EDIT_PREVIEW_CHARS`].
fn edit_preview(text: &str) -> String {
    let head: Vec<&str> = text.lines().take(EDIT_PREVIEW_LINES).collect();
    truncate_chars(&head.join("\\n"), EDIT_PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(value: serde_json::Value) -> String {
        serde_json::to_string(&value).expect("json")
    }

    #[test]
    fn parses_plain_user_string_content() {
        let content = line(serde_json::json!({
            "type": "user",
            "timestamp": "2026-08-01T10:00:00Z",
            "message": {"content": "fix the login bug"}
        }));
        let entries = parse_transcript_str(&content);
        assert_eq!(
            entries,
            vec![TranscriptEntry::UserMessage {
                timestamp: "2026-08-01T10:00:00Z".into(),
                text: "fix the login bug".into(),
            }]
        );
    }

    #[test]
    fn parses_assistant_tool_use_blocks() {
        let content = line(serde_json::json!({
            "type": "assistant",
            "timestamp": "t1",
            "message": {"content": [
                {"type": "text", "text": "writing the file now"},
                {"type": "tool_use", "id": "tu_1", "name": "Write",
                 "input": {"file_path": "src/auth.rs", "content": "a\nb\nc"}}
            ]}
        }));
        let entries = parse_transcript_str(&content);
        assert_eq!(entries.len(), 2);
        match &entries[1] {
            TranscriptEntry::ToolUse {
                tool_name,
                file_path,
                line_count,
                summary,
                ..
            } => {
                assert_eq!(tool_name, "Write");
                assert_eq!(file_path.as_deref(), Some("src/auth.rs"));
                assert_eq!(*line_count, Some(3));
                assert_eq!(summary, "Write src/auth.rs (3 lines)");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn bash_summary_keeps_command_and_description() {
        let content = line(serde_json::json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "tool_use", "id": "tu_2", "name": "Bash",
                 "input": {"command": "cargo test", "description": "run tests"}}
            ]}
        }));
        let entries = parse_transcript_str(&content);
        match &entries[0] {
            TranscriptEntry::ToolUse { summary, command, .. } => {
                assert_eq!(summary, "Bash: cargo test (run tests)");
                assert_eq!(command.as_deref(), Some("cargo test"));
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_error_keeps_larger_budget() {
        let long_error = format!("Error: {}", "x".repeat(4000));
        let long_normal = "y".repeat(4000);

        let truncated_error = truncate_result(&long_error);
        let truncated_normal = truncate_result(&long_normal);

        assert_eq!(truncated_error.chars().count(), RESULT_ERROR_BUDGET + 1);
        assert_eq!(truncated_normal.chars().count(), RESULT_NORMAL_BUDGET + 1);
        assert!(truncated_error.ends_with('…'));
    }

    #[test]
    fn orphan_tool_results_are_kept() {
        let content = line(serde_json::json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "tu_missing",
                 "is_error": true, "content": "No such file"}
            ]}
        }));
        let entries = parse_transcript_str(&content);
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            TranscriptEntry::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "tu_missing");
                assert!(is_error);
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn result_body_joins_text_parts() {
        let content = line(serde_json::json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "tu_3",
                 "content": [{"type": "text", "text": "part one"},
                              {"type": "text", "text": "part two"}]}
            ]}
        }));
        let entries = parse_transcript_str(&content);
        match &entries[0] {
            TranscriptEntry::ToolResult { content, .. } => {
                assert_eq!(content, "part one\npart two");
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_and_unknown_types_are_skipped() {
        let content = format!(
            "not json at all\n{}\n{}\n",
            line(serde_json::json!({"type": "progress", "data": 1})),
            line(serde_json::json!({
                "type": "user",
                "message": {"content": "real message"}
            })),
        );
        let entries = parse_transcript_str(&content);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_file_yields_empty_list() {
        let td = tempfile::tempdir().expect("tempdir");
        let entries = parse_transcript(&td.path().join("missing.jsonl"));
        assert!(entries.is_empty());
    }

    #[test]
    fn system_injected_and_slash_detection() {
        assert!(is_system_injected("<system-reminder>hi</system-reminder>"));
        assert!(!is_system_injected("please fix <this> thing"));
        assert!(is_slash_command("/clear"));
        assert!(is_slash_command("  /help  "));
        assert!(!is_slash_command("run /usr/bin/thing\nand more"));
    }

    #[test]
    fn error_marker_set_matches_both_cases() {
        assert!(contains_error_marker("build FAILED with 3 errors"));
        assert!(contains_error_marker("Traceback (most recent call last)"));
        assert!(contains_error_marker("rm: cannot remove: No such file"));
        assert!(!contains_error_marker("all good"));
    }

    #[test]
    fn edit_preview_is_bounded() {
        let old = (0..20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let preview = edit_preview(&old);
        assert!(preview.contains("line 4"));
        assert!(!preview.contains("line 5"));
    }
}
