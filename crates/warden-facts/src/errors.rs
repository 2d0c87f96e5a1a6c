//! Error-pattern classification and success-pattern extraction.
//!
//! Errors are matched against a fixed taxonomy in declaration order; the
//! first matching label wins. Each error then gets a resolution probe: the
//! next five entries are scanned for a successful same-file result whose
//! tool was Edit, Write or Bash.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use warden_transcript::TranscriptEntry;

/// How far ahead (in entries) the resolution probe looks.
pub const RESOLUTION_LOOKAHEAD: usize = 5;

/// Fixed taxonomy: (label, pattern), first match wins.
pub static ERROR_TAXONOMY: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        ("edit_mismatch", r"(?i)string to replace|old_string|no match found in file"),
        ("file_not_found", r"(?i)no such file|not found|enoent"),
        ("permission", r"(?i)permission denied|eacces|operation not permitted"),
        ("syntax", r"(?i)syntax ?error|unexpected token|invalid syntax"),
        ("timeout", r"(?i)timed? ?out"),
        (
            "dependency",
            r"(?i)modulenotfounderror|importerror|cannot find (?:crate|module|package)|unresolved import",
        ),
        ("type_error", r"(?i)type ?error|mismatched types"),
        ("value_error", r"(?i)value ?error|invalid value"),
        ("git_error", r"(?i)fatal: |\bgit\b.*\berror\b"),
        ("command_not_found", r"(?i)command not found|not recognized as an internal"),
        ("connection", r"(?i)connection (?:refused|reset|error)|network is unreachable"),
        ("memory", r"(?i)out of memory|memory ?error|killed \(oom\)"),
    ];
    table
        .iter()
        .map(|(label, pattern)| (*label, Regex::new(pattern).expect("taxonomy regex")))
        .collect()
});

/// Classify an error body into a taxonomy label.
pub fn classify_error(body: &str) -> &'static str {
    for (label, re) in ERROR_TAXONOMY.iter() {
        if re.is_match(body) {
            return label;
        }
    }
    "unknown"
}

/// A follow-up action that plausibly resolved an earlier error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// One classified error with its context and optional resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    #[serde(rename = "type")]
    pub error_type: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

fn tool_use_by_id<'a>(
    entries: &'a [TranscriptEntry],
    id: &str,
) -> Option<&'a TranscriptEntry> {
    entries.iter().find(|e| {
        matches!(e, TranscriptEntry::ToolUse { tool_use_id, .. } if tool_use_id == id)
    })
}

/// Walk error results and classify each against the taxonomy, attaching a
/// resolution when the lookahead finds one.
pub fn extract_error_patterns(entries: &[TranscriptEntry]) -> Vec<ErrorPattern> {
    let mut patterns = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        let TranscriptEntry::ToolResult {
            tool_use_id,
            is_error: true,
            content,
            ..
        } = entry
        else {
            continue;
        };

        let (tool, file) = match tool_use_by_id(entries, tool_use_id) {
            Some(TranscriptEntry::ToolUse {
                tool_name,
                file_path,
                ..
            }) => (tool_name.clone(), file_path.clone()),
            _ => ("unknown".to_string(), None),
        };

        let resolution = find_resolution(entries, idx, file.as_deref());

        patterns.push(ErrorPattern {
            error_type: classify_error(content).to_string(),
            tool,
            file,
            resolution,
        });
    }
    patterns
}

fn find_resolution(
    entries: &[TranscriptEntry],
    error_idx: usize,
    error_file: Option<&str>,
) -> Option<Resolution> {
    let window = entries
        .iter()
        .skip(error_idx + 1)
        .take(RESOLUTION_LOOKAHEAD);

    for entry in window {
        let TranscriptEntry::ToolResult {
            tool_use_id,
            is_error: false,
            ..
        } = entry
        else {
            continue;
        };
        let Some(TranscriptEntry::ToolUse {
            tool_name,
            file_path,
            ..
        }) = tool_use_by_id(entries, tool_use_id)
        else {
            continue;
        };
        if !matches!(tool_name.as_str(), "Edit" | "Write" | "Bash") {
            continue;
        }
        // Same-file requirement only applies when the error had a file.
        if let Some(err_file) = error_file {
            if file_path.as_deref() != Some(err_file) && tool_name != "Bash" {
                continue;
            }
        }
        return Some(Resolution {
            tool: tool_name.clone(),
            file: file_path.clone(),
        });
    }
    None
}

/// A successful edit-then-run sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub files: Vec<String>,
    pub command: String,
}

/// Capture successful `Edit|Write … → Bash` sequences. The open window is
/// closed by the arrival of any tool other than Read, Edit, Write or Bash.
pub fn extract_success_patterns(entries: &[TranscriptEntry]) -> Vec<SuccessPattern> {
    let mut patterns = Vec::new();
    let mut pending_files: Vec<String> = Vec::new();

    for entry in entries {
        match entry {
            TranscriptEntry::ToolResult {
                tool_use_id,
                is_error: false,
                ..
            } => {
                let Some(TranscriptEntry::ToolUse {
                    tool_name,
                    file_path,
                    command,
                    ..
                }) = tool_use_by_id(entries, tool_use_id)
                else {
                    continue;
                };
                match tool_name.as_str() {
                    "Edit" | "Write" => {
                        if let Some(path) = file_path {
                            if !pending_files.contains(path) {
                                pending_files.push(path.clone());
                            }
                        }
                    }
                    "Bash" => {
                        if !pending_files.is_empty() {
                            patterns.push(SuccessPattern {
                                files: std::mem::take(&mut pending_files),
                                command: command.clone().unwrap_or_default(),
                            });
                        }
                    }
                    "Read" => {}
                    _ => pending_files.clear(),
                }
            }
            TranscriptEntry::ToolUse { tool_name, .. }
                if !matches!(tool_name.as_str(), "Read" | "Edit" | "Write" | "Bash") =>
            {
                pending_files.clear();
            }
            _ => {}
        }
    }
    patterns
}
