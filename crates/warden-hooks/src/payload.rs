//! The hook stdin envelope and project-root resolution.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot directory, relative to the project root.
///
/// D-7: duplicated in the self-contained predictive guard; the
/// setup-maintenance DC-4 check compares the copies.
pub const SNAPSHOT_DIR: &str = ".claude/context-snapshots";

/// UTF-8 JSON envelope every hook receives. Hooks use only the fields
/// relevant to their event; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HookPayload {
    pub session_id: String,
    pub transcript_path: String,
    pub cwd: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_response: Value,
    pub source: String,
    pub stop_hook_active: bool,
}

/// Read and parse the stdin envelope. Empty or unparseable stdin → `None`
/// (callers no-op with exit 0).
pub fn read_stdin_payload() -> Option<HookPayload> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).ok()?;
    parse_payload(&input)
}

/// Parse an envelope from a string. Exposed for tests.
pub fn parse_payload(input: &str) -> Option<HookPayload> {
    if input.trim().is_empty() {
        return None;
    }
    serde_json::from_str(input).ok()
}

/// Resolve the project root: `CLAUDE_PROJECT_DIR` overrides the payload's
/// `cwd`, which overrides the process cwd.
pub fn project_dir(payload: &HookPayload) -> PathBuf {
    if let Ok(dir) = std::env::var("CLAUDE_PROJECT_DIR") {
        if !dir.is_empty() && Path::new(&dir).is_dir() {
            return PathBuf::from(dir);
        }
    }
    if !payload.cwd.is_empty() {
        return PathBuf::from(&payload.cwd);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Snapshot directory under a project root.
pub fn snapshot_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(SNAPSHOT_DIR)
}
