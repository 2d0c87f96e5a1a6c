//! Pre-tool guards: destructive commands, TDD test files, predictive risk.
//!
//! The guard modules are latency-sensitive (each PreToolUse spawns a fresh
//! process), so the predictive guard keeps its own copies of the risk
//! constants (D-7) instead of pulling in the archive crate's machinery.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::payload::{project_dir, HookPayload, SNAPSHOT_DIR};
use crate::{EXIT_BLOCK, EXIT_OK};

// ---------------------------------------------------------------------------
// Destructive-command guard
//
// Regex notes:
//   - \s before -- flags (not \b) because \b fails between space and dash
//   - (?:[^-\w]|$) after --force excludes --force-with-lease/--force-if-includes
//     (regex crate has no look-around, so this is a non-lookahead equivalent)
//   - \s-[a-zA-Z]*f catches combined short flags (-f, -uf, -fu)
// ---------------------------------------------------------------------------

/// (pattern, stderr message for assistant self-correction)
static GIT_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        (
            r"\bgit\s+push\b.*\s--force(?:[^-\w]|$)",
            "git push --force is blocked. Use --force-with-lease for safer force pushing.",
        ),
        (
            r"\bgit\s+push\b.*\s-[a-zA-Z]*f",
            "git push -f is blocked. Use --force-with-lease for safer force pushing.",
        ),
        (
            r"\bgit\s+reset\b.*\s--hard(?:[^-\w]|$)",
            "git reset --hard is blocked. Discards uncommitted changes irreversibly. Use git stash or git reset --soft instead.",
        ),
        (
            r"\bgit\s+checkout\b\s+(?:--\s+)?\.(?:\s|$)",
            "git checkout . is blocked. Discards all unstaged changes. Use git stash to preserve changes first.",
        ),
        (
            r"\bgit\s+restore\b(?:\s+--[\w-]+)*\s+\.(?:\s|$)",
            "git restore . is blocked. Discards all changes. Use git stash to preserve changes first.",
        ),
        (
            r"\bgit\s+clean\b.*\s-[a-zA-Z]*f",
            "git clean -f is blocked. Permanently removes untracked files. Use git clean -n (dry run) to preview first.",
        ),
        (
            r"\bgit\s+branch\b.*\s-D",
            "git branch -D is blocked. Force-deletes branch even if not fully merged. Use git branch -d for safe deletion.",
        ),
        (
            r"\bgit\s+branch\b.*\s--delete\b.*\s--force\b",
            "git branch --delete --force is blocked. Force-deletes branch even if not fully merged. Use git branch -d for safe deletion.",
        ),
        (
            r"\bgit\s+branch\b.*\s--force\b.*\s--delete\b",
            "git branch --force --delete is blocked. Force-deletes branch even if not fully merged. Use git branch -d for safe deletion.",
        ),
    ];
    table
        .iter()
        .map(|(pattern, message)| (Regex::new(pattern).expect("git guard regex"), *message))
        .collect()
});

/// Catastrophic rm targets. Specific paths only, not general directories.
const DANGEROUS_RM_TARGETS: &[&str] = &["/", "/*", "~", "~/", "$HOME", "$HOME/", "$HOME/*"];

static RE_SHELL_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?:&&|\|\||;)\s*").expect("shell split regex"));

/// Check one `rm` sub-command: blocked iff recursive+force flags combine
/// with a catastrophic target. Flag parsing handles all orderings
/// (`-rf /`, `-fr /`, `-r -f /`).
fn check_dangerous_rm(sub_command: &str) -> Option<String> {
    let mut tokens = sub_command.split_whitespace();
    if tokens.next() != Some("rm") {
        return None;
    }

    let mut flags = String::new();
    let mut targets: Vec<&str> = Vec::new();
    for token in tokens {
        if token.starts_with('-') && !token.starts_with("--") {
            flags.push_str(&token[1..]);
        } else if !token.starts_with('-') {
            targets.push(token.trim_matches(|c| c == '"' || c == '\''));
        }
    }

    let recursive = flags.contains('r') || flags.contains('R');
    let force = flags.contains('f');
    if !(recursive && force) {
        return None;
    }

    for target in targets {
        if DANGEROUS_RM_TARGETS.contains(&target) {
            return Some(format!(
                "rm -rf targeting {target} is blocked. Catastrophic, irreversible file deletion."
            ));
        }
    }
    None
}

/// Match a full command line against every destructive pattern.
pub fn check_command(command: &str) -> Option<String> {
    for (pattern, message) in GIT_PATTERNS.iter() {
        if pattern.is_match(command) {
            return Some((*message).to_string());
        }
    }
    // rm is checked per shell-operator-split sub-command, then per pipe
    // segment.
    for sub_cmd in RE_SHELL_SPLIT.split(command) {
        for segment in sub_cmd.split('|') {
            if let Some(message) = check_dangerous_rm(segment.trim()) {
                return Some(message);
            }
        }
    }
    None
}

/// Destructive-command guard entry point. Exit 2 on match, 0 otherwise.
pub fn run_command_guard(payload: &HookPayload) -> i32 {
    let command = payload
        .tool_input
        .get("command")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if command.is_empty() {
        return EXIT_OK;
    }
    if let Some(message) = check_command(command) {
        let shown: String = command.chars().take(200).collect();
        eprintln!("DESTRUCTIVE COMMAND BLOCKED: {message}\nCommand was: {shown}");
        return EXIT_BLOCK;
    }
    EXIT_OK
}

// ---------------------------------------------------------------------------
// TDD test-file guard
// ---------------------------------------------------------------------------

/// Marker file enabling the guard.
pub const TDD_MARKER: &str = ".tdd-guard";

/// Tier 1: exact path-component matches.
const TEST_DIR_NAMES: &[&str] = &["test", "tests", "__tests__", "spec", "specs"];

/// Tier 2: filename conventions across languages.
static TEST_FILE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^test[_.]",
        r"(?i)_tests?\.",
        r"(?i)\.tests?\.",
        r"(?i)\.specs?\.",
        r"(?i)_spec\.",
        r"(?i)^conftest\.py$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("test file regex"))
    .collect()
});

/// Two-tier test-file detection.
pub fn is_test_file(file_path: &str) -> bool {
    let normalized = file_path.replace('\\', "/");
    let parts: Vec<&str> = normalized.split('/').collect();

    // Tier 1: directory components (everything but the filename).
    for part in &parts[..parts.len().saturating_sub(1)] {
        if TEST_DIR_NAMES.contains(&part.to_lowercase().as_str()) {
            return true;
        }
    }

    let Some(filename) = parts.last().filter(|f| !f.is_empty()) else {
        return false;
    };
    for pattern in TEST_FILE_PATTERNS.iter() {
        if pattern.is_match(filename) {
            return true;
        }
    }

    // CamelCase: FooTest.java, FooSpec.scala; basename endswith check.
    let basename = filename.rsplit_once('.').map(|(b, _)| b).unwrap_or(filename);
    ["Test", "Tests", "Spec", "Specs"]
        .iter()
        .any(|suffix| basename.ends_with(suffix))
}

/// TDD guard entry point. Active only when `.tdd-guard` exists.
pub fn run_test_file_guard(payload: &HookPayload) -> i32 {
    test_file_guard_at(&project_dir(payload), payload)
}

/// Guard body with an explicit project root.
pub fn test_file_guard_at(root: &Path, payload: &HookPayload) -> i32 {
    if !root.join(TDD_MARKER).exists() {
        return EXIT_OK;
    }
    let file_path = payload
        .tool_input
        .get("file_path")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if file_path.is_empty() {
        return EXIT_OK;
    }
    if is_test_file(file_path) {
        eprintln!(
            "TEST FILE EDIT BLOCKED: Test files are read-only in TDD mode (.tdd-guard active). \
             Do NOT modify the test. Fix the implementation code to make the test pass.\n\
             Blocked file: {file_path}"
        );
        return EXIT_BLOCK;
    }
    EXIT_OK
}

// ---------------------------------------------------------------------------
// Predictive risk guard
//
// Self-contained: reads risk-scores.json with plain serde_json and keeps
// its own constants so PreToolUse latency stays minimal.
// ---------------------------------------------------------------------------

/// D-7: duplicated from `warden-archive::risk::RISK_THRESHOLD` (DC-3).
pub const RISK_THRESHOLD: f64 = 3.0;
/// D-7: duplicated from `warden-archive::risk::RISK_MIN_SESSIONS` (DC-3).
pub const RISK_MIN_SESSIONS: u64 = 5;
/// Cache older than this is stale and ignored.
pub const RISK_CACHE_MAX_AGE_SECS: u64 = 7_200;
/// Cache filename inside the snapshot directory.
pub const RISK_CACHE_FILE: &str = "risk-scores.json";

/// Predictive guard entry point. Warning only; always exits 0.
pub fn run_predictive_guard(payload: &HookPayload) -> i32 {
    predictive_guard_at(&project_dir(payload), payload)
}

/// Guard body with an explicit project root.
pub fn predictive_guard_at(root: &Path, payload: &HookPayload) -> i32 {
    let file_path = payload
        .tool_input
        .get("file_path")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if file_path.is_empty() {
        return EXIT_OK;
    }

    let cache_path = root.join(SNAPSHOT_DIR).join(RISK_CACHE_FILE);
    let Some(age) = warden_fs::age_seconds(&cache_path) else {
        return EXIT_OK;
    };
    if age > RISK_CACHE_MAX_AGE_SECS {
        return EXIT_OK;
    }
    let Some(content) = warden_fs::read_opt(&cache_path) else {
        return EXIT_OK;
    };
    let Ok(cache) = serde_json::from_str::<serde_json::Value>(&content) else {
        return EXIT_OK;
    };
    if cache.get("data_sessions").and_then(|v| v.as_u64()).unwrap_or(0) < RISK_MIN_SESSIONS {
        return EXIT_OK;
    }

    let rel_path = relativize(file_path, root);
    let Some(files) = cache.get("files").and_then(|v| v.as_object()) else {
        return EXIT_OK;
    };

    // Exact match first, basename fallback second (error patterns often
    // store bare names).
    let file_risk = files.get(&rel_path).or_else(|| {
        let basename = rel_path.rsplit('/').next().unwrap_or(&rel_path);
        files
            .iter()
            .find(|(path, _)| path.rsplit('/').next().unwrap_or(path) == basename)
            .map(|(_, risk)| risk)
    });
    let Some(risk) = file_risk else {
        return EXIT_OK;
    };

    let score = risk.get("risk_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if score < RISK_THRESHOLD {
        return EXIT_OK;
    }

    let error_count = risk.get("error_count").and_then(|v| v.as_u64()).unwrap_or(0);
    let resolution_rate = risk.get("resolution_rate").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let last_error = risk
        .get("last_error_session")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    let mut types: Vec<(String, u64)> = risk
        .get("error_types")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_u64().unwrap_or(0)))
                .collect()
        })
        .unwrap_or_default();
    types.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let types_str = types
        .iter()
        .map(|(name, count)| format!("{name}:{count}"))
        .collect::<Vec<_>>()
        .join(", ");
    let top_type = types.first().map(|(name, _)| name.as_str()).unwrap_or("unknown");

    eprintln!(
        "PREDICTIVE WARNING: {rel_path} — risk score {score:.1}\n  \
         Past errors: {error_count} ({types_str})\n  \
         Resolution rate: {:.0}% | Last error: {last_error}\n  \
         Recommendation: Review past error patterns before editing. \
         Pay extra attention to {top_type} issues.",
        resolution_rate * 100.0
    );
    EXIT_OK
}

fn relativize(file_path: &str, root: &Path) -> String {
    let normalized = file_path.replace('\\', "/");
    let root_str = root.to_string_lossy().replace('\\', "/");
    normalized
        .strip_prefix(&format!("{root_str}/"))
        .unwrap_or(&normalized)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn bash_payload(command: &str) -> HookPayload {
        HookPayload {
            tool_name: "Bash".to_string(),
            tool_input: json!({"command": command}),
            ..HookPayload::default()
        }
    }

    #[test]
    fn force_push_is_blocked_but_lease_is_not() {
        assert!(check_command("git push --force origin main").is_some());
        assert!(check_command("git push --force-with-lease origin main").is_none());
        assert!(check_command("git push --force-if-includes origin main").is_none());
    }

    #[test]
    fn short_force_flags_including_combined_are_blocked() {
        assert!(check_command("git push -f").is_some());
        assert!(check_command("git push -fu origin main").is_some());
        assert!(check_command("git push -uf origin main").is_some());
        assert!(check_command("git push origin main").is_none());
    }

    #[test]
    fn reset_checkout_restore_clean_branch_patterns() {
        assert!(check_command("git reset --hard HEAD~1").is_some());
        assert!(check_command("git reset --soft HEAD~1").is_none());
        assert!(check_command("git checkout .").is_some());
        assert!(check_command("git checkout -- .").is_some());
        assert!(check_command("git checkout feature-branch").is_none());
        assert!(check_command("git restore .").is_some());
        assert!(check_command("git restore --staged .").is_some());
        assert!(check_command("git restore src/lib.rs").is_none());
        assert!(check_command("git clean -fd").is_some());
        assert!(check_command("git clean -n").is_none());
        assert!(check_command("git branch -D old-branch").is_some());
        assert!(check_command("git branch -d merged-branch").is_none());
        assert!(check_command("git branch --delete --force topic").is_some());
        assert!(check_command("git branch --force --delete topic").is_some());
    }

    #[test]
    fn rm_needs_both_flags_and_catastrophic_target() {
        assert!(check_command("rm -rf /").is_some());
        assert!(check_command("rm -fr ~").is_some());
        assert!(check_command("rm -r -f $HOME").is_some());
        assert!(check_command("rm -rf ./build").is_none());
        assert!(check_command("rm -r /tmp/work").is_none());
        assert!(check_command("rm -f notes.txt").is_none());
    }

    #[test]
    fn rm_is_checked_per_sub_command() {
        assert!(check_command("echo hi && rm -rf /").is_some());
        assert!(check_command("make clean; rm -rf ~/").is_some());
        assert!(check_command("cat x | rm -rf '/'").is_some());
        assert!(check_command("echo 'rm is a command' && ls").is_none());
    }

    #[test]
    fn command_guard_exit_codes_and_stderr() {
        let blocked = run_command_guard(&bash_payload("git push --force origin main"));
        assert_eq!(blocked, EXIT_BLOCK);
        let allowed = run_command_guard(&bash_payload("cargo test"));
        assert_eq!(allowed, EXIT_OK);
        let empty = run_command_guard(&HookPayload::default());
        assert_eq!(empty, EXIT_OK);
    }

    #[test]
    fn test_file_detection_tiers() {
        // Tier 1: directory
        assert!(is_test_file("src/tests/helpers.rs"));
        assert!(is_test_file("app/__tests__/util.js"));
        assert!(!is_test_file("src/protest/inner.rs"));
        // Tier 2: filename
        assert!(is_test_file("src/test_auth.py"));
        assert!(is_test_file("pkg/parser_test.go"));
        assert!(is_test_file("web/form.test.tsx"));
        assert!(is_test_file("web/form.spec.ts"));
        assert!(is_test_file("lib/user_spec.rb"));
        assert!(is_test_file("conftest.py"));
        // CamelCase
        assert!(is_test_file("src/main/JavaThingTest.java"));
        assert!(is_test_file("src/FooSpec.scala"));
        assert!(!is_test_file("src/auth.rs"));
        assert!(!is_test_file("src/contested.rs"));
    }

    #[test]
    fn tdd_guard_requires_marker_file() {
        let td = tempdir().expect("tempdir");
        let payload = HookPayload {
            tool_name: "Edit".to_string(),
            tool_input: json!({"file_path": "src/tests/test_auth.py"}),
            ..HookPayload::default()
        };

        // No marker: allowed.
        assert_eq!(test_file_guard_at(td.path(), &payload), EXIT_OK);

        std::fs::write(td.path().join(TDD_MARKER), "").expect("marker");
        assert_eq!(test_file_guard_at(td.path(), &payload), EXIT_BLOCK);

        let impl_payload = HookPayload {
            tool_input: json!({"file_path": "src/auth.py"}),
            ..payload
        };
        assert_eq!(test_file_guard_at(td.path(), &impl_payload), EXIT_OK);
    }

    fn seed_risk_cache(dir: &std::path::Path, data_sessions: u64, score: f64) {
        let cache_dir = dir.join(SNAPSHOT_DIR);
        std::fs::create_dir_all(&cache_dir).expect("mkdir");
        let cache = json!({
            "generated_at": "2026-08-01T00:00:00Z",
            "data_sessions": data_sessions,
            "files": {
                "src/hot.rs": {
                    "risk_score": score,
                    "error_count": 4,
                    "error_types": {"edit_mismatch": 3, "syntax": 1},
                    "last_error_session": "s9",
                    "resolution_rate": 0.5,
                }
            },
            "top_risk_files": ["src/hot.rs"],
        });
        std::fs::write(
            cache_dir.join(RISK_CACHE_FILE),
            serde_json::to_string(&cache).unwrap(),
        )
        .expect("write cache");
    }

    #[test]
    fn predictive_guard_always_exits_zero() {
        let td = tempdir().expect("tempdir");
        seed_risk_cache(td.path(), 8, 5.0);
        let payload = HookPayload {
            tool_input: json!({"file_path": "src/hot.rs"}),
            ..HookPayload::default()
        };
        assert_eq!(predictive_guard_at(td.path(), &payload), EXIT_OK);

        // Basename fallback also exits 0.
        let by_basename = HookPayload {
            tool_input: json!({"file_path": "elsewhere/hot.rs"}),
            ..HookPayload::default()
        };
        assert_eq!(predictive_guard_at(td.path(), &by_basename), EXIT_OK);
    }

    #[test]
    fn predictive_guard_cold_start_is_silent() {
        let td = tempdir().expect("tempdir");
        seed_risk_cache(td.path(), 2, 9.0);
        let payload = HookPayload {
            tool_input: json!({"file_path": "src/hot.rs"}),
            ..HookPayload::default()
        };
        // data_sessions < 5 → silent exit 0 regardless of score.
        assert_eq!(predictive_guard_at(td.path(), &payload), EXIT_OK);
    }
}
