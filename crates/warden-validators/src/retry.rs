//! Retry budget validation (RB1–RB3).
//!
//! This module is the single integer authority for retry limits. The same
//! constants appear in the diagnosis pre-analysis; the setup-maintenance
//! DC-1 check compares the copies.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Gate;

/// Retry ceiling for normal sessions.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Retry ceiling when ULW mode is active.
pub const ULW_MAX_RETRIES: u32 = 15;

/// Canonical ULW detection pattern applied to the latest snapshot.
///
/// D-7: duplicated from `warden-snapshot::ULW_PATTERN`; the
/// setup-maintenance DC-2 check compares the copies. Pre-tool latency rules
/// forbid importing the snapshot crate here.
pub const ULW_PATTERN: &str = r"ULW 상태|Ultrawork Mode";

static ULW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(ULW_PATTERN).expect("ulw regex"));

/// Validation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Read-only budget check.
    Check,
    /// Atomic check-and-consume: increment only when the budget allows.
    CheckAndIncrement,
    /// Unconditional increment (legacy).
    Increment,
}

/// Per-check status map in the output envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryChecks {
    #[serde(rename = "RB1_counter_read")]
    pub rb1_counter_read: String,
    #[serde(rename = "RB2_ulw_detection")]
    pub rb2_ulw_detection: String,
    #[serde(rename = "RB3_budget_remaining")]
    pub rb3_budget_remaining: String,
}

/// Validator stdout envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBudgetOutput {
    pub valid: bool,
    pub can_retry: bool,
    pub retries_used: u32,
    pub max_retries: u32,
    pub budget_remaining: u32,
    pub ulw_active: bool,
    pub gate: String,
    pub step: u32,
    pub incremented: bool,
    pub checks: RetryChecks,
    pub warnings: Vec<String>,
}

/// Counter file path for a step/gate pair.
pub fn counter_path(project_dir: &Path, step: u32, gate: Gate) -> PathBuf {
    project_dir
        .join(gate.log_dir())
        .join(format!(".step-{step}-retry-count"))
}

/// Read the counter. Absent or invalid → 0.
pub fn read_counter(path: &Path) -> u32 {
    warden_fs::read_opt(path)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Increment the counter atomically (temp-and-rename) and return the new
/// value. Write failure leaves the counter unchanged and returns the
/// incremented value anyway; the caller's decision already consumed it.
fn increment_counter(path: &Path) -> u32 {
    let new_value = read_counter(path) + 1;
    let _ = warden_fs::atomic_write(path, new_value.to_string().as_bytes());
    new_value
}

/// ULW detection: regex match on the latest snapshot content.
pub fn detect_ulw(project_dir: &Path) -> bool {
    let snapshot = project_dir
        .join(".claude")
        .join("context-snapshots")
        .join("latest.md");
    warden_fs::read_opt(&snapshot)
        .map(|content| ULW_RE.is_match(&content))
        .unwrap_or(false)
}

/// Run the retry-budget validator.
pub fn run(project_dir: &Path, step: u32, gate: Gate, mode: RetryMode) -> RetryBudgetOutput {
    let ulw_active = detect_ulw(project_dir);
    let max_retries = if ulw_active { ULW_MAX_RETRIES } else { DEFAULT_MAX_RETRIES };
    let counter = counter_path(project_dir, step, gate);

    let mut incremented = false;
    let (retries_used, can_retry) = match mode {
        RetryMode::Check => {
            let used = read_counter(&counter);
            (used, used < max_retries)
        }
        RetryMode::CheckAndIncrement => {
            let used = read_counter(&counter);
            if used < max_retries {
                incremented = true;
                (increment_counter(&counter), true)
            } else {
                (used, false)
            }
        }
        RetryMode::Increment => {
            incremented = true;
            let used = increment_counter(&counter);
            (used, used < max_retries)
        }
    };

    RetryBudgetOutput {
        valid: true,
        can_retry,
        retries_used,
        max_retries,
        budget_remaining: max_retries.saturating_sub(retries_used),
        ulw_active,
        gate: gate.as_str().to_string(),
        step,
        incremented,
        checks: RetryChecks {
            rb1_counter_read: "PASS".to_string(),
            rb2_ulw_detection: "PASS".to_string(),
            rb3_budget_remaining: if can_retry { "PASS" } else { "FAIL" }.to_string(),
        },
        warnings: Vec::new(),
    }
}
