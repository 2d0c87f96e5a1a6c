//! Read-only capture of the workflow state-of-truth (SOT) file.
//!
//! The SOT is owned by the orchestrator. This crate reads it, parses it
//! (structured YAML first, a documented regex fallback second) and validates
//! its shape; it never writes it. Snapshot sections and the autopilot
//! restore path are the consumers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

/// Fixed candidate filename set, probed in order. First hit wins.
///
/// D-7: duplicated into the setup-maintenance DC-4 check; keep both copies
/// in sync.
pub const SOT_FILENAMES: &[&str] = &[
    ".claude/state.yaml",
    ".claude/state.yml",
    "state.yaml",
    "state.yml",
];

/// Candidate SOT paths under a project directory, in probe order.
pub fn sot_paths(project_dir: &Path) -> Vec<PathBuf> {
    SOT_FILENAMES.iter().map(|name| project_dir.join(name)).collect()
}

/// First existing SOT path, if any.
pub fn find_sot(project_dir: &Path) -> Option<PathBuf> {
    sot_paths(project_dir).into_iter().find(|p| p.exists())
}

/// Raw SOT capture: content plus modification time, for snapshot embedding
/// and later consistency checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SotCapture {
    pub path: PathBuf,
    pub content: String,
    pub mtime_iso: String,
}

/// Read the SOT file without interpreting it. `None` when absent/unreadable.
pub fn capture_sot(project_dir: &Path) -> Option<SotCapture> {
    let path = find_sot(project_dir)?;
    let content = std::fs::read_to_string(&path).ok()?;
    let mtime_iso = std::fs::metadata(&path)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default();
    Some(SotCapture {
        path,
        content,
        mtime_iso,
    })
}

/// Parsed autopilot state from the SOT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutopilotState {
    pub workflow_name: String,
    pub current_step: i64,
    pub total_steps: Option<i64>,
    pub auto_approved_steps: Vec<i64>,
    /// Declared step outputs, keyed `step-N` (and `step-N-ko` for
    /// translations), values are project-relative paths.
    pub outputs: BTreeMap<String, String>,
}

static RE_AUTOPILOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:autopilot|mode)\s*:\s*(?:autopilot|active|true)\s*$").expect("autopilot regex"));
static RE_CURRENT_STEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*current_step\s*:\s*(\d+)").expect("step regex"));
static RE_WORKFLOW_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*workflow_name\s*:\s*["']?([^"'\n]+)"#).expect("name regex"));
static RE_OUTPUT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s+(step-\d+(?:-ko)?)\s*:\s*["']?([^"'\n]+)"#).expect("output regex"));

/// Read autopilot state from the SOT, if autopilot is active.
///
/// Structured YAML parse first; on YAML failure the documented regex
/// fallback extracts the same fields line by line.
pub fn read_autopilot_state(project_dir: &Path) -> Option<AutopilotState> {
    let capture = capture_sot(project_dir)?;
    match serde_yaml::from_str::<Value>(&capture.content) {
        Ok(doc) => autopilot_from_yaml(&doc),
        Err(_) => autopilot_from_regex(&capture.content),
    }
}

fn autopilot_from_yaml(doc: &Value) -> Option<AutopilotState> {
    let active = doc
        .get("autopilot")
        .map(|v| match v {
            Value::Bool(b) => *b,
            Value::Mapping(_) => v
                .get("active")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            Value::String(s) => s == "active" || s == "true",
            _ => false,
        })
        .unwrap_or(false)
        || doc.get("mode").and_then(Value::as_str) == Some("autopilot");
    if !active {
        return None;
    }

    let scope = doc.get("autopilot").filter(|v| v.is_mapping()).unwrap_or(doc);

    let mut state = AutopilotState {
        workflow_name: scope
            .get("workflow_name")
            .or_else(|| doc.get("workflow_name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        current_step: scope
            .get("current_step")
            .or_else(|| doc.get("current_step"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
        total_steps: scope
            .get("total_steps")
            .or_else(|| doc.get("total_steps"))
            .and_then(Value::as_i64),
        ..Default::default()
    };

    if let Some(Value::Sequence(steps)) = scope
        .get("auto_approved_steps")
        .or_else(|| doc.get("auto_approved_steps"))
    {
        state.auto_approved_steps = steps.iter().filter_map(Value::as_i64).collect();
    }

    if let Some(Value::Mapping(outputs)) = doc.get("outputs") {
        for (key, value) in outputs {
            if let (Some(k), Some(v)) = (key.as_str(), value.as_str()) {
                state.outputs.insert(k.to_string(), v.to_string());
            }
        }
    }
    Some(state)
}

fn autopilot_from_regex(content: &str) -> Option<AutopilotState> {
    if !RE_AUTOPILOT.is_match(content) {
        return None;
    }
    let mut state = AutopilotState::default();
    if let Some(cap) = RE_WORKFLOW_NAME.captures(content) {
        state.workflow_name = cap[1].trim().to_string();
    }
    if let Some(cap) = RE_CURRENT_STEP.captures(content) {
        state.current_step = cap[1].parse().unwrap_or(0);
    }
    for cap in RE_OUTPUT_LINE.captures_iter(content) {
        state.outputs.insert(cap[1].to_string(), cap[2].trim().to_string());
    }
    Some(state)
}

/// Declared outputs for a project's SOT regardless of autopilot state.
/// Used by validators for step-output and translation discovery.
pub fn sot_outputs(project_dir: &Path) -> BTreeMap<String, String> {
    let Some(capture) = capture_sot(project_dir) else {
        return BTreeMap::new();
    };
    match serde_yaml::from_str::<Value>(&capture.content) {
        Ok(doc) => {
            let mut out = BTreeMap::new();
            if let Some(Value::Mapping(outputs)) = doc.get("outputs") {
                for (key, value) in outputs {
                    if let (Some(k), Some(v)) = (key.as_str(), value.as_str()) {
                        out.insert(k.to_string(), v.to_string());
                    }
                }
            }
            out
        }
        Err(_) => RE_OUTPUT_LINE
            .captures_iter(&capture.content)
            .map(|cap| (cap[1].to_string(), cap[2].trim().to_string()))
            .collect(),
    }
}

static RE_STEP_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^step-(\d+)(?:-ko)?$").expect("step key regex"));

/// Structural SOT schema checks S1–S8 for an autopilot state.
///
/// Returns warning strings with stable prefixes; empty means clean.
pub fn validate_sot_schema(state: &AutopilotState) -> Vec<String> {
    let mut warnings = Vec::new();

    if state.workflow_name.trim().is_empty() {
        warnings.push("S1 FAIL: workflow_name is missing or empty".to_string());
    }
    if state.current_step <= 0 {
        warnings.push(format!(
            "S2 FAIL: current_step must be a positive integer (found {})",
            state.current_step
        ));
    }
    for key in state.outputs.keys() {
        if !RE_STEP_KEY.is_match(key) {
            warnings.push(format!("S3 FAIL: outputs key '{key}' is not step-N form"));
        }
    }
    if let Some(total) = state.total_steps {
        if state.current_step > total {
            warnings.push(format!(
                "S4 FAIL: current_step {} exceeds total_steps {total}",
                state.current_step
            ));
        }
        for key in state.outputs.keys() {
            if let Some(cap) = RE_STEP_KEY.captures(key) {
                let n: i64 = cap[1].parse().unwrap_or(0);
                if n > total {
                    warnings.push(format!(
                        "S5 FAIL: outputs key '{key}' references step beyond total_steps {total}"
                    ));
                }
            }
        }
    }
    for step in &state.auto_approved_steps {
        if *step <= 0 {
            warnings.push(format!("S6 FAIL: auto_approved_steps contains invalid step {step}"));
        }
    }
    for (key, path) in &state.outputs {
        if path.trim().is_empty() {
            warnings.push(format!("S7 FAIL: outputs '{key}' has an empty path"));
        } else if Path::new(path).is_absolute() {
            warnings.push(format!("S8 FAIL: outputs '{key}' uses an absolute path ({path})"));
        }
    }
    warnings
}

/// Per-step output validation against declared SOT outputs: the file must
/// exist, hold ≥100 bytes, and not be whitespace-only.
pub fn validate_step_output(
    project_dir: &Path,
    step: i64,
    outputs: &BTreeMap<String, String>,
) -> (bool, String) {
    let key = format!("step-{step}");
    let Some(rel) = outputs.get(&key) else {
        return (false, format!("step {step}: no declared output in SOT"));
    };
    let path = project_dir.join(rel);
    let Ok(metadata) = std::fs::metadata(&path) else {
        return (false, format!("step {step}: output {rel} missing"));
    };
    if metadata.len() < 100 {
        return (
            false,
            format!("step {step}: output {rel} too small ({} bytes)", metadata.len()),
        );
    }
    match std::fs::read_to_string(&path) {
        Ok(content) if content.trim().is_empty() => {
            (false, format!("step {step}: output {rel} is whitespace-only"))
        }
        Ok(_) => (true, format!("step {step}: output {rel} ok")),
        Err(_) => (false, format!("step {step}: output {rel} unreadable")),
    }
}
