//! Abductive diagnosis: pre-analysis evidence bundle and post-validation
//! of LLM-written diagnosis logs (AD1–AD10).
//!
//! Pre-analysis is a context *gatherer*: deterministic evidence only, JSON
//! to stdout, no writes. The LLM's judgment happens elsewhere; the
//! post-validator then checks the written log structurally.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::output::discover_step_output;
use crate::retry::{counter_path, detect_ulw, read_counter};
use crate::Gate;

/// Diagnosis logs must hold at least this many bytes.
pub const DIAGNOSIS_MIN_BYTES: u64 = 100;
/// FP2: an output smaller than this is "tiny".
pub const TINY_OUTPUT_BYTES: u64 = 100;
/// Raw-log excerpts are capped to this many characters.
pub const EXCERPT_CHARS: usize = 2_000;

/// Retry ceilings used when assembling retry history.
///
/// D-7: duplicated from `warden-validators::retry`; the retry module is
/// the integer authority; the setup-maintenance DC-1 check compares these
/// copies.
pub const RETRY_DEFAULT_MAX: u32 = 10;
pub const RETRY_ULW_MAX: u32 = 15;

static RE_SELECTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)Selected\s*[:：]\s*(H\d)").expect("selected regex"));
static RE_HYPOTHESIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*]?\s*(H\d)\s*[:：]").expect("hypothesis regex"));
static RE_STEP_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"step-(\d+)").expect("step ref regex"));
static RE_PRIOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)previous diagnosis|prior diagnosis|이전 진단").expect("prior regex")
});

/// Diagnosis log path for a step/gate.
pub fn diagnosis_path(project_dir: &Path, step: u32, gate: Gate) -> PathBuf {
    project_dir
        .join("diagnosis-logs")
        .join(format!("step-{step}-{}-diagnosis.md", gate.as_str()))
}

fn tail_chars(text: &str, cap: usize) -> String {
    let count = text.chars().count();
    if count <= cap {
        return text.to_string();
    }
    text.chars().skip(count - cap).collect()
}

/// Upstream output health for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub step: u32,
    pub exists: bool,
    pub size: u64,
    pub ok: bool,
}

/// Pre-analysis: assemble the deterministic evidence bundle for a failed
/// gate. Pure read; no writes anywhere.
pub fn diagnose_failure_context(project_dir: &Path, step: u32, gate: Gate) -> Value {
    let ulw = detect_ulw(project_dir);
    let max_retries = if ulw { RETRY_ULW_MAX } else { RETRY_DEFAULT_MAX };

    let mut retry_history = serde_json::Map::new();
    for g in Gate::ALL {
        let used = read_counter(&counter_path(project_dir, step, g));
        retry_history.insert(
            g.as_str().to_string(),
            json!({"retries_used": used, "max_retries": max_retries}),
        );
    }

    let mut upstream: Vec<UpstreamHealth> = Vec::new();
    for upstream_step in 1..step {
        let path = discover_step_output(project_dir, upstream_step);
        let size = path.as_deref().map(warden_fs::size_of).unwrap_or(0);
        upstream.push(UpstreamHealth {
            step: upstream_step,
            exists: path.is_some(),
            size,
            ok: path.is_some() && size >= TINY_OUTPUT_BYTES,
        });
    }

    let current_output = discover_step_output(project_dir, step);
    let current_size = current_output.as_deref().map(warden_fs::size_of).unwrap_or(0);
    let output_missing = current_output.is_none();
    let output_tiny = !output_missing && current_size < TINY_OUTPUT_BYTES;
    let upstream_unhealthy = upstream.iter().any(|u| !u.ok);

    // Rule-based hypothesis priorities: upstream quality beats current-step
    // gap beats criteria misinterpretation.
    let hypothesis_priority: Vec<Value> = if upstream_unhealthy {
        vec![
            json!({"id": "H1", "hypothesis": "upstream output quality is insufficient"}),
            json!({"id": "H2", "hypothesis": "current step output is missing or incomplete"}),
            json!({"id": "H3", "hypothesis": "gate criteria were misinterpreted"}),
        ]
    } else if output_missing || output_tiny {
        vec![
            json!({"id": "H2", "hypothesis": "current step output is missing or incomplete"}),
            json!({"id": "H3", "hypothesis": "gate criteria were misinterpreted"}),
            json!({"id": "H1", "hypothesis": "upstream output quality is insufficient"}),
        ]
    } else {
        vec![
            json!({"id": "H3", "hypothesis": "gate criteria were misinterpreted"}),
            json!({"id": "H1", "hypothesis": "upstream output quality is insufficient"}),
            json!({"id": "H2", "hypothesis": "current step output is missing or incomplete"}),
        ]
    };

    let repeated_hypothesis = last_two_selected_match(project_dir, step, gate);
    let fast_path = json!({
        "FP1_output_missing": output_missing,
        "FP2_output_tiny": output_tiny,
        "FP3_same_hypothesis_twice": repeated_hypothesis,
        "eligible": output_missing || output_tiny || repeated_hypothesis,
    });

    let gate_log = project_dir
        .join(gate.log_dir())
        .join(format!("step-{step}-{}.md", gate.as_str()));
    let raw_evidence = json!({
        "gate_log_excerpt": warden_fs::read_opt(&gate_log)
            .map(|c| tail_chars(&c, EXCERPT_CHARS))
            .unwrap_or_default(),
        "output_excerpt": current_output
            .as_deref()
            .and_then(warden_fs::read_opt)
            .map(|c| tail_chars(&c, EXCERPT_CHARS))
            .unwrap_or_default(),
    });

    json!({
        "step": step,
        "gate": gate.as_str(),
        "ulw_active": ulw,
        "retry_history": retry_history,
        "upstream_evidence": upstream,
        "hypothesis_priority": hypothesis_priority,
        "fast_path": fast_path,
        "raw_evidence": raw_evidence,
    })
}

/// FP3: the current and the immediately-archived diagnosis selected the
/// same hypothesis.
fn last_two_selected_match(project_dir: &Path, step: u32, gate: Gate) -> bool {
    let dir = project_dir.join("diagnosis-logs");
    let prefix = format!("step-{step}-{}-diagnosis", gate.as_str());
    let Ok(read_dir) = std::fs::read_dir(&dir) else {
        return false;
    };
    let mut names: Vec<String> = read_dir
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(&prefix))
        .collect();
    names.sort();
    if names.len() < 2 {
        return false;
    }

    let selected = |name: &str| {
        warden_fs::read_opt(&dir.join(name))
            .and_then(|c| RE_SELECTED.captures(&c).map(|cap| cap[1].to_string()))
    };
    let last = selected(&names[names.len() - 1]);
    let prior = selected(&names[names.len() - 2]);
    matches!((last, prior), (Some(a), Some(b)) if a == b)
}

/// AD1–AD10 post-validation of a written diagnosis log.
pub fn validate_diagnosis_log(project_dir: &Path, step: u32, gate: Gate) -> (bool, Vec<String>) {
    let path = diagnosis_path(project_dir, step, gate);
    let mut warnings = Vec::new();

    let Some(content) = warden_fs::read_opt(&path) else {
        return (
            false,
            vec![format!("AD1 FAIL: diagnosis log missing: {}", path.display())],
        );
    };
    if (content.len() as u64) < DIAGNOSIS_MIN_BYTES {
        warnings.push(format!(
            "AD2 FAIL: diagnosis log under {DIAGNOSIS_MIN_BYTES} bytes ({})",
            content.len()
        ));
    }

    let gate_token = format!("Gate: {}", gate.as_str());
    if !content.to_lowercase().contains(&gate_token.to_lowercase()) {
        warnings.push(format!(
            "AD3 FAIL: gate field does not match expected '{}'",
            gate.as_str()
        ));
    }

    let selected = RE_SELECTED.captures(&content).map(|cap| cap[1].to_string());
    if selected.is_none() {
        warnings.push("AD4 FAIL: no selected hypothesis (Selected: HN)".to_string());
    }

    let evidence_ok = content
        .split("Evidence")
        .nth(1)
        .map(|rest| rest.lines().any(|l| l.trim_start().starts_with('-')))
        .unwrap_or(false);
    if !evidence_ok {
        warnings.push("AD5 FAIL: Evidence section with ≥1 item missing".to_string());
    }

    if !content.contains("Action Plan") {
        warnings.push("AD6 FAIL: Action Plan section missing".to_string());
    }

    for cap in RE_STEP_REF.captures_iter(&content) {
        let referenced: u32 = cap[1].parse().unwrap_or(0);
        if referenced > step {
            warnings.push(format!(
                "AD7 FAIL: diagnosis references future step-{referenced}"
            ));
        }
    }

    let hypotheses: Vec<String> = {
        let mut seen = Vec::new();
        for cap in RE_HYPOTHESIS.captures_iter(&content) {
            let id = cap[1].to_string();
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    };
    if hypotheses.len() < 2 {
        warnings.push(format!(
            "AD8 FAIL: only {} hypotheses listed, need ≥ 2",
            hypotheses.len()
        ));
    }

    if let Some(selected) = &selected {
        if !hypotheses.contains(selected) {
            warnings.push(format!(
                "AD9 FAIL: selected hypothesis {selected} is not among the listed hypotheses"
            ));
        }
    }

    let retries = read_counter(&counter_path(project_dir, step, gate));
    if retries > 0 && !RE_PRIOR.is_match(&content) {
        warnings.push(format!(
            "AD10 FAIL: retry count is {retries} but no previous diagnosis is referenced"
        ));
    }

    (warnings.is_empty(), warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GOOD_DIAGNOSIS: &str = "\
# Diagnosis

Gate: verification
Step: step-3 retry analysis

## Hypotheses

- H1: upstream output quality is insufficient
- H2: current step output is missing or incomplete
- H3: gate criteria were misinterpreted

Selected: H2

## Evidence

- step-2 output exists and is healthy
- step-3 output is only 40 bytes

## Action Plan

Regenerate the step-3 output fully before re-running the gate.
";

    fn write_diagnosis(dir: &Path, step: u32, gate: Gate, content: &str) {
        let path = diagnosis_path(dir, step, gate);
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, content).expect("write");
    }

    fn write_output(dir: &Path, step: u32, content: &str) {
        let outputs = dir.join("outputs");
        std::fs::create_dir_all(&outputs).expect("mkdir");
        std::fs::write(outputs.join(format!("step-{step}.md")), content).expect("write");
    }

    #[test]
    fn well_formed_diagnosis_passes() {
        let td = tempdir().expect("tempdir");
        write_diagnosis(td.path(), 3, Gate::Verification, GOOD_DIAGNOSIS);
        let (valid, warnings) = validate_diagnosis_log(td.path(), 3, Gate::Verification);
        assert!(valid, "{warnings:?}");
    }

    #[test]
    fn gate_mismatch_fails_ad3() {
        let td = tempdir().expect("tempdir");
        write_diagnosis(td.path(), 3, Gate::Pacs, GOOD_DIAGNOSIS);
        let (valid, warnings) = validate_diagnosis_log(td.path(), 3, Gate::Pacs);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("AD3 FAIL")));
    }

    #[test]
    fn forward_step_reference_fails_ad7() {
        let td = tempdir().expect("tempdir");
        let log = GOOD_DIAGNOSIS.replace("step-2 output exists", "step-5 output will exist");
        write_diagnosis(td.path(), 3, Gate::Verification, &log);
        let (valid, warnings) = validate_diagnosis_log(td.path(), 3, Gate::Verification);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("AD7 FAIL") && w.contains("step-5")));
    }

    #[test]
    fn selected_must_be_listed_ad9() {
        let td = tempdir().expect("tempdir");
        let log = GOOD_DIAGNOSIS.replace("Selected: H2", "Selected: H7");
        write_diagnosis(td.path(), 3, Gate::Verification, &log);
        let (valid, warnings) = validate_diagnosis_log(td.path(), 3, Gate::Verification);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("AD9 FAIL")));
    }

    #[test]
    fn nonzero_retry_requires_prior_reference_ad10() {
        let td = tempdir().expect("tempdir");
        write_diagnosis(td.path(), 3, Gate::Verification, GOOD_DIAGNOSIS);
        let counter = counter_path(td.path(), 3, Gate::Verification);
        warden_fs::atomic_write(&counter, b"2").expect("seed");

        let (valid, warnings) = validate_diagnosis_log(td.path(), 3, Gate::Verification);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("AD10 FAIL")));

        let log = format!("{GOOD_DIAGNOSIS}\nPrevious diagnosis selected H2 as well; refined here.\n");
        write_diagnosis(td.path(), 3, Gate::Verification, &log);
        let (valid, warnings) = validate_diagnosis_log(td.path(), 3, Gate::Verification);
        assert!(valid, "{warnings:?}");
    }

    #[test]
    fn pre_analysis_prioritizes_upstream_when_unhealthy() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 1, "tiny");
        write_output(td.path(), 3, &"solid output content ".repeat(20));

        let context = diagnose_failure_context(td.path(), 3, Gate::Verification);
        assert_eq!(context["hypothesis_priority"][0]["id"], "H1");
        assert_eq!(context["upstream_evidence"][0]["ok"], false);
        assert_eq!(context["gate"], "verification");
    }

    #[test]
    fn pre_analysis_fast_path_on_missing_output() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 1, &"healthy upstream output body ".repeat(10));
        write_output(td.path(), 2, &"healthy upstream output body ".repeat(10));

        let context = diagnose_failure_context(td.path(), 3, Gate::Pacs);
        assert_eq!(context["fast_path"]["FP1_output_missing"], true);
        assert_eq!(context["fast_path"]["eligible"], true);
        assert_eq!(context["hypothesis_priority"][0]["id"], "H2");
    }

    #[test]
    fn fp3_detects_repeated_hypothesis() {
        let td = tempdir().expect("tempdir");
        let dir = td.path().join("diagnosis-logs");
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("step-3-review-diagnosis-1.md"), "Selected: H1\n").expect("write");
        std::fs::write(dir.join("step-3-review-diagnosis-2.md"), "Selected: H1\n").expect("write");

        assert!(last_two_selected_match(td.path(), 3, Gate::Review));

        std::fs::write(dir.join("step-3-review-diagnosis-2.md"), "Selected: H2\n").expect("write");
        assert!(!last_two_selected_match(td.path(), 3, Gate::Review));
    }

    #[test]
    fn retry_history_covers_all_gates() {
        let td = tempdir().expect("tempdir");
        let counter = counter_path(td.path(), 4, Gate::Review);
        warden_fs::atomic_write(&counter, b"3").expect("seed");

        let context = diagnose_failure_context(td.path(), 4, Gate::Review);
        assert_eq!(context["retry_history"]["review"]["retries_used"], 3);
        assert_eq!(context["retry_history"]["verification"]["retries_used"], 0);
        assert_eq!(context["retry_history"]["review"]["max_retries"], 10);
    }
}
