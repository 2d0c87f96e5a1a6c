//! Stop hook: guard-all incremental snapshot plus non-blocking safety nets.

use std::path::Path;

use warden_snapshot::Trigger;
use warden_sot::sot_outputs;
use warden_validators::{
    diagnosis::diagnosis_path,
    retry::{counter_path, read_counter},
    workflow::validate_workflow_md,
    Gate,
};

use crate::payload::{project_dir, snapshot_dir, HookPayload};
use crate::save::run_save;
use crate::EXIT_OK;

/// Minimum transcript growth (bytes) since the last save before the stop
/// hook does any work.
pub const STOP_GROWTH_MIN_BYTES: u64 = 5 * 1024;
/// Offset tracker filename inside the snapshot directory.
pub const OFFSET_FILE: &str = ".last_save_offset";

/// Stop-hook entry point. Never blocks; exit 0 always.
pub fn run_stop(payload: &HookPayload) -> i32 {
    let root = project_dir(payload);
    stop_at(&root, payload);
    EXIT_OK
}

/// Hook body with an explicit project root.
pub fn stop_at(root: &Path, payload: &HookPayload) {
    // A stop fired from our own continuation must not re-save.
    if payload.stop_hook_active {
        return;
    }
    let transcript = Path::new(&payload.transcript_path);
    let current_size = warden_fs::size_of(transcript);
    if current_size == 0 {
        return;
    }

    let snap_dir = snapshot_dir(root);
    let offset_path = snap_dir.join(OFFSET_FILE);
    let last_size: u64 = warden_fs::read_opt(&offset_path)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    if last_size > 0 && current_size.saturating_sub(last_size) < STOP_GROWTH_MIN_BYTES {
        return;
    }

    if let Ok(Some(_)) = run_save(root, payload, Trigger::Stop) {
        let _ = warden_fs::atomic_write(&offset_path, current_size.to_string().as_bytes());
    }

    // Safety nets: each scanner is independent; one failing or warning
    // never halts the others, and none fail the hook.
    for warning in run_safety_nets(root) {
        eprintln!("[warden safety-net] {warning}");
    }
}

/// Run every safety-net scanner and collect their warnings.
pub fn run_safety_nets(root: &Path) -> Vec<String> {
    let mut warnings = Vec::new();
    warnings.extend(scan_missing_gate_logs(root));
    warnings.extend(scan_missing_translations(root));
    warnings.extend(scan_workflow_validator_consistency(root));
    warnings.extend(scan_missing_diagnosis_logs(root));
    warnings.extend(scan_ulw_compliance(root));
    warnings
}

fn declared_steps(root: &Path) -> Vec<u32> {
    let mut steps: Vec<u32> = sot_outputs(root)
        .keys()
        .filter_map(|key| {
            key.strip_prefix("step-")
                .and_then(|rest| rest.parse::<u32>().ok())
        })
        .collect();
    steps.sort_unstable();
    steps.dedup();
    steps
}

/// Declared step outputs that exist without their review/verification logs.
fn scan_missing_gate_logs(root: &Path) -> Vec<String> {
    let outputs = sot_outputs(root);
    let mut warnings = Vec::new();
    for step in declared_steps(root) {
        let Some(rel) = outputs.get(&format!("step-{step}")) else {
            continue;
        };
        if !root.join(rel).exists() {
            continue;
        }
        let review = root.join("review-logs").join(format!("step-{step}-review.md"));
        if !review.exists() {
            warnings.push(format!("step {step}: output exists but review report is missing"));
        }
        let verification = root
            .join("verification-logs")
            .join(format!("step-{step}-verification.md"));
        if !verification.exists() {
            warnings.push(format!(
                "step {step}: output exists but verification log is missing"
            ));
        }
    }
    warnings
}

/// Declared `step-N-ko` translations that are missing on disk.
fn scan_missing_translations(root: &Path) -> Vec<String> {
    let outputs = sot_outputs(root);
    let mut warnings = Vec::new();
    for (key, rel) in &outputs {
        if key.ends_with("-ko") && !root.join(rel).exists() {
            warnings.push(format!("declared translation {key} missing at {rel}"));
        }
    }
    warnings
}

/// Workflow files must invoke the validators they declare (W7/W8).
fn scan_workflow_validator_consistency(root: &Path) -> Vec<String> {
    let workflow = root.join("workflow.md");
    if !workflow.exists() {
        return Vec::new();
    }
    let (_, warnings) = validate_workflow_md(&workflow);
    warnings
        .into_iter()
        .filter(|w| w.contains("W7 FAIL") || w.contains("W8 FAIL"))
        .collect()
}

/// A non-zero retry counter means a gate failed; a diagnosis log should
/// exist for it.
fn scan_missing_diagnosis_logs(root: &Path) -> Vec<String> {
    let mut warnings = Vec::new();
    for step in declared_steps(root) {
        for gate in Gate::ALL {
            let retries = read_counter(&counter_path(root, step, gate));
            if retries > 0 && !diagnosis_path(root, step, gate).exists() {
                warnings.push(format!(
                    "step {step} {} gate retried {retries}x without a diagnosis log",
                    gate.as_str()
                ));
            }
        }
    }
    warnings
}

/// ULW sessions must keep their mode visible in the external memory.
fn scan_ulw_compliance(root: &Path) -> Vec<String> {
    let latest = snapshot_dir(root).join("latest.md");
    let Some(content) = warden_fs::read_opt(&latest) else {
        return Vec::new();
    };
    let counters_active = declared_steps(root).iter().any(|step| {
        Gate::ALL
            .iter()
            .any(|gate| read_counter(&counter_path(root, *step, *gate)) > 10)
    });
    if counters_active && !warden_validators::retry::detect_ulw(root) && !content.is_empty() {
        return vec![
            "retry counters exceed the default budget but no ULW section is present in latest.md"
                .to_string(),
        ];
    }
    Vec::new()
}
