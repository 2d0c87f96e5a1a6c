//! Session-start hook: RLM pointer restore.
//!
//! The hook does not inject the snapshot itself; it prints a pointer to
//! the best snapshot plus a brief structured summary, knowledge-archive
//! pointers with Grep query examples, proactively surfaced error→resolution
//! pairs, and (when active) the autopilot / ULW execution-rule blocks. The
//! assistant Reads the pointed file on demand.
//!
//! Session start is also when the risk-score cache is recomputed for the
//! predictive pre-tool guard.

use std::fmt::Write as _;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;

use warden_archive::{
    compute_risk_scores, recent_sessions, validate_risk_scores, KNOWLEDGE_INDEX_FILE,
};
use warden_facts::extract_path_tags;
use warden_snapshot::{extract_brief_summary, find_best_snapshot, SummaryItem};
use warden_sot::{read_autopilot_state, sot_paths, validate_sot_schema, validate_step_output};

use crate::guards::RISK_CACHE_FILE;
use crate::payload::{project_dir, snapshot_dir, HookPayload};
use crate::EXIT_OK;

/// Maximum snapshot age (seconds) per session-start source. `clear` and
/// `compact` always restore.
pub fn restore_threshold(source: &str) -> u64 {
    match source {
        "clear" | "compact" => u64::MAX,
        "resume" => 3_600,
        _ => 1_800,
    }
}

/// Session-start entry point. Prints the recovery message to stdout when a
/// usable snapshot exists; silent otherwise. Exit 0 always.
pub fn run_restore(payload: &HookPayload) -> i32 {
    let root = project_dir(payload);
    if let Some(output) = restore_at(&root, payload) {
        println!("{output}");
    }
    EXIT_OK
}

/// Hook body with an explicit project root. `None` means nothing to
/// restore (silent exit).
pub fn restore_at(root: &Path, payload: &HookPayload) -> Option<String> {
    let snap_dir = snapshot_dir(root);

    // Recompute the predictive-guard cache first: it must be fresh even
    // when the snapshot itself is too old to restore.
    refresh_risk_cache(root);

    let latest = snap_dir.join("latest.md");
    if !latest.exists() {
        return None;
    }
    let source = if payload.source.is_empty() { "startup" } else { payload.source.as_str() };
    let age = warden_fs::age_seconds(&latest)?;
    if age > restore_threshold(source) {
        return None;
    }

    let (best_path, best_size) = find_best_snapshot(&snap_dir)?;
    let content = warden_fs::read_opt(&best_path)?;
    if content.trim().is_empty() {
        return None;
    }

    let fallback_note = if best_path != latest {
        let latest_size = warden_fs::size_of(&latest);
        Some(format!(
            "⚠️ latest.md ({latest_size}B)가 빈약하여 더 풍부한 아카이브({best_size}B)를 참조합니다."
        ))
    } else {
        None
    };

    let summary = extract_brief_summary(&content);
    let sot_warning = verify_sot_consistency(&content, root);

    Some(build_recovery_output(
        root,
        source,
        &best_path,
        &summary,
        sot_warning,
        age,
        fallback_note,
        &content,
    ))
}

/// Recompute `risk-scores.json` from the knowledge index and write it
/// atomically, but only when the RS1–RS6 self-check passes.
pub fn refresh_risk_cache(root: &Path) {
    let snap_dir = snapshot_dir(root);
    let index_path = snap_dir.join(KNOWLEDGE_INDEX_FILE);
    if !index_path.exists() {
        return;
    }
    let records = warden_archive::read_index(&index_path);
    let scores = compute_risk_scores(root, &records, Utc::now());
    let problems = validate_risk_scores(&scores);
    if !problems.is_empty() {
        for problem in problems {
            eprintln!("[warden risk] {problem}");
        }
        return;
    }
    if let Ok(body) = serde_json::to_string_pretty(&scores) {
        let _ = warden_fs::atomic_write(&snap_dir.join(RISK_CACHE_FILE), body.as_bytes());
    }
}

/// Warn when the SOT changed after the snapshot was taken.
fn verify_sot_consistency(snapshot_content: &str, root: &Path) -> Option<String> {
    let current = sot_paths(root).into_iter().find(|p| p.exists());

    if snapshot_content.contains("SOT 파일 없음") && current.is_none() {
        return None;
    }
    let current = current?;
    let mtime_iso = std::fs::metadata(&current)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339())?;

    let recorded = snapshot_content
        .lines()
        .find(|l| l.contains("수정 시각:"))
        .and_then(|l| l.split("수정 시각:").nth(1))
        .map(str::trim)?;

    if recorded != mtime_iso {
        return Some(format!(
            "SOT가 snapshot 저장 이후 변경되었습니다. 기록: {recorded} → 현재: {mtime_iso}"
        ));
    }
    None
}

fn items<'a>(summary: &'a [SummaryItem], label: &str) -> Vec<&'a str> {
    summary
        .iter()
        .filter(|i| i.label == label)
        .map(|i| i.content.as_str())
        .collect()
}

fn format_age(seconds: u64) -> String {
    if seconds < 60 {
        format!("{seconds}초")
    } else if seconds < 3_600 {
        format!("{}분", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}시간", seconds / 3_600)
    } else {
        format!("{}일", seconds / 86_400)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_recovery_output(
    root: &Path,
    source: &str,
    best_path: &Path,
    summary: &[SummaryItem],
    sot_warning: Option<String>,
    age: u64,
    fallback_note: Option<String>,
    snapshot_content: &str,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[CONTEXT RECOVERY]");
    let _ = writeln!(out, "이전 세션이 {source}되었습니다.");
    let _ = writeln!(out, "전체 복원 파일: {}", best_path.display());
    out.push('\n');

    if let Some(task) = items(summary, "current-task").first() {
        let _ = writeln!(out, "■ 현재 작업: {task}");
    }
    if let Some(instruction) = items(summary, "latest-instruction").first() {
        let _ = writeln!(out, "■ 최근 지시: {instruction}");
    }
    let _ = writeln!(out, "■ 마지막 저장: {} 전", format_age(age));

    for stat in items(summary, "stats").iter().take(3) {
        let _ = writeln!(out, "■ {stat}");
    }
    if let Some(files) = items(summary, "files-count").first() {
        let _ = writeln!(out, "■ {files}");
    }
    if let Some(reads) = items(summary, "reads-count").first() {
        let _ = writeln!(out, "■ {reads}");
    }
    let completion = items(summary, "completion");
    if !completion.is_empty() {
        let _ = writeln!(out, "■ 완료상태: {}", completion[..completion.len().min(3)].join("; "));
    }
    let git = items(summary, "git");
    if !git.is_empty() {
        let _ = writeln!(out, "■ Git: {}", git[..git.len().min(5)].join(", "));
    }
    let errors = items(summary, "error");
    if !errors.is_empty() {
        let _ = writeln!(out, "■ ⚠ 최근 에러: {}", errors[..errors.len().min(3)].join("; "));
    }
    if let Some(autopilot) = items(summary, "autopilot").first() {
        let _ = writeln!(out, "■ Autopilot: {autopilot}");
    }
    if let Some(team) = items(summary, "team").first() {
        let _ = writeln!(out, "■ Team: {team}");
    }
    if let Some(ulw) = items(summary, "ulw").first() {
        let _ = writeln!(out, "■ ULW: {ulw}");
    }

    if let Some(note) = fallback_note {
        out.push('\n');
        let _ = writeln!(out, "{note}");
    }
    if let Some(warning) = sot_warning {
        out.push('\n');
        let _ = writeln!(out, "⚠️ {warning}");
    }

    out.push_str(&knowledge_archive_block(root, summary));
    out.push_str(&autopilot_block(root));
    out.push_str(&ulw_block(source, snapshot_content));

    out.push('\n');
    out.push_str("⚠️ 작업을 계속하기 전에 반드시 위 파일을 Read tool로 읽어\n");
    out.push_str("   이전 세션의 전체 맥락을 복원하세요.\n");
    out
}

fn knowledge_archive_block(root: &Path, summary: &[SummaryItem]) -> String {
    let snap_dir = snapshot_dir(root);
    let index_path = snap_dir.join(KNOWLEDGE_INDEX_FILE);
    let sessions_dir = snap_dir.join("sessions");
    if !index_path.exists() && !sessions_dir.is_dir() {
        return String::new();
    }

    let mut out = String::from("\n");
    if index_path.exists() {
        let _ = writeln!(out, "■ 과거 세션 인덱스: {}", index_path.display());
        let recent = recent_sessions(&index_path, 3);
        for session in &recent {
            let timestamp: String = session
                .get("timestamp")
                .and_then(Value::as_str)
                .unwrap_or("")
                .chars()
                .take(10)
                .collect();
            let task: String = session
                .get("user_task")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .unwrap_or("(기록 없음)")
                .chars()
                .take(80)
                .collect();
            let _ = writeln!(out, "  - [{timestamp}] {task}");
        }

        let index = index_path.display();
        out.push_str("  RLM 쿼리 예시 (Grep tool 사용):\n");
        let _ = writeln!(out, "  - Grep \"design_decisions\" {index} → 설계 결정 포함 세션");
        let _ = writeln!(out, "  - Grep \"error_patterns\" {index} → 에러 패턴 포함 세션");
        let _ = writeln!(out, "  - Grep \"phase_flow.*implementation\" {index} → 구현 단계 세션");
        let _ = writeln!(out, "  - Grep \"ulw_active\" {index} → ULW 세션");

        // Context-aware hints derived from the modified-file paths.
        let file_paths: Vec<String> = items(summary, "modified-path")
            .iter()
            .map(|s| s.to_string())
            .collect();
        for tag in extract_path_tags(&file_paths).iter().take(2) {
            let _ = writeln!(out, "  - Grep \"tags.*{tag}\" {index} → {tag} 관련 세션");
        }
        if !items(summary, "error").is_empty() {
            let _ = writeln!(out, "  - Grep \"resolution\" {index} → 에러→해결 패턴 포함 세션");
        }

        let pairs = recent_error_resolutions(&recent);
        if !pairs.is_empty() {
            out.push('\n');
            out.push_str("■ 최근 에러→해결 패턴 (자동 표면화):\n");
            for pair in pairs.iter().take(3) {
                let _ = writeln!(out, "  - {pair}");
            }
        }
    }
    if sessions_dir.is_dir() {
        let _ = writeln!(out, "■ 세션 아카이브: {}", sessions_dir.display());
    }
    out
}

/// Surface error→resolution pairs from the newest sessions, newest first.
fn recent_error_resolutions(recent: &[Value]) -> Vec<String> {
    let mut results = Vec::new();
    for session in recent.iter().rev() {
        let Some(patterns) = session.get("error_patterns").and_then(Value::as_array) else {
            continue;
        };
        for pattern in patterns {
            let error_type = pattern.get("type").and_then(Value::as_str).unwrap_or("unknown");
            let tool = pattern.get("tool").and_then(Value::as_str).unwrap_or("?");
            let file = pattern.get("file").and_then(Value::as_str).unwrap_or("");
            let location = if file.is_empty() { String::new() } else { format!(" in {file}") };

            match pattern.get("resolution") {
                Some(resolution) if !resolution.is_null() => {
                    let res_tool = resolution.get("tool").and_then(Value::as_str).unwrap_or("?");
                    let res_file = resolution.get("file").and_then(Value::as_str).unwrap_or("");
                    let res_location =
                        if res_file.is_empty() { String::new() } else { format!(" on {res_file}") };
                    results.push(format!(
                        "{error_type}{location} ({tool}) → 해결: {res_tool}{res_location}"
                    ));
                }
                _ if error_type != "unknown" => {
                    results.push(format!("{error_type}{location} ({tool}) → 해결: 미확인"));
                }
                _ => {}
            }
        }
        if results.len() >= 3 {
            break;
        }
    }
    results.truncate(3);
    results
}

fn autopilot_block(root: &Path) -> String {
    let Some(state) = read_autopilot_state(root) else {
        return String::new();
    };
    let mut out = String::from("\n━━━ AUTOPILOT MODE ACTIVE ━━━\n");
    let workflow = if state.workflow_name.is_empty() { "N/A" } else { &state.workflow_name };
    let _ = writeln!(out, "워크플로우: {workflow}");
    let _ = writeln!(out, "현재 단계: Step {}", state.current_step);
    if !state.auto_approved_steps.is_empty() {
        let _ = writeln!(out, "자동 승인된 단계: {:?}", state.auto_approved_steps);
    }
    out.push('\n');
    out.push_str("■ AUTOPILOT EXECUTION RULES (MANDATORY):\n");
    out.push_str("  1. EVERY step must be FULLY executed — NO step skipping\n");
    out.push_str("  2. EVERY output must be COMPLETE — NO abbreviation\n");
    out.push_str("  3. (human) steps: auto-approve with QUALITY-MAXIMIZING default\n");
    out.push_str("  4. (hook) exit code 2: STILL BLOCKS — autopilot does NOT override\n");
    out.push_str("  5. BEFORE advancing: verify output EXISTS + NON-EMPTY → record in SOT\n");

    let schema_warnings = validate_sot_schema(&state);
    if !schema_warnings.is_empty() {
        out.push('\n');
        out.push_str("■ SOT SCHEMA VALIDATION:\n");
        for warning in schema_warnings {
            let _ = writeln!(out, "  [WARN] {warning}");
        }
    }

    if !state.outputs.is_empty() {
        out.push('\n');
        out.push_str("■ PREVIOUS STEP OUTPUT VALIDATION:\n");
        let mut steps: Vec<i64> = state
            .outputs
            .keys()
            .filter_map(|k| k.strip_prefix("step-").and_then(|r| r.parse().ok()))
            .collect();
        steps.sort_unstable();
        steps.dedup();
        for step in steps {
            let (ok, reason) = validate_step_output(root, step, &state.outputs);
            let mark = if ok { "[OK]" } else { "[FAIL]" };
            let _ = writeln!(out, "  {mark} {reason}");
        }
    }
    out
}

/// ULW rules are injected only when the same logical session continues
/// (clear/compact/resume); a fresh startup implicitly deactivates ULW.
fn ulw_block(source: &str, snapshot_content: &str) -> String {
    if source == "startup" {
        return String::new();
    }
    if !snapshot_content.contains("ULW 상태") && !snapshot_content.contains("Ultrawork Mode") {
        return String::new();
    }
    let mut out = String::from("\n━━━ ULTRAWORK (ULW) MODE ACTIVE ━━━\n\n");
    out.push_str("■ ULW EXECUTION RULES (MANDATORY):\n");
    out.push_str("  1. Sisyphus Mode — 모든 Task가 100% 완료될 때까지 멈추지 않음\n");
    out.push_str("  2. Auto Task Tracking — 요청을 TaskCreate로 분해, TaskUpdate로 추적, TaskList로 검증\n");
    out.push_str("  3. Error Recovery — 에러 발생 시 대안 시도, 대안도 실패하면 사용자에게 보고\n");
    out.push_str("  4. No Partial Completion — '일부만 완료'는 미완료와 동일, 전체 완료까지 계속\n");
    out.push_str("  5. Progress Reporting — 각 Task 완료 시 TaskUpdate로 상태 갱신\n");
    out
}
