//! Snapshot section assembly in survival-tier order.

use std::fmt::Write as _;
use std::path::Path;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;

use warden_facts::{
    classify_phases, extract_completion_state, extract_decisions, extract_file_operations,
    extract_read_operations, DecisionTier, WorkLogEntry,
};
use warden_git::{capture_git_state, numstat};
use warden_sot::{read_autopilot_state, SotCapture};
use warden_transcript::{
    is_slash_command, is_system_injected, truncate_chars, TranscriptEntry,
};

use crate::{SNAPSHOT_MAX_CHARS, SOT_EXCERPT_CHARS, TASK_EXCERPT_CHARS};

/// Gate directories scanned for the quality-gate section.
const GATE_DIRS: &[(&str, &str)] = &[
    ("verification", "verification-logs"),
    ("pacs", "pacs-logs"),
    ("review", "review-logs"),
];

/// Everything the renderer needs for one snapshot.
pub struct SnapshotInput<'a> {
    pub session_id: &'a str,
    pub trigger: crate::Trigger,
    pub project_dir: &'a Path,
    pub entries: &'a [TranscriptEntry],
    pub work_log: &'a [WorkLogEntry],
    pub sot: Option<&'a SotCapture>,
}

static RE_NEXT_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^(?:next,|now |then |다음으로|이제 ).{0,200}|(?:^|\n)(?:next steps?|다음 단계)\s*[:：].{0,200}")
        .expect("next-step regex")
});
static RE_ULW_REQUEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bulw\b|ultrawork").expect("ulw request regex"));

fn immortal(name: &str, header: &str, body: &str) -> String {
    format!("<!-- IMMORTAL: {name} -->\n## {header}\n\n{}\n\n", body.trim_end())
}

fn section(header: &str, body: &str) -> String {
    format!("## {header}\n\n{}\n\n", body.trim_end())
}

/// Assemble the full snapshot and compress it to budget when needed.
pub fn generate_snapshot(input: &SnapshotInput<'_>) -> String {
    let mut out = String::new();

    let (phase, phase_flow) = classify_phases(input.entries);
    let _ = writeln!(out, "# Context Recovery — Session {}", input.session_id);
    let _ = writeln!(
        out,
        "\n> Saved: {} | Trigger: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        input.trigger.as_str()
    );
    if phase_flow.contains('→') {
        let _ = writeln!(out, "> Phase flow: {phase_flow}");
    } else {
        let _ = writeln!(out, "> Phase: {}", phase.as_str());
    }
    out.push('\n');

    // ── IMMORTAL tier ──
    out.push_str(&current_task_section(input.entries));
    if let Some(next) = next_step_section(input.entries) {
        out.push_str(&next);
    }
    out.push_str(&sot_section(input.sot));
    if let Some(autopilot) = autopilot_section(input.project_dir) {
        out.push_str(&autopilot);
    }
    if let Some(gates) = quality_gate_section(input.project_dir) {
        out.push_str(&gates);
    }
    if let Some(team) = team_section(input.entries) {
        out.push_str(&team);
    }
    if let Some(ulw) = ulw_section(input.entries) {
        out.push_str(&ulw);
    }
    if let Some(decisions) = decisions_section(input.entries) {
        out.push_str(&decisions);
    }
    out.push_str(&resume_section(input));
    out.push_str(&completion_section(input));
    if let Some(git) = git_section(input.project_dir) {
        out.push_str(&git);
    }

    // ── CRITICAL tier ──
    if let Some(files) = modified_files_section(input.entries) {
        out.push_str(&files);
    }
    if let Some(reads) = referenced_files_section(input.entries) {
        out.push_str(&reads);
    }
    if let Some(history) = user_history_section(input.entries) {
        out.push_str(&history);
    }
    if let Some(responses) = key_responses_section(input.entries) {
        out.push_str(&responses);
    }

    // ── SACRIFICABLE tier ──
    out.push_str(&statistics_section(input.entries));
    if let Some(commands) = commands_section(input.entries) {
        out.push_str(&commands);
    }
    if let Some(worklog) = work_log_section(input.work_log) {
        out.push_str(&worklog);
    }

    if out.chars().count() > SNAPSHOT_MAX_CHARS {
        let (compressed, audit) = crate::compress::compress_to_budget(&out, SNAPSHOT_MAX_CHARS);
        let mut result = compressed;
        result.push_str(&audit.trailer(SNAPSHOT_MAX_CHARS));
        result
    } else {
        out
    }
}

/// First non-command user message verbatim; the latest meaningful user
/// message is appended when it differs.
fn current_task_section(entries: &[TranscriptEntry]) -> String {
    let user_texts: Vec<&str> = entries
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::UserMessage { text, .. }
                if !is_system_injected(text) && !is_slash_command(text) && !text.trim().is_empty() =>
            {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect();

    let mut body = String::new();
    match user_texts.first() {
        Some(first) => {
            body.push_str(&truncate_chars(first.trim(), TASK_EXCERPT_CHARS));
            if let Some(last) = user_texts.last() {
                if user_texts.len() > 1 && last != user_texts.first().unwrap() {
                    let _ = write!(
                        body,
                        "\n\n**마지막 사용자 지시:** {}",
                        truncate_chars(last.trim(), TASK_EXCERPT_CHARS)
                    );
                }
            }
        }
        None => body.push_str("(사용자 메시지 없음)"),
    }
    immortal("current-task", "현재 작업 (Current Task)", &body)
}

/// Look for an explicit forward-looking line in the last assistant texts.
fn next_step_section(entries: &[TranscriptEntry]) -> Option<String> {
    let recent: Vec<&str> = entries
        .iter()
        .rev()
        .filter_map(|e| match e {
            TranscriptEntry::AssistantText { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .take(5)
        .collect();

    for text in recent {
        if let Some(found) = RE_NEXT_STEP.find(text) {
            let line = found.as_str().trim().trim_start_matches(':').trim();
            if line.len() > 8 {
                return Some(immortal("next-step", "다음 단계 (Next Step)", line));
            }
        }
    }
    None
}

fn sot_section(sot: Option<&SotCapture>) -> String {
    let body = match sot {
        Some(capture) => format!(
            "수정 시각: {}\n\n```yaml\n{}\n```",
            capture.mtime_iso,
            truncate_chars(&capture.content, SOT_EXCERPT_CHARS)
        ),
        None => "SOT 파일 없음".to_string(),
    };
    immortal("sot-state", "SOT 상태 (Workflow State)", &body)
}

fn autopilot_section(project_dir: &Path) -> Option<String> {
    let state = read_autopilot_state(project_dir)?;
    let mut body = format!(
        "워크플로우: {}\n현재 단계: Step {}",
        if state.workflow_name.is_empty() { "N/A" } else { &state.workflow_name },
        state.current_step
    );
    if !state.auto_approved_steps.is_empty() {
        let _ = write!(body, "\n자동 승인된 단계: {:?}", state.auto_approved_steps);
    }
    Some(immortal("autopilot", "Autopilot 상태", &body))
}

fn quality_gate_section(project_dir: &Path) -> Option<String> {
    let mut lines = Vec::new();
    for (gate, dir) in GATE_DIRS {
        let gate_dir = project_dir.join(dir);
        let Ok(read_dir) = std::fs::read_dir(&gate_dir) else {
            continue;
        };
        let mut max_step: Option<u32> = None;
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(rest) = name.strip_prefix("step-") {
                if let Some(num) = rest.split('-').next().and_then(|n| n.parse::<u32>().ok()) {
                    max_step = Some(max_step.map_or(num, |m| m.max(num)));
                }
            }
        }
        if let Some(step) = max_step {
            let counter = gate_dir.join(format!(".step-{step}-retry-count"));
            let retries = std::fs::read_to_string(&counter)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0);
            lines.push(format!("- {gate}: step {step} 로그 있음, 재시도 {retries}회"));
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(immortal("quality-gates", "품질 게이트 상태", &lines.join("\n")))
}

fn team_section(entries: &[TranscriptEntry]) -> Option<String> {
    let mut agents: Vec<String> = Vec::new();
    let mut count = 0usize;
    for entry in entries {
        if let TranscriptEntry::ToolUse { tool_name, summary, .. } = entry {
            if tool_name == "Task" {
                count += 1;
                // Summary shape: "Task (agent): desc"
                if let Some(agent) = summary
                    .strip_prefix("Task (")
                    .and_then(|rest| rest.split(')').next())
                {
                    if !agent.is_empty() && !agents.contains(&agent.to_string()) {
                        agents.push(agent.to_string());
                    }
                }
            }
        }
    }
    if count == 0 {
        return None;
    }
    let body = format!("- Task 호출: {count}회\n- 에이전트 종류: {}", agents.join(", "));
    Some(immortal("agent-team", "Agent Team 상태", &body))
}

fn ulw_section(entries: &[TranscriptEntry]) -> Option<String> {
    let requested = entries.iter().any(|e| match e {
        TranscriptEntry::UserMessage { text, .. } => {
            !is_system_injected(text) && RE_ULW_REQUEST.is_match(text)
        }
        _ => false,
    });
    if !requested {
        return None;
    }
    Some(immortal("ulw-mode", "ULW 상태", "ULW (Ultrawork) Mode Active"))
}

fn decisions_section(entries: &[TranscriptEntry]) -> Option<String> {
    let decisions = extract_decisions(entries);
    if decisions.is_empty() {
        return None;
    }
    let body = decisions
        .iter()
        .map(|d| {
            let tag = match d.tier {
                DecisionTier::Marker => "명시",
                DecisionTier::BoldLabel => "라벨",
                DecisionTier::Rationale => "근거",
                DecisionTier::ChoiceVerb => "선택",
                DecisionTier::Intent => "의도",
            };
            format!("- [{tag}] {}", truncate_chars(&d.text, 300))
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(immortal("design-decisions", "주요 설계 결정", &body))
}

fn resume_section(input: &SnapshotInput<'_>) -> String {
    let ops = extract_file_operations(input.entries);
    let reads = extract_read_operations(input.entries);
    let stats = numstat(input.project_dir);

    let mut body = String::new();
    body.push_str("수정 중이던 파일:\n");
    if ops.is_empty() {
        body.push_str("- (없음)\n");
    }
    for op in &ops {
        let lines = stats
            .iter()
            .find(|s| op.path.ends_with(&s.path) || s.path.ends_with(&op.path))
            .map(|s| format!(" (+{} −{})", s.added, s.removed))
            .unwrap_or_default();
        let _ = writeln!(body, "- `{}` — {} {}회{lines}", op.path, op.last_tool, op.count);
    }

    if !reads.is_empty() {
        body.push_str("\n참조 파일:\n");
        for read in reads.iter().take(10) {
            let _ = writeln!(body, "- `{}` ({}회)", read.path, read.count);
        }
    }

    let _ = write!(
        body,
        "\n세션: {} | 트리거: {} | 트랜스크립트 엔트리: {}",
        input.session_id,
        input.trigger.as_str(),
        input.entries.len()
    );
    immortal("resume-protocol", "복원 지시", &body)
}

fn completion_section(input: &SnapshotInput<'_>) -> String {
    let state = extract_completion_state(input.entries, input.project_dir);

    let mut body = String::new();
    for (tool, stats) in &state.per_tool {
        if stats.calls > 0 {
            let _ = writeln!(
                body,
                "- {tool}: {}회 호출 → {} 성공, {} 실패",
                stats.calls, stats.success, stats.fail
            );
        }
    }

    if !state.file_verification.is_empty() {
        body.push_str("\n| 파일 | 존재 |\n|---|---|\n");
        for check in &state.file_verification {
            let mark = if check.exists { "✅" } else { "❌" };
            let _ = writeln!(body, "| `{}` | {mark} |", check.path);
        }
    }

    if !state.first_timestamp.is_empty() {
        let _ = write!(
            body,
            "\n타임라인: {} → {}\n",
            state.first_timestamp, state.last_timestamp
        );
    }

    if !state.recent_activities.is_empty() {
        body.push_str("\n최근 도구 활동:\n");
        for activity in &state.recent_activities {
            let suffix = if activity.is_error { " ← ERROR" } else { "" };
            let _ = writeln!(body, "- {}{suffix}", truncate_chars(&activity.summary, 160));
        }
    }
    immortal("completion-state", "결정론적 완료 상태", &body)
}

fn git_section(project_dir: &Path) -> Option<String> {
    let state = capture_git_state(project_dir);
    if !state.captured {
        return None;
    }
    let mut body = String::new();
    let _ = write!(body, "```\n{}\n```\n", state.status.trim_end());
    if !state.diff_stat.is_empty() {
        let _ = write!(body, "\n```\n{}\n```\n", state.diff_stat.trim_end());
    }
    if !state.recent_commits.is_empty() {
        let _ = write!(body, "\n### 최근 커밋\n\n```\n{}\n```\n", state.recent_commits.trim_end());
    }
    if !state.diff.is_empty() {
        let _ = write!(body, "\n### Diff 상세\n\n```diff\n{}\n```\n", state.diff.trim_end());
    }
    Some(immortal("git-state", "Git 변경 상태", &body))
}

fn modified_files_section(entries: &[TranscriptEntry]) -> Option<String> {
    let ops = extract_file_operations(entries);
    if ops.is_empty() {
        return None;
    }
    let mut body = String::from("| 파일 | 도구 | 횟수 | 마지막 작업 |\n|---|---|---|---|\n");
    for op in &ops {
        let _ = writeln!(
            body,
            "| `{}` | {} | {} | {} |",
            op.path,
            op.last_tool,
            op.count,
            truncate_chars(&op.last_summary, 120).replace('|', "\\|")
        );
    }
    for op in &ops {
        if op.details.len() > 1 {
            let _ = write!(body, "\n### `{}`\n\n", op.path);
            for detail in &op.details {
                let _ = writeln!(body, "- {}", truncate_chars(detail, 200));
            }
        }
    }
    Some(section("수정된 파일", &body))
}

fn referenced_files_section(entries: &[TranscriptEntry]) -> Option<String> {
    let reads = extract_read_operations(entries);
    if reads.is_empty() {
        return None;
    }
    let mut body = String::from("| 파일 | 횟수 |\n|---|---|\n");
    for read in &reads {
        let _ = writeln!(body, "| `{}` | {}회 |", read.path, read.count);
    }
    Some(section("참조된 파일", &body))
}

fn user_history_section(entries: &[TranscriptEntry]) -> Option<String> {
    let texts: Vec<&str> = entries
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::UserMessage { text, .. }
                if !is_system_injected(text) && !text.trim().is_empty() =>
            {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect();
    if texts.is_empty() {
        return None;
    }
    let body = texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, truncate_chars(text.trim(), 500)))
        .collect::<Vec<_>>()
        .join("\n");
    Some(section("사용자 요청 이력", &body))
}

/// Structural markers that raise a response's priority score.
const STRUCTURE_MARKERS: &[&str] = &["Done", "PASS", "FAIL", "TODO", "완료", "성공", "실패"];

fn priority_score(text: &str) -> usize {
    let mut score = 0;
    for marker in STRUCTURE_MARKERS {
        score += text.matches(marker).count();
    }
    score += text.lines().filter(|l| l.starts_with('#')).count();
    score += text.lines().filter(|l| l.starts_with('|')).count();
    score += text.matches("```").count();
    if text.len() > 500 {
        score += 1;
    }
    if text.len() > 1000 {
        score += 2;
    }
    score
}

/// Head+tail slicing for very long responses, preserving a marker that says
/// structure was kept.
fn compress_response(text: &str) -> String {
    if text.chars().count() <= 1500 {
        return text.to_string();
    }
    let head: String = text.chars().take(1000).collect();
    let tail: String = {
        let chars: Vec<char> = text.chars().collect();
        chars[chars.len() - 400..].iter().collect()
    };
    format!("{head}\n…[구조 보존 압축]…\n{tail}")
}

fn key_responses_section(entries: &[TranscriptEntry]) -> Option<String> {
    let texts: Vec<(usize, &str)> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            TranscriptEntry::AssistantText { text, .. } if text.trim().len() > 100 => {
                Some((i, text.as_str()))
            }
            _ => None,
        })
        .collect();
    if texts.is_empty() {
        return None;
    }

    // Always keep the last 3 meaningful responses; add the top 5 of the rest
    // by priority score; emit in chronological order.
    let last_three: Vec<usize> = texts.iter().rev().take(3).map(|(i, _)| *i).collect();
    let mut ranked: Vec<(usize, usize)> = texts
        .iter()
        .filter(|(i, _)| !last_three.contains(i))
        .map(|(i, text)| (priority_score(text), *i))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut selected: Vec<usize> = last_three;
    selected.extend(ranked.iter().take(5).map(|(_, i)| *i));
    selected.sort_unstable();
    selected.dedup();

    let mut body = String::new();
    for idx in selected {
        let (_, text) = texts.iter().find(|(i, _)| *i == idx).unwrap();
        let _ = write!(body, "### 응답 (entry {idx})\n\n{}\n\n", compress_response(text.trim()));
    }
    Some(section("Claude 핵심 응답", &body))
}

fn statistics_section(entries: &[TranscriptEntry]) -> String {
    let mut user = 0;
    let mut assistant = 0;
    let mut tool_uses = 0;
    let mut errors = 0;
    for entry in entries {
        match entry {
            TranscriptEntry::UserMessage { .. } => user += 1,
            TranscriptEntry::AssistantText { .. } => assistant += 1,
            TranscriptEntry::ToolUse { .. } => tool_uses += 1,
            TranscriptEntry::ToolResult { is_error: true, .. } => errors += 1,
            _ => {}
        }
    }
    let body = format!(
        "- 전체 엔트리: {}\n- 사용자 메시지: {user}\n- 어시스턴트 메시지: {assistant}\n- 도구 호출: {tool_uses}\n- 에러 결과: {errors}",
        entries.len()
    );
    section("대화 통계", &body)
}

fn commands_section(entries: &[TranscriptEntry]) -> Option<String> {
    let commands: Vec<&str> = entries
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::ToolUse {
                tool_name,
                command: Some(cmd),
                ..
            } if tool_name == "Bash" => Some(cmd.as_str()),
            _ => None,
        })
        .collect();
    if commands.is_empty() {
        return None;
    }
    let body = commands
        .iter()
        .map(|cmd| format!("- `{}`", truncate_chars(cmd, 200)))
        .collect::<Vec<_>>()
        .join("\n");
    Some(section("실행된 명령", &body))
}

fn work_log_section(work_log: &[WorkLogEntry]) -> Option<String> {
    if work_log.is_empty() {
        return None;
    }
    let body = work_log
        .iter()
        .map(|e| format!("- [{}] {}", e.timestamp, truncate_chars(&e.summary, 160)))
        .collect::<Vec<_>>()
        .join("\n");
    Some(section("작업 로그 요약", &body))
}
