//! Brief-summary extraction from a rendered snapshot.
//!
//! The restore hook does not re-parse the transcript; it reads the latest
//! snapshot and pulls out a handful of labeled facts for the pointer
//! message. Extraction is purely positional against the known section
//! headers.

/// One labeled fact pulled from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryItem {
    pub label: &'static str,
    pub content: String,
}

fn take(label: &'static str, content: &str, cap: usize) -> SummaryItem {
    SummaryItem {
        label,
        content: content.chars().take(cap).collect(),
    }
}

/// Walk the snapshot and extract labeled facts for the restore pointer.
pub fn extract_brief_summary(content: &str) -> Vec<SummaryItem> {
    let mut items: Vec<SummaryItem> = Vec::new();
    let mut current_section = "";
    let mut files_count = 0usize;
    let mut reads_count = 0usize;
    let mut have_task = false;

    for raw in content.lines() {
        if let Some(rest) = raw.strip_prefix("## ") {
            current_section = match rest {
                _ if rest.starts_with("현재 작업") => "task",
                _ if rest.starts_with("결정론적 완료 상태") => "completion",
                _ if rest.starts_with("Git 변경 상태") => "git",
                _ if rest.starts_with("수정된 파일") => "files",
                _ if rest.starts_with("참조된 파일") => "reads",
                _ if rest.starts_with("대화 통계") => "stats",
                _ => "",
            };
            continue;
        }

        let line = raw.trim();
        if line.is_empty() || line.starts_with('>') {
            continue;
        }

        match current_section {
            "task" => {
                if let Some(instruction) = line.strip_prefix("**마지막 사용자 지시:**") {
                    items.push(take("latest-instruction", instruction.trim(), 200));
                } else if !have_task && !line.starts_with("<!--") {
                    items.push(take("current-task", line, 200));
                    have_task = true;
                }
            }
            "completion" => {
                if line.starts_with("- ") && (line.contains("성공") || line.contains("실패")) {
                    items.push(take("completion", line, 150));
                }
                if line.contains("← ERROR") {
                    items.push(take("error", line, 200));
                }
            }
            "git" => {
                if line.starts_with("M ")
                    || line.starts_with("A ")
                    || line.starts_with("??")
                    || raw.starts_with(" M")
                {
                    items.push(take("git", line, 100));
                }
            }
            "files" => {
                if line.starts_with("| `") || line.starts_with("### `") {
                    files_count += 1;
                    if let Some(path) = line.split('`').nth(1) {
                        if !path.is_empty() {
                            items.push(take("modified-path", path, 200));
                        }
                    }
                }
            }
            "reads" => {
                if line.starts_with("| `") {
                    reads_count += 1;
                }
            }
            "stats" => {
                if line.starts_with("- ") {
                    items.push(take("stats", line, 100));
                }
            }
            _ => {
                if line.contains("← ERROR") {
                    items.push(take("error", line, 200));
                }
            }
        }
    }

    if content.contains("## Autopilot 상태") {
        if let Some(step_line) = content.lines().find(|l| l.contains("현재 단계:")) {
            items.push(take("autopilot", step_line.trim(), 100));
        }
    }
    if content.contains("ULW 상태") || content.contains("Ultrawork Mode") {
        items.push(take("ulw", "ULW (Ultrawork) Mode Active", 100));
    }
    if content.contains("## Agent Team 상태") {
        if let Some(team_line) = content
            .lines()
            .find(|l| l.contains("Task 호출") || l.to_lowercase().contains("tasks_pending"))
        {
            items.push(take("team", team_line.trim(), 100));
        }
    }

    if files_count > 0 {
        items.push(take("files-count", &format!("{files_count}개 파일 수정됨"), 100));
    }
    if reads_count > 0 {
        items.push(take("reads-count", &format!("{reads_count}개 파일 참조됨"), 100));
    }
    items
}
