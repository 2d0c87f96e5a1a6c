//! Seven-phase quality-preserving snapshot compression.
//!
//! Phases run in a fixed order, cheapest information loss first. After every
//! phase the size is rechecked and compression stops as soon as the budget
//! is met. The final document carries a single-line audit comment naming the
//! phases that ran and the bytes each removed; the forensic trail for
//! quality regressions.

use crate::IMMORTAL_MARKER_PREFIX;

/// Characters reserved for the audit trailer appended after compression.
const AUDIT_RESERVE: usize = 200;
/// Characters reserved for the hard-truncate notice.
const NOTICE_RESERVE: usize = 100;
/// Visible notice emitted by the last-resort truncate.
const TRUNCATE_NOTICE: &str = "\n⚠️ snapshot compressed — 비-IMMORTAL 섹션이 잘렸습니다.\n";

/// Commands section keeps this many leading items.
const COMMANDS_HEAD: usize = 3;
/// ...and this many trailing items.
const COMMANDS_TAIL: usize = 5;
/// Work-log section keeps this many trailing items.
const WORKLOG_KEEP: usize = 10;

/// Per-phase removal ledger.
#[derive(Debug, Clone, Default)]
pub struct CompressionAudit {
    /// (phase name, characters removed), in execution order.
    pub phases: Vec<(&'static str, usize)>,
    pub final_chars: usize,
}

impl CompressionAudit {
    /// Single-line machine-readable trailer.
    pub fn trailer(&self, budget: usize) -> String {
        let phases = self
            .phases
            .iter()
            .map(|(name, removed)| format!("{name}:{removed}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "\n<!-- compression-audit: {phases} | final:{}ch/{budget}ch -->\n",
            self.final_chars
        )
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Run the phase sequence until `text` fits in `budget` (minus the audit
/// reserve). Returns the compressed text and the audit.
pub fn compress_to_budget(text: &str, budget: usize) -> (String, CompressionAudit) {
    let target = budget.saturating_sub(AUDIT_RESERVE);
    let mut audit = CompressionAudit::default();
    let mut current = text.to_string();

    type PhaseFn = fn(&str) -> String;
    let phases: &[(&'static str, PhaseFn)] = &[
        ("dedup", phase_dedup),
        ("commands", phase_commands),
        ("worklog", phase_worklog),
        ("stats", phase_stats),
        ("gitdetail", phase_git_detail),
        ("responses", phase_responses),
    ];

    for (name, phase) in phases {
        let before = char_len(&current);
        current = phase(&current);
        let after = char_len(&current);
        audit.phases.push((name, before.saturating_sub(after)));
        if after <= target {
            audit.final_chars = after;
            return (current, audit);
        }
    }

    let before = char_len(&current);
    current = phase_hard_truncate(&current, target.saturating_sub(NOTICE_RESERVE));
    let after = char_len(&current);
    audit.phases.push(("hardcut", before.saturating_sub(after)));
    audit.final_chars = after;
    (current, audit)
}

/// Phase 1: drop consecutive identical list items.
fn phase_dedup(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut prev: Option<&str> = None;
    for line in text.lines() {
        let is_item = line.starts_with("- ") || line.starts_with("| ");
        if is_item && prev == Some(line) {
            continue;
        }
        prev = Some(line);
        out.push(line);
    }
    rejoin(out)
}

/// Locate a `## `-headed section, returning (start, end) line indexes of its
/// body. The section ends at the next `## ` header or IMMORTAL marker.
fn section_bounds(lines: &[&str], header: &str) -> Option<(usize, usize)> {
    let start = lines.iter().position(|l| l.starts_with(header))?;
    let mut end = lines.len();
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.starts_with("## ") || line.trim_start().starts_with(IMMORTAL_MARKER_PREFIX) {
            end = start + 1 + offset;
            break;
        }
    }
    Some((start, end))
}

/// Phase 2: commands section keeps first 3 + last 5 with an omission marker.
fn phase_commands(text: &str) -> String {
    reduce_items(text, "## 실행된 명령", |items| {
        if items.len() <= COMMANDS_HEAD + COMMANDS_TAIL {
            return None;
        }
        let omitted = items.len() - COMMANDS_HEAD - COMMANDS_TAIL;
        let mut kept: Vec<String> = items[..COMMANDS_HEAD].iter().map(|s| s.to_string()).collect();
        kept.push(format!("…{omitted}개 항목 생략…"));
        kept.extend(items[items.len() - COMMANDS_TAIL..].iter().map(|s| s.to_string()));
        Some(kept)
    })
}

/// Phase 3: work-log section keeps only the last 10 items.
fn phase_worklog(text: &str) -> String {
    reduce_items(text, "## 작업 로그 요약", |items| {
        if items.len() <= WORKLOG_KEEP {
            return None;
        }
        Some(
            items[items.len() - WORKLOG_KEEP..]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    })
}

fn reduce_items(
    text: &str,
    header: &str,
    reduce: impl FnOnce(&[&str]) -> Option<Vec<String>>,
) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some((start, end)) = section_bounds(&lines, header) else {
        return text.to_string();
    };

    let items: Vec<&str> = lines[start + 1..end]
        .iter()
        .copied()
        .filter(|l| l.starts_with("- "))
        .collect();
    let Some(kept) = reduce(&items) else {
        return text.to_string();
    };

    let mut out: Vec<String> = lines[..start + 1].iter().map(|s| s.to_string()).collect();
    out.push(String::new());
    out.extend(kept);
    out.push(String::new());
    out.extend(lines[end..].iter().map(|s| s.to_string()));
    out.join("\n") + "\n"
}

/// Phase 4: the statistics section is fully regeneratable; remove it.
fn phase_stats(text: &str) -> String {
    remove_section(text, "## 대화 통계")
}

fn remove_section(text: &str, header: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some((start, end)) = section_bounds(&lines, header) else {
        return text.to_string();
    };
    let mut out: Vec<&str> = lines[..start].to_vec();
    out.extend(&lines[end..]);
    rejoin(out)
}

/// Phase 5: drop the git diff-detail subsection, keeping stat + commits.
fn phase_git_detail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(start) = lines.iter().position(|l| l.starts_with("### Diff 상세")) else {
        return text.to_string();
    };
    let mut end = lines.len();
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.starts_with("## ")
            || line.starts_with("### ")
            || line.trim_start().starts_with(IMMORTAL_MARKER_PREFIX)
        {
            end = start + 1 + offset;
            break;
        }
    }
    let mut out: Vec<&str> = lines[..start].to_vec();
    out.extend(&lines[end..]);
    rejoin(out)
}

/// Structural tokens that make a response worth head+tail preservation.
fn has_structure(text: &str) -> bool {
    text.contains("```")
        || text.lines().any(|l| l.starts_with('#') || l.starts_with('|'))
        || ["Done", "PASS", "FAIL", "TODO"].iter().any(|m| text.contains(m))
}

/// Phase 6: structure-aware compression of each top response over 500 chars.
fn phase_responses(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some((start, end)) = section_bounds(&lines, "## Claude 핵심 응답") else {
        return text.to_string();
    };

    let body = lines[start + 1..end].join("\n");
    let mut new_body = String::new();
    for block in body.split("### 응답") {
        if block.trim().is_empty() {
            continue;
        }
        new_body.push_str("### 응답");
        if char_len(block) > 500 {
            let (head, tail, marker) = if has_structure(block) {
                (300, 200, "…[구조 보존 압축]…")
            } else {
                (200, 100, "…[압축]…")
            };
            let chars: Vec<char> = block.chars().collect();
            let head_str: String = chars[..head.min(chars.len())].iter().collect();
            let tail_str: String = chars[chars.len().saturating_sub(tail)..].iter().collect();
            new_body.push_str(&head_str);
            new_body.push('\n');
            new_body.push_str(marker);
            new_body.push('\n');
            new_body.push_str(&tail_str);
        } else {
            new_body.push_str(block);
        }
        new_body.push('\n');
    }

    let mut out: Vec<String> = lines[..start + 1].iter().map(|s| s.to_string()).collect();
    out.push(new_body);
    out.extend(lines[end..].iter().map(|s| s.to_string()));
    out.join("\n") + "\n"
}

/// Phase 7, absolute last resort: keep all IMMORTAL text plus as much
/// non-IMMORTAL prefix as fits.
///
/// Boundary detection is marker-first: the partition is entered on each
/// IMMORTAL marker and left on the next `## ` header that is *not* the
/// marker's own; so a non-IMMORTAL section between two IMMORTAL sections
/// cannot flip the following IMMORTALs into "other".
fn phase_hard_truncate(text: &str, target: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut is_immortal = vec![false; lines.len()];
    let mut in_immortal = false;
    let mut pending_own_header = false;

    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with(IMMORTAL_MARKER_PREFIX) {
            in_immortal = true;
            pending_own_header = true;
        } else if line.starts_with("## ") {
            if pending_own_header {
                pending_own_header = false;
            } else {
                in_immortal = false;
            }
        }
        is_immortal[idx] = in_immortal;
    }

    let immortal_chars: usize = lines
        .iter()
        .zip(&is_immortal)
        .filter(|(_, im)| **im)
        .map(|(l, _)| char_len(l) + 1)
        .sum();

    if immortal_chars >= target {
        // IMMORTAL alone overflows: truncate it too, notice stays visible.
        let kept: Vec<&str> = lines
            .iter()
            .zip(&is_immortal)
            .filter(|(_, im)| **im)
            .map(|(l, _)| *l)
            .collect();
        let mut doc = kept.join("\n");
        let notice_len = char_len(TRUNCATE_NOTICE);
        doc = doc.chars().take(target.saturating_sub(notice_len)).collect();
        doc.push_str(TRUNCATE_NOTICE);
        return doc;
    }

    let mut remaining = target.saturating_sub(immortal_chars + char_len(TRUNCATE_NOTICE));
    let mut truncated = false;
    let mut out: Vec<&str> = Vec::new();
    for (line, immortal) in lines.iter().zip(&is_immortal) {
        if *immortal {
            out.push(line);
            continue;
        }
        let cost = char_len(line) + 1;
        if !truncated && cost <= remaining {
            remaining -= cost;
            out.push(line);
        } else {
            truncated = true;
        }
    }

    let mut doc = out.join("\n");
    doc.push_str(TRUNCATE_NOTICE);
    doc
}

fn rejoin(lines: Vec<&str>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any document compresses to within budget, and IMMORTAL bodies
        /// survive unless the truncation notice is shown.
        #[test]
        fn compressed_fits_budget(filler_lines in 10usize..400, budget in 500usize..4000) {
            let text = format!(
                "<!-- IMMORTAL: core -->\n## 핵심\n\ncore-fact\n\n## 일반\n\n{}\n",
                (0..filler_lines).map(|i| format!("filler number {i}")).collect::<Vec<_>>().join("\n")
            );
            let (out, audit) = compress_to_budget(&text, budget);
            let total = out.chars().count() + audit.trailer(budget).chars().count();
            prop_assert!(total <= budget + 220, "total {total} over budget {budget}");
            prop_assert!(out.contains("core-fact") || out.contains("snapshot compressed"));
        }
    }
}
