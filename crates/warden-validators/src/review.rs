//! Adversarial-review validation (R1–R5), verdict parsing, pACS delta and
//! review→translation sequence checks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::pacs::{extract_dimensions, extract_final_score};
use crate::translation::discover_translation;

/// Review reports must hold at least this many bytes.
pub const REVIEW_MIN_BYTES: u64 = 100;
/// Generator/reviewer score gaps at or above this need reconciliation.
pub const PACS_DELTA_THRESHOLD: i64 = 15;

/// Sections every review report must contain.
pub const REQUIRED_SECTIONS: &[&str] =
    &["Pre-mortem", "Issues Found", "Independent pACS", "Verdict"];

static RE_VERDICT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)Verdict\s*[:：]\s*(PASS|FAIL)").expect("verdict regex"));
static RE_ISSUE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\|[^|\n]+\|[^|\n]+\|").expect("issue row regex")
});

/// Review report path for a step.
pub fn review_path(project_dir: &Path, step: u32) -> PathBuf {
    project_dir
        .join("review-logs")
        .join(format!("step-{step}-review.md"))
}

/// R1–R5: existence, size, required sections, explicit verdict, at least
/// one issue row (rubber-stamp prevention).
pub fn validate_review_output(
    project_dir: &Path,
    step: u32,
) -> (bool, String, usize, Vec<String>) {
    let path = review_path(project_dir, step);
    let mut warnings = Vec::new();

    let Some(content) = warden_fs::read_opt(&path) else {
        return (
            false,
            "MISSING".to_string(),
            0,
            vec![format!("R1 FAIL: review report missing: {}", path.display())],
        );
    };
    if (content.len() as u64) < REVIEW_MIN_BYTES {
        warnings.push(format!(
            "R2 FAIL: review report under {REVIEW_MIN_BYTES} bytes ({})",
            content.len()
        ));
    }
    for section in REQUIRED_SECTIONS {
        if !content.contains(section) {
            warnings.push(format!("R3 FAIL: required section missing: {section}"));
        }
    }

    let verdict = RE_VERDICT
        .captures(&content)
        .map(|cap| cap[1].to_string())
        .unwrap_or_else(|| {
            warnings.push("R4 FAIL: no explicit PASS/FAIL verdict".to_string());
            "UNKNOWN".to_string()
        });

    let issues_count = issue_rows(&content);
    if issues_count == 0 {
        warnings.push("R5 FAIL: no issue rows found (rubber-stamp prevention)".to_string());
    }

    let valid = warnings.is_empty();
    (valid, verdict, issues_count, warnings)
}

/// Count data rows in the Issues Found section's table, skipping header
/// and separator rows.
fn issue_rows(content: &str) -> usize {
    let Some(section_start) = content.find("Issues Found") else {
        return 0;
    };
    let section = &content[section_start..];
    let end = section[12..]
        .find("\n## ")
        .map(|i| i + 12)
        .unwrap_or(section.len());
    let section = &section[..end];

    RE_ISSUE_ROW
        .find_iter(section)
        .map(|m| m.as_str())
        .filter(|row| !row.contains("---") && !row.to_lowercase().contains("severity"))
        .count()
}

/// Parsed verdict details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub verdict: String,
    pub critical_count: usize,
    pub warning_count: usize,
    pub suggestion_count: usize,
    pub reviewer_pacs: Option<i64>,
    pub pacs_dimensions: BTreeMap<String, i64>,
}

/// Regex-extract verdict, severity counts and reviewer pACS from a report.
pub fn parse_review_verdict(path: &Path) -> ReviewVerdict {
    let Some(content) = warden_fs::read_opt(path) else {
        return ReviewVerdict {
            verdict: "MISSING".to_string(),
            ..ReviewVerdict::default()
        };
    };

    let verdict = RE_VERDICT
        .captures(&content)
        .map(|cap| cap[1].to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let count_rows = |severity: &str| {
        RE_ISSUE_ROW
            .find_iter(&content)
            .filter(|m| m.as_str().contains(severity))
            .count()
    };

    ReviewVerdict {
        verdict,
        critical_count: count_rows("Critical"),
        warning_count: count_rows("Warning"),
        suggestion_count: count_rows("Suggestion"),
        reviewer_pacs: extract_final_score(&content).ok().flatten(),
        pacs_dimensions: extract_dimensions(&content).unwrap_or_default(),
    }
}

/// Generator-vs-reviewer score comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacsDelta {
    pub generator_score: Option<i64>,
    pub reviewer_score: Option<i64>,
    pub delta: Option<i64>,
    pub needs_reconciliation: bool,
}

/// `|generator − reviewer|`; a delta ≥ 15 triggers reconciliation.
pub fn calculate_pacs_delta(project_dir: &Path, step: u32) -> PacsDelta {
    let generator_path = crate::pacs::pacs_log_path(project_dir, step, "general");
    let generator_score = warden_fs::read_opt(&generator_path)
        .and_then(|content| extract_final_score(&content).ok().flatten());
    let reviewer_score = parse_review_verdict(&review_path(project_dir, step)).reviewer_pacs;

    let delta = match (generator_score, reviewer_score) {
        (Some(g), Some(r)) => Some((g - r).abs()),
        _ => None,
    };

    PacsDelta {
        generator_score,
        reviewer_score,
        delta,
        needs_reconciliation: delta.is_some_and(|d| d >= PACS_DELTA_THRESHOLD),
    }
}

/// Review→translation sequence: the translation must be newer than (or as
/// new as) the review report, and the review verdict must be PASS.
pub fn validate_review_sequence(project_dir: &Path, step: u32) -> (bool, Option<String>) {
    let Some(translation) = discover_translation(project_dir, step) else {
        // No translation produced yet; nothing to sequence-check.
        return (true, None);
    };

    let review = review_path(project_dir, step);
    if !review.exists() {
        return (
            false,
            Some(format!(
                "SEQ FAIL: step {step} translation exists but review report is missing"
            )),
        );
    }

    let verdict = parse_review_verdict(&review).verdict;
    if verdict != "PASS" {
        return (
            false,
            Some(format!(
                "SEQ FAIL: step {step} translation produced while review verdict is {verdict}"
            )),
        );
    }

    let review_mtime = std::fs::metadata(&review).and_then(|m| m.modified()).ok();
    let translation_mtime = std::fs::metadata(&translation).and_then(|m| m.modified()).ok();
    if let (Some(review_time), Some(translation_time)) = (review_mtime, translation_mtime) {
        if translation_time < review_time {
            return (
                false,
                Some(format!(
                    "SEQ FAIL: step {step} translation predates the review report"
                )),
            );
        }
    }
    (true, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GOOD_REVIEW: &str = "\
# Review — step 4

## Pre-mortem

Looked for likely failure modes first.

## Issues Found

| Severity | Issue |
|---|---|
| Critical | Off-by-one in pagination |
| Warning | Unclear naming in helper |
| Suggestion | Add a doc comment |

## Independent pACS

| F | 80 |
| C | 75 |
| L | 85 |

pACS = min(F, C, L) = 75

## Verdict

Verdict: PASS
";

    fn write_review(dir: &Path, step: u32, content: &str) -> PathBuf {
        let path = review_path(dir, step);
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, content).expect("write");
        path
    }

    #[test]
    fn complete_review_passes_all_checks() {
        let td = tempdir().expect("tempdir");
        write_review(td.path(), 4, GOOD_REVIEW);
        let (valid, verdict, issues, warnings) = validate_review_output(td.path(), 4);
        assert!(valid, "{warnings:?}");
        assert_eq!(verdict, "PASS");
        assert_eq!(issues, 3);
    }

    #[test]
    fn missing_sections_are_each_flagged() {
        let td = tempdir().expect("tempdir");
        write_review(td.path(), 4, &"content without sections ".repeat(10));
        let (valid, _, _, warnings) = validate_review_output(td.path(), 4);
        assert!(!valid);
        let joined = warnings.join("\n");
        for section in REQUIRED_SECTIONS {
            assert!(joined.contains(section), "missing flag for {section}");
        }
        assert!(joined.contains("R4 FAIL"));
        assert!(joined.contains("R5 FAIL"));
    }

    #[test]
    fn rubber_stamp_without_issue_rows_fails_r5() {
        let td = tempdir().expect("tempdir");
        let review = GOOD_REVIEW
            .replace("| Critical | Off-by-one in pagination |\n", "")
            .replace("| Warning | Unclear naming in helper |\n", "")
            .replace("| Suggestion | Add a doc comment |\n", "");
        write_review(td.path(), 4, &review);
        let (valid, _, issues, warnings) = validate_review_output(td.path(), 4);
        assert!(!valid);
        assert_eq!(issues, 0);
        assert!(warnings.iter().any(|w| w.contains("R5 FAIL")));
    }

    #[test]
    fn verdict_parser_counts_severities_and_pacs() {
        let td = tempdir().expect("tempdir");
        let path = write_review(td.path(), 4, GOOD_REVIEW);
        let verdict = parse_review_verdict(&path);
        assert_eq!(verdict.verdict, "PASS");
        assert_eq!(verdict.critical_count, 1);
        assert_eq!(verdict.warning_count, 1);
        assert_eq!(verdict.suggestion_count, 1);
        assert_eq!(verdict.reviewer_pacs, Some(75));
        assert_eq!(verdict.pacs_dimensions.get("C"), Some(&75));
    }

    #[test]
    fn delta_triggers_reconciliation_at_fifteen() {
        let td = tempdir().expect("tempdir");
        write_review(td.path(), 4, GOOD_REVIEW);
        let pacs_path = crate::pacs::pacs_log_path(td.path(), 4, "general");
        std::fs::create_dir_all(pacs_path.parent().unwrap()).expect("mkdir");
        std::fs::write(&pacs_path, "pACS = min(F, C, L) = 90\n| F | 90 |\n| C | 92 |\n| L | 95 |\n")
            .expect("write");

        let delta = calculate_pacs_delta(td.path(), 4);
        assert_eq!(delta.generator_score, Some(90));
        assert_eq!(delta.reviewer_score, Some(75));
        assert_eq!(delta.delta, Some(15));
        assert!(delta.needs_reconciliation);
    }

    #[test]
    fn sequence_fails_on_fail_verdict_with_translation() {
        let td = tempdir().expect("tempdir");
        write_review(td.path(), 4, &GOOD_REVIEW.replace("Verdict: PASS", "Verdict: FAIL"));

        // Sibling translation next to the declared English output.
        std::fs::create_dir_all(td.path().join(".claude")).expect("mkdir");
        std::fs::write(
            td.path().join(".claude/state.yaml"),
            "outputs:\n  step-4: outputs/step-4.md\n",
        )
        .expect("write");
        std::fs::create_dir_all(td.path().join("outputs")).expect("mkdir");
        std::fs::write(td.path().join("outputs/step-4.md"), "english").expect("write");
        std::fs::write(td.path().join("outputs/step-4.ko.md"), "korean").expect("write");

        let (valid, warning) = validate_review_sequence(td.path(), 4);
        assert!(!valid);
        assert!(warning.expect("warning").contains("step 4"));

        // Flip to PASS and make the review older than the translation.
        write_review(td.path(), 4, GOOD_REVIEW);
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        std::fs::File::open(review_path(td.path(), 4))
            .expect("open")
            .set_modified(old)
            .expect("mtime");

        let (valid, warning) = validate_review_sequence(td.path(), 4);
        assert!(valid, "{warning:?}");
    }

    #[test]
    fn sequence_without_translation_is_clean() {
        let td = tempdir().expect("tempdir");
        let (valid, warning) = validate_review_sequence(td.path(), 9);
        assert!(valid);
        assert!(warning.is_none());
    }
}
