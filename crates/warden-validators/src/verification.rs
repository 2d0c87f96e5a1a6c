//! Verification-log validation (V1a–V1c).

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Verification logs must hold at least this many bytes.
pub const VERIFICATION_MIN_BYTES: u64 = 100;

/// Checklist form: `- [x] criterion ... PASS` / `- criterion: FAIL`.
static RE_CHECKLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*-\s*(?:\[[ xX]\]\s*)?(.+?)\s*[:：-]\s*(PASS|FAIL)\s*$")
        .expect("checklist regex")
});
/// Table form: `| criterion | PASS |`.
static RE_TABLE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\|\s*([^|\n]+?)\s*\|\s*(PASS|FAIL)\s*\|").expect("table regex")
});
/// Overall verdict line.
static RE_OVERALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^(?:overall|verdict|전체|결과)\s*[:：]\s*(PASS|FAIL)").expect("overall regex")
});

/// Verification log path for a step.
pub fn verification_path(project_dir: &Path, step: u32) -> PathBuf {
    project_dir
        .join("verification-logs")
        .join(format!("step-{step}-verification.md"))
}

/// Per-criterion results parsed from either format. Table header/separator
/// rows are skipped.
pub fn extract_criteria(content: &str) -> Vec<(String, bool)> {
    let mut criteria: Vec<(String, bool)> = Vec::new();
    for cap in RE_CHECKLIST.captures_iter(content) {
        criteria.push((cap[1].trim().to_string(), &cap[2] == "PASS"));
    }
    for cap in RE_TABLE_ROW.captures_iter(content) {
        let name = cap[1].trim().to_string();
        if name.contains("---") || name.eq_ignore_ascii_case("criterion") || name.eq_ignore_ascii_case("기준") {
            continue;
        }
        criteria.push((name, &cap[2] == "PASS"));
    }
    criteria
}

/// V1a–V1c: existence+size, per-criterion results present, and logical
/// consistency (any criterion FAIL ⇒ overall FAIL).
pub fn validate_verification_log(project_dir: &Path, step: u32) -> (bool, Vec<String>) {
    let path = verification_path(project_dir, step);
    let mut warnings = Vec::new();

    let Some(content) = warden_fs::read_opt(&path) else {
        return (
            false,
            vec![format!("V1a FAIL: verification log missing: {}", path.display())],
        );
    };
    if (content.len() as u64) < VERIFICATION_MIN_BYTES {
        warnings.push(format!(
            "V1a FAIL: verification log under {VERIFICATION_MIN_BYTES} bytes ({})",
            content.len()
        ));
    }

    let criteria = extract_criteria(&content);
    if criteria.is_empty() {
        warnings.push("V1b FAIL: no per-criterion PASS/FAIL entries found".to_string());
    }

    let any_fail = criteria.iter().any(|(_, pass)| !pass);
    let overall = RE_OVERALL.captures(&content).map(|cap| cap[1].to_string());
    match (&overall, any_fail) {
        (Some(verdict), true) if verdict == "PASS" => {
            let failed: Vec<&str> = criteria
                .iter()
                .filter(|(_, pass)| !pass)
                .map(|(name, _)| name.as_str())
                .collect();
            warnings.push(format!(
                "V1c FAIL: overall PASS but criteria failed: {}",
                failed.join(", ")
            ));
        }
        (None, _) if !criteria.is_empty() => {
            warnings.push("V1c FAIL: no overall PASS/FAIL verdict".to_string());
        }
        _ => {}
    }

    (warnings.is_empty(), warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_log(dir: &Path, step: u32, content: &str) {
        let path = verification_path(dir, step);
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, content).expect("write");
    }

    const CHECKLIST_LOG: &str = "\
# Verification — step 3

- [x] compiles without warnings: PASS
- [x] all endpoints return JSON: PASS
- [ ] handles empty payload: PASS

Overall: PASS

padding so the file clears the minimum size threshold easily.
";

    #[test]
    fn checklist_format_passes() {
        let td = tempdir().expect("tempdir");
        write_log(td.path(), 3, CHECKLIST_LOG);
        let (valid, warnings) = validate_verification_log(td.path(), 3);
        assert!(valid, "{warnings:?}");
    }

    #[test]
    fn table_format_skips_header_rows() {
        let td = tempdir().expect("tempdir");
        let log = "\
# Verification — step 3

| Criterion | Result |
|---|---|
| compiles | PASS |
| tests green | PASS |

Overall: PASS

padding padding padding padding padding padding padding.
";
        write_log(td.path(), 3, log);
        let (valid, warnings) = validate_verification_log(td.path(), 3);
        assert!(valid, "{warnings:?}");

        let criteria = extract_criteria(log);
        assert_eq!(criteria.len(), 2);
    }

    #[test]
    fn criterion_fail_with_overall_pass_is_inconsistent() {
        let td = tempdir().expect("tempdir");
        let log = CHECKLIST_LOG.replace("handles empty payload: PASS", "handles empty payload: FAIL");
        write_log(td.path(), 3, &log);
        let (valid, warnings) = validate_verification_log(td.path(), 3);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("V1c FAIL") && w.contains("handles empty payload")));
    }

    #[test]
    fn criterion_fail_with_overall_fail_is_consistent() {
        let td = tempdir().expect("tempdir");
        let log = CHECKLIST_LOG
            .replace("handles empty payload: PASS", "handles empty payload: FAIL")
            .replace("Overall: PASS", "Overall: FAIL");
        write_log(td.path(), 3, &log);
        let (valid, warnings) = validate_verification_log(td.path(), 3);
        assert!(valid, "{warnings:?}");
    }

    #[test]
    fn missing_log_fails_v1a() {
        let td = tempdir().expect("tempdir");
        let (valid, warnings) = validate_verification_log(td.path(), 7);
        assert!(!valid);
        assert!(warnings[0].contains("V1a FAIL"));
    }

    #[test]
    fn empty_criteria_fail_v1b() {
        let td = tempdir().expect("tempdir");
        write_log(td.path(), 3, &"no criteria here, just prose. ".repeat(10));
        let (valid, warnings) = validate_verification_log(td.path(), 3);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("V1b FAIL")));
    }
}
