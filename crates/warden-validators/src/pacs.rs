//! pACS arithmetic (T9, shared) and pACS log validation (PA1–PA7).
//!
//! pACS is a min-of-dimensions score: the final value must equal the
//! minimum of the reported dimension scores. The arithmetic verifier is
//! shared; translation, verification and review validators all delegate
//! to it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// pACS logs must hold at least this many bytes.
pub const PACS_MIN_BYTES: u64 = 50;
/// Minimum number of dimension scores in a pACS log.
pub const PACS_MIN_DIMENSIONS: usize = 3;
/// Scores below this are the RED zone and block step advancement (PA7).
pub const PACS_RED_THRESHOLD: i64 = 50;
/// Scores at or above this are the GREEN zone.
pub const PACS_GREEN_THRESHOLD: i64 = 70;

/// Dimension rows: `| F | 90 |`, `| Ft | 85 |`; one or two letter code,
/// first uppercase.
static RE_DIMENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\|\s*([A-Z][A-Za-z]?)\s*\|\s*(\d{1,3})\s*\|").expect("dimension regex")
});
/// Explicit min-formula final score: `pACS = min(F, C, L) = 60`.
static RE_FINAL_MIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pACS\s*=\s*min\([^)]*\)\s*=\s*(\d{1,3})").expect("final-min regex")
});
/// Simple final score: `pACS = 60`.
static RE_FINAL_SIMPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pACS\s*=\s*(\d{1,3})\b").expect("final-simple regex"));

/// Extract dimension scores from a pACS log body. A dimension letter that
/// appears twice with different scores makes the log ambiguous.
pub fn extract_dimensions(content: &str) -> Result<BTreeMap<String, i64>, String> {
    let mut dims = BTreeMap::new();
    for cap in RE_DIMENSION.captures_iter(content) {
        let name = cap[1].to_string();
        let score: i64 = cap[2].parse().unwrap_or(-1);
        if let Some(existing) = dims.get(&name) {
            if *existing != score {
                return Err(format!(
                    "ambiguous dimension {name}: {existing} vs {score}"
                ));
            }
        }
        dims.insert(name, score);
    }
    Ok(dims)
}

/// Extract the reported final pACS score, preferring the explicit
/// min-formula form. A bare `pACS = N` with multiple distinct matches is
/// ambiguous.
pub fn extract_final_score(content: &str) -> Result<Option<i64>, String> {
    if let Some(cap) = RE_FINAL_MIN.captures(content) {
        return Ok(cap[1].parse().ok());
    }
    let mut simple: Vec<i64> = RE_FINAL_SIMPLE
        .captures_iter(content)
        .filter_map(|cap| cap[1].parse().ok())
        .collect();
    simple.dedup();
    match simple.len() {
        0 => Ok(None),
        1 => Ok(Some(simple[0])),
        _ => Err("multiple distinct pACS = N statements".to_string()),
    }
}

/// T9: verify `reported == min(dimensions)`.
///
/// Ambiguous logs skip gracefully (valid, with no warning); arithmetic
/// can only be checked when the inputs are unambiguous.
pub fn verify_pacs_arithmetic(path: &Path) -> (bool, Option<String>) {
    let Some(content) = warden_fs::read_opt(path) else {
        return (true, None);
    };
    let dims = match extract_dimensions(&content) {
        Ok(dims) if dims.len() >= 2 => dims,
        _ => return (true, None),
    };
    let reported = match extract_final_score(&content) {
        Ok(Some(score)) => score,
        _ => return (true, None),
    };
    let min = dims.values().copied().min().unwrap_or(0);
    if reported == min {
        return (true, None);
    }
    let detail = dims
        .iter()
        .map(|(name, score)| format!("{name}={score}"))
        .collect::<Vec<_>>()
        .join(", ");
    (
        false,
        Some(format!(
            "T9 FAIL: reported {reported} but min({detail}) = {min}"
        )),
    )
}

/// pACS log path for a step and log type.
pub fn pacs_log_path(project_dir: &Path, step: u32, pacs_type: &str) -> PathBuf {
    let name = match pacs_type {
        "translation" => format!("step-{step}-translation-pacs.md"),
        "review" => format!("step-{step}-review-pacs.md"),
        _ => format!("step-{step}-pacs.md"),
    };
    project_dir.join("pacs-logs").join(name)
}

/// PA1–PA7 validation of a pACS log.
pub fn validate_pacs_output(project_dir: &Path, step: u32, pacs_type: &str) -> (bool, Vec<String>) {
    let path = pacs_log_path(project_dir, step, pacs_type);
    let mut warnings = Vec::new();

    let Some(content) = warden_fs::read_opt(&path) else {
        return (
            false,
            vec![format!("PA1 FAIL: pACS log missing: {}", path.display())],
        );
    };
    if (content.len() as u64) < PACS_MIN_BYTES {
        warnings.push(format!(
            "PA2 FAIL: pACS log under {PACS_MIN_BYTES} bytes ({})",
            content.len()
        ));
    }

    let dims = extract_dimensions(&content).unwrap_or_default();
    if dims.len() < PACS_MIN_DIMENSIONS {
        warnings.push(format!(
            "PA3 FAIL: found {} dimension scores, need ≥ {PACS_MIN_DIMENSIONS}",
            dims.len()
        ));
    }
    if dims.values().any(|score| !(0..=100).contains(score)) {
        warnings.push("PA3 FAIL: dimension score outside 0-100".to_string());
    }

    if !content.contains("Pre-mortem") && !content.contains("pre-mortem") {
        warnings.push("PA4 FAIL: mandatory Pre-mortem section missing".to_string());
    }

    let (arithmetic_ok, arithmetic_warning) = verify_pacs_arithmetic(&path);
    if let Some(warning) = arithmetic_warning {
        warnings.push(warning.replace("T9 FAIL", "PA5 FAIL"));
    }

    let final_score = extract_final_score(&content).ok().flatten();
    if let Some(score) = final_score {
        // PA6: declared color zone must match the score, checked only when
        // a zone word is present.
        if content.contains("RED") && score >= PACS_RED_THRESHOLD {
            warnings.push(format!(
                "PA6 WARN: RED zone declared but score {score} ≥ {PACS_RED_THRESHOLD}"
            ));
        }
        if content.contains("GREEN") && score < PACS_GREEN_THRESHOLD {
            warnings.push(format!(
                "PA6 WARN: GREEN zone declared but score {score} < {PACS_GREEN_THRESHOLD}"
            ));
        }
        if score < PACS_RED_THRESHOLD {
            warnings.push(format!(
                "PA7 FAIL: score {score} is in the RED zone (< {PACS_RED_THRESHOLD}); step advancement blocked"
            ));
        }
    }

    let valid = arithmetic_ok && warnings.iter().all(|w| !w.contains("FAIL"));
    (valid, warnings)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Verifier accepts exactly the true minimum and rejects all other
        /// reported values.
        #[test]
        fn arithmetic_idempotency(f in 0i64..=100, c in 0i64..=100, l in 0i64..=100, reported in 0i64..=100) {
            let td = tempdir().expect("tempdir");
            let log = format!(
                "| F | {f} |\n| C | {c} |\n| L | {l} |\n\npACS = min(F, C, L) = {reported}\n"
            );
            let path = td.path().join("pacs-logs/step-1-pacs.md");
            std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
            std::fs::write(&path, log).expect("write");

            let (ok, _) = verify_pacs_arithmetic(&path);
            let true_min = f.min(c).min(l);
            prop_assert_eq!(ok, reported == true_min);
        }
    }
}
