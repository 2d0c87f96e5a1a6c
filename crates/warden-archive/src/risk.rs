//! Weighted, time-decayed per-file error scoring from the knowledge index.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimum sessions before any risk data is emitted (cold-start guard).
///
/// D-7: duplicated in the predictive pre-tool guard; the setup-maintenance
/// DC-3 check compares the two copies.
pub const RISK_MIN_SESSIONS: usize = 5;
/// Files at or above this score are surfaced to the pre-tool guard.
///
/// D-7: duplicated in the predictive pre-tool guard (DC-3).
pub const RISK_THRESHOLD: f64 = 3.0;
/// Cap on `top_risk_files`.
pub const TOP_RISK_CAP: usize = 10;
/// Errors without their own file attribute spread over this many of the
/// session's modified files.
const SPREAD_FILES: usize = 5;

/// Per-error-type weights. Heavier types predict more rework.
pub const TYPE_WEIGHTS: &[(&str, f64)] = &[
    ("edit_mismatch", 2.0),
    ("dependency", 2.5),
    ("type_error", 1.5),
    ("syntax", 1.0),
    ("value_error", 1.0),
    ("git_error", 1.0),
    ("timeout", 0.5),
    ("file_not_found", 0.5),
    ("permission", 0.5),
    ("connection", 0.3),
    ("memory", 0.3),
    ("command_not_found", 0.3),
    ("unknown", 0.7),
];

fn type_weight(error_type: &str) -> f64 {
    TYPE_WEIGHTS
        .iter()
        .find(|(name, _)| *name == error_type)
        .map(|(_, w)| *w)
        .unwrap_or(0.7)
}

/// Recency weight for a record timestamp. Unparseable → conservative 0.25.
fn recency_weight(timestamp: &str, now: DateTime<Utc>) -> f64 {
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
        return 0.25;
    };
    let age_days = (now - parsed.with_timezone(&Utc)).num_days();
    if age_days <= 30 {
        1.0
    } else if age_days <= 90 {
        0.5
    } else {
        0.25
    }
}

/// Aggregated risk for one project-relative file path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRisk {
    pub risk_score: f64,
    pub error_count: u32,
    pub error_types: BTreeMap<String, u32>,
    pub last_error_session: String,
    pub resolution_rate: f64,
    #[serde(skip)]
    resolved_count: u32,
}

/// The `risk-scores.json` cache structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskScores {
    pub generated_at: String,
    pub data_sessions: usize,
    pub project_dir: String,
    pub risk_threshold: f64,
    pub files: BTreeMap<String, FileRisk>,
    pub top_risk_files: Vec<String>,
}

fn relpath(path: &str, project_dir: &Path) -> String {
    let normalized = path.replace('\\', "/");
    let project = project_dir.to_string_lossy().replace('\\', "/");
    normalized
        .strip_prefix(&format!("{project}/"))
        .unwrap_or(&normalized)
        .to_string()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Compute risk scores from index records. Fewer than
/// [`RISK_MIN_SESSIONS`] records yields the empty structure.
pub fn compute_risk_scores(
    project_dir: &Path,
    records: &[Value],
    now: DateTime<Utc>,
) -> RiskScores {
    let mut scores = RiskScores {
        generated_at: now.to_rfc3339(),
        data_sessions: records.len(),
        project_dir: project_dir.to_string_lossy().into_owned(),
        risk_threshold: RISK_THRESHOLD,
        ..RiskScores::default()
    };

    if records.len() < RISK_MIN_SESSIONS {
        return scores;
    }

    for record in records {
        let session_id = record
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let timestamp = record.get("timestamp").and_then(Value::as_str).unwrap_or("");
        let recency = recency_weight(timestamp, now);

        let modified: Vec<String> = record
            .get("modified_files")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .take(SPREAD_FILES)
                    .map(|p| relpath(p, project_dir))
                    .collect()
            })
            .unwrap_or_default();

        let Some(errors) = record.get("error_patterns").and_then(Value::as_array) else {
            continue;
        };

        for error in errors {
            let error_type = error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let resolved = error
                .get("resolution")
                .is_some_and(|r| !r.is_null());
            let weight = type_weight(&error_type) * recency;

            let targets: Vec<String> = match error.get("file").and_then(Value::as_str) {
                Some(file) if !file.is_empty() => vec![relpath(file, project_dir)],
                _ => modified.clone(),
            };

            for target in targets {
                let entry = scores.files.entry(target).or_default();
                entry.risk_score += weight;
                entry.error_count += 1;
                *entry.error_types.entry(error_type.clone()).or_default() += 1;
                entry.last_error_session = session_id.to_string();
                if resolved {
                    entry.resolved_count += 1;
                }
            }
        }
    }

    merge_basename_aliases(&mut scores.files);

    for risk in scores.files.values_mut() {
        risk.resolution_rate = if risk.error_count > 0 {
            f64::from(risk.resolved_count) / f64::from(risk.error_count)
        } else {
            0.0
        };
    }

    let mut ranked: Vec<(&String, f64)> = scores
        .files
        .iter()
        .filter(|(_, r)| r.risk_score >= RISK_THRESHOLD)
        .map(|(path, r)| (path, r.risk_score))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scores.top_risk_files = ranked
        .into_iter()
        .take(TOP_RISK_CAP)
        .map(|(path, _)| path.clone())
        .collect();

    scores
}

/// Merge bare-basename entries into the longest (most specific) path that
/// shares the basename, summing their accumulations.
fn merge_basename_aliases(files: &mut BTreeMap<String, FileRisk>) {
    let keys: Vec<String> = files.keys().cloned().collect();
    for key in &keys {
        if key.contains('/') {
            continue;
        }
        // `key` is a bare basename; find the longest path sharing it.
        let canonical = keys
            .iter()
            .filter(|other| *other != key && basename(other) == key.as_str())
            .max_by_key(|other| other.len())
            .cloned();
        let Some(canonical) = canonical else {
            continue;
        };
        let Some(alias) = files.remove(key) else {
            continue;
        };
        let target = files.entry(canonical).or_default();
        target.risk_score += alias.risk_score;
        target.error_count += alias.error_count;
        target.resolved_count += alias.resolved_count;
        for (etype, count) in alias.error_types {
            *target.error_types.entry(etype).or_default() += count;
        }
        if target.last_error_session.is_empty() {
            target.last_error_session = alias.last_error_session;
        }
    }
}

/// Self-validation RS1–RS6 before the cache is written.
pub fn validate_risk_scores(scores: &RiskScores) -> Vec<String> {
    let mut warnings = Vec::new();

    if scores.generated_at.is_empty() || scores.project_dir.is_empty() {
        warnings.push("RS1 FAIL: missing required top-level keys".to_string());
    }
    for (path, risk) in &scores.files {
        if risk.risk_score < 0.0 {
            warnings.push(format!("RS2 FAIL: {path} has negative risk_score"));
        }
        let type_sum: u32 = risk.error_types.values().sum();
        if u64::from(risk.error_count) < u64::from(type_sum) {
            warnings.push(format!(
                "RS3 FAIL: {path} error_count {} < sum of error_types {type_sum}",
                risk.error_count
            ));
        }
        if !(0.0..=1.0).contains(&risk.resolution_rate) {
            warnings.push(format!("RS4 FAIL: {path} resolution_rate out of range"));
        }
    }
    for path in &scores.top_risk_files {
        if !scores.files.contains_key(path) {
            warnings.push(format!("RS5 FAIL: top_risk_files entry {path} not in files"));
        }
    }
    let top_scores: Vec<f64> = scores
        .top_risk_files
        .iter()
        .filter_map(|p| scores.files.get(p).map(|r| r.risk_score))
        .collect();
    if top_scores.windows(2).any(|w| w[0] < w[1]) {
        warnings.push("RS6 FAIL: top_risk_files not sorted descending".to_string());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(session: &str, timestamp: &str, errors: Value, modified: &[&str]) -> Value {
        serde_json::json!({
            "session_id": session,
            "timestamp": timestamp,
            "modified_files": modified,
            "error_patterns": errors,
        })
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-08-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn five_records_with(errors: Value) -> Vec<Value> {
        let mut records = vec![record(
            "s0",
            "2026-07-30T00:00:00Z",
            errors,
            &["src/hot.rs"],
        )];
        for i in 1..5 {
            records.push(record(&format!("s{i}"), "2026-07-30T00:00:00Z", serde_json::json!([]), &[]));
        }
        records
    }

    #[test]
    fn cold_start_returns_empty_structure() {
        let records = vec![record("s1", "2026-07-30T00:00:00Z", serde_json::json!([]), &[])];
        let scores = compute_risk_scores(&PathBuf::from("/p"), &records, now());
        assert!(scores.files.is_empty());
        assert_eq!(scores.data_sessions, 1);
        assert_eq!(scores.risk_threshold, RISK_THRESHOLD);
    }

    #[test]
    fn recent_dependency_error_scores_full_weight() {
        let errors = serde_json::json!([
            {"type": "dependency", "tool": "Bash", "file": "src/hot.rs"}
        ]);
        let scores = compute_risk_scores(&PathBuf::from("/p"), &five_records_with(errors), now());
        let risk = &scores.files["src/hot.rs"];
        assert!((risk.risk_score - 2.5).abs() < 1e-9);
        assert_eq!(risk.error_count, 1);
        assert_eq!(risk.error_types["dependency"], 1);
        assert_eq!(risk.resolution_rate, 0.0);
    }

    #[test]
    fn old_records_decay() {
        let errors = serde_json::json!([
            {"type": "dependency", "tool": "Bash", "file": "src/hot.rs"}
        ]);
        let mut records = five_records_with(errors);
        records[0]["timestamp"] = Value::String("2026-05-01T00:00:00Z".to_string());
        let scores = compute_risk_scores(&PathBuf::from("/p"), &records, now());
        // 92 days old → 0.25 weight.
        assert!((scores.files["src/hot.rs"].risk_score - 0.625).abs() < 1e-9);
    }

    #[test]
    fn fileless_errors_spread_over_modified_files() {
        let errors = serde_json::json!([
            {"type": "syntax", "tool": "Bash"}
        ]);
        let records = five_records_with(errors);
        let scores = compute_risk_scores(&PathBuf::from("/p"), &records, now());
        assert!(scores.files.contains_key("src/hot.rs"));
    }

    #[test]
    fn basename_aliases_merge_into_longest_path() {
        let errors = serde_json::json!([
            {"type": "edit_mismatch", "tool": "Edit", "file": "hot.rs"},
            {"type": "edit_mismatch", "tool": "Edit", "file": "src/hot.rs",
             "resolution": {"tool": "Edit", "file": "src/hot.rs"}}
        ]);
        let scores = compute_risk_scores(&PathBuf::from("/p"), &five_records_with(errors), now());
        assert!(!scores.files.contains_key("hot.rs"));
        let merged = &scores.files["src/hot.rs"];
        assert_eq!(merged.error_count, 2);
        assert!((merged.risk_score - 4.0).abs() < 1e-9);
        assert!((merged.resolution_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn top_risk_files_sorted_and_thresholded() {
        let errors = serde_json::json!([
            {"type": "dependency", "tool": "Bash", "file": "a.rs/deep.rs"},
            {"type": "dependency", "tool": "Bash", "file": "b.rs"},
            {"type": "dependency", "tool": "Bash", "file": "b.rs"},
            {"type": "timeout", "tool": "Bash", "file": "tiny.rs"}
        ]);
        let scores = compute_risk_scores(&PathBuf::from("/p"), &five_records_with(errors), now());
        assert_eq!(scores.top_risk_files.first().map(String::as_str), Some("b.rs"));
        assert!(!scores.top_risk_files.contains(&"tiny.rs".to_string()));
        assert!(validate_risk_scores(&scores).is_empty());
    }

    #[test]
    fn adding_an_error_strictly_increases_score() {
        let one = serde_json::json!([
            {"type": "syntax", "tool": "Bash", "file": "f.rs"}
        ]);
        let two = serde_json::json!([
            {"type": "syntax", "tool": "Bash", "file": "f.rs"},
            {"type": "timeout", "tool": "Bash", "file": "f.rs"}
        ]);
        let before = compute_risk_scores(&PathBuf::from("/p"), &five_records_with(one), now());
        let after = compute_risk_scores(&PathBuf::from("/p"), &five_records_with(two), now());
        assert!(after.files["f.rs"].risk_score > before.files["f.rs"].risk_score);
    }

    #[test]
    fn validator_catches_schema_violations() {
        let mut scores = RiskScores {
            generated_at: "t".into(),
            project_dir: "/p".into(),
            ..RiskScores::default()
        };
        scores.files.insert(
            "bad.rs".into(),
            FileRisk {
                risk_score: -1.0,
                error_count: 0,
                error_types: BTreeMap::from([("syntax".to_string(), 2u32)]),
                resolution_rate: 1.5,
                ..FileRisk::default()
            },
        );
        scores.top_risk_files.push("ghost.rs".into());

        let warnings = validate_risk_scores(&scores);
        let joined = warnings.join("\n");
        assert!(joined.contains("RS2 FAIL"));
        assert!(joined.contains("RS3 FAIL"));
        assert!(joined.contains("RS4 FAIL"));
        assert!(joined.contains("RS5 FAIL"));
    }
}
