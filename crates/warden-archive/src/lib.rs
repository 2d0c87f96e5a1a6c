//! Cross-session knowledge archive (`knowledge-index.jsonl`) and the risk
//! aggregator computed from it.
//!
//! The index holds one record per session: later saves for the same
//! `session_id` replace the earlier record. The write path takes a
//! dedicated lock file for the read-modify-write; when anything in that
//! path fails it falls back to a plain locked append; a duplicate record
//! is better than a lost one.

pub mod facts;
pub mod risk;

pub use facts::{extract_session_facts, SessionFacts};
pub use risk::{compute_risk_scores, validate_risk_scores, FileRisk, RiskScores};

use std::path::Path;

use anyhow::Result;

/// Newest records kept by index rotation.
pub const KNOWLEDGE_INDEX_KEEP: usize = 200;

/// Index filename inside the snapshot directory.
pub const KNOWLEDGE_INDEX_FILE: &str = "knowledge-index.jsonl";

/// Read all well-formed records from the index. Malformed lines skipped.
pub fn read_index(path: &Path) -> Vec<serde_json::Value> {
    let Some(content) = warden_fs::read_opt(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .collect()
}

/// Newest `n` records, oldest-first within the slice.
pub fn recent_sessions(path: &Path, n: usize) -> Vec<serde_json::Value> {
    let records = read_index(path);
    let start = records.len().saturating_sub(n);
    records[start..].to_vec()
}

/// Replace any record with the same `session_id` and append the new one,
/// under the dedicated index lock. Falls back to append-only on failure.
pub fn replace_or_append(path: &Path, facts: &SessionFacts) -> Result<()> {
    let mut record = serde_json::to_value(facts)?;
    facts::ensure_schema(&mut record);
    let line = serde_json::to_string(&record)?;

    let locked = warden_fs::with_exclusive_lock(path, || {
        let mut records = read_index(path);
        records.retain(|r| {
            r.get("session_id").and_then(|v| v.as_str()) != record.get("session_id").and_then(|v| v.as_str())
        });
        records.push(record.clone());

        let mut body = String::new();
        for rec in &records {
            body.push_str(&serde_json::to_string(rec)?);
            body.push('\n');
        }
        warden_fs::atomic_write(path, body.as_bytes())
    });

    if locked.is_err() {
        // Data loss is worse than a dedup gap.
        warden_fs::append_with_lock(path, format!("{line}\n").as_bytes())?;
    }
    Ok(())
}

/// Keep only the newest [`KNOWLEDGE_INDEX_KEEP`] records, atomically.
pub fn cleanup_knowledge_index(path: &Path) {
    let records = read_index(path);
    if records.len() <= KNOWLEDGE_INDEX_KEEP {
        return;
    }
    let start = records.len() - KNOWLEDGE_INDEX_KEEP;
    let mut body = String::new();
    for rec in &records[start..] {
        if let Ok(line) = serde_json::to_string(rec) {
            body.push_str(&line);
            body.push('\n');
        }
    }
    let _ = warden_fs::with_exclusive_lock(path, || warden_fs::atomic_write(path, body.as_bytes()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn facts_for(session_id: &str, task: &str) -> SessionFacts {
        SessionFacts {
            session_id: session_id.to_string(),
            user_task: task.to_string(),
            ..SessionFacts::default()
        }
    }

    #[test]
    fn same_session_id_is_replaced_not_duplicated() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(KNOWLEDGE_INDEX_FILE);

        replace_or_append(&path, &facts_for("s1", "first")).expect("append");
        replace_or_append(&path, &facts_for("s2", "other")).expect("append");
        replace_or_append(&path, &facts_for("s1", "updated")).expect("append");

        let records = read_index(&path);
        assert_eq!(records.len(), 2);
        let s1: Vec<_> = records
            .iter()
            .filter(|r| r["session_id"] == "s1")
            .collect();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0]["user_task"], "updated");
        // Replacement moves the record to the end.
        assert_eq!(records[1]["session_id"], "s1");
    }

    #[test]
    fn empty_session_id_gets_generated_identifier() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(KNOWLEDGE_INDEX_FILE);
        replace_or_append(&path, &facts_for("", "task")).expect("append");

        let records = read_index(&path);
        let sid = records[0]["session_id"].as_str().unwrap();
        assert!(!sid.is_empty());
    }

    #[test]
    fn rotation_keeps_newest_records() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(KNOWLEDGE_INDEX_FILE);
        let mut body = String::new();
        for i in 0..230 {
            body.push_str(&format!("{{\"session_id\":\"s{i}\",\"timestamp\":\"t\"}}\n"));
        }
        std::fs::write(&path, body).expect("seed");

        cleanup_knowledge_index(&path);
        let records = read_index(&path);
        assert_eq!(records.len(), KNOWLEDGE_INDEX_KEEP);
        assert_eq!(records[0]["session_id"], "s30");
        assert_eq!(records.last().unwrap()["session_id"], "s229");
    }

    #[test]
    fn malformed_lines_are_skipped_on_read() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(KNOWLEDGE_INDEX_FILE);
        std::fs::write(&path, "{\"session_id\":\"ok\"}\ngarbage line\n").expect("seed");
        assert_eq!(read_index(&path).len(), 1);
    }

    #[test]
    fn recent_sessions_returns_tail() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(KNOWLEDGE_INDEX_FILE);
        for i in 0..5 {
            replace_or_append(&path, &facts_for(&format!("s{i}"), "t")).expect("append");
        }
        let recent = recent_sessions(&path, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0]["session_id"], "s2");
    }
}
