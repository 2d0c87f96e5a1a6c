//! Generated workflow-file DNA validation (W1–W8).
//!
//! W7/W8 are the consistency checks that matter most: a workflow that
//! *declares* a verification type must also *invoke* the matching
//! post-processing validator, or the declaration is decorative.

use std::path::Path;

/// Generated workflow files must hold at least this many bytes.
pub const WORKFLOW_MIN_BYTES: u64 = 500;
/// The Inherited Patterns table needs at least this many data rows.
pub const MIN_PATTERN_ROWS: usize = 3;

/// W1–W8 validation of a generated workflow file.
pub fn validate_workflow_md(workflow_path: &Path) -> (bool, Vec<String>) {
    let mut warnings = Vec::new();

    let Some(content) = warden_fs::read_opt(workflow_path) else {
        return (
            false,
            vec![format!("W1 FAIL: workflow file missing or unreadable: {}", workflow_path.display())],
        );
    };

    if (content.len() as u64) < WORKFLOW_MIN_BYTES {
        warnings.push(format!(
            "W2 FAIL: workflow file under {WORKFLOW_MIN_BYTES} bytes ({})",
            content.len()
        ));
    }

    if !content.contains("Inherited-DNA") && !content.contains("Inherited DNA") {
        warnings.push("W3 FAIL: Inherited-DNA header missing".to_string());
    }

    let pattern_rows = inherited_pattern_rows(&content);
    if pattern_rows < MIN_PATTERN_ROWS {
        warnings.push(format!(
            "W4 FAIL: Inherited Patterns table has {pattern_rows} data rows, need ≥ {MIN_PATTERN_ROWS}"
        ));
    }

    if !content.contains("Constitutional Principles") {
        warnings.push("W5 FAIL: Constitutional Principles section missing".to_string());
    }

    if !content.contains("Coding Anchor Points") && !content.contains("CAP") {
        warnings.push("W6 FAIL: Coding Anchor Points reference missing".to_string());
    }

    // W7: declared cross-step traceability must invoke its validator.
    let declares_traceability =
        content.contains("Cross-Step Traceability") || content.contains("[trace:");
    let invokes_traceability =
        content.contains("validate-traceability") || content.contains("validate_traceability");
    if declares_traceability && !invokes_traceability {
        warnings.push(
            "W7 FAIL: workflow declares cross-step traceability but never invokes the traceability validator"
                .to_string(),
        );
    }

    // W8: referenced domain knowledge must invoke its validator.
    let references_dk = content.contains("domain-knowledge") || content.contains("[dks:");
    let invokes_dk = content.contains("validate-domain-knowledge")
        || content.contains("validate_domain_knowledge");
    if references_dk && !invokes_dk {
        warnings.push(
            "W8 FAIL: workflow references domain knowledge but never invokes the DK validator"
                .to_string(),
        );
    }

    (warnings.is_empty(), warnings)
}

/// Data rows of the Inherited Patterns table (header + separator skipped).
fn inherited_pattern_rows(content: &str) -> usize {
    let Some(start) = content.find("Inherited Patterns") else {
        return 0;
    };
    let section = &content[start..];
    let end = section[18..].find("\n## ").map(|i| i + 18).unwrap_or(section.len());

    section[..end]
        .lines()
        .filter(|l| l.trim_start().starts_with('|'))
        .filter(|l| !l.contains("---"))
        .skip(1) // header row
        .count()
}
