//! Domain-knowledge structure validation (DK1–DK7).
//!
//! The DKS file is YAML owned by the workflow author: metadata, entities,
//! relations and constraints. Validation is structural plus referential,
//! and with `--check-output` it also cross-checks the `[dks:id]` markers a
//! step output cites.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

use crate::output::discover_step_output;

/// Candidate DKS file locations, probed in order.
pub const DKS_FILENAMES: &[&str] = &[".claude/domain-knowledge.yaml", "domain-knowledge.yaml"];

/// Allowed relation confidence levels.
pub const CONFIDENCE_LEVELS: &[&str] = &["high", "medium", "low"];

static RE_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("slug regex"));
static RE_DKS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[dks:([A-Za-z0-9-]+)\]").expect("dks marker regex"));
/// Best-effort numeric constraint form: `sum(field) <= N`.
static RE_SUM_CONSTRAINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sum\((\w+)\)\s*<=\s*(\d+(?:\.\d+)?)$").expect("sum constraint regex")
});

/// First existing DKS path.
pub fn find_dks(project_dir: &Path) -> Option<PathBuf> {
    DKS_FILENAMES
        .iter()
        .map(|rel| project_dir.join(rel))
        .find(|p| p.exists())
}

/// DK1–DK7. `check_output_step` enables DK6/DK7 against that step's output.
pub fn validate_domain_knowledge(
    project_dir: &Path,
    check_output_step: Option<u32>,
) -> (bool, Vec<String>) {
    let mut warnings = Vec::new();

    let Some(path) = find_dks(project_dir) else {
        return (false, vec!["DK1 FAIL: domain-knowledge file not found".to_string()]);
    };
    let Some(content) = warden_fs::read_opt(&path) else {
        return (false, vec!["DK1 FAIL: domain-knowledge file unreadable".to_string()]);
    };
    let doc: Value = match serde_yaml::from_str(&content) {
        Ok(doc) => doc,
        Err(err) => {
            return (false, vec![format!("DK1 FAIL: YAML parse error: {err}")]);
        }
    };

    // DK2: metadata required keys.
    let metadata = doc.get("metadata");
    for key in ["domain", "schema_version"] {
        if metadata.and_then(|m| m.get(key)).is_none() {
            warnings.push(format!("DK2 FAIL: metadata.{key} missing"));
        }
    }

    // DK3: entity ids unique and slug-format.
    let mut entity_ids: BTreeSet<String> = BTreeSet::new();
    let entities = doc.get("entities").and_then(Value::as_sequence);
    if let Some(entities) = entities {
        for entity in entities {
            let Some(id) = entity.get("id").and_then(Value::as_str) else {
                warnings.push("DK3 FAIL: entity without id".to_string());
                continue;
            };
            if !RE_SLUG.is_match(id) {
                warnings.push(format!("DK3 FAIL: entity id '{id}' is not slug-format"));
            }
            if !entity_ids.insert(id.to_string()) {
                warnings.push(format!("DK3 FAIL: duplicate entity id '{id}'"));
            }
            if entity.get("type").and_then(Value::as_str).is_none() {
                warnings.push(format!("DK3 FAIL: entity '{id}' has no type string"));
            }
            if let Some(attributes) = entity.get("attributes") {
                if !attributes.is_mapping() {
                    warnings.push(format!("DK3 FAIL: entity '{id}' attributes is not a mapping"));
                }
            }
        }
    }

    // DK4: relation referential integrity.
    let mut relation_ids: BTreeSet<String> = BTreeSet::new();
    let relations = doc.get("relations").and_then(Value::as_sequence);
    if let Some(relations) = relations {
        for relation in relations {
            if let Some(id) = relation.get("id").and_then(Value::as_str) {
                relation_ids.insert(id.to_string());
            }
            for role in ["subject", "object"] {
                match relation.get(role).and_then(Value::as_str) {
                    Some(target) if entity_ids.contains(target) => {}
                    Some(target) => warnings.push(format!(
                        "DK4 FAIL: relation {role} '{target}' references no entity"
                    )),
                    None => warnings.push(format!("DK4 FAIL: relation missing {role}")),
                }
            }
            match relation.get("confidence").and_then(Value::as_str) {
                Some(level) if CONFIDENCE_LEVELS.contains(&level) => {}
                Some(level) => warnings.push(format!(
                    "DK4 FAIL: relation confidence '{level}' not in {CONFIDENCE_LEVELS:?}"
                )),
                None => warnings.push("DK4 FAIL: relation missing confidence".to_string()),
            }
        }
    }

    // DK5: constraint records.
    let constraints = doc.get("constraints").and_then(Value::as_sequence);
    if let Some(constraints) = constraints {
        for constraint in constraints {
            for key in ["id", "description", "check"] {
                if constraint.get(key).is_none() {
                    warnings.push(format!("DK5 FAIL: constraint missing {key}"));
                }
            }
        }
    }

    // DK6/DK7: output cross-checks.
    if let Some(step) = check_output_step {
        let output = discover_step_output(project_dir, step)
            .as_deref()
            .and_then(warden_fs::read_opt);
        match output {
            Some(output) => {
                for cap in RE_DKS_MARKER.captures_iter(&output) {
                    let id = &cap[1];
                    if !entity_ids.contains(id) && !relation_ids.contains(id) {
                        warnings.push(format!(
                            "DK6 FAIL: output marker [dks:{id}] resolves to no entity or relation"
                        ));
                    }
                }
            }
            None => warnings.push(format!("DK6 FAIL: step {step} output not found")),
        }

        if let (Some(constraints), Some(entities)) = (constraints, entities) {
            for constraint in constraints {
                let Some(check) = constraint.get("check").and_then(Value::as_str) else {
                    continue;
                };
                let Some(cap) = RE_SUM_CONSTRAINT.captures(check.trim()) else {
                    continue;
                };
                let field = &cap[1];
                let limit: f64 = cap[2].parse().unwrap_or(f64::MAX);
                let sum: f64 = entities
                    .iter()
                    .filter_map(|e| e.get("attributes"))
                    .filter_map(|a| a.get(field))
                    .filter_map(Value::as_f64)
                    .sum();
                if sum > limit {
                    let id = constraint
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("unnamed");
                    warnings.push(format!(
                        "DK7 FAIL: constraint '{id}' violated: sum({field}) = {sum} > {limit}"
                    ));
                }
            }
        }
    }

    warnings.push(format!(
        "DK INFO: entity_count={} relation_count={} constraint_count={}",
        entity_ids.len(),
        relations.map_or(0, |r| r.len()),
        constraints.map_or(0, |c| c.len())
    ));

    let valid = warnings.iter().all(|w| !w.contains("FAIL"));
    (valid, warnings)
}
