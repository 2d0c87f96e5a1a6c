//! Step-output anti-skip guard (L0a–L0c) and step-output discovery.
//!
//! The L0 helper is uniform: other validators reuse it via their
//! `--check-l0` flag, and the autopilot restore path runs it per declared
//! step.

use std::path::{Path, PathBuf};

use warden_sot::sot_outputs;

/// Step outputs must hold at least this many bytes.
pub const OUTPUT_MIN_BYTES: u64 = 100;

/// Find the output file for a step: the SOT-declared path first, then the
/// `outputs/step-N.md` convention, then any `outputs/step-N*.md`.
pub fn discover_step_output(project_dir: &Path, step: u32) -> Option<PathBuf> {
    let outputs = sot_outputs(project_dir);
    if let Some(rel) = outputs.get(&format!("step-{step}")) {
        let path = project_dir.join(rel);
        if path.exists() {
            return Some(path);
        }
    }

    let conventional = project_dir.join("outputs").join(format!("step-{step}.md"));
    if conventional.exists() {
        return Some(conventional);
    }

    let prefix = format!("step-{step}");
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(project_dir.join("outputs"))
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let name = n.to_string_lossy();
                    name.starts_with(&prefix)
                        && !name.ends_with(".ko.md")
                        && name.ends_with(".md")
                })
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// L0a–L0c: exists, ≥100 bytes, not whitespace-only.
pub fn validate_step_output(project_dir: &Path, step: u32) -> (bool, Vec<String>) {
    let Some(path) = discover_step_output(project_dir, step) else {
        return (
            false,
            vec![format!("L0a FAIL: no output found for step {step}")],
        );
    };

    let mut warnings = Vec::new();
    let size = warden_fs::size_of(&path);
    if size < OUTPUT_MIN_BYTES {
        warnings.push(format!(
            "L0b FAIL: step {step} output is {size} bytes (< {OUTPUT_MIN_BYTES})"
        ));
    }
    match warden_fs::read_opt(&path) {
        Some(content) if content.trim().is_empty() => {
            warnings.push(format!("L0c FAIL: step {step} output is whitespace-only"));
        }
        Some(_) => {}
        None => warnings.push(format!("L0a FAIL: step {step} output unreadable")),
    }

    (warnings.is_empty(), warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sot_declared_output_wins_over_convention() {
        let td = tempdir().expect("tempdir");
        std::fs::create_dir_all(td.path().join(".claude")).expect("mkdir");
        std::fs::write(
            td.path().join(".claude/state.yaml"),
            "outputs:\n  step-2: custom/loc.md\n",
        )
        .expect("write");
        std::fs::create_dir_all(td.path().join("custom")).expect("mkdir");
        std::fs::write(td.path().join("custom/loc.md"), "declared").expect("write");
        std::fs::create_dir_all(td.path().join("outputs")).expect("mkdir");
        std::fs::write(td.path().join("outputs/step-2.md"), "conventional").expect("write");

        let found = discover_step_output(td.path(), 2).expect("found");
        assert!(found.ends_with("custom/loc.md"));
    }

    #[test]
    fn conventional_path_and_prefix_scan_fallbacks() {
        let td = tempdir().expect("tempdir");
        std::fs::create_dir_all(td.path().join("outputs")).expect("mkdir");
        std::fs::write(td.path().join("outputs/step-3-design.md"), "prefixed").expect("write");

        let found = discover_step_output(td.path(), 3).expect("found");
        assert!(found.ends_with("outputs/step-3-design.md"));
    }

    #[test]
    fn l0_checks_size_and_whitespace() {
        let td = tempdir().expect("tempdir");
        std::fs::create_dir_all(td.path().join("outputs")).expect("mkdir");

        std::fs::write(td.path().join("outputs/step-1.md"), "tiny").expect("write");
        let (valid, warnings) = validate_step_output(td.path(), 1);
        assert!(!valid);
        assert!(warnings[0].contains("L0b FAIL"));

        std::fs::write(td.path().join("outputs/step-1.md"), " \n ".repeat(60)).expect("write");
        let (valid, warnings) = validate_step_output(td.path(), 1);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("L0c FAIL")));

        std::fs::write(td.path().join("outputs/step-1.md"), "real content ".repeat(20))
            .expect("write");
        let (valid, _) = validate_step_output(td.path(), 1);
        assert!(valid);
    }

    #[test]
    fn missing_output_fails_l0a() {
        let td = tempdir().expect("tempdir");
        let (valid, warnings) = validate_step_output(td.path(), 9);
        assert!(!valid);
        assert!(warnings[0].contains("L0a FAIL"));
    }
}
