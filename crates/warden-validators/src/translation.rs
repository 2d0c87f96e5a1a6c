//! Translation validation (T1–T9) and the 3-tier translation discovery.

use std::path::{Path, PathBuf};

use warden_sot::sot_outputs;

/// Translations must hold at least this many bytes.
pub const TRANSLATION_MIN_BYTES: u64 = 100;
/// Heading count may deviate from the source by this ratio.
pub const HEADING_TOLERANCE: f64 = 0.2;
/// Glossary must be refreshed within this many seconds of the translation.
pub const GLOSSARY_MAX_SKEW_SECS: u64 = 3600;

/// 3-tier translation discovery, deterministic order:
/// 1. SOT `outputs.step-N-ko`
/// 2. legacy `translations/` directory
/// 3. sibling `<stem>.ko.md` next to the step's English output
pub fn discover_translation(project_dir: &Path, step: u32) -> Option<PathBuf> {
    let outputs = sot_outputs(project_dir);

    // Tier 1: explicit SOT key wins when several candidates exist.
    if let Some(rel) = outputs.get(&format!("step-{step}-ko")) {
        let path = project_dir.join(rel);
        if path.exists() {
            return Some(path);
        }
    }

    // Tier 2: legacy translations/ directory.
    let translations_dir = project_dir.join("translations");
    if let Ok(read_dir) = std::fs::read_dir(&translations_dir) {
        let prefix = format!("step-{step}");
        let mut candidates: Vec<PathBuf> = read_dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| {
                        let name = n.to_string_lossy();
                        name.starts_with(&prefix) && name.ends_with(".ko.md")
                    })
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        if let Some(found) = candidates.into_iter().next() {
            return Some(found);
        }
    }

    // Tier 3: sibling next to the English output.
    if let Some(rel) = outputs.get(&format!("step-{step}")) {
        let english = project_dir.join(rel);
        let sibling = sibling_ko(&english);
        if sibling.exists() {
            return Some(sibling);
        }
    }
    None
}

/// `outputs/step-4.md` → `outputs/step-4.ko.md`
fn sibling_ko(english: &Path) -> PathBuf {
    let stem = english
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    english.with_file_name(format!("{stem}.ko.md"))
}

/// The English source a translation corresponds to.
fn english_source(project_dir: &Path, step: u32) -> Option<PathBuf> {
    let outputs = sot_outputs(project_dir);
    outputs
        .get(&format!("step-{step}"))
        .map(|rel| project_dir.join(rel))
}

fn heading_count(content: &str) -> usize {
    content.lines().filter(|l| l.starts_with('#')).count()
}

fn fence_count(content: &str) -> usize {
    content.matches("```").count() / 2
}

/// T1–T7 structural validation of the translation for a step.
pub fn validate_translation_output(project_dir: &Path, step: u32) -> (bool, Vec<String>) {
    let mut warnings = Vec::new();

    let Some(path) = discover_translation(project_dir, step) else {
        return (
            false,
            vec![format!("T1 FAIL: no translation found for step {step}")],
        );
    };
    let Some(content) = warden_fs::read_opt(&path) else {
        return (
            false,
            vec![format!("T1 FAIL: translation unreadable: {}", path.display())],
        );
    };

    if (content.len() as u64) < TRANSLATION_MIN_BYTES {
        warnings.push(format!(
            "T2 FAIL: translation under {TRANSLATION_MIN_BYTES} bytes ({})",
            content.len()
        ));
    }

    let source = english_source(project_dir, step);
    let source_content = source.as_deref().and_then(warden_fs::read_opt);
    if source_content.is_none() {
        warnings.push(format!("T3 FAIL: English source missing for step {step}"));
    }

    if !path.to_string_lossy().ends_with(".ko.md") {
        warnings.push(format!(
            "T4 FAIL: translation filename must end with .ko.md: {}",
            path.display()
        ));
    }

    if content.trim().is_empty() {
        warnings.push("T5 FAIL: translation is whitespace-only".to_string());
    }

    if let Some(source_content) = &source_content {
        let source_headings = heading_count(source_content);
        let translated_headings = heading_count(&content);
        if source_headings > 0 {
            let tolerance = (source_headings as f64 * HEADING_TOLERANCE).ceil() as usize;
            let diff = source_headings.abs_diff(translated_headings);
            if diff > tolerance {
                warnings.push(format!(
                    "T6 FAIL: heading count {translated_headings} deviates from source {source_headings} beyond ±20%"
                ));
            }
        }
        if fence_count(source_content) != fence_count(&content) {
            warnings.push(format!(
                "T7 FAIL: code-fence count mismatch (source {}, translation {})",
                fence_count(source_content),
                fence_count(&content)
            ));
        }
    }

    (warnings.is_empty(), warnings)
}

/// T8: glossary freshness; when a glossary exists, its mtime must be
/// within one hour of the translation's.
pub fn check_glossary_freshness(project_dir: &Path, step: u32) -> (bool, Option<String>) {
    let glossary = ["translations/glossary.md", "glossary.md"]
        .iter()
        .map(|rel| project_dir.join(rel))
        .find(|p| p.exists());
    let Some(glossary) = glossary else {
        return (true, None);
    };
    let Some(translation) = discover_translation(project_dir, step) else {
        return (true, None);
    };

    let mtime = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    let (Some(glossary_time), Some(translation_time)) = (mtime(&glossary), mtime(&translation))
    else {
        return (true, None);
    };

    let skew = match translation_time.duration_since(glossary_time) {
        Ok(d) => d.as_secs(),
        Err(e) => e.duration().as_secs(),
    };
    if skew > GLOSSARY_MAX_SKEW_SECS {
        return (
            false,
            Some(format!(
                "T8 FAIL: glossary is {skew}s out of sync with the step {step} translation (limit {GLOSSARY_MAX_SKEW_SECS}s)"
            )),
        );
    }
    (true, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_sot(dir: &Path, body: &str) {
        std::fs::create_dir_all(dir.join(".claude")).expect("mkdir");
        std::fs::write(dir.join(".claude/state.yaml"), body).expect("write");
    }

    const ENGLISH: &str = "# Title\n\n## Section A\n\n```rust\nfn a() {}\n```\n\n## Section B\n\nbody text that makes this file comfortably long enough for checks\n";
    const KOREAN: &str = "# 제목\n\n## 섹션 A\n\n```rust\nfn a() {}\n```\n\n## 섹션 B\n\n검사를 통과할 만큼 충분히 긴 본문 텍스트입니다. 구조는 원문과 동일하게 유지됩니다.\n";

    #[test]
    fn discovery_prefers_sot_ko_key() {
        let td = tempdir().expect("tempdir");
        seed_sot(
            td.path(),
            "outputs:\n  step-2: out/step-2.md\n  step-2-ko: ko/explicit.ko.md\n",
        );
        std::fs::create_dir_all(td.path().join("ko")).expect("mkdir");
        std::fs::write(td.path().join("ko/explicit.ko.md"), KOREAN).expect("write");
        // A competing sibling candidate also exists.
        std::fs::create_dir_all(td.path().join("out")).expect("mkdir");
        std::fs::write(td.path().join("out/step-2.md"), ENGLISH).expect("write");
        std::fs::write(td.path().join("out/step-2.ko.md"), KOREAN).expect("write");

        let found = discover_translation(td.path(), 2).expect("found");
        assert!(found.ends_with("ko/explicit.ko.md"));
    }

    #[test]
    fn discovery_falls_back_to_translations_dir_then_sibling() {
        let td = tempdir().expect("tempdir");
        seed_sot(td.path(), "outputs:\n  step-3: out/step-3.md\n");
        std::fs::create_dir_all(td.path().join("translations")).expect("mkdir");
        std::fs::write(td.path().join("translations/step-3.ko.md"), KOREAN).expect("write");

        let found = discover_translation(td.path(), 3).expect("found");
        assert!(found.to_string_lossy().contains("translations"));

        std::fs::remove_file(&found).expect("rm");
        std::fs::create_dir_all(td.path().join("out")).expect("mkdir");
        std::fs::write(td.path().join("out/step-3.md"), ENGLISH).expect("write");
        std::fs::write(td.path().join("out/step-3.ko.md"), KOREAN).expect("write");

        let sibling = discover_translation(td.path(), 3).expect("sibling");
        assert!(sibling.ends_with("out/step-3.ko.md"));
    }

    #[test]
    fn matching_structure_validates_clean() {
        let td = tempdir().expect("tempdir");
        seed_sot(td.path(), "outputs:\n  step-1: out/step-1.md\n");
        std::fs::create_dir_all(td.path().join("out")).expect("mkdir");
        std::fs::write(td.path().join("out/step-1.md"), ENGLISH).expect("write");
        std::fs::write(td.path().join("out/step-1.ko.md"), KOREAN).expect("write");

        let (valid, warnings) = validate_translation_output(td.path(), 1);
        assert!(valid, "{warnings:?}");
    }

    #[test]
    fn fence_mismatch_fails_t7() {
        let td = tempdir().expect("tempdir");
        seed_sot(td.path(), "outputs:\n  step-1: out/step-1.md\n");
        std::fs::create_dir_all(td.path().join("out")).expect("mkdir");
        std::fs::write(td.path().join("out/step-1.md"), ENGLISH).expect("write");
        std::fs::write(
            td.path().join("out/step-1.ko.md"),
            KOREAN.replace("```rust\nfn a() {}\n```\n\n", ""),
        )
        .expect("write");

        let (valid, warnings) = validate_translation_output(td.path(), 1);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("T7 FAIL")));
    }

    #[test]
    fn heading_drift_beyond_tolerance_fails_t6() {
        let td = tempdir().expect("tempdir");
        seed_sot(td.path(), "outputs:\n  step-1: out/step-1.md\n");
        std::fs::create_dir_all(td.path().join("out")).expect("mkdir");
        std::fs::write(td.path().join("out/step-1.md"), ENGLISH).expect("write");
        // Drop both section headings, keep everything else.
        let ko = KOREAN.replace("## 섹션 A\n\n", "").replace("## 섹션 B\n\n", "");
        std::fs::write(td.path().join("out/step-1.ko.md"), ko).expect("write");

        let (valid, warnings) = validate_translation_output(td.path(), 1);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("T6 FAIL")));
    }

    #[test]
    fn missing_translation_fails_t1() {
        let td = tempdir().expect("tempdir");
        let (valid, warnings) = validate_translation_output(td.path(), 8);
        assert!(!valid);
        assert!(warnings[0].contains("T1 FAIL"));
    }

    #[test]
    fn stale_glossary_fails_t8() {
        let td = tempdir().expect("tempdir");
        seed_sot(td.path(), "outputs:\n  step-1: out/step-1.md\n");
        std::fs::create_dir_all(td.path().join("out")).expect("mkdir");
        std::fs::write(td.path().join("out/step-1.md"), ENGLISH).expect("write");
        std::fs::write(td.path().join("out/step-1.ko.md"), KOREAN).expect("write");
        std::fs::create_dir_all(td.path().join("translations")).expect("mkdir");
        let glossary = td.path().join("translations/glossary.md");
        std::fs::write(&glossary, "용어집").expect("write");
        let stale = std::time::SystemTime::now() - std::time::Duration::from_secs(7200);
        std::fs::File::open(&glossary).expect("open").set_modified(stale).expect("mtime");

        let (valid, warning) = check_glossary_freshness(td.path(), 1);
        assert!(!valid);
        assert!(warning.expect("warning").contains("T8 FAIL"));
    }

    #[test]
    fn fresh_glossary_or_none_is_clean() {
        let td = tempdir().expect("tempdir");
        assert_eq!(check_glossary_freshness(td.path(), 1), (true, None));
    }
}
