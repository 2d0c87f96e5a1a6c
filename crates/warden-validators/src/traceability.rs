//! Cross-step traceability validation (CT1–CT5).
//!
//! Step outputs cite their upstream sources with
//! `[trace:step-N:section-id(:locator)?]` markers. The validator checks
//! marker presence and density, that referenced outputs exist, that section
//! ids slug-match a heading in the source (warning only), and that no
//! marker points forward.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::output::discover_step_output;

/// Minimum trace-marker density per output (CT4).
pub const MIN_TRACE_MARKERS: usize = 3;

static RE_TRACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[trace:step-(\d+):([A-Za-z0-9-]+)(?::([^\]]+))?\]").expect("trace regex")
});
static RE_INLINE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("link regex"));

/// Slugify a heading the way markdown anchors do: inline links and
/// backticks are stripped; other inline markup is left alone.
pub fn slugify_heading(heading: &str) -> String {
    let text = heading.trim_start_matches('#').trim();
    let text = RE_INLINE_LINK.replace_all(text, "$1");
    let text = text.replace('`', "");

    let mut slug = String::new();
    let mut last_dash = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn heading_slugs(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|l| l.starts_with('#'))
        .map(slugify_heading)
        .collect()
}

/// CT1–CT5 validation for the output of `step`.
pub fn validate_cross_step_traceability(project_dir: &Path, step: u32) -> (bool, Vec<String>) {
    let mut warnings = Vec::new();

    let Some(output_path) = discover_step_output(project_dir, step) else {
        return (
            false,
            vec![format!("CT1 FAIL: no output found for step {step}")],
        );
    };
    let Some(content) = warden_fs::read_opt(&output_path) else {
        return (
            false,
            vec![format!("CT1 FAIL: output unreadable for step {step}")],
        );
    };

    let markers: Vec<(u32, String)> = RE_TRACE
        .captures_iter(&content)
        .map(|cap| (cap[1].parse().unwrap_or(0), cap[2].to_string()))
        .collect();

    if markers.is_empty() {
        warnings.push(format!("CT1 FAIL: no trace markers in step {step} output"));
        return (false, warnings);
    }

    let mut verified = 0usize;
    let mut fail = false;

    for (ref_step, section_id) in &markers {
        // CT5: forward references are hard failures.
        if *ref_step >= step {
            warnings.push(format!(
                "CT5 FAIL: step {step} output references step-{ref_step} (forward reference)"
            ));
            fail = true;
            continue;
        }

        // CT2: the referenced step's output must exist.
        let Some(source_path) = discover_step_output(project_dir, *ref_step) else {
            warnings.push(format!(
                "CT2 FAIL: referenced step-{ref_step} output does not exist"
            ));
            fail = true;
            continue;
        };

        // CT3: slug-match against source headings; warning only.
        let source = warden_fs::read_opt(&source_path).unwrap_or_default();
        if heading_slugs(&source).iter().any(|slug| slug == section_id) {
            verified += 1;
        } else {
            warnings.push(format!(
                "CT3 WARN: section id '{section_id}' not found as heading in step-{ref_step} output"
            ));
            verified += 1; // existence verified; slug mismatch is advisory
        }
    }

    // CT4: minimum density.
    if markers.len() < MIN_TRACE_MARKERS {
        warnings.push(format!(
            "CT4 FAIL: only {} trace markers, need ≥ {MIN_TRACE_MARKERS}",
            markers.len()
        ));
        fail = true;
    }

    warnings.push(format!(
        "CT INFO: trace_count={} verified_count={verified}",
        markers.len()
    ));

    (!fail, warnings)
}

/// Counts parsed back out of the INFO warning, for the output envelope.
pub fn counts_from_warnings(warnings: &[String]) -> (usize, usize) {
    static RE_COUNTS: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"trace_count=(\d+) verified_count=(\d+)").expect("counts regex")
    });
    for warning in warnings {
        if let Some(cap) = RE_COUNTS.captures(warning) {
            return (
                cap[1].parse().unwrap_or(0),
                cap[2].parse().unwrap_or(0),
            );
        }
    }
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_output(dir: &Path, step: u32, content: &str) {
        let outputs = dir.join("outputs");
        std::fs::create_dir_all(&outputs).expect("mkdir");
        std::fs::write(outputs.join(format!("step-{step}.md")), content).expect("write");
    }

    #[test]
    fn slugify_strips_links_and_backticks() {
        assert_eq!(slugify_heading("## Data Model"), "data-model");
        assert_eq!(slugify_heading("## The `parse` function"), "the-parse-function");
        assert_eq!(
            slugify_heading("## See [the design doc](https://example.com) here"),
            "see-the-design-doc-here"
        );
    }

    #[test]
    fn valid_backward_traces_pass() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 1, "# Step One\n\n## Data Model\n\nbody\n\n## API Surface\n\nbody\n");
        write_output(
            td.path(),
            2,
            "per [trace:step-1:data-model] and [trace:step-1:api-surface] and [trace:step-1:data-model:row-3]\n",
        );

        let (valid, warnings) = validate_cross_step_traceability(td.path(), 2);
        assert!(valid, "{warnings:?}");
        let (count, verified) = counts_from_warnings(&warnings);
        assert_eq!(count, 3);
        assert_eq!(verified, 3);
    }

    #[test]
    fn forward_reference_fails_ct5() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 1, "## A\n\nbody\n");
        write_output(
            td.path(),
            2,
            "[trace:step-2:self] [trace:step-3:future] [trace:step-1:a]\n",
        );

        let (valid, warnings) = validate_cross_step_traceability(td.path(), 2);
        assert!(!valid);
        let ct5: Vec<_> = warnings.iter().filter(|w| w.contains("CT5 FAIL")).collect();
        assert_eq!(ct5.len(), 2);
    }

    #[test]
    fn missing_referenced_output_fails_ct2() {
        let td = tempdir().expect("tempdir");
        write_output(
            td.path(),
            3,
            "[trace:step-1:anything] [trace:step-1:more] [trace:step-1:third]\n",
        );
        let (valid, warnings) = validate_cross_step_traceability(td.path(), 3);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("CT2 FAIL")));
    }

    #[test]
    fn unknown_section_id_is_warning_only() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 1, "## Real Heading\n\nbody\n");
        write_output(
            td.path(),
            2,
            "[trace:step-1:real-heading] [trace:step-1:ghost-section] [trace:step-1:real-heading]\n",
        );
        let (valid, warnings) = validate_cross_step_traceability(td.path(), 2);
        assert!(valid, "{warnings:?}");
        assert!(warnings.iter().any(|w| w.contains("CT3 WARN")));
    }

    #[test]
    fn low_density_fails_ct4() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 1, "## A\n\nbody\n");
        write_output(td.path(), 2, "only [trace:step-1:a] here\n");
        let (valid, warnings) = validate_cross_step_traceability(td.path(), 2);
        assert!(!valid);
        assert!(warnings.iter().any(|w| w.contains("CT4 FAIL")));
    }

    #[test]
    fn no_markers_fails_ct1() {
        let td = tempdir().expect("tempdir");
        write_output(td.path(), 2, "no markers at all\n");
        let (valid, warnings) = validate_cross_step_traceability(td.path(), 2);
        assert!(!valid);
        assert!(warnings[0].contains("CT1 FAIL"));
    }
}
