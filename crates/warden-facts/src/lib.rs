//! Deterministic fact extraction from parsed transcripts.
//!
//! Every extractor here is a pure function of the entry list (plus, for the
//! completion state, the filesystem at snapshot time). Nothing in this crate
//! interprets intent; semantic judgment stays with the assistant; this
//! layer only records what observably happened.

pub mod completion;
pub mod decisions;
pub mod errors;
pub mod ops;
pub mod phases;
pub mod tokens;
pub mod worklog;

pub use completion::{CompletionState, FileCheck, ToolStats, extract_completion_state};
pub use decisions::{Decision, DecisionTier, extract_decisions};
pub use errors::{ErrorPattern, Resolution, SuccessPattern, extract_error_patterns, extract_success_patterns};
pub use ops::{FileOperation, ReadCount, extract_file_operations, extract_read_operations};
pub use phases::{Phase, classify_phases};
pub use tokens::{TokenEstimate, estimate_tokens};
pub use worklog::WorkLogEntry;

/// Derive short retrieval tags from file paths: extensions and notable path
/// components. Used for knowledge-index tags and the restore hook's dynamic
/// Grep hints.
pub fn extract_path_tags(paths: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    for path in paths {
        let normalized = path.replace('\\', "/");
        if let Some(ext) = normalized.rsplit('.').next() {
            let lang = match ext {
                "rs" => "rust",
                "py" => "python",
                "ts" | "tsx" => "typescript",
                "js" | "jsx" => "javascript",
                "go" => "go",
                "java" => "java",
                "md" => "docs",
                "yaml" | "yml" => "yaml",
                _ => "",
            };
            push(lang.to_string());
        }
        for part in normalized.split('/').rev().skip(1) {
            if !part.is_empty() && part != "src" && part != "." && !part.starts_with('.') {
                push(part.to_lowercase());
                break;
            }
        }
    }
    tags
}

/// Dominant language tag across modified files, when one can be derived.
pub fn primary_language(paths: &[String]) -> Option<String> {
    let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
    for path in paths {
        let lang = match path.rsplit('.').next() {
            Some("rs") => "rust",
            Some("py") => "python",
            Some("ts") | Some("tsx") => "typescript",
            Some("js") | Some("jsx") => "javascript",
            Some("go") => "go",
            Some("java") => "java",
            _ => continue,
        };
        *counts.entry(lang).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(lang, _)| lang.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_tags_cover_language_and_directory() {
        let tags = extract_path_tags(&[
            "src/auth/login.py".to_string(),
            "web/app.ts".to_string(),
        ]);
        assert!(tags.contains(&"python".to_string()));
        assert!(tags.contains(&"typescript".to_string()));
        assert!(tags.contains(&"auth".to_string()));
        assert!(tags.contains(&"web".to_string()));
    }

    #[test]
    fn primary_language_picks_majority() {
        let lang = primary_language(&[
            "a.rs".to_string(),
            "b.rs".to_string(),
            "c.py".to_string(),
        ]);
        assert_eq!(lang.as_deref(), Some("rust"));
        assert_eq!(primary_language(&["README".to_string()]), None);
    }
}
