//! File-operation and read-operation extractors.

use warden_transcript::TranscriptEntry;

/// Accumulated edit history for one file path.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOperation {
    pub path: String,
    /// Classifying tool; a later Write overrides an earlier Edit.
    pub last_tool: String,
    pub last_summary: String,
    /// Total edit events on this path, regardless of tool.
    pub count: usize,
    pub details: Vec<String>,
}

/// Ordered list of modified files, keyed by path, preserving first-occurrence
/// order.
pub fn extract_file_operations(entries: &[TranscriptEntry]) -> Vec<FileOperation> {
    let mut ops: Vec<FileOperation> = Vec::new();

    for entry in entries {
        let TranscriptEntry::ToolUse {
            tool_name,
            summary,
            file_path: Some(path),
            ..
        } = entry
        else {
            continue;
        };
        if tool_name != "Edit" && tool_name != "Write" {
            continue;
        }

        match ops.iter_mut().find(|op| op.path == *path) {
            Some(op) => {
                op.count += 1;
                op.last_tool = tool_name.clone();
                op.last_summary = summary.clone();
                op.details.push(summary.clone());
            }
            None => ops.push(FileOperation {
                path: path.clone(),
                last_tool: tool_name.clone(),
                last_summary: summary.clone(),
                count: 1,
                details: vec![summary.clone()],
            }),
        }
    }
    ops
}

/// A file read with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCount {
    pub path: String,
    pub count: usize,
}

/// Read operations sorted by count descending, then path ascending.
pub fn extract_read_operations(entries: &[TranscriptEntry]) -> Vec<ReadCount> {
    let mut counts: Vec<ReadCount> = Vec::new();

    for entry in entries {
        let TranscriptEntry::ToolUse {
            tool_name,
            file_path: Some(path),
            ..
        } = entry
        else {
            continue;
        };
        if tool_name != "Read" {
            continue;
        }
        match counts.iter_mut().find(|r| r.path == *path) {
            Some(r) => r.count += 1,
            None => counts.push(ReadCount {
                path: path.clone(),
                count: 1,
            }),
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.path.cmp(&b.path)));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_use(tool: &str, path: &str) -> TranscriptEntry {
        TranscriptEntry::ToolUse {
            timestamp: String::new(),
            tool_use_id: format!("tu_{tool}_{path}"),
            tool_name: tool.to_string(),
            summary: format!("{tool} {path}"),
            file_path: Some(path.to_string()),
            line_count: None,
            command: None,
            description: None,
        }
    }

    #[test]
    fn write_overrides_edit_for_classification() {
        let entries = vec![
            tool_use("Edit", "src/a.rs"),
            tool_use("Edit", "src/a.rs"),
            tool_use("Write", "src/a.rs"),
        ];
        let ops = extract_file_operations(&entries);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].last_tool, "Write");
        assert_eq!(ops[0].count, 3);
        assert_eq!(ops[0].details.len(), 3);
    }

    #[test]
    fn first_occurrence_order_is_preserved() {
        let entries = vec![
            tool_use("Edit", "b.rs"),
            tool_use("Edit", "a.rs"),
            tool_use("Edit", "b.rs"),
        ];
        let ops = extract_file_operations(&entries);
        let paths: Vec<&str> = ops.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, vec!["b.rs", "a.rs"]);
    }

    #[test]
    fn reads_sorted_by_count_then_path() {
        let entries = vec![
            tool_use("Read", "z.rs"),
            tool_use("Read", "a.rs"),
            tool_use("Read", "z.rs"),
            tool_use("Read", "m.rs"),
        ];
        let reads = extract_read_operations(&entries);
        assert_eq!(
            reads,
            vec![
                ReadCount { path: "z.rs".into(), count: 2 },
                ReadCount { path: "a.rs".into(), count: 1 },
                ReadCount { path: "m.rs".into(), count: 1 },
            ]
        );
    }
}
