//! Session-phase classification over windows of the tool sequence.

use warden_transcript::TranscriptEntry;

/// Window length in tool uses.
pub const PHASE_WINDOW: usize = 20;
/// Windows overlap by half their length.
pub const PHASE_STEP: usize = PHASE_WINDOW / 2;

/// Coarse working phase of a window (or a whole session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Planning,
    Orchestration,
    Research,
    Implementation,
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Orchestration => "orchestration",
            Phase::Research => "research",
            Phase::Implementation => "implementation",
            Phase::Unknown => "unknown",
        }
    }
}

fn classify_window(tools: &[&str]) -> Phase {
    if tools.is_empty() {
        return Phase::Unknown;
    }
    let total = tools.len() as f64;
    let share = |pred: fn(&str) -> bool| tools.iter().filter(|t| pred(t)).count() as f64 / total;

    let task = share(|t| t == "Task");
    let edit = share(|t| t == "Edit" || t == "Write");
    let research = share(|t| {
        matches!(t, "Read" | "Grep" | "Glob" | "WebSearch" | "WebFetch")
    });
    let planning = share(|t| matches!(t, "TodoWrite" | "ExitPlanMode" | "TaskCreate"));

    // Deterministic priority: orchestration > implementation > planning >
    // research. Thresholds are proportions of the window.
    if task >= 0.2 {
        Phase::Orchestration
    } else if edit >= 0.3 {
        Phase::Implementation
    } else if planning >= 0.2 {
        Phase::Planning
    } else if research >= 0.6 {
        Phase::Research
    } else {
        Phase::Unknown
    }
}

/// Classify the session into an overall phase and a phase-flow string.
///
/// The flow concatenates window transitions with consecutive duplicates
/// collapsed, e.g. `research→implementation`.
pub fn classify_phases(entries: &[TranscriptEntry]) -> (Phase, String) {
    let tools: Vec<&str> = entries
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::ToolUse { tool_name, .. } => Some(tool_name.as_str()),
            _ => None,
        })
        .collect();

    if tools.is_empty() {
        return (Phase::Unknown, String::new());
    }

    let mut labels: Vec<Phase> = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + PHASE_WINDOW).min(tools.len());
        labels.push(classify_window(&tools[start..end]));
        if end == tools.len() {
            break;
        }
        start += PHASE_STEP;
    }

    // Overall phase: most frequent label; ties resolved toward the earliest
    // occurring label.
    let mut best = labels[0];
    let mut best_count = 0;
    for candidate in &labels {
        let count = labels.iter().filter(|l| *l == candidate).count();
        if count > best_count {
            best = *candidate;
            best_count = count;
        }
    }

    let mut flow: Vec<&'static str> = Vec::new();
    for label in &labels {
        if flow.last() != Some(&label.as_str()) {
            flow.push(label.as_str());
        }
    }

    (best, flow.join("→"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> TranscriptEntry {
        TranscriptEntry::ToolUse {
            timestamp: String::new(),
            tool_use_id: String::new(),
            tool_name: name.to_string(),
            summary: String::new(),
            file_path: None,
            line_count: None,
            command: None,
            description: None,
        }
    }

    #[test]
    fn read_heavy_session_is_research() {
        let entries: Vec<_> = (0..20).map(|_| tool("Read")).collect();
        let (phase, flow) = classify_phases(&entries);
        assert_eq!(phase, Phase::Research);
        assert_eq!(flow, "research");
    }

    #[test]
    fn edit_heavy_session_is_implementation() {
        let mut entries: Vec<_> = (0..8).map(|_| tool("Edit")).collect();
        entries.extend((0..12).map(|_| tool("Bash")));
        let (phase, _) = classify_phases(&entries);
        assert_eq!(phase, Phase::Implementation);
    }

    #[test]
    fn task_share_means_orchestration() {
        let mut entries: Vec<_> = (0..5).map(|_| tool("Task")).collect();
        entries.extend((0..15).map(|_| tool("Read")));
        let (phase, _) = classify_phases(&entries);
        assert_eq!(phase, Phase::Orchestration);
    }

    #[test]
    fn flow_collapses_consecutive_duplicates() {
        let mut entries: Vec<_> = (0..20).map(|_| tool("Read")).collect();
        entries.extend((0..20).map(|_| tool("Edit")));
        let (_, flow) = classify_phases(&entries);
        assert!(flow.starts_with("research"));
        assert!(flow.ends_with("implementation"));
        assert!(!flow.contains("research→research"));
    }

    #[test]
    fn no_tools_is_unknown() {
        let (phase, flow) = classify_phases(&[]);
        assert_eq!(phase, Phase::Unknown);
        assert!(flow.is_empty());
    }
}
