//! Priority-tiered snapshot rendering, compression and rotation.
//!
//! A snapshot is the session's external memory: a bounded markdown file on
//! disk. Sections are assembled in survival tiers; IMMORTAL sections carry
//! machine-readable marker comments so the compressor can still recognize
//! them after reordering; CRITICAL and SACRIFICABLE sections are shed first
//! when the budget is exceeded.

pub mod compress;
pub mod render;
pub mod rotate;
pub mod summary;

pub use compress::{compress_to_budget, CompressionAudit};
pub use render::{generate_snapshot, SnapshotInput};
pub use rotate::{
    cleanup_session_archives, cleanup_snapshots, find_best_snapshot, is_rich_snapshot,
    should_skip_save,
};
pub use summary::{extract_brief_summary, SummaryItem};

/// Hard budget for a rendered snapshot, in characters.
pub const SNAPSHOT_MAX_CHARS: usize = 100_000;
/// SOT content embedded in a snapshot is cut to this many characters.
pub const SOT_EXCERPT_CHARS: usize = 3_000;
/// The first user message is quoted verbatim up to this many characters.
pub const TASK_EXCERPT_CHARS: usize = 3_000;

/// Prefix of every IMMORTAL marker comment.
pub const IMMORTAL_MARKER_PREFIX: &str = "<!-- IMMORTAL:";

/// Canonical ULW detection pattern, applied to snapshot content.
///
/// D-7: duplicated in `warden-validators::retry`; the setup-maintenance
/// DC-2 check compares the two copies.
pub const ULW_PATTERN: &str = r"ULW 상태|Ultrawork Mode";

/// Save triggers with their snapshot-filename suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Stop,
    PreCompact,
    SessionEnd,
    Threshold,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Stop => "stop",
            Trigger::PreCompact => "precompact",
            Trigger::SessionEnd => "sessionend",
            Trigger::Threshold => "threshold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Trigger::Stop),
            "precompact" => Some(Trigger::PreCompact),
            "sessionend" => Some(Trigger::SessionEnd),
            "threshold" => Some(Trigger::Threshold),
            _ => None,
        }
    }
}
