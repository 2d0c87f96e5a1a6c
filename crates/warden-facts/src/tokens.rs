//! Multi-signal token estimation from the transcript file.
//!
//! Two independent signals are combined: transcript byte size and entry
//! count. The estimate takes the larger of the two so a transcript dense in
//! short tool events is not underestimated by the byte signal alone.

use std::path::Path;

/// Assumed effective context capacity in tokens.
pub const CAPACITY_TOKENS: u64 = 200_000;
/// Proactive save triggers at this fraction of capacity.
pub const THRESHOLD_RATIO: f64 = 0.75;
/// Bytes per token for mixed prose/code transcripts.
const BYTES_PER_TOKEN: u64 = 4;
/// Average token cost attributed to one transcript entry (envelope + body).
const TOKENS_PER_ENTRY: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub estimated_tokens: u64,
    pub transcript_bytes: u64,
    pub entry_count: usize,
    pub over_threshold: bool,
}

/// Estimate token usage from the transcript on disk plus the parsed entry
/// count. Missing transcript → zero estimate, never over threshold.
pub fn estimate_tokens(transcript_path: &Path, entry_count: usize) -> TokenEstimate {
    let transcript_bytes = std::fs::metadata(transcript_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let from_bytes = transcript_bytes / BYTES_PER_TOKEN;
    let from_entries = entry_count as u64 * TOKENS_PER_ENTRY;
    let estimated_tokens = from_bytes.max(from_entries);

    let threshold = (CAPACITY_TOKENS as f64 * THRESHOLD_RATIO) as u64;
    TokenEstimate {
        estimated_tokens,
        transcript_bytes,
        entry_count,
        over_threshold: estimated_tokens >= threshold,
    }
}
