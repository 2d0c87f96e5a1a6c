//! Design-decision extraction from assistant text.
//!
//! Decisions are matched with a fixed, priority-ordered table of compiled
//! regexes. Higher tiers win: an explicit marker beats a bold label beats a
//! rationale phrase, and so on. Intent-tier matches pass through a noise
//! filter that drops routine narration ("let me check", "will now read").

use once_cell::sync::Lazy;
use regex::Regex;
use warden_transcript::TranscriptEntry;

/// Maximum decisions emitted per session.
pub const MAX_DECISIONS: usize = 20;
/// Of those, at most this many may come from the intent tier.
pub const MAX_INTENT_DECISIONS: usize = 5;

/// Priority tier of a matched decision, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecisionTier {
    Marker,
    BoldLabel,
    Rationale,
    ChoiceVerb,
    Intent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub tier: DecisionTier,
    pub text: String,
}

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--\s*DECISION:\s*(.+?)\s*-->").expect("marker regex"));
static BOLD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*\s*(?:Decision|결정|선택)\s*[:：]?\s*\*\*\s*(.+)").expect("bold regex")
});
static RATIONALE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:because|since|rationale[:\s]|so that)\b|이유는|때문에").expect("rationale regex")
});
static CHOICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:chose|chosen|decided|selected|opted for|will use|instead of|rather than|trade-?off)\b",
    )
    .expect("choice regex")
});
static INTENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:i'll|i will|let me|going to|next i)\b").expect("intent regex")
});
static INTENT_NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:will now read|let me (?:check|look|see|read)|going to (?:read|look|check))\b",
    )
    .expect("noise regex")
});

fn classify_line(line: &str) -> Option<Decision> {
    if let Some(cap) = MARKER_RE.captures(line) {
        return Some(Decision {
            tier: DecisionTier::Marker,
            text: cap[1].trim().to_string(),
        });
    }
    if let Some(cap) = BOLD_RE.captures(line) {
        return Some(Decision {
            tier: DecisionTier::BoldLabel,
            text: cap[1].trim().to_string(),
        });
    }
    if CHOICE_RE.is_match(line) {
        // Choice verbs outrank bare rationale when both appear on one line
        // only if no rationale phrase is present; rationale is the stronger
        // signal of a recorded decision.
        if RATIONALE_RE.is_match(line) {
            return Some(Decision {
                tier: DecisionTier::Rationale,
                text: line.trim().to_string(),
            });
        }
        return Some(Decision {
            tier: DecisionTier::ChoiceVerb,
            text: line.trim().to_string(),
        });
    }
    if RATIONALE_RE.is_match(line) {
        return Some(Decision {
            tier: DecisionTier::Rationale,
            text: line.trim().to_string(),
        });
    }
    if INTENT_RE.is_match(line) && !INTENT_NOISE_RE.is_match(line) {
        return Some(Decision {
            tier: DecisionTier::Intent,
            text: line.trim().to_string(),
        });
    }
    None
}

/// Scan assistant texts and return at most [`MAX_DECISIONS`] decisions, with
/// intent-tier matches capped at [`MAX_INTENT_DECISIONS`] of those slots.
pub fn extract_decisions(entries: &[TranscriptEntry]) -> Vec<Decision> {
    let mut found: Vec<Decision> = Vec::new();

    for entry in entries {
        let TranscriptEntry::AssistantText { text, .. } = entry else {
            continue;
        };
        for line in text.lines() {
            let line = line.trim();
            if line.len() < 10 {
                continue;
            }
            if let Some(decision) = classify_line(line) {
                if !found.iter().any(|d| d.text == decision.text) {
                    found.push(decision);
                }
            }
        }
    }

    // Stable by tier: keep document order within a tier, higher tiers first.
    found.sort_by_key(|d| d.tier);

    let mut out: Vec<Decision> = Vec::new();
    let mut intent_used = 0;
    for decision in found {
        if out.len() >= MAX_DECISIONS {
            break;
        }
        if decision.tier == DecisionTier::Intent {
            if intent_used >= MAX_INTENT_DECISIONS {
                continue;
            }
            intent_used += 1;
        }
        out.push(decision);
    }
    out
}
