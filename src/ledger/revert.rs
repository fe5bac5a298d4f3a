//! Revert-reason triage.
//!
//! A backstop rejection is a defense signal, not a failure, so it must never be lumped in with
//! an arbitrary revert. Node error strings are noisy (JSON payloads, nested causes), so they are
//! compacted before matching.

const MAX_REASON_LEN: usize = 160;

const BACKSTOP_MARKERS: [&str; 2] = ["rate limit exceeded", "system paused"];
const PAUSED_MARKERS: [&str; 3] = ["enforcedpause", "pausable: paused", "contract is paused"];
const SIGNATURE_MARKERS: [&str; 2] = ["invalid signature", "ecdsainvalidsignature"];
const BLACKLIST_MARKERS: [&str; 1] = ["blacklisted"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertCategory {
    /// Contract-enforced rate limit (or the auto-pause it trips).
    Backstop,
    /// Halted by a pause that was already in effect.
    Paused,
    /// Pause signature did not recover to the registered watchtower for the expected nonce.
    InvalidSignature,
    Blacklisted,
    Other(String),
}

impl RevertCategory {
    pub fn is_backstop(&self) -> bool {
        matches!(self, RevertCategory::Backstop)
    }

    pub fn reason(&self) -> &str {
        match self {
            RevertCategory::Backstop => "Rate limit exceeded",
            RevertCategory::Paused => "EnforcedPause",
            RevertCategory::InvalidSignature => "Invalid signature",
            RevertCategory::Blacklisted => "Blacklisted",
            RevertCategory::Other(reason) => reason,
        }
    }
}

pub fn classify_revert_reason(message: &str) -> RevertCategory {
    let lowered = message.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));
    if has(&BACKSTOP_MARKERS) {
        RevertCategory::Backstop
    } else if has(&PAUSED_MARKERS) {
        RevertCategory::Paused
    } else if has(&SIGNATURE_MARKERS) {
        RevertCategory::InvalidSignature
    } else if has(&BLACKLIST_MARKERS) {
        RevertCategory::Blacklisted
    } else {
        RevertCategory::Other(compact_reason(message, MAX_REASON_LEN))
    }
}

pub fn compact_reason(message: &str, max_len: usize) -> String {
    let mut raw = message;
    if let Some((prefix, _)) = raw.split_once(" data: ") {
        raw = prefix;
    }
    if let Some((_, rest)) = raw.split_once("execution reverted:") {
        raw = rest;
    }

    let mut compact = String::with_capacity(raw.len().min(max_len.saturating_add(16)));
    let mut prev_ws = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !prev_ws && !compact.is_empty() {
                compact.push(' ');
            }
            prev_ws = true;
            continue;
        }
        compact.push(ch);
        prev_ws = false;
        if compact.len() > max_len {
            break;
        }
    }
    if compact.len() > max_len {
        let mut cut = max_len;
        while !compact.is_char_boundary(cut) {
            cut -= 1;
        }
        compact.truncate(cut);
        compact.push_str("...");
    }
    compact.trim().to_string()
}
