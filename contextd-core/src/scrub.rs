//! Secret-scrubbing contract consumed by the fallback wrapper (§4.5.5) and
//! the context-folding runtime (§4.8.3's branch-return discipline).
//!
//! The scrubbing *rule library* itself is an external collaborator (spec
//! §1 non-goals) — this module only defines the `Scrub(content) ->
//! (scrubbed, report)` interface every caller programs against, plus a
//! conservative pattern-based default so the rest of the crate has
//! something real to call and test against.

use std::sync::LazyLock;

/// Outcome of scrubbing one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubReport {
    /// The content with every detected secret replaced by a placeholder.
    pub scrubbed: String,
    /// How many distinct secrets were found and redacted.
    pub secrets_found: usize,
    /// Set when the detector itself failed; callers must fail closed and
    /// reject the write rather than persist unscrubbed content.
    pub error: Option<String>,
}

impl ScrubReport {
    /// Whether this report demands the write be rejected outright.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// `Scrub(content) -> (scrubbed, report)` (spec §4.5.5).
pub trait Scrubber: Send + Sync {
    /// Scan `content` for secrets, returning the scrubbed form and a report.
    fn scrub(&self, content: &str) -> ScrubReport;
}

static PATTERNS: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    [
        r"sk-[A-Za-z0-9]{20,}",
        r"ghp_[A-Za-z0-9]{36}",
        r"AKIA[0-9A-Z]{16}",
        r"(?i)bearer\s+[A-Za-z0-9._-]{20,}",
        r"-----BEGIN [A-Z ]*PRIVATE KEY-----",
    ]
    .iter()
    .map(|p| regex::Regex::new(p).expect("static scrub pattern is valid"))
    .collect()
});

/// Regex-based default scrubber covering the common API-key and token
/// shapes (OpenAI-style `sk-...`, GitHub PATs, AWS access keys, bearer
/// tokens, PEM private keys). Never returns `error` — a real deployment
/// replaces this with a richer external detector via the [`Scrubber`]
/// trait without any caller-side changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternScrubber;

impl Scrubber for PatternScrubber {
    fn scrub(&self, content: &str) -> ScrubReport {
        let mut scrubbed = content.to_string();
        let mut found = 0usize;
        for pattern in PATTERNS.iter() {
            let hits = pattern.find_iter(&scrubbed.clone()).count();
            if hits > 0 {
                found += hits;
                scrubbed = pattern.replace_all(&scrubbed, "[REDACTED]").into_owned();
            }
        }
        ScrubReport {
            scrubbed,
            secrets_found: found,
            error: None,
        }
    }
}

/// Test/fixture scrubber that always reports a detector failure, for
/// exercising the fail-closed path (spec §10's scenario 6).
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingScrubber;

impl Scrubber for FailingScrubber {
    fn scrub(&self, content: &str) -> ScrubReport {
        ScrubReport {
            scrubbed: content.to_string(),
            secrets_found: 0,
            error: Some("detector unavailable".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_scrubber_redacts_openai_style_key() {
        let report = PatternScrubber.scrub("my key is sk-abcdefghijklmnopqrstuvwxyz012345");
        assert_eq!(report.secrets_found, 1);
        assert!(!report.scrubbed.contains("sk-abcdefghijklmnopqrstuvwxyz012345"));
        assert!(report.scrubbed.contains("[REDACTED]"));
    }

    #[test]
    fn pattern_scrubber_passes_clean_content_through() {
        let report = PatternScrubber.scrub("just a normal memory about a bug fix");
        assert_eq!(report.secrets_found, 0);
        assert_eq!(report.scrubbed, "just a normal memory about a bug fix");
    }

    #[test]
    fn failing_scrubber_reports_error() {
        let report = FailingScrubber.scrub("anything");
        assert!(report.is_error());
    }
}
