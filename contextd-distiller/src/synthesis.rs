//! Prompt construction, response parsing, and merged-confidence
//! computation for a single cluster (spec §4.7.2, §4.7.3).

use crate::clustering::Cluster;
use contextd_core::{Error, Result};
use contextd_services::Outcome;

/// Build the synthesis prompt enumerating every cluster member's
/// title/content/outcome/tags (spec §4.7.2).
#[must_use]
pub fn build_prompt(cluster: &Cluster) -> String {
    let mut prompt = String::from(
        "You are consolidating near-duplicate memories into one higher-confidence memory.\n\
         Respond with exactly these sections, one per line:\n\
         TITLE: <short title>\n\
         CONTENT: <merged lesson, one paragraph>\n\
         OUTCOME: <success or failure>\n\
         TAGS: <comma-separated tags, optional>\n\n\
         Members:\n",
    );
    for (i, member) in cluster.members.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. title={:?} content={:?} outcome={} tags={:?}\n",
            i + 1,
            member.title,
            member.content,
            member.outcome.as_str(),
            member.tags,
        ));
    }
    prompt
}

/// A parsed synthesis response (spec §4.7.2).
#[derive(Debug, Clone)]
pub struct SynthesizedMemory {
    pub title: String,
    pub content: String,
    pub outcome: Outcome,
    pub tags: Vec<String>,
}

/// Parse an LLM completion into its `TITLE`/`CONTENT`/`OUTCOME`/`TAGS`
/// sections, stripping code-fence markers and surrounding whitespace.
///
/// # Errors
///
/// Returns [`Error::Validation`] if a required section (`TITLE`, `CONTENT`,
/// `OUTCOME`) is missing, or [`Error::InvalidOutcome`] if `OUTCOME` is not
/// `success`/`failure` (case-insensitive).
pub fn parse_response(raw: &str) -> Result<SynthesizedMemory> {
    let mut title = None;
    let mut content = None;
    let mut outcome = None;
    let mut tags = Vec::new();

    for line in raw.lines() {
        let line = line.trim().trim_start_matches("```").trim_end_matches("```").trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = strip_section(line, "TITLE") {
            title = Some(rest.to_string());
        } else if let Some(rest) = strip_section(line, "CONTENT") {
            content = Some(rest.to_string());
        } else if let Some(rest) = strip_section(line, "OUTCOME") {
            outcome = Some(Outcome::parse(rest.trim())?);
        } else if let Some(rest) = strip_section(line, "TAGS") {
            tags = rest
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    Ok(SynthesizedMemory {
        title: title.ok_or_else(|| Error::Validation("synthesis response missing TITLE".into()))?,
        content: content.ok_or_else(|| Error::Validation("synthesis response missing CONTENT".into()))?,
        outcome: outcome.ok_or_else(|| Error::Validation("synthesis response missing OUTCOME".into()))?,
        tags,
    })
}

fn strip_section<'a>(line: &'a str, section: &str) -> Option<&'a str> {
    let prefix = format!("{section}:");
    line.strip_prefix(&prefix).map(str::trim)
}

/// Consensus bonus added to the weighted-average confidence (spec §4.7.3:
/// "a small monotonically-increasing consensus term"). Caps growth at a
/// cluster size of 6 so a single additional member past that point no
/// longer moves the bonus.
fn consensus_bonus(n: usize) -> f32 {
    0.02 * (n.saturating_sub(1).min(5) as f32) / 5.0
}

/// Merged confidence for a cluster (spec §4.7.3):
/// `c_merged = clamp01((Σ cᵢ·wᵢ) / (Σ wᵢ) + bonus(n))`, `wᵢ = max(1, usage_countᵢ)`.
///
/// # Errors
///
/// Returns [`Error::Validation`] if `members` is empty.
pub fn merged_confidence(members: &[contextd_services::MemoryRecord]) -> Result<f32> {
    if members.is_empty() {
        return Err(Error::Validation("cannot merge confidence of an empty cluster".into()));
    }
    if members.len() == 1 {
        return Ok(members[0].confidence);
    }

    let mut weighted_sum = 0.0_f32;
    let mut weight_sum = 0.0_f32;
    for member in members {
        let weight = (member.usage_count.max(1)) as f32;
        weighted_sum += member.confidence * weight;
        weight_sum += weight;
    }

    let merged = weighted_sum / weight_sum + consensus_bonus(members.len());
    Ok(merged.clamp(0.0, 1.0))
}

/// Human-readable attribution text recorded on the consolidated memory
/// (spec §4.7.4 step 3).
#[must_use]
pub fn attribution_text(n: usize) -> String {
    format!("Consolidated from {n} memories")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contextd_services::MemoryState;

    fn record(id: &str, usage_count: i64, confidence: f32) -> contextd_services::MemoryRecord {
        contextd_services::MemoryRecord {
            id: id.to_string(),
            title: "t".into(),
            content: "c".into(),
            outcome: Outcome::Success,
            tags: vec![],
            confidence,
            usage_count,
            state: MemoryState::Active,
            consolidation_id: None,
            source_ids: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn parses_well_formed_response() {
        let raw = "```\nTITLE: Use t.Run subtests\nCONTENT: Prefer t.Run for isolation\nOUTCOME: Success\nTAGS: testing, go\n```";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.title, "Use t.Run subtests");
        assert_eq!(parsed.outcome, Outcome::Success);
        assert_eq!(parsed.tags, vec!["testing", "go"]);
    }

    #[test]
    fn missing_required_section_is_an_error() {
        let raw = "TITLE: x\nOUTCOME: success";
        assert!(parse_response(raw).is_err());
    }

    #[test]
    fn invalid_outcome_is_an_error() {
        let raw = "TITLE: x\nCONTENT: y\nOUTCOME: maybe";
        let err = parse_response(raw).unwrap_err();
        assert!(matches!(err, Error::InvalidOutcome(_)));
    }

    #[test]
    fn tags_are_optional() {
        let raw = "TITLE: x\nCONTENT: y\nOUTCOME: failure";
        let parsed = parse_response(raw).unwrap();
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn single_member_confidence_is_unchanged() {
        let members = vec![record("m1", 3, 0.7)];
        assert_eq!(merged_confidence(&members).unwrap(), 0.7);
    }

    #[test]
    fn empty_slice_is_an_error() {
        assert!(merged_confidence(&[]).is_err());
    }

    #[test]
    fn worked_example_stays_within_spec_bounds() {
        // spec §8 worked example: usage_counts {3,1,2}, confidences {0.6,0.5,0.7}.
        // weighted avg = (0.6*3 + 0.5*1 + 0.7*2) / 6 = 3.7/6 ≈ 0.6167
        let members = vec![record("m1", 3, 0.6), record("m2", 1, 0.5), record("m3", 2, 0.7)];
        let merged = merged_confidence(&members).unwrap();
        assert!(merged > 0.6167, "bonus must only add, never subtract");
        assert!(merged <= 1.0);
    }

    #[test]
    fn bonus_is_monotonic_in_cluster_size() {
        assert!(consensus_bonus(2) < consensus_bonus(4));
        assert!(consensus_bonus(6) <= consensus_bonus(10));
    }
}
