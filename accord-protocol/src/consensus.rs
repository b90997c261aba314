use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum number of reformat retries the consensus detector issues for a
/// single side's vote before falling back to a fabricated "no" vote.
pub const MAX_CONSENSUS_RETRIES: u32 = 2;

/// A parsed (or inferred) vote, prior to being stamped with role and
/// timestamp by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVote {
    pub has_consensus: bool,
    pub confidence: u8,
    pub reasoning: String,
    pub proposed_solution: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConsensusParseError {
    #[error("empty response cannot be scored")]
    Empty,
}

static HAS_CONSENSUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)HAS_CONSENSUS:\s*(YES|NO)").unwrap());
static CONFIDENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[CONFIDENCE\]\s*(\d{1,3})").unwrap());
static REASONING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[REASONING\]\s*(.*?)(?:\[PROPOSED_SOLUTION\]|\z)").unwrap()
});
static SOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[PROPOSED_SOLUTION\]\s*(.*)\z").unwrap());

const POSITIVE_PHRASES: &[&str] = &[
    "we have reached consensus",
    "i agree with",
    "we agree that",
    "i concur",
    "the solution is",
    "consensus has been reached",
    "our agreed solution",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "i disagree",
    "we have not reached",
    "no consensus",
    "further discussion needed",
    "still need to discuss",
    "i think differently",
];

static FALLBACK_SOLUTION_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?is)the solution is:?\s*(.{20,})").unwrap(),
        Regex::new(r"(?is)we agreed? (?:on|that):?\s*(.{20,})").unwrap(),
        Regex::new(r"(?is)our final answer is:?\s*(.{20,})").unwrap(),
    ]
});

/// Parse a model's consensus-check response, preferring the structured
/// `[CONSENSUS_CHECK]` contract and falling back to natural-language
/// inference when the contract is absent or malformed.
pub fn parse_vote(text: &str) -> Result<ParsedVote, ConsensusParseError> {
    if text.trim().is_empty() {
        return Err(ConsensusParseError::Empty);
    }

    if let Some(vote) = parse_structured(text) {
        return Ok(vote);
    }
    Ok(natural_language_fallback(text))
}

fn parse_structured(text: &str) -> Option<ParsedVote> {
    if !text.contains("[CONSENSUS_CHECK]") {
        return None;
    }
    let has_consensus = HAS_CONSENSUS_RE
        .captures(text)?
        .get(1)?
        .as_str()
        .eq_ignore_ascii_case("YES");

    let confidence = CONFIDENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .map(|v| v.clamp(0, 100) as u8)
        .unwrap_or(50);

    let reasoning = REASONING_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let raw_solution = SOLUTION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let proposed_solution = if has_consensus && is_real_solution(&raw_solution) {
        Some(raw_solution)
    } else {
        None
    };

    Some(ParsedVote {
        has_consensus,
        confidence,
        reasoning,
        proposed_solution,
    })
}

fn is_real_solution(candidate: &str) -> bool {
    candidate.len() >= 10 && !candidate.to_lowercase().contains("no consensus")
}

/// Score a response that does not follow the structured contract by counting
/// fixed positive/negative phrases.
pub fn natural_language_fallback(text: &str) -> ParsedVote {
    let lower = text.to_lowercase();
    let positive = POSITIVE_PHRASES.iter().filter(|p| lower.contains(**p)).count() as i32;
    let negative = NEGATIVE_PHRASES.iter().filter(|p| lower.contains(**p)).count() as i32;

    let has_consensus = positive > negative && positive > 0;
    let confidence = (50 + 10 * (positive - negative)).clamp(30, 70) as u8;

    let proposed_solution = if has_consensus {
        FALLBACK_SOLUTION_RES.iter().find_map(|re| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
    } else {
        None
    };

    ParsedVote {
        has_consensus,
        confidence,
        reasoning: text.trim().to_string(),
        proposed_solution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;

    const STRUCTURED_YES: &str = "[CONSENSUS_CHECK]\nHAS_CONSENSUS: YES\n[CONFIDENCE]\n85\n\
        [REASONING]\nBoth sides converged on caching with TTL eviction.\n[PROPOSED_SOLUTION]\n\
        Use an LRU cache with a 5 minute TTL and write-through invalidation.";

    #[test]
    fn parses_structured_yes_with_solution() {
        let vote = parse_vote(STRUCTURED_YES).unwrap();
        assert!(vote.has_consensus);
        assert_eq!(vote.confidence, 85);
        assert!(vote.proposed_solution.is_some());
    }

    #[test]
    fn structured_no_never_attaches_solution() {
        let text = "[CONSENSUS_CHECK]\nHAS_CONSENSUS: NO\n[CONFIDENCE]\n40\n[REASONING]\n\
            Still disagreeing on cache eviction policy.\n[PROPOSED_SOLUTION]\nNo consensus yet.";
        let vote = parse_vote(text).unwrap();
        assert!(!vote.has_consensus);
        assert!(vote.proposed_solution.is_none());
    }

    #[test]
    fn missing_confidence_defaults_to_fifty() {
        let text = "[CONSENSUS_CHECK]\nHAS_CONSENSUS: YES\n[REASONING]\nfine\n\
            [PROPOSED_SOLUTION]\nUse a write-through cache with bounded size.";
        let vote = parse_vote(text).unwrap();
        assert_eq!(vote.confidence, 50);
    }

    #[test]
    fn confidence_outside_range_is_clamped() {
        let text = "[CONSENSUS_CHECK]\nHAS_CONSENSUS: YES\n[CONFIDENCE]\n140\n[REASONING]\nok\n\
            [PROPOSED_SOLUTION]\nUse a write-through cache with bounded size.";
        let vote = parse_vote(text).unwrap();
        assert_eq!(vote.confidence, 100);
    }

    #[test]
    fn short_solution_text_is_treated_as_absent() {
        let text = "[CONSENSUS_CHECK]\nHAS_CONSENSUS: YES\n[CONFIDENCE]\n70\n[REASONING]\nok\n\
            [PROPOSED_SOLUTION]\ntiny";
        let vote = parse_vote(text).unwrap();
        assert!(vote.proposed_solution.is_none());
    }

    #[test]
    fn falls_back_to_natural_language_when_marker_missing() {
        let text = "I think we have reached consensus. The solution is: \
            cache responses for five minutes using an LRU policy.";
        let vote = parse_vote(text).unwrap();
        assert!(vote.has_consensus);
        assert!(vote.proposed_solution.is_some());
    }

    #[test]
    fn fallback_negative_outweighs_positive() {
        let text = "I disagree, we have not reached agreement and further discussion is needed.";
        let vote = natural_language_fallback(text);
        assert!(!vote.has_consensus);
    }

    #[test]
    fn case_insensitive_has_consensus_marker() {
        let text = "[CONSENSUS_CHECK]\nhas_consensus: yes\n[CONFIDENCE]\n60\n[REASONING]\nok\n\
            [PROPOSED_SOLUTION]\nUse a write-through cache with bounded size.";
        let vote = parse_vote(text).unwrap();
        assert!(vote.has_consensus);
    }

    #[test]
    fn empty_text_is_a_parse_error() {
        assert!(parse_vote("   ").is_err());
    }

    proptest::proptest! {
        #[test]
        fn confidence_is_always_clamped_into_u8_range(raw_confidence in -1000i32..1000i32) {
            let text = format!(
                "[CONSENSUS_CHECK]\nHAS_CONSENSUS: YES\n[CONFIDENCE]\n{}\n[REASONING]\nok\n\
                 [PROPOSED_SOLUTION]\nUse a write-through cache with bounded size.",
                raw_confidence
            );
            if let Ok(vote) = parse_vote(&text) {
                prop_assert!(vote.confidence <= 100);
            }
        }

        #[test]
        fn parse_vote_never_panics_on_arbitrary_text(text in ".{0,500}") {
            let _ = parse_vote(&text);
        }
    }
}
