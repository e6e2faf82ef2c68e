//! Importance scoring heuristic
//!
//! New items without a caller-supplied importance get a score derived
//! from the item type, content length, and the presence of risk
//! keywords. The score drives migration ordering and archival eviction.

use strata_core::MemoryItemType;

/// Content keywords that raise the score
const RISK_KEYWORDS: &[&str] = &[
    "critical",
    "important",
    "must",
    "never",
    "always",
    "error",
    "urgent",
];

/// Base score by item type
fn base_score(item_type: MemoryItemType) -> f64 {
    match item_type {
        MemoryItemType::Preference => 0.9,
        MemoryItemType::Error => 0.8,
        MemoryItemType::Feedback => 0.7,
        MemoryItemType::SkillUsage => 0.6,
        MemoryItemType::Fact => 0.5,
        MemoryItemType::Context => 0.4,
        MemoryItemType::Parameter => 0.3,
        MemoryItemType::Conversation
        | MemoryItemType::Reflection
        | MemoryItemType::Knowledge => 0.5,
    }
}

/// Score content for an item type, clamped to `0.0..=1.0`.
///
/// The type sets the base; longer content adds up to 0.1 (saturating at
/// 1000 characters) and any risk keyword adds a flat 0.1.
pub fn score_importance(content: &str, item_type: MemoryItemType) -> f64 {
    let mut score = base_score(item_type);

    let length_bonus = (content.len() as f64 / 1000.0).min(1.0) * 0.1;
    score += length_bonus;

    let lowered = content.to_lowercase();
    if RISK_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_by_type() {
        assert!(
            score_importance("a", MemoryItemType::Preference)
                > score_importance("a", MemoryItemType::Parameter)
        );
        assert!((score_importance("a", MemoryItemType::Fact) - 0.5001).abs() < 0.001);
        assert!((score_importance("a", MemoryItemType::Parameter) - 0.3001).abs() < 0.001);
    }

    #[test]
    fn test_length_bonus_saturates() {
        let short = score_importance("x", MemoryItemType::Fact);
        let long = score_importance(&"x".repeat(1000), MemoryItemType::Fact);
        let longer = score_importance(&"x".repeat(5000), MemoryItemType::Fact);

        assert!(long > short);
        assert!((long - 0.6).abs() < 1e-9);
        assert!((longer - long).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_bonus() {
        let plain = score_importance("remember the meeting", MemoryItemType::Fact);
        let flagged = score_importance("CRITICAL: remember the meeting", MemoryItemType::Fact);
        assert!((flagged - plain - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let lower = score_importance("this must happen", MemoryItemType::Context);
        let upper = score_importance("this MUST happen", MemoryItemType::Context);
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_clamped_to_one() {
        let score = score_importance(
            &format!("urgent critical error {}", "x".repeat(2000)),
            MemoryItemType::Preference,
        );
        assert_eq!(score, 1.0);
    }
}
