//! Lexicon-based sentiment from emoji and stickers.

use super::types::StickerCounts;
use serde::Serialize;

/// Polarity of a sticker or of a set of stickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Expresses satisfaction.
    Positive,
    /// Expresses dissatisfaction.
    Negative,
    /// Neither.
    Neutral,
}

// `❤` is matched without its variation selector so both `❤` and `❤️` count.
const LEXICON: &[(&str, Polarity)] = &[
    ("😊", Polarity::Positive),
    ("😄", Polarity::Positive),
    ("🙂", Polarity::Positive),
    ("👍", Polarity::Positive),
    ("❤", Polarity::Positive),
    ("⭐", Polarity::Positive),
    ("🌟", Polarity::Positive),
    ("💯", Polarity::Positive),
    ("🙏", Polarity::Positive),
    ("😢", Polarity::Negative),
    ("😭", Polarity::Negative),
    ("😠", Polarity::Negative),
    ("😡", Polarity::Negative),
    ("👎", Polarity::Negative),
    ("😕", Polarity::Negative),
    ("😞", Polarity::Negative),
    ("💔", Polarity::Negative),
    ("😐", Polarity::Neutral),
    ("🤔", Polarity::Neutral),
];

/// Sticker tallies and the resolved overall polarity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StickerScore {
    /// Majority polarity; neutral on ties or when no sticker is present.
    pub polarity: Polarity,
    /// Occurrences per polarity.
    pub counts: StickerCounts,
    /// Distinct stickers found, in lexicon order.
    pub found: Vec<String>,
}

/// Scan `text` for known stickers.
pub fn score_stickers(text: &str) -> StickerScore {
    let mut counts = StickerCounts::default();
    let mut found = Vec::new();
    for (sticker, polarity) in LEXICON {
        let occurrences = text.matches(sticker).count();
        if occurrences == 0 {
            continue;
        }
        found.push((*sticker).to_string());
        match polarity {
            Polarity::Positive => counts.positive += occurrences,
            Polarity::Negative => counts.negative += occurrences,
            Polarity::Neutral => counts.neutral += occurrences,
        }
    }

    let polarity = match counts.positive.cmp(&counts.negative) {
        std::cmp::Ordering::Greater => Polarity::Positive,
        std::cmp::Ordering::Less => Polarity::Negative,
        std::cmp::Ordering::Equal => Polarity::Neutral,
    };
    StickerScore {
        polarity,
        counts,
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stickers_is_neutral() {
        let score = score_stickers("Temps d'attente catastrophique");
        assert_eq!(score.polarity, Polarity::Neutral);
        assert_eq!(score.counts, StickerCounts::default());
        assert!(score.found.is_empty());
    }

    #[test]
    fn single_positive_sticker_wins() {
        let score = score_stickers("Service excellent, merci 😊");
        assert_eq!(score.polarity, Polarity::Positive);
        assert_eq!(score.counts.positive, 1);
        assert_eq!(score.found, vec!["😊"]);
    }

    #[test]
    fn repeated_stickers_count_per_occurrence() {
        let score = score_stickers("😡😡 but the nurse was kind 😊");
        assert_eq!(score.counts.negative, 2);
        assert_eq!(score.counts.positive, 1);
        assert_eq!(score.polarity, Polarity::Negative);
    }

    #[test]
    fn ties_and_neutral_only_resolve_to_neutral() {
        assert_eq!(score_stickers("👍 👎").polarity, Polarity::Neutral);
        assert_eq!(score_stickers("🤔 😐").polarity, Polarity::Neutral);
        assert_eq!(score_stickers("🤔 😐").counts.neutral, 2);
    }

    #[test]
    fn heart_matches_with_and_without_variation_selector() {
        assert_eq!(score_stickers("❤️").counts.positive, 1);
        assert_eq!(score_stickers("❤").counts.positive, 1);
    }
}
