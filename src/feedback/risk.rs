//! Deterministic risk scoring.
//!
//! The score never depends on the generative capability beyond the urgency and sentiment it
//! already produced, so identical inputs always yield identical assessments.

use super::stickers::Polarity;
use super::types::PrimarySentiment;
use serde::Serialize;

const RATING_WEIGHT: f64 = 35.0;
const WAIT_WEIGHT: f64 = 35.0;
const URGENCY_WEIGHT: f64 = 20.0;
const SENTIMENT_WEIGHT: f64 = 5.0;
const STICKER_WEIGHT: f64 = 5.0;
const INTENSITY_WEIGHT: f64 = 10.0;
const EMERGENCY_WEIGHT: f64 = 5.0;
/// Emotional intensity (0 to 10) at which the intensity factor applies.
const HIGH_INTENSITY: f64 = 8.0;

/// Thresholds and cut points used to score and discretize risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskPolicy {
    /// Waits up to this many minutes add no risk.
    pub wait_threshold_min: f64,
    /// Minutes beyond the threshold at which the wait contribution saturates.
    pub wait_ramp_min: f64,
    /// Scores below this are `low`.
    pub low_cut: f64,
    /// Scores below this (and at least `low_cut`) are `medium`; the rest are `high`.
    pub high_cut: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            wait_threshold_min: 30.0,
            wait_ramp_min: 60.0,
            low_cut: 30.0,
            high_cut: 70.0,
        }
    }
}

/// Discretized risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No follow-up needed beyond routine review.
    Low,
    /// Follow-up advised.
    Medium,
    /// Escalation advised.
    High,
}

impl RiskLevel {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Signals combined into the risk score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskInput {
    /// Rating from 1 to 5, if given.
    pub rating: Option<u8>,
    /// Minutes waited, if given.
    pub wait_time_min: Option<f64>,
    /// Urgency from 1 to 5.
    pub urgency_level: u8,
    /// Judged sentiment.
    pub primary_sentiment: PrimarySentiment,
    /// Sticker polarity.
    pub sticker_sentiment: Polarity,
    /// Judged emotional intensity from 0 to 10.
    pub emotional_intensity: f64,
    /// Whether the feedback concerns an emergency department.
    pub emergency_department: bool,
}

/// Named contribution to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFactor {
    /// Factor name.
    pub name: &'static str,
    /// Points contributed, before rounding.
    pub points: f64,
}

/// Result of risk scoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// Score from 0 to 100.
    pub score: u8,
    /// Level derived from the policy cut points.
    pub level: RiskLevel,
    /// Non-zero contributions in evaluation order.
    pub factors: Vec<RiskFactor>,
}

/// Combine rating, wait, urgency, and sentiment signals into a bounded score.
pub fn score_risk(input: &RiskInput, policy: &RiskPolicy) -> RiskAssessment {
    let mut factors = Vec::new();
    let mut add = |name: &'static str, points: f64| {
        if points > 0.0 {
            factors.push(RiskFactor { name, points });
        }
    };

    if let Some(rating) = input.rating.filter(|rating| (1..=5).contains(rating)) {
        add("low_rating", f64::from(5 - rating) / 4.0 * RATING_WEIGHT);
    }

    if let Some(wait) = input.wait_time_min.filter(|wait| wait.is_finite()) {
        let excess = wait - policy.wait_threshold_min;
        if excess > 0.0 {
            let fraction = if policy.wait_ramp_min > 0.0 {
                (excess / policy.wait_ramp_min).min(1.0)
            } else {
                1.0
            };
            add("excessive_wait_time", fraction * WAIT_WEIGHT);
        }
    }

    let urgency = input.urgency_level.clamp(1, 5);
    add("urgency", f64::from(urgency - 1) / 4.0 * URGENCY_WEIGHT);

    if input.primary_sentiment == PrimarySentiment::Negative {
        add("negative_sentiment", SENTIMENT_WEIGHT);
    }
    if input.sticker_sentiment == Polarity::Negative {
        add("negative_stickers", STICKER_WEIGHT);
    }
    if input.emotional_intensity >= HIGH_INTENSITY {
        add("high_emotional_intensity", INTENSITY_WEIGHT);
    }
    if input.emergency_department && input.primary_sentiment == PrimarySentiment::Negative {
        add("emergency_negative_feedback", EMERGENCY_WEIGHT);
    }

    let total: f64 = factors.iter().map(|factor| factor.points).sum();
    let score = total.round().clamp(0.0, 100.0) as u8;
    RiskAssessment {
        score,
        level: level_for(score, policy),
        factors,
    }
}

fn level_for(score: u8, policy: &RiskPolicy) -> RiskLevel {
    let score = f64::from(score);
    if score < policy.low_cut {
        RiskLevel::Low
    } else if score < policy.high_cut {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(rating: Option<u8>, wait: Option<f64>) -> RiskInput {
        RiskInput {
            rating,
            wait_time_min: wait,
            urgency_level: 1,
            primary_sentiment: PrimarySentiment::Neutral,
            sticker_sentiment: Polarity::Neutral,
            emotional_intensity: 0.0,
            emergency_department: false,
        }
    }

    #[test]
    fn satisfied_short_wait_is_low() {
        let assessment = score_risk(&input(Some(5), Some(10.0)), &RiskPolicy::default());
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(assessment.factors.is_empty());
    }

    #[test]
    fn worst_rating_and_long_wait_is_high() {
        let assessment = score_risk(&input(Some(1), Some(120.0)), &RiskPolicy::default());
        assert_eq!(assessment.score, 70);
        assert_eq!(assessment.level, RiskLevel::High);
        let names: Vec<_> = assessment.factors.iter().map(|factor| factor.name).collect();
        assert_eq!(names, vec!["low_rating", "excessive_wait_time"]);
    }

    #[test]
    fn every_signal_at_maximum_scores_one_hundred() {
        let assessment = score_risk(
            &RiskInput {
                rating: Some(1),
                wait_time_min: Some(500.0),
                urgency_level: 9,
                primary_sentiment: PrimarySentiment::Negative,
                sticker_sentiment: Polarity::Negative,
                emotional_intensity: 10.0,
                emergency_department: true,
            },
            &RiskPolicy::default(),
        );
        assert_eq!(assessment.score, 100);
    }

    #[test]
    fn intense_emotion_adds_a_bounded_factor() {
        let policy = RiskPolicy::default();
        let calm = score_risk(&input(Some(3), None), &policy);
        let intense = score_risk(
            &RiskInput {
                emotional_intensity: 8.0,
                ..input(Some(3), None)
            },
            &policy,
        );
        let below = score_risk(
            &RiskInput {
                emotional_intensity: 7.9,
                ..input(Some(3), None)
            },
            &policy,
        );
        assert_eq!(below.score, calm.score);
        assert_eq!(intense.score, calm.score + 10);
        assert_eq!(
            intense.factors.last().map(|factor| factor.name),
            Some("high_emotional_intensity")
        );
    }

    #[test]
    fn negative_emergency_feedback_adds_a_factor() {
        let policy = RiskPolicy::default();
        let negative = |emergency_department| RiskInput {
            primary_sentiment: PrimarySentiment::Negative,
            emergency_department,
            ..input(Some(3), None)
        };
        let elsewhere = score_risk(&negative(false), &policy);
        let emergency = score_risk(&negative(true), &policy);
        assert_eq!(emergency.score, elsewhere.score + 5);
        assert!(emergency
            .factors
            .iter()
            .any(|factor| factor.name == "emergency_negative_feedback"));

        let positive = RiskInput {
            primary_sentiment: PrimarySentiment::Positive,
            emergency_department: true,
            ..input(Some(3), None)
        };
        assert!(score_risk(&positive, &policy)
            .factors
            .iter()
            .all(|factor| factor.name != "emergency_negative_feedback"));
    }

    fn signal_variants() -> Vec<(f64, bool, PrimarySentiment)> {
        let mut variants = Vec::new();
        for intensity in [0.0, 8.0, 10.0] {
            for emergency in [false, true] {
                for sentiment in [PrimarySentiment::Neutral, PrimarySentiment::Negative] {
                    variants.push((intensity, emergency, sentiment));
                }
            }
        }
        variants
    }

    #[test]
    fn lower_rating_never_lowers_score() {
        let policy = RiskPolicy::default();
        for (emotional_intensity, emergency_department, primary_sentiment) in signal_variants() {
            for wait in [None, Some(0.0), Some(45.0), Some(200.0)] {
                let scores: Vec<u8> = (1..=5)
                    .rev()
                    .map(|rating| {
                        let input = RiskInput {
                            emotional_intensity,
                            emergency_department,
                            primary_sentiment,
                            ..input(Some(rating), wait)
                        };
                        let assessment = score_risk(&input, &policy);
                        assert!(assessment.score <= 100);
                        assessment.score
                    })
                    .collect();
                assert!(scores.windows(2).all(|pair| pair[0] <= pair[1]), "{scores:?}");
            }
        }
    }

    #[test]
    fn higher_intensity_never_lowers_score() {
        let policy = RiskPolicy::default();
        for rating in 1..=5 {
            let scores: Vec<u8> = (0..=10)
                .map(|intensity| {
                    let input = RiskInput {
                        emotional_intensity: f64::from(intensity),
                        ..input(Some(rating), Some(60.0))
                    };
                    score_risk(&input, &policy).score
                })
                .collect();
            assert!(scores.windows(2).all(|pair| pair[0] <= pair[1]), "{scores:?}");
        }
    }

    #[test]
    fn longer_wait_never_lowers_score() {
        let policy = RiskPolicy::default();
        for (emotional_intensity, emergency_department, primary_sentiment) in signal_variants() {
            let scores: Vec<u8> = (0..=200)
                .step_by(5)
                .map(|wait| {
                    let input = RiskInput {
                        emotional_intensity,
                        emergency_department,
                        primary_sentiment,
                        ..input(Some(3), Some(f64::from(wait)))
                    };
                    score_risk(&input, &policy).score
                })
                .collect();
            assert!(scores.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }

    #[test]
    fn cut_points_follow_policy() {
        let policy = RiskPolicy {
            low_cut: 10.0,
            high_cut: 20.0,
            ..RiskPolicy::default()
        };
        assert_eq!(score_risk(&input(Some(4), None), &policy).level, RiskLevel::Low);
        assert_eq!(score_risk(&input(Some(3), None), &policy).level, RiskLevel::Medium);
        assert_eq!(score_risk(&input(Some(1), None), &policy).level, RiskLevel::High);
    }
}
