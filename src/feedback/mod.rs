//! Patient feedback analysis.
//!
//! Four stages run in sequence for every request: sticker scoring, contextual judgment by the
//! generative capability, deterministic risk scoring, and recommendation lookup. Only the
//! second stage touches the network; when it fails the pipeline continues with a degraded
//! judgment so risk and recommendations stay available.

mod analyzer;
mod recommend;
mod risk;
mod stickers;
mod types;

pub use analyzer::{
    AnalysisParseError, AnalyzerError, ContextualAnalyzer, ContextualJudgment, parse_judgment,
};
pub use recommend::{RecommendationContext, recommend};
pub use risk::{RiskAssessment, RiskFactor, RiskInput, RiskLevel, RiskPolicy, score_risk};
pub use stickers::{Polarity, StickerScore, score_stickers};
pub use types::{
    AgeBucket, AgeValue, FeedbackAnalysis, FeedbackContext, FeedbackRequest,
    FeedbackValidationError, PrimarySentiment, StickerCounts,
};

use crate::ingestion::current_timestamp_rfc3339;
use recommend::is_emergency_department;

/// Runs the feedback stages for one request at a time; holds no per-request state.
pub struct FeedbackPipeline {
    analyzer: ContextualAnalyzer,
    policy: RiskPolicy,
}

impl FeedbackPipeline {
    /// Create a pipeline with the given analyzer and risk policy.
    pub fn new(analyzer: ContextualAnalyzer, policy: RiskPolicy) -> Self {
        Self { analyzer, policy }
    }

    /// Risk policy in effect.
    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Model used for contextual judgments.
    pub fn model(&self) -> &str {
        self.analyzer.model()
    }

    /// Analyze one feedback item. Never fails: capability and parse failures degrade the result.
    pub async fn analyze(&self, context: FeedbackContext) -> FeedbackAnalysis {
        let stickers = score_stickers(&context.text);

        let (judgment, degradation_reason) = match self.analyzer.judge(&context, &stickers).await {
            Ok(judgment) => (judgment, None),
            Err(error) => {
                tracing::warn!(
                    feedback_id = %context.feedback_id,
                    error = %error,
                    "Contextual analysis unavailable; using degraded judgment"
                );
                (ContextualJudgment::degraded(), Some(error.to_string()))
            }
        };

        let risk = score_risk(
            &RiskInput {
                rating: context.rating,
                wait_time_min: context.wait_time_min,
                urgency_level: judgment.urgency_level,
                primary_sentiment: judgment.primary_sentiment,
                sticker_sentiment: stickers.polarity,
                emotional_intensity: judgment.emotional_intensity,
                emergency_department: context
                    .department
                    .as_deref()
                    .is_some_and(is_emergency_department),
            },
            &self.policy,
        );
        let recommendations = recommend(
            risk.level,
            judgment.primary_sentiment,
            RecommendationContext {
                department: context.department.as_deref(),
                wait_exceeded: context
                    .wait_time_min
                    .is_some_and(|wait| wait > self.policy.wait_threshold_min),
            },
        );

        tracing::info!(
            feedback_id = %context.feedback_id,
            sentiment = %judgment.primary_sentiment,
            risk_score = risk.score,
            risk_level = risk.level.as_str(),
            degraded = degradation_reason.is_some(),
            "Feedback analyzed"
        );

        FeedbackAnalysis {
            feedback_id: context.feedback_id.clone(),
            patient_id: context.patient_id.clone(),
            analyzed_at: current_timestamp_rfc3339(),
            sticker_sentiment: stickers.polarity,
            sticker_counts: stickers.counts,
            stickers_found: stickers.found,
            primary_sentiment: judgment.primary_sentiment,
            confidence_score: judgment.confidence_score,
            emotional_intensity: judgment.emotional_intensity,
            key_themes: judgment.key_themes,
            contextual_factors: judgment.contextual_factors,
            patient_behavior_analysis: judgment.patient_behavior_analysis,
            actionable_insights: judgment.actionable_insights,
            urgency_level: judgment.urgency_level,
            sentiment_explanation: judgment.sentiment_explanation,
            department_specific_insights: judgment.department_specific_insights,
            risk_score: risk.score,
            risk_level: risk.level,
            risk_factors: risk.factors,
            recommendations,
            degraded: degradation_reason.is_some(),
            degradation_reason,
            contextual_data: context,
        }
    }
}
