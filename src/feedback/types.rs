//! Request, context, and result types for feedback analysis.

use super::risk::{RiskFactor, RiskLevel};
use super::stickers::Polarity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

/// Feedback analysis request as received on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackRequest {
    /// Free-text feedback; required.
    #[serde(default)]
    pub feedback_text: Option<String>,
    /// Age in years or a bucket label such as `65+`.
    #[serde(default)]
    pub patient_age: Option<AgeValue>,
    /// Department the feedback concerns.
    #[serde(default)]
    pub department: Option<String>,
    /// Minutes the patient waited.
    #[serde(default)]
    pub wait_time_min: Option<f64>,
    /// Minutes until the issue was resolved.
    #[serde(default)]
    pub resolution_time_min: Option<f64>,
    /// Star rating from 1 to 5; 0 means not rated.
    #[serde(default)]
    pub rating: Option<i64>,
    /// Caller-supplied feedback identifier.
    #[serde(default)]
    pub feedback_id: Option<String>,
    /// Caller-supplied patient identifier.
    #[serde(default)]
    pub patient_id: Option<String>,
}

/// Patient age as a number of years or a free-form label.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AgeValue {
    /// Age in years.
    Years(u32),
    /// Label such as `65+` or `18-35`.
    Label(String),
}

/// Age groups with distinct expectations of care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBucket {
    /// Under 18.
    Child,
    /// 18 to 35.
    YoungAdult,
    /// 36 to 64.
    MiddleAged,
    /// 65 and over.
    Senior,
    /// Not provided or not understood.
    Unknown,
}

impl AgeBucket {
    /// Bucket for an age in years.
    pub fn from_years(years: u32) -> Self {
        match years {
            0..=17 => Self::Child,
            18..=35 => Self::YoungAdult,
            36..=64 => Self::MiddleAged,
            _ => Self::Senior,
        }
    }

    /// Bucket for a label; the leading number decides (`65+` is senior, `18-35` young adult).
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        let digits: String = label.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(years) = digits.parse::<u32>() {
            return Self::from_years(years);
        }
        match label.as_str() {
            "child" | "children" | "pediatric" | "paediatric" | "teen" | "teenager" => Self::Child,
            "young" | "young adult" | "young_adult" => Self::YoungAdult,
            "adult" | "middle-aged" | "middle aged" | "middle_aged" => Self::MiddleAged,
            "senior" | "elderly" | "older adult" => Self::Senior,
            _ => Self::Unknown,
        }
    }

    /// Human-readable description used in prompts.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Child => "under 18",
            Self::YoungAdult => "18-35",
            Self::MiddleAged => "36-64",
            Self::Senior => "65+",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&AgeValue> for AgeBucket {
    fn from(value: &AgeValue) -> Self {
        match value {
            AgeValue::Years(years) => Self::from_years(*years),
            AgeValue::Label(label) => Self::from_label(label),
        }
    }
}

/// Reasons a feedback request is rejected before analysis.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedbackValidationError {
    /// `feedback_text` is missing or blank.
    #[error("feedback_text is required")]
    MissingText,
    /// The rating is outside 0..=5.
    #[error("rating must be between 1 and 5 (0 for none), got {0}")]
    InvalidRating(i64),
    /// A duration is negative or not a number.
    #[error("{field} must be a non-negative number of minutes")]
    InvalidDuration {
        /// Offending field name.
        field: &'static str,
    },
}

/// Validated, read-only input to the feedback pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackContext {
    /// Feedback identifier.
    pub feedback_id: String,
    /// Patient identifier.
    pub patient_id: String,
    /// Feedback text, trimmed.
    #[serde(skip)]
    pub text: String,
    /// Patient age group.
    pub patient_age: AgeBucket,
    /// Department, when known.
    pub department: Option<String>,
    /// Minutes waited.
    pub wait_time_min: Option<f64>,
    /// Minutes until resolution.
    pub resolution_time_min: Option<f64>,
    /// Rating from 1 to 5.
    pub rating: Option<u8>,
}

impl FeedbackContext {
    /// Context with only the feedback text set.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            feedback_id: default_feedback_id(),
            patient_id: "anonymous".into(),
            text: text.into(),
            patient_age: AgeBucket::Unknown,
            department: None,
            wait_time_min: None,
            resolution_time_min: None,
            rating: None,
        }
    }
}

impl TryFrom<FeedbackRequest> for FeedbackContext {
    type Error = FeedbackValidationError;

    fn try_from(request: FeedbackRequest) -> Result<Self, Self::Error> {
        let text = request
            .feedback_text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(FeedbackValidationError::MissingText)?;
        let rating = match request.rating {
            None | Some(0) => None,
            Some(value @ 1..=5) => Some(value as u8),
            Some(value) => return Err(FeedbackValidationError::InvalidRating(value)),
        };
        Ok(Self {
            feedback_id: non_blank(request.feedback_id).unwrap_or_else(default_feedback_id),
            patient_id: non_blank(request.patient_id).unwrap_or_else(|| "anonymous".into()),
            text,
            patient_age: request
                .patient_age
                .as_ref()
                .map(AgeBucket::from)
                .unwrap_or(AgeBucket::Unknown),
            department: non_blank(request.department),
            wait_time_min: minutes(request.wait_time_min, "wait_time_min")?,
            resolution_time_min: minutes(request.resolution_time_min, "resolution_time_min")?,
            rating,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn minutes(
    value: Option<f64>,
    field: &'static str,
) -> Result<Option<f64>, FeedbackValidationError> {
    match value {
        Some(minutes) if !minutes.is_finite() || minutes < 0.0 => {
            Err(FeedbackValidationError::InvalidDuration { field })
        }
        other => Ok(other),
    }
}

fn default_feedback_id() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "feedback_{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Overall sentiment judged from the feedback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimarySentiment {
    /// Satisfied patient.
    Positive,
    /// Dissatisfied patient.
    Negative,
    /// Neither satisfied nor dissatisfied.
    Neutral,
    /// Both praise and complaints.
    Mixed,
    /// Judgment unavailable.
    Unknown,
}

impl PrimarySentiment {
    /// Parse a model-provided label, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            "neutral" => Some(Self::Neutral),
            "mixed" => Some(Self::Mixed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PrimarySentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-polarity sticker tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StickerCounts {
    /// Positive sticker occurrences.
    pub positive: usize,
    /// Negative sticker occurrences.
    pub negative: usize,
    /// Neutral sticker occurrences.
    pub neutral: usize,
}

/// Structured result of one feedback analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackAnalysis {
    /// Feedback identifier.
    pub feedback_id: String,
    /// Patient identifier.
    pub patient_id: String,
    /// RFC3339 analysis timestamp.
    pub analyzed_at: String,
    /// Context the analysis was computed from.
    pub contextual_data: FeedbackContext,
    /// Sentiment implied by stickers alone.
    pub sticker_sentiment: Polarity,
    /// Sticker tallies.
    pub sticker_counts: StickerCounts,
    /// Distinct stickers found, in lexicon order.
    pub stickers_found: Vec<String>,
    /// Sentiment judged from the text and its context.
    pub primary_sentiment: PrimarySentiment,
    /// Confidence of the judgment, 0 to 100.
    pub confidence_score: f64,
    /// Strength of expressed emotion, 0 to 10.
    pub emotional_intensity: f64,
    /// Main concerns or praises, without duplicates.
    pub key_themes: Vec<String>,
    /// How age, department, and timing shaped the judgment.
    pub contextual_factors: String,
    /// Explanation of the patient's behaviour.
    pub patient_behavior_analysis: String,
    /// Suggestions drawn from the feedback itself.
    pub actionable_insights: Vec<String>,
    /// Urgency from 1 (low) to 5 (critical).
    pub urgency_level: u8,
    /// Rationale for the sentiment.
    pub sentiment_explanation: String,
    /// Department-specific remarks.
    pub department_specific_insights: String,
    /// Risk score, 0 to 100.
    pub risk_score: u8,
    /// Discretized risk.
    pub risk_level: RiskLevel,
    /// Contributions to the risk score.
    pub risk_factors: Vec<RiskFactor>,
    /// Suggested actions from the catalogue.
    pub recommendations: Vec<String>,
    /// Whether the contextual judgment was unavailable.
    pub degraded: bool,
    /// Why the judgment was unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation_reason: Option<String>,
}
