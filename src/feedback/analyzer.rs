//! Contextual sentiment judgment produced by the generative capability.

use super::stickers::StickerScore;
use super::types::{FeedbackContext, PrimarySentiment};
use crate::generation::{GenerationClient, GenerationRequest};
use crate::resilience::CapabilityError;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

const ANALYSIS_TEMPERATURE: f32 = 0.1;

static JUDGMENT_SCHEMA: LazyLock<String> = LazyLock::new(|| {
    serde_json::to_string_pretty(&schemars::schema_for!(RawJudgment)).unwrap_or_default()
});

const SYSTEM_PROMPT: &str = "You are a sentiment analysis expert specializing in healthcare \
patient feedback. You reply with a single JSON object and nothing else.";

const HEALTHCARE_CONTEXT: &str = "\
Department expectations:
- Emergency: higher tolerance for waiting but patients expect urgency.
- Pediatrics: parents are more emotional and use protective language.
- Oncology: patients are more sensitive and need compassionate care.
- Outpatient: patients expect efficiency and convenience.
- Cardiology: patients are often anxious and need reassurance.
- Radiology: patients expect quick, professional service.

Patient behaviour patterns:
- Elderly patients (65+) value personal attention and may be uneasy with technology.
- Young adults (18-35) expect digital convenience and quick service.
- Middle-aged patients (36-64) balance efficiency with thoroughness.
- Parents of children respond protectively and emotionally.

Wait time impact:
- under 15 minutes: generally acceptable
- 15 to 30 minutes: moderate concern
- 30 to 60 minutes: significant frustration
- over 60 minutes: high negative impact";

/// Generative output that could not be read as a judgment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisParseError {
    /// No JSON object in the response.
    #[error("response contains no JSON object")]
    NoJsonObject,
    /// The object does not match the judgment schema.
    #[error("response does not match the judgment schema: {0}")]
    Malformed(String),
    /// The sentiment label is not one of positive, negative, neutral, mixed.
    #[error("unrecognized sentiment label `{0}`")]
    UnknownSentiment(String),
}

/// Why a contextual judgment could not be obtained.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// The generative capability failed after retries.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// The capability answered with something unusable.
    #[error(transparent)]
    Parse(#[from] AnalysisParseError),
}

/// Judgment object the model is asked to return.
#[derive(Debug, Deserialize, JsonSchema)]
struct RawJudgment {
    /// One of: positive, negative, neutral, mixed.
    primary_sentiment: String,
    /// Confidence in the classification, 0 to 100.
    #[serde(default, deserialize_with = "lenient_number")]
    #[schemars(with = "f64")]
    confidence_score: f64,
    /// Strength of the expressed emotion, 0 (none) to 10 (extreme).
    #[serde(default, deserialize_with = "lenient_number")]
    #[schemars(with = "f64")]
    emotional_intensity: f64,
    /// Main concerns or praises.
    #[serde(default, deserialize_with = "lenient_list")]
    #[schemars(with = "Vec<String>")]
    key_themes: Vec<String>,
    /// How age, department, and timing shaped the sentiment.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "String")]
    contextual_factors: String,
    /// Explanation of the patient's behaviour.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "String")]
    patient_behavior_analysis: String,
    /// Specific, actionable recommendations.
    #[serde(default, deserialize_with = "lenient_list")]
    #[schemars(with = "Vec<String>")]
    actionable_insights: Vec<String>,
    /// 1 (low) to 5 (critical).
    #[serde(default, deserialize_with = "lenient_number")]
    #[schemars(with = "f64")]
    urgency_level: f64,
    /// Rationale for the classification.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "String")]
    sentiment_explanation: String,
    /// Remarks specific to the department.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "String")]
    department_specific_insights: String,
}

/// Normalized contextual judgment with every score inside its documented range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextualJudgment {
    /// Judged sentiment.
    pub primary_sentiment: PrimarySentiment,
    /// 0 to 100.
    pub confidence_score: f64,
    /// 0 to 10.
    pub emotional_intensity: f64,
    /// Ordered themes without duplicates.
    pub key_themes: Vec<String>,
    /// Context explanation.
    pub contextual_factors: String,
    /// Behaviour explanation.
    pub patient_behavior_analysis: String,
    /// Ordered insights.
    pub actionable_insights: Vec<String>,
    /// 1 to 5.
    pub urgency_level: u8,
    /// Sentiment rationale.
    pub sentiment_explanation: String,
    /// Department remarks.
    pub department_specific_insights: String,
}

impl ContextualJudgment {
    /// Placeholder used when no judgment is available.
    pub fn degraded() -> Self {
        Self {
            primary_sentiment: PrimarySentiment::Unknown,
            confidence_score: 0.0,
            emotional_intensity: 0.0,
            key_themes: Vec::new(),
            contextual_factors: String::new(),
            patient_behavior_analysis: String::new(),
            actionable_insights: Vec::new(),
            urgency_level: 1,
            sentiment_explanation: String::new(),
            department_specific_insights: String::new(),
        }
    }
}

/// Extract and normalize the judgment object from a model response.
///
/// The object may be surrounded by prose or code fences; everything from the first `{` to the
/// last `}` is decoded.
pub fn parse_judgment(response: &str) -> Result<ContextualJudgment, AnalysisParseError> {
    let start = response.find('{').ok_or(AnalysisParseError::NoJsonObject)?;
    let end = response.rfind('}').ok_or(AnalysisParseError::NoJsonObject)?;
    if end < start {
        return Err(AnalysisParseError::NoJsonObject);
    }
    let raw: RawJudgment = serde_json::from_str(&response[start..=end])
        .map_err(|error| AnalysisParseError::Malformed(error.to_string()))?;

    let primary_sentiment = PrimarySentiment::from_label(&raw.primary_sentiment)
        .filter(|sentiment| *sentiment != PrimarySentiment::Unknown)
        .ok_or_else(|| AnalysisParseError::UnknownSentiment(raw.primary_sentiment.clone()))?;

    Ok(ContextualJudgment {
        primary_sentiment,
        confidence_score: bounded(raw.confidence_score, 0.0, 100.0),
        emotional_intensity: bounded(raw.emotional_intensity, 0.0, 10.0),
        key_themes: ordered_set(raw.key_themes),
        contextual_factors: raw.contextual_factors.trim().to_string(),
        patient_behavior_analysis: raw.patient_behavior_analysis.trim().to_string(),
        actionable_insights: ordered_set(raw.actionable_insights),
        urgency_level: bounded(raw.urgency_level.round(), 1.0, 5.0) as u8,
        sentiment_explanation: raw.sentiment_explanation.trim().to_string(),
        department_specific_insights: raw.department_specific_insights.trim().to_string(),
    })
}

fn bounded(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

fn ordered_set(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.to_lowercase()))
        .collect()
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect(),
        Value::String(text) => vec![text],
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(number) => Ok(number.as_f64().unwrap_or_default()),
        Value::Null => Ok(0.0),
        Value::String(text) => text
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("`{text}` is not a number"))),
        other => Err(serde::de::Error::custom(format!("`{other}` is not a number"))),
    }
}

fn wait_impact(minutes: f64) -> &'static str {
    if minutes < 15.0 {
        "generally acceptable"
    } else if minutes < 30.0 {
        "moderate concern"
    } else if minutes <= 60.0 {
        "significant frustration"
    } else {
        "high negative impact"
    }
}

fn build_prompt(context: &FeedbackContext, stickers: &StickerScore) -> String {
    let mut prompt = String::from("Analyze the following patient feedback.\n\nFeedback data:\n");
    let _ = writeln!(prompt, "- Text: \"{}\"", context.text);
    let _ = writeln!(prompt, "- Patient age group: {}", context.patient_age.describe());
    let _ = writeln!(
        prompt,
        "- Department: {}",
        context.department.as_deref().unwrap_or("unknown")
    );
    match context.wait_time_min {
        Some(wait) => {
            let _ = writeln!(prompt, "- Wait time: {wait} minutes ({})", wait_impact(wait));
        }
        None => prompt.push_str("- Wait time: not provided\n"),
    }
    match context.resolution_time_min {
        Some(minutes) => {
            let _ = writeln!(prompt, "- Resolution time: {minutes} minutes");
        }
        None => prompt.push_str("- Resolution time: not provided\n"),
    }
    match context.rating {
        Some(rating) => {
            let _ = writeln!(prompt, "- Rating: {rating}/5");
        }
        None => prompt.push_str("- Rating: not provided\n"),
    }
    let _ = writeln!(
        prompt,
        "- Stickers found: {}",
        if stickers.found.is_empty() {
            "none".to_string()
        } else {
            stickers.found.join(" ")
        }
    );
    let _ = writeln!(prompt, "- Sticker sentiment: {:?}", stickers.polarity);

    let _ = write!(
        prompt,
        "\nHealthcare context:\n{HEALTHCARE_CONTEXT}\n\n\
         Write every explanation in the language the patient used.\n\
         Return one JSON object conforming to this JSON schema:\n{}\n",
        *JUDGMENT_SCHEMA
    );
    prompt
}

/// Asks the generative capability for a contextual judgment of a feedback item.
pub struct ContextualAnalyzer {
    generator: Arc<dyn GenerationClient>,
    temperature: f32,
}

impl ContextualAnalyzer {
    /// Create an analyzer over `generator`.
    pub fn new(generator: Arc<dyn GenerationClient>) -> Self {
        Self {
            generator,
            temperature: ANALYSIS_TEMPERATURE,
        }
    }

    /// Model used for judgments.
    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Judge `context`, given the sticker signal already computed for it.
    pub async fn judge(
        &self,
        context: &FeedbackContext,
        stickers: &StickerScore,
    ) -> Result<ContextualJudgment, AnalyzerError> {
        let response = self
            .generator
            .generate(GenerationRequest {
                prompt: build_prompt(context, stickers),
                system: Some(SYSTEM_PROMPT.to_string()),
                temperature: self.temperature,
            })
            .await?;
        Ok(parse_judgment(&response)?)
    }
}
