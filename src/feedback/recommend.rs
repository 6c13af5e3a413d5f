//! Fixed catalogue of follow-up actions.

use super::risk::RiskLevel;
use super::types::PrimarySentiment;

/// Facts besides level and sentiment that add catalogue entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationContext<'a> {
    /// Department the feedback concerns.
    pub department: Option<&'a str>,
    /// Whether the wait exceeded the risk policy threshold.
    pub wait_exceeded: bool,
}

#[derive(Clone, Copy)]
enum Tone {
    Positive,
    Negative,
    Other,
}

impl From<PrimarySentiment> for Tone {
    fn from(sentiment: PrimarySentiment) -> Self {
        match sentiment {
            PrimarySentiment::Positive => Self::Positive,
            PrimarySentiment::Negative => Self::Negative,
            PrimarySentiment::Neutral | PrimarySentiment::Mixed | PrimarySentiment::Unknown => {
                Self::Other
            }
        }
    }
}

fn catalogue(level: RiskLevel, tone: Tone) -> &'static [&'static str] {
    match (level, tone) {
        (RiskLevel::Low, Tone::Positive) => &[
            "Share the positive feedback with the care team",
            "Identify best practices to replicate across departments",
        ],
        (RiskLevel::Low, Tone::Negative) => &[
            "Acknowledge the feedback and thank the patient",
            "Monitor the department for recurring concerns",
        ],
        (RiskLevel::Low, Tone::Other) => &["Log the feedback for the periodic quality review"],
        (RiskLevel::Medium, Tone::Positive) => &[
            "Share the positive feedback with the care team",
            "Review the parts of the visit that lowered the patient's rating",
        ],
        (RiskLevel::Medium, Tone::Negative) => &[
            "Schedule a follow-up contact with the patient",
            "Review staff training needs for the reported issues",
        ],
        (RiskLevel::Medium, Tone::Other) => &[
            "Schedule a follow-up contact with the patient",
            "Review the feedback manually to clarify the patient's concerns",
        ],
        (RiskLevel::High, Tone::Positive) => &[
            "Contact the patient to confirm that open concerns were resolved",
            "Review the visit with the department lead",
        ],
        (RiskLevel::High, Tone::Negative) => &[
            "Escalate to the patient relations manager within 24 hours",
            "Contact the patient personally to apologise and resolve the issue",
            "Open a root-cause review with the department lead",
        ],
        (RiskLevel::High, Tone::Other) => &[
            "Escalate to the patient relations manager for manual review",
            "Contact the patient to clarify their experience",
        ],
    }
}

/// Whether a department name refers to the emergency service.
pub(crate) fn is_emergency_department(department: &str) -> bool {
    let department = department.to_lowercase();
    department.contains("emergenc") || department.contains("urgence")
}

fn department_action(department: &str) -> Option<&'static str> {
    if is_emergency_department(department) {
        return Some("Review triage process efficiency");
    }
    let department = department.to_lowercase();
    if ["pediatric", "paediatric", "pédiatrie"]
        .iter()
        .any(|name| department.contains(name))
    {
        Some("Enhance the child-friendly environment")
    } else if department.contains("oncolog") {
        Some("Ensure compassionate care protocols are followed")
    } else {
        None
    }
}

/// Ordered, duplicate-free actions for a risk level and sentiment; never empty.
pub fn recommend(
    level: RiskLevel,
    sentiment: PrimarySentiment,
    context: RecommendationContext<'_>,
) -> Vec<String> {
    let mut actions: Vec<String> = catalogue(level, Tone::from(sentiment))
        .iter()
        .map(|action| action.to_string())
        .collect();

    if sentiment == PrimarySentiment::Unknown {
        actions.push("Perform a manual sentiment review".into());
    }
    if context.wait_exceeded {
        let department = context.department.unwrap_or("the department");
        actions.push(format!("Address wait time concerns in {department}"));
        actions.push("Improve patient communication about expected delays".into());
    }
    if let Some(action) = context.department.and_then(department_action) {
        actions.push(action.into());
    }

    let mut seen = std::collections::HashSet::new();
    actions.retain(|action| seen.insert(action.clone()));
    actions
}
