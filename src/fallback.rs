//! Fixed payloads used when the model is not configured, unreachable, or
//! returns something unusable.

use crate::normalize::{Cause, NextStep, Question, StructuredAnalysis, Urgency};
use crate::redact::truncate_chars;

pub const DEFAULT_FRIENDLY: &str = "Take care — watch symptoms and seek care if worse. 💙";
const SOFT_PARSE_FRIENDLY: &str = "I'm not fully certain — check with a clinician if concerned.";
const SOFT_PARSE_SUMMARY_CHARS: usize = 220;

/// Questions served when no upstream credential is configured.
pub fn sample_questions() -> Vec<Question> {
    vec![
        Question::new("onset", "Did this start suddenly or gradually?", &["Suddenly", "Gradually"]),
        Question::new("severity", "How bad is the pain now?", &["Mild", "Moderate", "Severe"]),
        Question::new("assoc", "Any other symptoms (fever/breathing issues)?", &["Yes", "No"]),
    ]
}

/// Questions served when the model is unreachable or its output unusable.
pub fn fallback_questions() -> Vec<Question> {
    vec![
        Question::new("onset", "When did this start?", &["Today", "This week", "Longer ago"]),
        Question::new("severity", "How severe is it?", &["Mild", "Moderate", "Severe"]),
        Question::new("duration", "How long does it last?", &["Minutes", "Hours", "All day"]),
    ]
}

/// Analysis served when no upstream credential is configured.
pub fn sample_analysis() -> StructuredAnalysis {
    StructuredAnalysis {
        summary: "You may have a mild viral illness or low-grade fever. Rest and fluids help."
            .to_string(),
        possible_causes: vec![
            Cause::Plain("Viral infection".into()),
            Cause::Plain("Mild dehydration".into()),
            Cause::Plain("Allergic reaction".into()),
        ],
        next_steps: vec![
            NextStep::Plain("Drink fluids".into()),
            NextStep::Plain("Rest".into()),
            NextStep::Plain("If fever > 38.5°C or breathing difficulties, see doctor".into()),
        ],
        urgency: Urgency::Low,
        grounding: Vec::new(),
        cosmic: false,
        friendly: Some("Hang in there — rest and water are simple wins! 💧".to_string()),
    }
}

/// Analysis served when the model could not be reached.
pub fn unavailable_analysis(symptom: &str) -> StructuredAnalysis {
    StructuredAnalysis {
        summary: format!(
            "You reported: {}. Consider rest and monitoring symptoms.",
            truncate_chars(symptom.trim(), 200)
        ),
        possible_causes: vec![
            Cause::Plain("Various causes possible".into()),
            Cause::Plain("Consult healthcare provider".into()),
        ],
        next_steps: vec![
            NextStep::Plain("Monitor symptoms".into()),
            NextStep::Plain("Rest and hydrate".into()),
            NextStep::Plain("Consult doctor if worsening".into()),
        ],
        urgency: Urgency::Medium,
        grounding: Vec::new(),
        cosmic: false,
        friendly: Some("Take care of yourself! 🌟".to_string()),
    }
}

/// Best-effort analysis when the model answered but not with usable JSON:
/// the start of its text becomes the summary.
pub fn soft_parse_analysis(raw: &str) -> StructuredAnalysis {
    let summary: String = raw.trim().chars().take(SOFT_PARSE_SUMMARY_CHARS).collect();
    StructuredAnalysis {
        summary,
        urgency: Urgency::Medium,
        friendly: Some(SOFT_PARSE_FRIENDLY.to_string()),
        ..Default::default()
    }
}

/// Stand-in for a failed humanization pass: keep the pass-1 fields and make
/// sure `summary` and `friendly` are set.
pub fn humanize_fallback(analysis: &StructuredAnalysis) -> StructuredAnalysis {
    let mut out = analysis.clone();
    if out.summary.trim().is_empty() {
        let lead = analysis
            .possible_causes
            .first()
            .map(Cause::title)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("See causes below.");
        out.summary = format!("Briefly: {lead}");
    }
    if out.friendly.as_deref().is_none_or(|f| f.trim().is_empty()) {
        out.friendly = Some(DEFAULT_FRIENDLY.to_string());
    }
    out
}
