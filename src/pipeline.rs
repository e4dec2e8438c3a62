//! Two-pass analysis pipeline and the single-call model flows.
//!
//! Pass 1 (structured) is mandatory: any failure becomes
//! [`SomaError::AnalysisFailed`]. Pass 2 (humanize) is best effort: its
//! failure path is [`humanize_fallback`], never an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clients::{ChatMessage, CompletionClient, CompletionOptions};
use crate::error::{Result, SomaError};
use crate::extract::{JsonShape, extract, extract_object};
use crate::fallback::humanize_fallback;
use crate::normalize::{Question, StructuredAnalysis, normalize, normalize_questions};
use crate::prompts::{ConcernKind, PromptRegistry};

/// Sampling per flow as (temperature, max tokens).
pub const MCQ_SAMPLING: (f32, u32) = (0.2, 450);
pub const ANALYSIS_SAMPLING: (f32, u32) = (0.2, 900);
pub const HUMANIZE_SAMPLING: (f32, u32) = (0.75, 400);
pub const QUICK_QUERY_SAMPLING: (f32, u32) = (0.5, 250);
pub const COSMIC_INSIGHT_SAMPLING: (f32, u32) = (0.8, 150);

/// Trim and reject blank symptom text.
pub fn validate_symptom(symptom: &str) -> Result<&str> {
    let trimmed = symptom.trim();
    if trimmed.is_empty() {
        return Err(SomaError::invalid_input(
            "symptom required and must be a non-empty string",
        ));
    }
    Ok(trimmed)
}

/// Merge a humanized object into pass-1 output. Only `summary` and
/// `friendly` are taken; everything else stays as pass 1 produced it.
pub fn merge_humanized(
    structured: &StructuredAnalysis,
    humanized: &Value,
) -> Result<StructuredAnalysis> {
    let Some(obj) = humanized.as_object() else {
        return Err(SomaError::MalformedJson {
            message: "humanized output is not an object".to_string(),
        });
    };
    let pick = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let summary = pick("summary");
    let friendly = pick("friendly");
    if summary.is_none() && friendly.is_none() {
        return Err(SomaError::MalformedJson {
            message: "humanized output has neither summary nor friendly".to_string(),
        });
    }

    let mut merged = structured.clone();
    if let Some(summary) = summary {
        merged.summary = summary;
    }
    if friendly.is_some() {
        merged.friendly = friendly;
    }
    Ok(merged)
}

pub struct AnalysisPipeline {
    client: Arc<dyn CompletionClient>,
    prompts: PromptRegistry,
}

impl AnalysisPipeline {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            prompts: PromptRegistry::new(),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.client.has_credential()
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    async fn call(&self, prompt: String, sampling: (f32, u32)) -> Result<String> {
        let messages = [ChatMessage::system(prompt)];
        let options = CompletionOptions::sampling(sampling.0, sampling.1);
        self.client.complete(&messages, &options).await
    }

    /// Clarifying questions for a symptom.
    pub async fn generate_mcqs(
        &self,
        symptom: &str,
        kind: Option<ConcernKind>,
    ) -> Result<Vec<Question>> {
        let symptom = validate_symptom(symptom)?;
        let raw = self.call(self.prompts.mcq(symptom, kind), MCQ_SAMPLING).await?;
        // `{questions: [...]}` first; a bare array would otherwise be read as
        // its first element object.
        let mut questions = extract(&raw, JsonShape::Object)
            .map(|v| normalize_questions(&v))
            .unwrap_or_default();
        if questions.is_empty() {
            questions = normalize_questions(&extract(&raw, JsonShape::Array)?);
        }
        if questions.is_empty() {
            return Err(SomaError::NoJsonFound);
        }
        debug!(count = questions.len(), "Generated clarifying questions");
        Ok(questions)
    }

    /// Full two-pass analysis.
    pub async fn analyze(
        &self,
        symptom: &str,
        answers: &BTreeMap<String, String>,
    ) -> Result<StructuredAnalysis> {
        let symptom = validate_symptom(symptom)?;
        let structured = self.structured_pass(symptom, answers).await?;

        let analysis = match self.humanize_pass(&structured).await {
            Ok(humanized) => humanized,
            Err(e) => {
                warn!(error = %e, "Humanization failed, using fallback");
                humanize_fallback(&structured)
            }
        };
        info!(
            urgency = analysis.urgency.as_str(),
            causes = analysis.possible_causes.len(),
            steps = analysis.next_steps.len(),
            "Analysis complete"
        );
        Ok(analysis)
    }

    /// Pass 1: prompt, complete, extract, normalize.
    pub async fn structured_pass(
        &self,
        symptom: &str,
        answers: &BTreeMap<String, String>,
    ) -> Result<StructuredAnalysis> {
        let prompt = self.prompts.analysis(symptom, answers);
        let raw = self
            .call(prompt, ANALYSIS_SAMPLING)
            .await
            .map_err(|e| SomaError::analysis_failed(e, None))?;
        let value = extract_object(&raw).map_err(|e| SomaError::analysis_failed(e, Some(raw.clone())))?;
        Ok(normalize(&value))
    }

    /// Pass 2: rewrite tone-sensitive fields. Errors are for the caller to
    /// swallow; the result always has `summary` and `friendly` set.
    pub async fn humanize_pass(&self, structured: &StructuredAnalysis) -> Result<StructuredAnalysis> {
        let raw = self
            .call(self.prompts.humanize(structured), HUMANIZE_SAMPLING)
            .await?;
        let value = extract_object(&raw)?;
        let merged = merge_humanized(structured, &value)?;
        Ok(humanize_fallback(&merged))
    }

    pub async fn quick_query(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SomaError::invalid_input("Question is required."));
        }
        let answer = self
            .call(self.prompts.quick_query(question), QUICK_QUERY_SAMPLING)
            .await?;
        Ok(answer.trim().to_string())
    }

    pub async fn cosmic_insight(&self, symptom: &str, summary: &str) -> Result<String> {
        let (symptom, summary) = (symptom.trim(), summary.trim());
        if symptom.is_empty() || summary.is_empty() {
            return Err(SomaError::invalid_input(
                "Context with symptom and summary is required.",
            ));
        }
        let insight = self
            .call(
                self.prompts.cosmic_insight(symptom, summary),
                COSMIC_INSIGHT_SAMPLING,
            )
            .await?;
        Ok(insight.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{Cause, Urgency};
    use serde_json::json;

    fn pass1() -> StructuredAnalysis {
        StructuredAnalysis {
            summary: "A cold.".into(),
            possible_causes: vec![Cause::Plain("Virus".into())],
            urgency: Urgency::Medium,
            grounding: vec!["breathe".into()],
            cosmic: true,
            ..Default::default()
        }
    }

    #[test]
    fn validate_symptom_trims_and_rejects_blank() {
        assert_eq!(validate_symptom("  cough ").unwrap(), "cough");
        assert!(matches!(
            validate_symptom(" \n\t "),
            Err(SomaError::InvalidInput { .. })
        ));
    }

    #[test]
    fn merge_takes_only_summary_and_friendly() {
        let humanized = json!({
            "summary": "Just a sniffly cold 🤧",
            "friendly": "Rest up!",
            "urgency": "HIGH",
            "possible_causes": [],
            "cosmic": false
        });
        let merged = merge_humanized(&pass1(), &humanized).unwrap();
        assert_eq!(merged.summary, "Just a sniffly cold 🤧");
        assert_eq!(merged.friendly.as_deref(), Some("Rest up!"));
        assert_eq!(merged.urgency, Urgency::Medium);
        assert_eq!(merged.possible_causes.len(), 1);
        assert!(merged.cosmic);
        assert_eq!(merged.grounding, vec!["breathe".to_string()]);
    }

    #[test]
    fn merge_keeps_pass1_summary_when_only_friendly_given() {
        let merged = merge_humanized(&pass1(), &json!({"friendly": "hey"})).unwrap();
        assert_eq!(merged.summary, "A cold.");
    }

    #[test]
    fn merge_rejects_unusable_output() {
        assert!(merge_humanized(&pass1(), &json!([1])).is_err());
        assert!(merge_humanized(&pass1(), &json!({"summary": "  ", "friendly": 3})).is_err());
    }
}
