//! Versioned prompt registry for the symptom-checker flows
//!
//! Every prompt the backend sends upstream lives here with a stable id, its
//! declared inputs, and a checksum of the template text, so a change in
//! model behaviour can be traced back to the exact template that produced it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::normalize::StructuredAnalysis;

pub const MCQ_PROMPT_ID: &str = "mcq-generate-v1";
pub const ANALYSIS_PROMPT_ID: &str = "analysis-structured-v1";
pub const HUMANIZE_PROMPT_ID: &str = "analysis-humanize-v1";
pub const QUICK_QUERY_PROMPT_ID: &str = "quick-query-v1";
pub const COSMIC_INSIGHT_PROMPT_ID: &str = "cosmic-insight-v1";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Concern category a user may attach to a symptom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcernKind {
    Physical,
    Mental,
}

impl ConcernKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcernKind::Physical => "physical",
            ConcernKind::Mental => "mental",
        }
    }

    /// Case-insensitive parse of a trimmed label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "physical" => Some(ConcernKind::Physical),
            "mental" => Some(ConcernKind::Mental),
            _ => None,
        }
    }
}

/// Represents a prompt's version metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptLineage {
    /// Parent prompt ID if this is a refinement
    pub parent_id: Option<String>,
    /// SHA1 checksum of the template text
    pub checksum: String,
    /// Rationale for this version
    pub change_rationale: Option<String>,
}

/// Core prompt definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Stable identifier (format: flow-name-v1)
    pub id: String,
    /// Short one-liner description
    pub one_liner: String,
    /// Input parameters with descriptions
    pub inputs: HashMap<String, String>,
    pub version: String,
    pub lineage: PromptLineage,
    /// Template text with `{{name}}` placeholders
    pub template: String,
}

impl Prompt {
    pub fn new(
        id: impl Into<String>,
        one_liner: impl Into<String>,
        template: impl Into<String>,
        inputs: HashMap<String, String>,
        parent_id: Option<String>,
        change_rationale: Option<String>,
    ) -> Self {
        let template = template.into();
        let checksum = sha1_checksum(&template);

        Self {
            id: id.into(),
            one_liner: one_liner.into(),
            inputs,
            version: "1.0.0".to_string(),
            lineage: PromptLineage {
                parent_id,
                checksum,
                change_rationale,
            },
            template,
        }
    }

    /// Substitute `{{name}}` placeholders in one pass over the template, so
    /// substituted values are never scanned again. Unknown placeholders are
    /// left as-is.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value).to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Generate a SHA1 checksum of prompt content
fn sha1_checksum(content: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Registry of all known prompts with their metadata
#[derive(Debug, Default)]
pub struct PromptRegistry {
    prompts: HashMap<String, Arc<Prompt>>,
}

impl PromptRegistry {
    /// Create new registry with core prompts
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_core_prompts();
        registry
    }

    pub fn register(&mut self, prompt: Prompt) {
        self.prompts.insert(prompt.id.clone(), Arc::new(prompt));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Prompt>> {
        self.prompts.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Prompt>> {
        self.prompts.values().cloned().collect()
    }

    /// Render a registered prompt. Core prompts are always present, so an
    /// unknown id only happens with a custom registry; it renders empty.
    fn render(&self, id: &str, vars: &[(&str, &str)]) -> String {
        match self.get(id) {
            Some(prompt) => prompt.render(vars),
            None => {
                tracing::error!(prompt_id = id, "Prompt not registered");
                String::new()
            }
        }
    }

    /// Clarifying-question prompt for a symptom and optional concern kind.
    pub fn mcq(&self, symptom: &str, kind: Option<ConcernKind>) -> String {
        let hint = match kind {
            Some(k) => format!("- The user describes this as a {} concern.\n", k.as_str()),
            None => String::new(),
        };
        self.render(MCQ_PROMPT_ID, &[("kind_hint", &hint), ("symptom", symptom)])
    }

    /// Structured analysis prompt for a symptom plus MCQ answers.
    pub fn analysis(&self, symptom: &str, answers: &BTreeMap<String, String>) -> String {
        let answers_json = serde_json::to_string(answers).unwrap_or_else(|_| "{}".to_string());
        self.render(
            ANALYSIS_PROMPT_ID,
            &[("symptom", symptom), ("answers", &answers_json)],
        )
    }

    /// Persona rewrite prompt for a finished analysis.
    pub fn humanize(&self, analysis: &StructuredAnalysis) -> String {
        let original =
            serde_json::to_string_pretty(analysis).unwrap_or_else(|_| "{}".to_string());
        self.render(HUMANIZE_PROMPT_ID, &[("original", &original)])
    }

    pub fn quick_query(&self, question: &str) -> String {
        self.render(QUICK_QUERY_PROMPT_ID, &[("question", question)])
    }

    pub fn cosmic_insight(&self, symptom: &str, summary: &str) -> String {
        self.render(
            COSMIC_INSIGHT_PROMPT_ID,
            &[("symptom", symptom), ("summary", summary)],
        )
    }

    /// Register the core set of prompts
    fn register_core_prompts(&mut self) {
        self.register(Prompt::new(
            MCQ_PROMPT_ID,
            "Clarifying multiple-choice questions for a symptom",
            r#"You are SomaAI assistant. Given a user's symptom text, produce a SHORT list of 3 or 4 multiple-choice questions to clarify the problem.
Output MUST be valid JSON and nothing else, exactly:
{
  "questions": [
    {"id": "q1", "text": "...", "options": [{"id":"a","label":"..."}, {"id":"b","label":"..."}]},
    ...
  ]
}
Rules:
- Each question should be max 10-12 words.
- Use extremely simple language (user-friendly).
- Options should be 2-4 choices, short labels (1-4 words).
- Prioritize questions that change the likely cause / urgency.
- No medical jargon. Do not ask for names, emails or addresses.
{{kind_hint}}Now produce JSON for this symptom:
"""{{symptom}}""""#,
            [
                ("symptom".into(), "Trimmed user symptom text".into()),
                ("kind_hint".into(), "Optional concern-type line".into()),
            ]
            .into(),
            None,
            None,
        ));

        self.register(Prompt::new(
            ANALYSIS_PROMPT_ID,
            "Structured JSON analysis of a symptom and its answers",
            r#"You are SomaAI, a careful medical assistant. Return VALID JSON only with this exact schema:
{
  "summary": "1-3 sentence plain-language summary",
  "possible_causes": [{"title": "...", "brief": "1-line explanation"}],
  "next_steps": [{"action": "...", "why": "1-line reason"}],
  "urgency": "LOW|MEDIUM|HIGH",
  "grounding": ["..."],
  "cosmic": true
}
Rules:
- Use the symptom and the provided MCQ answers to be precise.
- Keep language simple and actionable. No extra prose outside the JSON.
- Urgency must reflect danger signals: set HIGH for severe chest pain, sudden weakness, confusion, breathing difficulty or fainting, and include what to do immediately in next_steps (e.g. "call emergency").
- If uncertain, choose MEDIUM and recommend seeing a clinician.
- Fill "grounding" with short calming exercises only if the user shows anxiety; otherwise use [].
- "cosmic" is true only if a gentle reflective note would help reassure the user.
- Do not give a definitive diagnosis or prescription advice.
Now produce JSON using:
symptom: """{{symptom}}"""
answers: {{answers}}"#,
            [
                ("symptom".into(), "Trimmed user symptom text".into()),
                ("answers".into(), "MCQ answers as a JSON object".into()),
            ]
            .into(),
            None,
            None,
        ));

        self.register(Prompt::new(
            HUMANIZE_PROMPT_ID,
            "Warm persona rewrite of summary plus a friendly line",
            r#"You are SomaAI persona editor. You will be given the JSON object (pass1).
Rewrite ONLY two fields:
- "summary": make it warm, vivid, Gen-Z friendly (1-3 sentences), include 1-2 emojis.
- add "friendly": short supportive line (1 sentence) that feels like a caring friend.

Do NOT change possible_causes, next_steps, urgency, grounding, cosmic.
Respond with JSON only, same keys as original, with updated summary and friendly.
Original JSON:
{{original}}"#,
            [("original".into(), "Normalized pass-1 analysis, pretty JSON".into())].into(),
            None,
            None,
        ));

        self.register(Prompt::new(
            QUICK_QUERY_PROMPT_ID,
            "Short general-health answer to a free question",
            r#"You are a friendly and knowledgeable health assistant. A user has a quick question. Provide a clear, concise, and helpful answer. Do not give medical advice, but you can provide general health information. Frame the answer in a supportive and easy-to-understand way.
Question: "{{question}}"
Answer:"#,
            [("question".into(), "Trimmed user question".into())].into(),
            None,
            None,
        ));

        self.register(Prompt::new(
            COSMIC_INSIGHT_PROMPT_ID,
            "Reflective, non-clinical insight on a finished summary",
            r#"You are a wise, modern philosopher with a touch of cosmic wonder. You are not a doctor. A user has received a brief health summary and is asking for a deeper, more reflective insight. Based on their situation, provide a short, comforting, and thought-provoking reflection (2-3 sentences). Connect their personal feeling to a larger, universal idea (e.g., the body's wisdom, the nature of healing, the mind-body connection, a metaphor from nature or space).

User's situation:
Symptom: "{{symptom}}"
Initial Summary: "{{summary}}"

Your reflective insight:"#,
            [
                ("symptom".into(), "Symptom the summary was produced for".into()),
                ("summary".into(), "Summary shown to the user".into()),
            ]
            .into(),
            None,
            None,
        ));
    }
}
