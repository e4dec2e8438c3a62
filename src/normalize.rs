//! Schema normalization for untrusted model output.
//!
//! Everything here is total: any JSON value maps to a well-formed result,
//! so handlers never branch on whether a field was present or well-typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MAX_QUESTIONS: usize = 5;
const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 4;

/// Triage level reported to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
}

impl Urgency {
    /// Case-insensitive parse; anything unrecognised is `Low`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MEDIUM" => Urgency::Medium,
            "HIGH" => Urgency::High,
            _ => Urgency::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
        }
    }
}

/// A possible cause, either `{title, brief}` or a bare phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cause {
    Detailed {
        title: String,
        #[serde(default)]
        brief: String,
    },
    Plain(String),
}

impl Cause {
    pub fn title(&self) -> &str {
        match self {
            Cause::Detailed { title, .. } => title,
            Cause::Plain(text) => text,
        }
    }
}

/// A recommended next step, either `{action, why}` or a bare phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextStep {
    Detailed {
        action: String,
        #[serde(default)]
        why: String,
    },
    Plain(String),
}

/// Canonical analysis shape returned to the frontend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAnalysis {
    pub summary: String,
    pub possible_causes: Vec<Cause>,
    pub next_steps: Vec<NextStep>,
    pub urgency: Urgency,
    pub grounding: Vec<String>,
    pub cosmic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly: Option<String>,
}

/// A clarifying multiple-choice question in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub q: String,
    pub options: Vec<String>,
}

impl Question {
    pub fn new(id: &str, q: &str, options: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            q: q.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// Coerce an arbitrary JSON value into a [`StructuredAnalysis`].
pub fn normalize(value: &Value) -> StructuredAnalysis {
    let Some(obj) = value.as_object() else {
        return StructuredAnalysis::default();
    };

    StructuredAnalysis {
        summary: obj
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        possible_causes: array_items(obj, "possible_causes")
            .filter_map(cause_from_value)
            .collect(),
        next_steps: array_items(obj, "next_steps")
            .filter_map(step_from_value)
            .collect(),
        urgency: obj
            .get("urgency")
            .and_then(Value::as_str)
            .map(Urgency::parse_lenient)
            .unwrap_or_default(),
        grounding: array_items(obj, "grounding")
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        cosmic: obj.get("cosmic").is_some_and(truthy),
        friendly: non_empty_str(obj.get("friendly")),
    }
}

/// Coerce model output into a list of clarifying questions.
///
/// Accepts `{"questions": [...]}` or a bare array. Question text may come
/// from `q` or `text`; options may be strings or `{label}` objects.
/// Questions without text or with fewer than two options are dropped.
pub fn normalize_questions(value: &Value) -> Vec<Question> {
    let items: &[Value] = match value {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("questions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    let mut out = Vec::new();
    for item in items {
        if out.len() >= MAX_QUESTIONS {
            break;
        }
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(text) = non_empty_str(obj.get("q")).or_else(|| non_empty_str(obj.get("text"))) else {
            continue;
        };
        let options: Vec<String> = array_items(obj, "options")
            .filter_map(option_label)
            .take(MAX_OPTIONS)
            .collect();
        if options.len() < MIN_OPTIONS {
            continue;
        }
        let id = non_empty_str(obj.get("id")).unwrap_or_else(|| format!("q{}", out.len() + 1));
        out.push(Question {
            id,
            q: text,
            options,
        });
    }
    out
}

fn array_items<'a>(obj: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Value> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter())
        .into_iter()
        .flatten()
}

fn cause_from_value(value: &Value) -> Option<Cause> {
    match value {
        Value::String(text) => Some(Cause::Plain(text.clone())),
        Value::Object(obj) => {
            let title = obj.get("title")?.as_str()?.to_string();
            let brief = obj
                .get("brief")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Cause::Detailed { title, brief })
        }
        _ => None,
    }
}

fn step_from_value(value: &Value) -> Option<NextStep> {
    match value {
        Value::String(text) => Some(NextStep::Plain(text.clone())),
        Value::Object(obj) => {
            let action = obj.get("action")?.as_str()?.to_string();
            let why = obj
                .get("why")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(NextStep::Detailed { action, why })
        }
        _ => None,
    }
}

fn option_label(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => non_empty_str(Some(value)),
        Value::Object(obj) => non_empty_str(obj.get("label").or_else(|| obj.get("text"))),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// JavaScript-style truthiness, matching how the frontend reads `cosmic`.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn renormalize(a: &StructuredAnalysis) -> StructuredAnalysis {
        normalize(&serde_json::to_value(a).unwrap())
    }

    #[test]
    fn non_objects_map_to_defaults() {
        for v in [Value::Null, json!([1, 2]), json!("text"), json!(3.5)] {
            let a = normalize(&v);
            assert_eq!(a, StructuredAnalysis::default());
            assert_eq!(a.urgency, Urgency::Low);
        }
    }

    #[test]
    fn full_object_is_kept() {
        let v = json!({
            "summary": "Likely a tension headache.",
            "possible_causes": [{"title": "Tension", "brief": "muscle strain"}],
            "next_steps": [{"action": "Rest", "why": "recovery"}],
            "urgency": "medium",
            "grounding": ["Breathe in for 4"],
            "cosmic": true,
            "friendly": "You got this"
        });
        let a = normalize(&v);
        assert_eq!(a.summary, "Likely a tension headache.");
        assert_eq!(a.possible_causes[0].title(), "Tension");
        assert_eq!(
            a.next_steps,
            vec![NextStep::Detailed {
                action: "Rest".into(),
                why: "recovery".into()
            }]
        );
        assert_eq!(a.urgency, Urgency::Medium);
        assert_eq!(a.grounding, vec!["Breathe in for 4".to_string()]);
        assert!(a.cosmic);
        assert_eq!(a.friendly.as_deref(), Some("You got this"));
    }

    #[test]
    fn wrong_types_fall_back_to_empty_containers() {
        let v = json!({
            "summary": 12,
            "possible_causes": "dehydration",
            "next_steps": {"action": "drink"},
            "urgency": 3,
            "grounding": [1, "ok", null],
            "cosmic": 0
        });
        let a = normalize(&v);
        assert_eq!(a.summary, "");
        assert!(a.possible_causes.is_empty());
        assert!(a.next_steps.is_empty());
        assert_eq!(a.urgency, Urgency::Low);
        assert_eq!(a.grounding, vec!["ok".to_string()]);
        assert!(!a.cosmic);
    }

    #[test]
    fn mixed_cause_entries_keep_valid_ones_in_order() {
        let v = json!({
            "possible_causes": ["Viral", {"title": "Allergy"}, {"brief": "no title"}, 7],
            "next_steps": ["Drink water", {"action": "Sleep", "why": 1}]
        });
        let a = normalize(&v);
        assert_eq!(
            a.possible_causes,
            vec![
                Cause::Plain("Viral".into()),
                Cause::Detailed {
                    title: "Allergy".into(),
                    brief: String::new()
                }
            ]
        );
        assert_eq!(a.next_steps.len(), 2);
    }

    #[test]
    fn urgency_is_case_normalized_and_bounded() {
        assert_eq!(Urgency::parse_lenient(" high "), Urgency::High);
        assert_eq!(Urgency::parse_lenient("Medium"), Urgency::Medium);
        assert_eq!(Urgency::parse_lenient("low | medium | high"), Urgency::Low);
        assert_eq!(Urgency::parse_lenient("critical"), Urgency::Low);
    }

    #[test]
    fn cosmic_uses_truthiness() {
        assert!(normalize(&json!({"cosmic": "yes"})).cosmic);
        assert!(normalize(&json!({"cosmic": 1})).cosmic);
        assert!(normalize(&json!({"cosmic": []})).cosmic);
        assert!(!normalize(&json!({"cosmic": ""})).cosmic);
        assert!(!normalize(&json!({"cosmic": null})).cosmic);
        assert!(!normalize(&json!({})).cosmic);
    }

    #[test]
    fn blank_friendly_is_dropped() {
        assert_eq!(normalize(&json!({"friendly": "   "})).friendly, None);
        assert_eq!(normalize(&json!({"friendly": 5})).friendly, None);
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            Value::Null,
            json!([]),
            json!({}),
            json!({"summary": "s", "urgency": "high", "cosmic": "x"}),
            json!({
                "possible_causes": ["a", {"title": "b"}, {"title": "c", "brief": "d"}, false],
                "next_steps": [{"action": "e"}, "f"],
                "grounding": ["g", 2],
                "friendly": " hi "
            }),
        ];
        for input in inputs {
            let once = normalize(&input);
            assert_eq!(renormalize(&once), once, "input: {input}");
        }
    }

    #[test]
    fn serialized_shape_uses_snake_case_and_uppercase_urgency() {
        let a = StructuredAnalysis {
            urgency: Urgency::High,
            ..Default::default()
        };
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["urgency"], "HIGH");
        assert!(v.get("possible_causes").is_some());
        assert!(v.get("next_steps").is_some());
        assert!(v.get("friendly").is_none());
    }

    #[test]
    fn questions_from_prompt_shape() {
        let v = json!({"questions": [
            {"id": "q1", "text": "When did it start?", "options": [{"id": "a", "label": "Today"}, {"id": "b", "label": "Last week"}]},
            {"id": "q2", "text": "Fever?", "options": [{"id": "a", "label": "Yes"}]},
            {"text": "How bad?", "options": ["Mild", "Moderate", "Severe", "Worst", "Extra"]}
        ]});
        let qs = normalize_questions(&v);
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0], Question::new("q1", "When did it start?", &["Today", "Last week"]));
        assert_eq!(qs[1].id, "q2");
        assert_eq!(qs[1].options.len(), 4);
    }

    #[test]
    fn questions_from_bare_array_with_q_key() {
        let v = json!([{"id": "onset", "q": "Sudden or gradual?", "options": ["Sudden", "Gradual"]}]);
        let qs = normalize_questions(&v);
        assert_eq!(qs, vec![Question::new("onset", "Sudden or gradual?", &["Sudden", "Gradual"])]);
    }

    #[test]
    fn unusable_q_falls_back_to_text() {
        let v = json!([
            {"q": 5, "text": "When did it start?", "options": ["Today", "Earlier"]},
            {"q": "  ", "text": "Fever?", "options": ["Yes", "No"]}
        ]);
        let qs = normalize_questions(&v);
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].q, "When did it start?");
        assert_eq!(qs[1].q, "Fever?");
    }

    #[test]
    fn questions_are_capped() {
        let item = json!({"q": "x?", "options": ["a", "b"]});
        let v = Value::Array(vec![item; 8]);
        assert_eq!(normalize_questions(&v).len(), 5);
        assert!(normalize_questions(&json!("nope")).is_empty());
    }
}
