//! The structured analysis contract and its validator.
//!
//! Model output is never deserialized straight into [`DocumentAnalysis`].
//! It is parsed into a [`serde_json::Value`], checked field by field, and
//! only then turned into the typed value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A plain-language explanation of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysis {
    /// One or two sentences on what the document says.
    pub summary: String,
    /// Main points, in presentation order.
    pub key_points: Vec<String>,
    /// Terms explained in everyday language. Terms may repeat.
    pub important_terms: Vec<ImportantTerm>,
    /// Things the reader should know before agreeing.
    pub things_to_know: Vec<String>,
    /// Things to be careful about. May be empty.
    pub warnings: Vec<String>,
}

/// A term and its everyday explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportantTerm {
    pub term: String,
    pub simple_explanation: String,
}

/// Every problem found in a candidate analysis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid analysis: {}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

/// Check `value` against the [`DocumentAnalysis`] shape.
///
/// Missing or mistyped fields reject the whole object; nothing is accepted
/// partially.
pub fn validate(value: &Value) -> Result<DocumentAnalysis, ValidationError> {
    let mut problems = Vec::new();

    let Some(obj) = value.as_object() else {
        return Err(ValidationError {
            problems: vec![format!("expected an object, found {}", kind(value))],
        });
    };

    let summary = string_field(obj.get("summary"), "summary", &mut problems);
    let key_points = string_list(obj.get("keyPoints"), "keyPoints", &mut problems);
    let things_to_know = string_list(obj.get("thingsToKnow"), "thingsToKnow", &mut problems);
    let warnings = string_list(obj.get("warnings"), "warnings", &mut problems);

    let mut important_terms = Vec::new();
    match obj.get("importantTerms") {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("importantTerms[{i}]");
                let Some(entry) = item.as_object() else {
                    problems.push(format!("{path}: expected an object, found {}", kind(item)));
                    continue;
                };
                let term = string_field(entry.get("term"), &format!("{path}.term"), &mut problems);
                let simple_explanation = string_field(
                    entry.get("simpleExplanation"),
                    &format!("{path}.simpleExplanation"),
                    &mut problems,
                );
                if let (Some(term), Some(simple_explanation)) = (term, simple_explanation) {
                    important_terms.push(ImportantTerm {
                        term,
                        simple_explanation,
                    });
                }
            }
        }
        Some(other) => problems.push(format!("importantTerms: expected an array, found {}", kind(other))),
        None => problems.push("importantTerms: missing".to_string()),
    }

    match (summary, key_points, things_to_know, warnings) {
        (Some(summary), Some(key_points), Some(things_to_know), Some(warnings))
            if problems.is_empty() =>
        {
            Ok(DocumentAnalysis {
                summary,
                key_points,
                important_terms,
                things_to_know,
                warnings,
            })
        }
        _ => Err(ValidationError { problems }),
    }
}

fn string_field(value: Option<&Value>, path: &str, problems: &mut Vec<String>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            problems.push(format!("{path}: expected a string, found {}", kind(other)));
            None
        }
        None => {
            problems.push(format!("{path}: missing"));
            None
        }
    }
}

fn string_list(value: Option<&Value>, path: &str, problems: &mut Vec<String>) -> Option<Vec<String>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(other) => {
            problems.push(format!("{path}: expected an array, found {}", kind(other)));
            return None;
        }
        None => {
            problems.push(format!("{path}: missing"));
            return None;
        }
    };

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::String(s) => out.push(s.clone()),
            other => problems.push(format!("{path}[{i}]: expected a string, found {}", kind(other))),
        }
    }
    Some(out)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Locate the first top-level `{...}` object in `text`.
///
/// Scans from the first `{` and tracks nesting depth, skipping braces that
/// sit inside JSON string literals. Returns the whole text when it holds no
/// `{`, and everything from the first `{` when the braces never balance, so
/// the caller's JSON parse reports the problem.
pub fn find_json_object(text: &str) -> &str {
    let Some(start) = text.find('{') else {
        return text;
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &text[start..=start + offset];
                }
            }
            _ => {}
        }
    }

    &text[start..]
}

/// JSON schema sent in schema-constrained mode.
pub fn response_format() -> Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "document_analysis",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "A simple summary of what this document is about in 1-2 sentences"
                    },
                    "keyPoints": string_array_schema("Main points from the document explained in simple bullet points"),
                    "importantTerms": {
                        "type": "array",
                        "description": "Important terms explained in everyday language",
                        "items": {
                            "type": "object",
                            "properties": {
                                "term": { "type": "string" },
                                "simpleExplanation": { "type": "string" }
                            },
                            "required": ["term", "simpleExplanation"],
                            "additionalProperties": false
                        }
                    },
                    "thingsToKnow": string_array_schema("Important things you should know, explained simply"),
                    "warnings": string_array_schema("Things to be careful about, explained in simple terms")
                },
                "required": ["summary", "keyPoints", "importantTerms", "thingsToKnow", "warnings"],
                "additionalProperties": false
            }
        }
    })
}

fn string_array_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "description": description,
        "items": { "type": "string" }
    })
}
