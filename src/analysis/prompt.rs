//! Prompt construction for document analysis.

/// Longest document prefix sent to the model, in characters.
pub const MAX_DOCUMENT_CHARS: usize = 8000;

/// Appended when a document is cut to [`MAX_DOCUMENT_CHARS`].
pub const TRUNCATION_MARKER: &str = "\n\n[Document truncated to fit within API limits]";

const SYSTEM_PROMPT: &str = "You are a legal document translator that explains what documents \
actually say in plain English. Focus on the CONTENT and TERMS of the document, not describing \
what type of document it is. Break down the actual clauses, conditions, obligations, and rights \
mentioned in the document.";

const FREE_TEXT_SUFFIX: &str = r#"

Respond with a single JSON object and nothing else, exactly in this shape:
{
  "summary": "A simple summary of what this document says in 1-2 sentences",
  "keyPoints": ["Main point explained simply"],
  "importantTerms": [{"term": "Term from the document", "simpleExplanation": "What it means in everyday language"}],
  "thingsToKnow": ["Something important to know, explained simply"],
  "warnings": ["Something to be careful about, explained simply"]
}"#;

const CHECKLIST: &str = "Focus on:
- What specific obligations or responsibilities does this create?
- What rights does each party have?
- What are the key terms and conditions?
- What happens in different scenarios (penalties, termination, etc.)?
- What should someone know before signing or agreeing to this?";

/// System and user instructions for one analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Which request variant the prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// The JSON shape travels as a response schema.
    Structured,
    /// The JSON shape is spelled out in the system prompt.
    FreeText,
}

/// Cut `text` to [`MAX_DOCUMENT_CHARS`] characters, marking the cut.
pub fn truncate(text: &str) -> std::borrow::Cow<'_, str> {
    match text.char_indices().nth(MAX_DOCUMENT_CHARS) {
        None => std::borrow::Cow::Borrowed(text),
        Some((byte_idx, _)) => {
            std::borrow::Cow::Owned(format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]))
        }
    }
}

/// Build the analysis prompt for `document_text`.
///
/// A missing or blank `document_type` reads as "document".
pub fn build_prompt(document_text: &str, document_type: Option<&str>, style: PromptStyle) -> Prompt {
    let document_type = document_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("document");

    let system = match style {
        PromptStyle::Structured => SYSTEM_PROMPT.to_string(),
        PromptStyle::FreeText => format!("{SYSTEM_PROMPT}{FREE_TEXT_SUFFIX}"),
    };

    let user = format!(
        "Read this {document_type} and explain what it actually says - the specific terms, \
conditions, obligations, and rights it contains. Don't just describe what type of document it \
is, but explain what the person is agreeing to or what the document requires:\n\n{}\n\n{CHECKLIST}",
        truncate(document_text)
    );

    Prompt { system, user }
}
