//! Grounding context and the chat system prompt.

use crate::analysis::DocumentAnalysis;

const PERSONA: &str = "You are a helpful legal assistant that explains legal documents in simple, \
accessible language. You help users understand complex legal terms, identify potential risks, \
and make informed decisions.";

const GUIDELINES: &str = "Guidelines:
- Use simple, everyday language
- Explain legal jargon clearly
- Focus on practical implications
- Highlight potential risks
- Provide actionable advice
- Be supportive and encouraging
- Never provide specific legal advice - always recommend consulting a lawyer for important decisions";

/// Document text plus its analysis, injected ahead of every chat turn.
///
/// Never stored as a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingContext(String);

impl GroundingContext {
    /// Render the context for an analyzed document.
    pub fn from_analysis(document_text: &str, analysis: &DocumentAnalysis) -> Self {
        let terms = analysis
            .important_terms
            .iter()
            .map(|t| format!("{} ({})", t.term, t.simple_explanation))
            .collect::<Vec<_>>()
            .join("; ");

        Self(format!(
            "Full Document Text:\n{document_text}\n\nDocument Analysis:\nSummary: {}\nKey Points: {}\nImportant Terms: {terms}\nThings To Know: {}\nWarnings: {}",
            analysis.summary,
            analysis.key_points.join(", "),
            analysis.things_to_know.join(", "),
            analysis.warnings.join(", "),
        ))
    }

    /// Use caller-rendered context verbatim. Blank input yields `None`.
    pub fn from_raw(context: impl Into<String>) -> Option<Self> {
        let context = context.into();
        if context.trim().is_empty() {
            None
        } else {
            Some(Self(context))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// System prompt for a chat turn, grounded when context is available.
pub fn system_prompt(grounding: Option<&GroundingContext>) -> String {
    match grounding {
        Some(ctx) => format!(
            "{PERSONA}\n\nContext: The user has uploaded a legal document. Here's the analysis context:\n{}\n\n{GUIDELINES}",
            ctx.as_str()
        ),
        None => format!("{PERSONA}\n\n{GUIDELINES}"),
    }
}
