//! Prompt assembly for the answer step.

use crate::fusion::AssembledContext;

/// Persona and grounding rules sent as the system message.
pub const SYSTEM_PROMPT: &str = "\
You are a patient, encouraging teacher. Explain ideas in plain language, \
avoid jargon, and define any technical term you cannot avoid. \
When answering, rely first on the document context supplied with the \
question; it takes priority over anything said earlier in the conversation. \
If the context does not contain the answer, say so instead of guessing.";

/// Final user turn: the question restated next to the fused context.
pub fn user_turn(question: &str, context: &AssembledContext) -> String {
    format!(
        "Question: {}\n\n\
         Context:\n{}\n\n\
         Answer only the question above, using the context provided.",
        question.trim(),
        context.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::NO_CONTENT_PLACEHOLDER;

    fn context(text: &str) -> AssembledContext {
        AssembledContext {
            text: text.to_string(),
            document_name: None,
            history: Vec::new(),
            document_results: Vec::new(),
            knowledge_results: Vec::new(),
            document_tier: None,
        }
    }

    #[test]
    fn test_user_turn_restates_question_with_context() {
        let turn = user_turn("  What is osmosis? ", &context("CONTENT FROM CURRENT DOCUMENT:\nosmosis"));
        assert!(turn.starts_with("Question: What is osmosis?\n\n"));
        assert!(turn.contains("Context:\nCONTENT FROM CURRENT DOCUMENT:\nosmosis"));
        assert!(turn.ends_with("using the context provided."));
    }

    #[test]
    fn test_placeholder_context_passed_through() {
        let turn = user_turn("anything", &context(NO_CONTENT_PLACEHOLDER));
        assert!(turn.contains(NO_CONTENT_PLACEHOLDER));
    }

    #[test]
    fn test_system_prompt_prioritises_document_context() {
        assert!(SYSTEM_PROMPT.contains("document context"));
        assert!(SYSTEM_PROMPT.contains("jargon"));
    }
}
