//! Prompts for reading one question off an answer sheet image.
//!
//! Every instruction sent to the model lives here so the answer grammar the
//! prompt asks for and the grammar [`crate::pipeline::analyze::parse_response`]
//! accepts stay in one place.

/// Reply the model is told to give when no bubble is filled.
pub const NO_ANSWER_MARKER: &str = "–";

/// Default system prompt, used when `GradingConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an expert at reading OMR (optical mark recognition) answer sheets.";

/// Build the per-question instruction.
///
/// The whole page is sent with every question; the model is trusted to find
/// the row for `question` itself.
pub fn question_prompt(question: usize) -> String {
    format!(
        "This is a scanned image of a multiple-choice answer sheet. \
Focus on question {question}. \
Options are A, B, C, and D. Identify which bubble is filled. \
If none are filled, reply with '{NO_ANSWER_MARKER}'. \
Return only the single uppercase letter."
    )
}

/// Sent instead of [`question_prompt`] on the retry after an ambiguous reply.
pub fn clarification_prompt(question: usize, previous: &str) -> String {
    format!(
        "{} Your previous reply was {previous:?}, which is not valid. \
Reply with exactly one character: A, B, C, D, or '{NO_ANSWER_MARKER}'.",
        question_prompt(question)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_prompt_names_question_and_options() {
        let p = question_prompt(17);
        assert!(p.contains("question 17"));
        assert!(p.contains("A, B, C, and D"));
        assert!(p.contains(NO_ANSWER_MARKER));
    }

    #[test]
    fn clarification_quotes_previous_reply() {
        let p = clarification_prompt(3, "B or C");
        assert!(p.contains("question 3"));
        assert!(p.contains("\"B or C\""));
    }
}
