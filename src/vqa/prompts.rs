//! Prompts sent to the vision-language model.

/// Collection of prompts used for answer collection.
pub struct Prompts;

impl Prompts {
    /// System prompt asking for a short, direct answer about the image.
    ///
    /// The benchmark question itself is sent verbatim as the user turn.
    pub fn system_vqa() -> &'static str {
        "You are a visual question answering assistant. Look at the image and answer the user's question directly in a few words. Do not describe anything the question does not ask about."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_not_empty() {
        assert!(!Prompts::system_vqa().is_empty());
    }
}
