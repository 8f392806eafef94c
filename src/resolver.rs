//! Projects a free-form answer onto one of a question's choices.

use crate::embedding::{Embedder, rank_by_similarity};
use crate::error::{GraderError, Result};
use crate::grader::grade;
use crate::records::ScoreMode;
use serde::{Deserialize, Serialize};

/// Below this many choices a question is treated as yes/no.
pub const MULTI_CHOICE_MIN: usize = 3;

/// How a `"no"` produced by the yes/no short-circuit is graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativePolicy {
    /// Compare `"no"` against the correct answer like any other choice.
    #[default]
    GradeAgainstAnswer,
    /// Score every `"no"` as incorrect (the benchmark's historical scoring).
    AlwaysIncorrect,
}

impl NegativePolicy {
    /// Verdict for a `"no"` resolution against `correct_answer`.
    pub fn grade_no(self, correct_answer: &str) -> bool {
        match self {
            NegativePolicy::GradeAgainstAnswer => grade("no", correct_answer),
            NegativePolicy::AlwaysIncorrect => false,
        }
    }
}

/// Whether a question is graded on the yes/no path instead of by ranking.
pub fn is_yes_no(mode: ScoreMode, choice_count: usize) -> bool {
    mode == ScoreMode::Dsg || choice_count < MULTI_CHOICE_MIN
}

/// Outcome of resolving one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub is_correct: bool,
    pub resolved_choice: String,
}

/// Resolves answers using the yes/no short-circuit or semantic ranking.
pub struct ChoiceResolver<'a> {
    embedder: &'a dyn Embedder,
    negative_policy: NegativePolicy,
}

impl<'a> ChoiceResolver<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self {
            embedder,
            negative_policy: NegativePolicy::default(),
        }
    }

    pub fn with_negative_policy(mut self, policy: NegativePolicy) -> Self {
        self.negative_policy = policy;
        self
    }

    /// Decide which choice `answer` represents and whether it is correct.
    ///
    /// In DSG mode, or when there are fewer than three choices, any answer
    /// containing "yes" (case-insensitive, anywhere) resolves to a correct
    /// `"yes"` and everything else resolves to `"no"`. Otherwise the choice
    /// with the highest embedding similarity wins and is graded against
    /// `correct_answer`. The embedder is only called on the ranking path.
    pub fn resolve(
        &self,
        answer: &str,
        correct_answer: &str,
        choices: &[String],
        mode: ScoreMode,
    ) -> Result<Resolution> {
        if choices.is_empty() {
            return Err(GraderError::InvalidInput(
                "question has no choices".to_string(),
            ));
        }

        if is_yes_no(mode, choices.len()) {
            if answer.to_lowercase().contains("yes") {
                return Ok(Resolution {
                    is_correct: true,
                    resolved_choice: "yes".to_string(),
                });
            }

            return Ok(Resolution {
                is_correct: self.negative_policy.grade_no(correct_answer),
                resolved_choice: "no".to_string(),
            });
        }

        let resolved = rank_by_similarity(self.embedder, answer, choices)?;
        Ok(Resolution {
            is_correct: grade(resolved, correct_answer),
            resolved_choice: resolved.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{KeywordEmbedder, choices};

    #[test]
    fn test_dsg_yes_short_circuit() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let options = choices(&["red", "blue", "green", "yellow"]);

        for answer in ["Yes", "YES, there is", "eyes are blue", "well... yes."] {
            let r = resolver.resolve(answer, "blue", &options, ScoreMode::Dsg).unwrap();
            assert_eq!(r.resolved_choice, "yes");
            assert!(r.is_correct);
        }
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn test_few_choices_never_embed() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let options = choices(&["yes", "no"]);

        let r = resolver
            .resolve("there is a dog", "no", &options, ScoreMode::Other)
            .unwrap();
        assert_eq!(r.resolved_choice, "no");
        let r = resolver
            .resolve("a blue one", "no", &choices(&["blue"]), ScoreMode::Other)
            .unwrap();
        assert_eq!(r.resolved_choice, "no");
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn test_no_graded_against_answer_by_default() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let options = choices(&["yes", "no"]);

        let r = resolver.resolve("Nope", " No ", &options, ScoreMode::Dsg).unwrap();
        assert_eq!(r.resolved_choice, "no");
        assert!(r.is_correct);

        let r = resolver.resolve("Nope", "yes", &options, ScoreMode::Dsg).unwrap();
        assert!(!r.is_correct);
    }

    #[test]
    fn test_no_always_incorrect_policy() {
        let embedder = KeywordEmbedder::new();
        let resolver =
            ChoiceResolver::new(&embedder).with_negative_policy(NegativePolicy::AlwaysIncorrect);
        let r = resolver
            .resolve("no", "no", &choices(&["yes", "no"]), ScoreMode::Dsg)
            .unwrap();
        assert_eq!(r.resolved_choice, "no");
        assert!(!r.is_correct);
    }

    #[test]
    fn test_multi_choice_uses_similarity() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let options = choices(&["red", "blue", "green"]);

        let r = resolver
            .resolve("it's definitely blue", "Blue", &options, ScoreMode::Other)
            .unwrap();
        assert_eq!(r.resolved_choice, "blue");
        assert!(r.is_correct);
        assert_eq!(embedder.calls(), 1);

        let r = resolver
            .resolve("it's definitely blue", "red", &options, ScoreMode::Other)
            .unwrap();
        assert!(!r.is_correct);
    }

    #[test]
    fn test_multi_choice_does_not_short_circuit_on_yes() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let options = choices(&["red", "blue", "green"]);

        let r = resolver
            .resolve("yes, it is green", "green", &options, ScoreMode::Other)
            .unwrap();
        assert_eq!(r.resolved_choice, "green");
        assert!(r.is_correct);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let options = choices(&["a cat", "a dog", "a bird"]);

        let first = resolver
            .resolve("probably a dog", "a dog", &options, ScoreMode::Other)
            .unwrap();
        let second = resolver
            .resolve("probably a dog", "a dog", &options, ScoreMode::Other)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_choices_rejected() {
        let embedder = KeywordEmbedder::new();
        let resolver = ChoiceResolver::new(&embedder);
        let err = resolver.resolve("yes", "yes", &[], ScoreMode::Dsg).unwrap_err();
        assert!(matches!(err, GraderError::InvalidInput(_)));
    }
}
