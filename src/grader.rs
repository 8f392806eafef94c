//! Correctness grading.

use crate::dataset::QuestionSet;
use crate::records::{ScoreMode, ScoredAnswerRecord, SkippedPair};
use crate::resolver::{NegativePolicy, is_yes_no};
use tracing::warn;

/// Case-insensitive, whitespace-trimmed exact match.
pub fn grade(resolved_choice: &str, correct_answer: &str) -> bool {
    resolved_choice.trim().to_lowercase() == correct_answer.trim().to_lowercase()
}

/// Fraction of correct records, 0.0 for an empty slice.
pub fn accuracy(records: &[ScoredAnswerRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let correct = records.iter().filter(|r| r.is_correct).count();
    correct as f64 / records.len() as f64
}

/// Result of re-grading a persisted scored table.
#[derive(Debug, Clone, Default)]
pub struct RegradeReport {
    /// Records with a recomputed `is_correct`, in input order.
    pub records: Vec<ScoredAnswerRecord>,
    /// How many records changed verdict.
    pub changed: usize,
    /// Records whose question could not be found; they keep their old verdict.
    pub missing: Vec<SkippedPair>,
}

/// Recompute correctness for persisted `(resolved_choice, correct_answer)`
/// pairs without re-running resolution.
///
/// Rows on the yes/no path follow the resolver's rules: `"yes"` stays
/// correct and `"no"` is graded by `policy`. Ranked rows go through
/// [`grade`].
pub fn regrade(
    scored: &[ScoredAnswerRecord],
    questions: &QuestionSet,
    mode: ScoreMode,
    policy: NegativePolicy,
) -> RegradeReport {
    let mut report = RegradeReport::default();

    for record in scored {
        let mut record = record.clone();
        match questions.get(&record.image_id, &record.question_id) {
            Some(question) => {
                let choice = record.resolved_choice.trim().to_lowercase();
                let verdict = match choice.as_str() {
                    "yes" if is_yes_no(mode, question.choices.len()) => true,
                    "no" if is_yes_no(mode, question.choices.len()) => {
                        policy.grade_no(&question.correct_answer)
                    }
                    _ => grade(&record.resolved_choice, &question.correct_answer),
                };
                if verdict != record.is_correct {
                    report.changed += 1;
                    record.is_correct = verdict;
                }
            }
            None => {
                warn!(
                    "No question {} for image {}; keeping recorded verdict",
                    record.question_id, record.image_id
                );
                report.missing.push(SkippedPair {
                    image_id: record.image_id.clone(),
                    question_id: record.question_id.clone(),
                    reason: "question missing".to_string(),
                });
            }
        }
        report.records.push(record);
    }

    report
}
