//! Batch evaluation over images × questions.
//!
//! For every image the pipeline selects its questions, obtains each answer
//! from an [`AnswerSource`], and (when scoring) resolves and grades it. One
//! pair's failure never stops the run:
//!
//! - a missing image file produces one [`FailureRecord`] for that image and
//!   skips its remaining questions
//! - a timeout or backend error produces a [`FailureRecord`] for that pair
//! - a missing raw answer is recorded as a [`SkippedPair`]
//!
//! Errors that are not per-pair (an unusable model, bad configuration) abort
//! the run.
//!
//! Pairs are processed one at a time; both backends are assumed to own a
//! single accelerator.

use crate::collector::AnswerSource;
use crate::dataset::QuestionSet;
use crate::error::{GraderError, Result};
use crate::grader::accuracy;
use crate::records::{
    FailureRecord, ImageRecord, QuestionRecord, RawAnswerRecord, ScoreMode, ScoredAnswerRecord,
    SkippedPair,
};
use crate::resolver::ChoiceResolver;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Grading mode for the resolver.
    pub mode: ScoreMode,
    /// Limit for obtaining one answer; `None` waits indefinitely.
    pub pair_timeout: Option<Duration>,
    /// First image (0-based, inclusive) to process.
    pub start_index: usize,
    /// Image index to stop before; `None` runs to the end.
    pub end_index: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ScoreMode::Other,
            pair_timeout: Some(Duration::from_secs(120)),
            start_index: 0,
            end_index: None,
        }
    }
}

impl PipelineConfig {
    /// The slice of `images` this run covers.
    pub fn slice<'a>(&self, images: &'a [ImageRecord]) -> &'a [ImageRecord] {
        let end = self.end_index.unwrap_or(images.len()).min(images.len());
        let start = self.start_index.min(end);
        &images[start..end]
    }
}

/// Aggregate numbers for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub mode: String,
    pub images: usize,
    pub pairs: usize,
    pub answered: usize,
    pub scored: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub failures: usize,
    pub skipped: usize,
    pub elapsed_secs: f64,
}

impl RunSummary {
    /// Print summary to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Evaluation Results ==========");
        println!("Answer source: {}", self.source);
        println!("Mode:          {}", self.mode);
        println!("Images:        {}", self.images);
        println!("Pairs:         {}", self.pairs);
        println!("----------------------------------------");
        println!("Answered:      {}", self.answered);
        if self.scored > 0 {
            println!(
                "Correct:       {}/{} ({:.1}%)",
                self.correct,
                self.scored,
                self.accuracy * 100.0
            );
        }
        println!("Failures:      {}", self.failures);
        println!("Skipped:       {}", self.skipped);
        println!("----------------------------------------");
        println!("Total time: {:.1}s", self.elapsed_secs);
        println!("========================================\n");
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
    /// Answers obtained, in processing order.
    pub answers: Vec<RawAnswerRecord>,
    /// Graded answers; empty for collection-only runs.
    pub scored: Vec<ScoredAnswerRecord>,
    pub failures: Vec<FailureRecord>,
    pub skipped: Vec<SkippedPair>,
    pub summary: RunSummary,
}

/// Drives answer collection and grading over a dataset.
pub struct EvaluationPipeline {
    config: PipelineConfig,
}

impl EvaluationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Obtain answers for every pair without grading them.
    pub async fn collect<S: AnswerSource>(
        &self,
        images: &[ImageRecord],
        questions: &QuestionSet,
        source: &S,
    ) -> Result<RunResults> {
        self.traverse(images, questions, source, None).await
    }

    /// Obtain, resolve, and grade answers for every pair.
    pub async fn score<S: AnswerSource>(
        &self,
        images: &[ImageRecord],
        questions: &QuestionSet,
        source: &S,
        resolver: &ChoiceResolver<'_>,
    ) -> Result<RunResults> {
        self.traverse(images, questions, source, Some(resolver))
            .await
    }

    async fn traverse<S: AnswerSource>(
        &self,
        images: &[ImageRecord],
        questions: &QuestionSet,
        source: &S,
        resolver: Option<&ChoiceResolver<'_>>,
    ) -> Result<RunResults> {
        let start_time = Instant::now();
        let listing = images;
        let images = self.config.slice(listing);
        let mut results = RunResults::default();

        // Rows rejected at load time are reported alongside runtime failures.
        results.failures.extend(questions.rejected.iter().cloned());

        info!(
            "Processing {} images with {} answers",
            images.len(),
            source.label()
        );

        let mut pairs = 0;
        for (idx, image) in images.iter().enumerate() {
            debug!("[{}/{}] Image {}", idx + 1, images.len(), image.image_id);

            for question in questions.for_image(&image.image_id) {
                pairs += 1;
                match self.process_pair(image, question, source, resolver).await {
                    Ok((answer, scored)) => {
                        results.answers.push(answer);
                        results.scored.extend(scored);
                    }
                    Err(GraderError::InputMissing {
                        what,
                        image_id,
                        question_id,
                    }) => {
                        debug!("No {} for image {}, question {}", what, image_id, question_id);
                        results.skipped.push(SkippedPair {
                            image_id,
                            question_id,
                            reason: format!("{} missing", what),
                        });
                    }
                    Err(GraderError::ImageNotFound(path)) => {
                        warn!("File {:?} not found; skipping image {}", path, image.image_id);
                        results.failures.push(failure(image, "image file not found"));
                        break;
                    }
                    Err(e) if !e.is_per_pair() => return Err(e),
                    Err(e) => {
                        warn!(
                            "Image {}, question {} failed: {}",
                            image.image_id, question.question_id, e
                        );
                        results.failures.push(failure(
                            image,
                            &format!("question {}: {}", question.question_id, e),
                        ));
                    }
                }
            }
        }

        results.skipped.extend(source.unmatched(questions, listing));

        results.summary = RunSummary {
            source: source.label().to_string(),
            mode: self.config.mode.to_string(),
            images: images.len(),
            pairs,
            answered: results.answers.len(),
            scored: results.scored.len(),
            correct: results.scored.iter().filter(|r| r.is_correct).count(),
            accuracy: accuracy(&results.scored),
            failures: results.failures.len(),
            skipped: results.skipped.len(),
            elapsed_secs: start_time.elapsed().as_secs_f64(),
        };

        info!(
            "Finished: {} answered, {} failures, {} skipped",
            results.summary.answered, results.summary.failures, results.summary.skipped
        );

        Ok(results)
    }

    async fn process_pair<S: AnswerSource>(
        &self,
        image: &ImageRecord,
        question: &QuestionRecord,
        source: &S,
        resolver: Option<&ChoiceResolver<'_>>,
    ) -> Result<(RawAnswerRecord, Option<ScoredAnswerRecord>)> {
        let free_form_answer = match self.config.pair_timeout {
            Some(limit) => tokio::time::timeout(limit, source.answer(image, question))
                .await
                .map_err(|_| GraderError::Timeout(limit))??,
            None => source.answer(image, question).await?,
        };

        let scored = match resolver {
            Some(resolver) => {
                let resolution = resolver.resolve(
                    &free_form_answer,
                    &question.correct_answer,
                    &question.choices,
                    self.config.mode,
                )?;
                debug!(
                    image = %image.image_id,
                    question = %question.question_id,
                    choice = %resolution.resolved_choice,
                    correct = resolution.is_correct,
                    "Scored"
                );
                Some(ScoredAnswerRecord {
                    image_id: image.image_id.clone(),
                    question_id: question.question_id.clone(),
                    free_form_answer: free_form_answer.clone(),
                    resolved_choice: resolution.resolved_choice,
                    is_correct: resolution.is_correct,
                })
            }
            None => None,
        };

        let answer = RawAnswerRecord {
            image_id: image.image_id.clone(),
            image: Some(image.file_path.to_string_lossy().into_owned()),
            question_id: question.question_id.clone(),
            free_form_answer,
        };

        Ok((answer, scored))
    }
}

fn failure(image: &ImageRecord, reason: &str) -> FailureRecord {
    FailureRecord {
        image_id: image.image_id.clone(),
        file_name: image.file_path.to_string_lossy().into_owned(),
        reason: reason.to_string(),
    }
}
