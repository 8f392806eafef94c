//! VQA Grader - scores free-form vision-language model answers against
//! multiple-choice ground truth.
//!
//! # Overview
//!
//! Generative models rarely answer with a choice string verbatim. The grader
//! projects each free-form answer onto the question's closed set of choices:
//! 1. Yes/no questions (DSG mode, or fewer than three choices) use a cheap
//!    substring test for "yes"
//! 2. Multi-choice questions pick the choice whose sentence embedding is
//!    closest to the answer
//! 3. The picked choice is compared to the ground truth
//!
//! A batch pipeline joins the image listing, the question file, and either a
//! recorded answer file or a live VQA backend, and writes a scored table plus
//! a failure table. Individual pairs may fail; the run never does.
//!
//! # Quick Start
//!
//! ```no_run
//! use vqa_grader::{
//!     collector::RecordedAnswers,
//!     dataset::{load_images, load_questions, load_raw_answers},
//!     embedding::Embedder,
//!     pipeline::{EvaluationPipeline, PipelineConfig},
//!     records::ScoreMode,
//!     resolver::ChoiceResolver,
//! };
//! use std::path::Path;
//!
//! # async fn run(embedder: &dyn Embedder) -> vqa_grader::Result<()> {
//! let images = load_images(Path::new("HalluVisionFull/HalluVisionAll.csv"))?;
//! let questions = load_questions(Path::new("HalluVisionAllFinal/Q_TIFA_final.csv"), '|')?;
//! let answers = load_raw_answers(Path::new("output_csvs/a_fuyu_tifa.csv"))?;
//!
//! let pipeline = EvaluationPipeline::new(PipelineConfig {
//!     mode: ScoreMode::from_score("tifa"),
//!     ..Default::default()
//! });
//! let resolver = ChoiceResolver::new(embedder);
//! let results = pipeline
//!     .score(&images.records, &questions, &RecordedAnswers::new(&answers), &resolver)
//!     .await?;
//! results.summary.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Embedder**: sentence encoder seam (`SbertModel` with the `sbert` feature)
//! - **ChoiceResolver**: yes/no short-circuit or similarity ranking
//! - **grader**: case-insensitive trimmed comparison, re-grading
//! - **VqaModel / LiveCollector**: live answers from a vision-language model
//! - **EvaluationPipeline**: partial-failure tolerant batch run

pub mod collector;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod grader;
pub mod pipeline;
pub mod records;
pub mod resolver;
pub mod vqa;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use collector::{AnswerSource, LiveCollector, RecordedAnswers};
pub use config::Config;
pub use embedding::{Embedder, rank_by_similarity};
pub use error::{GraderError, Result};
pub use grader::grade;
pub use pipeline::{EvaluationPipeline, PipelineConfig, RunResults, RunSummary};
pub use records::{
    FailureRecord, ImageRecord, QuestionRecord, RawAnswerRecord, ScoreMode, ScoredAnswerRecord,
};
pub use resolver::{ChoiceResolver, NegativePolicy, Resolution};
pub use vqa::{VqaClient, VqaModel};
