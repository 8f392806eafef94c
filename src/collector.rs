//! Where the pipeline gets free-form answers from.
//!
//! Post-hoc scoring reads answers recorded by an earlier collection run
//! ([`RecordedAnswers`]); live runs ask a VQA model per pair
//! ([`LiveCollector`]).

use crate::dataset::{AnswerSet, QuestionSet, normalize_id};
use crate::error::{GraderError, Result};
use crate::records::{ImageRecord, QuestionRecord, SkippedPair};
use crate::vqa::VqaModel;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplies the free-form answer for an (image, question) pair.
#[allow(async_fn_in_trait)]
pub trait AnswerSource {
    /// Short label used in logs and summaries.
    fn label(&self) -> &'static str;

    /// Answer for one pair.
    ///
    /// Errors are per-pair: the pipeline records them and continues.
    async fn answer(&self, image: &ImageRecord, question: &QuestionRecord) -> Result<String>;

    /// Answers this source holds that cannot be joined with a question and
    /// an image from `images`.
    fn unmatched(&self, _questions: &QuestionSet, _images: &[ImageRecord]) -> Vec<SkippedPair> {
        Vec::new()
    }
}

/// Answers loaded from a raw answer file.
pub struct RecordedAnswers<'a> {
    answers: &'a AnswerSet,
}

impl<'a> RecordedAnswers<'a> {
    pub fn new(answers: &'a AnswerSet) -> Self {
        Self { answers }
    }
}

impl AnswerSource for RecordedAnswers<'_> {
    fn label(&self) -> &'static str {
        "recorded"
    }

    async fn answer(&self, image: &ImageRecord, question: &QuestionRecord) -> Result<String> {
        self.answers
            .get(&image.image_id, &question.question_id)
            .map(|a| a.free_form_answer.clone())
            .ok_or_else(|| GraderError::InputMissing {
                what: "raw answer",
                image_id: image.image_id.clone(),
                question_id: question.question_id.clone(),
            })
    }

    fn unmatched(&self, questions: &QuestionSet, images: &[ImageRecord]) -> Vec<SkippedPair> {
        let listed: HashSet<String> = images.iter().map(|i| normalize_id(&i.image_id)).collect();
        self.answers
            .keys()
            .filter_map(|key| {
                let reason = if !questions.contains(key) {
                    "answer has no matching question"
                } else if !listed.contains(&key.0) {
                    "answer has no matching image"
                } else {
                    return None;
                };
                Some(SkippedPair {
                    image_id: key.0.clone(),
                    question_id: key.1.clone(),
                    reason: reason.to_string(),
                })
            })
            .collect()
    }
}

/// Collects answers live from a VQA model.
pub struct LiveCollector<V> {
    model: V,
    images_root: PathBuf,
}

impl<V: VqaModel> LiveCollector<V> {
    pub fn new(model: V, images_root: impl Into<PathBuf>) -> Self {
        Self {
            model,
            images_root: images_root.into(),
        }
    }

    /// Ask the model `question_text` about the image at `image_path`.
    ///
    /// A missing file surfaces as [`GraderError::ImageNotFound`].
    pub async fn collect(&self, question_text: &str, image_path: &Path) -> Result<String> {
        debug!("Asking {:?}: {}", image_path, question_text);
        self.model.run_vqa(question_text, image_path).await
    }

    /// Full path of an image record under the image root.
    pub fn image_path(&self, image: &ImageRecord) -> PathBuf {
        self.images_root.join(&image.file_path)
    }
}

impl<V: VqaModel> AnswerSource for LiveCollector<V> {
    fn label(&self) -> &'static str {
        "live"
    }

    async fn answer(&self, image: &ImageRecord, question: &QuestionRecord) -> Result<String> {
        let path = self.image_path(image);
        self.collect(&question.question_text, &path).await
    }
}
