//! Test utilities shared by the unit tests.
//!
//! Deterministic stand-ins for the embedding and VQA backends plus record
//! builders. Only compiled when running tests.

use crate::embedding::{Embedder, l2_normalize};
use crate::error::{GraderError, Result};
use crate::records::{ImageRecord, QuestionRecord};
use crate::vqa::VqaModel;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bag-of-words embedder that counts its calls.
///
/// The vocabulary is built from the batch being embedded, so sentences that
/// share more words score higher. Sentences with no words embed to zero.
pub struct KeywordEmbedder {
    calls: Cell<usize>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: Cell::new(0),
        }
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.set(self.calls.get() + 1);

        let tokenized: Vec<Vec<String>> = sentences.iter().map(|s| tokens(s)).collect();
        let mut vocab: Vec<&str> = Vec::new();
        for word in tokenized.iter().flatten() {
            if !vocab.contains(&word.as_str()) {
                vocab.push(word);
            }
        }

        Ok(tokenized
            .iter()
            .map(|words| {
                let mut v = vec![0.0f32; vocab.len()];
                for word in words {
                    if let Some(idx) = vocab.iter().position(|w| *w == word.as_str()) {
                        v[idx] += 1.0;
                    }
                }
                l2_normalize(&mut v);
                v
            })
            .collect())
    }
}

/// Embedder whose every call fails.
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _sentences: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(GraderError::Embedding("encoder crashed".to_string()))
    }
}

/// VQA stub with canned answers.
///
/// Missing image files fail like a real backend; questions listed as slow
/// sleep long enough to trip any reasonable pair timeout.
pub struct ScriptedVqa {
    default_answer: String,
    answers: HashMap<String, String>,
    slow: HashSet<String>,
    calls: Cell<usize>,
}

impl ScriptedVqa {
    pub fn new(default_answer: &str) -> Self {
        Self {
            default_answer: default_answer.to_string(),
            answers: HashMap::new(),
            slow: HashSet::new(),
            calls: Cell::new(0),
        }
    }

    pub fn with_answer(mut self, question: &str, answer: &str) -> Self {
        self.answers.insert(question.to_string(), answer.to_string());
        self
    }

    pub fn with_slow_question(mut self, question: &str) -> Self {
        self.slow.insert(question.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl VqaModel for ScriptedVqa {
    type Image = PathBuf;

    async fn process_image(&self, image_path: &Path) -> Result<PathBuf> {
        if !image_path.is_file() {
            return Err(GraderError::ImageNotFound(image_path.to_path_buf()));
        }
        Ok(image_path.to_path_buf())
    }

    async fn generate(&self, question: &str, _image: &PathBuf) -> Result<String> {
        self.calls.set(self.calls.get() + 1);
        if self.slow.contains(question) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(self
            .answers
            .get(question)
            .cloned()
            .unwrap_or_else(|| self.default_answer.clone()))
    }
}

pub fn choices(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn question(image_id: &str, question_id: &str, options: &[&str], answer: &str) -> QuestionRecord {
    QuestionRecord {
        image_id: image_id.to_string(),
        question_id: question_id.to_string(),
        question_text: format!("question {} about image {}", question_id, image_id),
        choices: choices(options),
        correct_answer: answer.to_string(),
    }
}

pub fn image(image_id: &str, file_name: &str) -> ImageRecord {
    ImageRecord {
        image_id: image_id.to_string(),
        file_path: PathBuf::from(file_name),
    }
}
