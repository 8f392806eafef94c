//! Record types flowing through a grading run.
//!
//! Field names on the wire follow the benchmark's CSV headers (`id`,
//! `question_id`, `vqa_answer`, ...); the Rust field names describe what
//! the value is.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Grading mode for the choice resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Davidsonian scene graph questions: every question is yes/no.
    Dsg,
    /// Any other question set; multi-choice when there are 3+ choices.
    Other,
}

impl ScoreMode {
    /// Derive the mode from a score name such as `dsg` or `tifa`.
    pub fn from_score(score: &str) -> Self {
        if score.trim().eq_ignore_ascii_case("dsg") {
            ScoreMode::Dsg
        } else {
            ScoreMode::Other
        }
    }
}

impl fmt::Display for ScoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreMode::Dsg => write!(f, "DSG"),
            ScoreMode::Other => write!(f, "OTHER"),
        }
    }
}

/// A benchmark question attached to one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub image_id: String,
    pub question_id: String,
    pub question_text: String,
    /// Non-empty, unique, in dataset order.
    pub choices: Vec<String>,
    pub correct_answer: String,
}

/// An image entry from the image dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub image_id: String,
    /// Path as listed in the dataset, relative to the image root.
    pub file_path: PathBuf,
}

/// A free-form answer produced by a VQA model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnswerRecord {
    #[serde(rename = "id")]
    pub image_id: String,
    /// Redundant image file name, kept as a join aid when present.
    #[serde(default)]
    pub image: Option<String>,
    pub question_id: String,
    #[serde(rename = "vqa_answer")]
    pub free_form_answer: String,
}

/// One graded answer in the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredAnswerRecord {
    #[serde(rename = "id")]
    pub image_id: String,
    pub question_id: String,
    #[serde(rename = "vqa_answer")]
    pub free_form_answer: String,
    #[serde(rename = "mc_answer")]
    pub resolved_choice: String,
    #[serde(
        rename = "correct",
        serialize_with = "serialize_flag",
        deserialize_with = "deserialize_flag"
    )]
    pub is_correct: bool,
}

/// An image or row that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(rename = "id")]
    pub image_id: String,
    pub file_name: String,
    pub reason: String,
}

/// A pair that was skipped because a required record was absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPair {
    pub image_id: String,
    pub question_id: String,
    pub reason: String,
}

fn serialize_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected 0 or 1 in correct column, got '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_mode_from_score() {
        assert_eq!(ScoreMode::from_score("dsg"), ScoreMode::Dsg);
        assert_eq!(ScoreMode::from_score(" DSG "), ScoreMode::Dsg);
        assert_eq!(ScoreMode::from_score("tifa"), ScoreMode::Other);
    }

    #[test]
    fn test_scored_record_writes_flag_as_digit() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .serialize(ScoredAnswerRecord {
                image_id: "42".into(),
                question_id: "1".into(),
                free_form_answer: "a red car".into(),
                resolved_choice: "red".into(),
                is_correct: true,
            })
            .unwrap();
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(
            out,
            "id,question_id,vqa_answer,mc_answer,correct\n42,1,a red car,red,1\n"
        );
    }

    #[test]
    fn test_scored_record_reads_bool_spellings() {
        let data = "id,question_id,vqa_answer,mc_answer,correct\n1,1,x,y,0\n1,2,x,y,true\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<ScoredAnswerRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert!(!rows[0].is_correct);
        assert!(rows[1].is_correct);
    }
}
