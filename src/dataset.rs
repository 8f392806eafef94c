//! Dataset loading and writing.
//!
//! Three CSV inputs feed a run:
//! - question files (`id, question_id, question, choices, answer`)
//! - the image listing (`id, ..., file_name, ...`)
//! - raw answer files (`id, [image,] question_id, vqa_answer`)
//!
//! Each is indexed once at load time so the pipeline joins by key instead of
//! scanning rows.

use crate::error::{GraderError, Result};
use crate::records::{FailureRecord, ImageRecord, QuestionRecord, RawAnswerRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Composite join key `(image_id, question_id)`.
///
/// Both halves are in [`normalize_id`] form.
pub type PairKey = (String, String);

/// Canonical form of a dataset id.
///
/// Numeric ids lose their leading zeros so `"042"` and `"42"` join; any
/// other id is only trimmed.
pub fn normalize_id(raw: &str) -> String {
    let id = raw.trim();
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        let digits = id.trim_start_matches('0');
        if digits.is_empty() {
            "0".to_string()
        } else {
            digits.to_string()
        }
    } else {
        id.to_string()
    }
}

fn pair_key(image_id: &str, question_id: &str) -> PairKey {
    (normalize_id(image_id), normalize_id(question_id))
}

/// Records parsed from a file plus the rows that were rejected.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub rejected: Vec<FailureRecord>,
}

#[derive(Debug, Deserialize)]
struct QuestionRow {
    id: String,
    question_id: String,
    question: String,
    choices: String,
    answer: String,
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    id: String,
    file_name: String,
}

/// Split a delimiter-joined choices field.
///
/// Choices are trimmed, blanks dropped, and duplicates removed keeping the
/// first occurrence. A field with no usable choice is an error.
pub fn parse_choices(raw: &str, delimiter: char) -> std::result::Result<Vec<String>, String> {
    let mut choices: Vec<String> = Vec::new();
    for choice in raw.split(delimiter).map(str::trim).filter(|c| !c.is_empty()) {
        if choices.iter().any(|c| c == choice) {
            debug!("Dropping duplicate choice '{}'", choice);
            continue;
        }
        choices.push(choice.to_string());
    }

    if choices.is_empty() {
        return Err(format!("choices field '{}' has no usable choice", raw));
    }
    Ok(choices)
}

/// Read every row of a CSV file, keeping rows that fail to deserialize as
/// rejections instead of aborting.
fn read_rows<R, T, F>(path: &Path, kind: &str, mut convert: F) -> Result<Loaded<T>>
where
    R: DeserializeOwned,
    F: FnMut(R) -> std::result::Result<T, String>,
{
    let file = File::open(path).map_err(|e| GraderError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);
    let headers = reader.headers()?.clone();
    let id_column = headers.iter().position(|h| h == "id");

    let mut loaded = Loaded {
        records: Vec::new(),
        rejected: Vec::new(),
    };

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx as u64 + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable {} row {}: {}", kind, line, e);
                loaded.rejected.push(FailureRecord {
                    image_id: String::new(),
                    file_name: String::new(),
                    reason: format!("malformed {} row {}: {}", kind, line, e),
                });
                continue;
            }
        };

        let parsed = record
            .deserialize::<R>(Some(&headers))
            .map_err(|e| e.to_string())
            .and_then(&mut convert);

        match parsed {
            Ok(value) => loaded.records.push(value),
            Err(reason) => {
                let image_id = id_column
                    .and_then(|col| record.get(col))
                    .unwrap_or_default()
                    .to_string();
                warn!("Skipping malformed {} row {}: {}", kind, line, reason);
                loaded.rejected.push(FailureRecord {
                    image_id,
                    file_name: String::new(),
                    reason: format!("malformed {} row {}: {}", kind, line, reason),
                });
            }
        }
    }

    Ok(loaded)
}

/// Questions indexed by image and by composite key.
#[derive(Debug, Clone, Default)]
pub struct QuestionSet {
    questions: Vec<QuestionRecord>,
    by_key: HashMap<PairKey, usize>,
    by_image: HashMap<String, Vec<usize>>,
    /// Rows that could not become a valid question.
    pub rejected: Vec<FailureRecord>,
}

impl QuestionSet {
    /// Build the indexes from already-parsed questions.
    ///
    /// A repeated `(image_id, question_id)` keeps the first question.
    pub fn new(questions: Vec<QuestionRecord>) -> Self {
        let mut set = Self::default();
        for question in questions {
            let key = pair_key(&question.image_id, &question.question_id);
            if set.by_key.contains_key(&key) {
                warn!(
                    "Duplicate question {} for image {}; keeping the first",
                    key.1, key.0
                );
                continue;
            }
            let idx = set.questions.len();
            set.by_key.insert(key.clone(), idx);
            set.by_image
                .entry(key.0.clone())
                .or_default()
                .push(idx);
            set.questions.push(question);
        }
        set
    }

    /// Questions for one image, in dataset order.
    pub fn for_image<'a>(&'a self, image_id: &str) -> impl Iterator<Item = &'a QuestionRecord> + 'a {
        self.by_image
            .get(&normalize_id(image_id))
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&idx| &self.questions[idx])
    }

    /// Look up a question by composite key.
    pub fn get(&self, image_id: &str, question_id: &str) -> Option<&QuestionRecord> {
        self.by_key
            .get(&pair_key(image_id, question_id))
            .map(|&idx| &self.questions[idx])
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Load a question file.
pub fn load_questions(path: &Path, delimiter: char) -> Result<QuestionSet> {
    let loaded = read_rows(path, "question", |row: QuestionRow| {
        let choices = parse_choices(&row.choices, delimiter)?;
        Ok(QuestionRecord {
            image_id: normalize_id(&row.id),
            question_id: normalize_id(&row.question_id),
            question_text: row.question,
            choices,
            correct_answer: row.answer,
        })
    })?;

    let mut set = QuestionSet::new(loaded.records);
    set.rejected = loaded.rejected;
    info!(
        "Loaded {} questions from {:?} ({} rejected)",
        set.len(),
        path,
        set.rejected.len()
    );
    Ok(set)
}

/// Load the image listing.
pub fn load_images(path: &Path) -> Result<Loaded<ImageRecord>> {
    let loaded = read_rows(path, "image", |row: ImageRow| {
        if row.file_name.is_empty() {
            return Err("empty file_name".to_string());
        }
        Ok(ImageRecord {
            image_id: normalize_id(&row.id),
            file_path: PathBuf::from(row.file_name),
        })
    })?;
    info!("Loaded {} images from {:?}", loaded.records.len(), path);
    Ok(loaded)
}

/// Raw answers indexed by composite key.
#[derive(Debug, Clone, Default)]
pub struct AnswerSet {
    by_key: HashMap<PairKey, RawAnswerRecord>,
    order: Vec<PairKey>,
    /// Number of repeated keys that were dropped.
    pub duplicates: usize,
    pub rejected: Vec<FailureRecord>,
}

impl AnswerSet {
    /// Index answers; the first answer for a key wins.
    pub fn new(answers: Vec<RawAnswerRecord>) -> Self {
        let mut set = Self::default();
        for answer in answers {
            let key = pair_key(&answer.image_id, &answer.question_id);
            if set.by_key.contains_key(&key) {
                warn!(
                    "Duplicate answer for image {}, question {}; keeping the first",
                    key.0, key.1
                );
                set.duplicates += 1;
                continue;
            }
            set.order.push(key.clone());
            set.by_key.insert(key, answer);
        }
        set
    }

    pub fn get(&self, image_id: &str, question_id: &str) -> Option<&RawAnswerRecord> {
        self.by_key.get(&pair_key(image_id, question_id))
    }

    /// Keys in file order.
    pub fn keys(&self) -> impl Iterator<Item = &PairKey> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Load a raw answer file.
pub fn load_raw_answers(path: &Path) -> Result<AnswerSet> {
    let loaded = read_rows(path, "answer", |mut row: RawAnswerRecord| {
        row.image_id = normalize_id(&row.image_id);
        row.question_id = normalize_id(&row.question_id);
        Ok(row)
    })?;
    let mut set = AnswerSet::new(loaded.records);
    set.rejected = loaded.rejected;
    info!(
        "Loaded {} answers from {:?} ({} duplicates dropped)",
        set.len(),
        path,
        set.duplicates
    );
    Ok(set)
}

/// Load every row of a CSV file into `T`, failing on the first bad row.
pub fn load_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| GraderError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Write records as a CSV table with a header row.
pub fn write_table<T: Serialize>(path: &Path, records: &[T], header: &[&str]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| GraderError::io(parent, e))?;
        }
    }

    let file = File::create(path).map_err(|e| GraderError::io(path, e))?;
    // Header is written explicitly so empty tables still carry one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.write_record(header)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(|e| GraderError::io(path, e))?;
    Ok(())
}

/// Header of the scored output table.
pub const SCORED_HEADER: &[&str] = &["id", "question_id", "vqa_answer", "mc_answer", "correct"];
/// Header of the failure table.
pub const FAILURE_HEADER: &[&str] = &["id", "file_name", "reason"];
/// Header of the raw answer table written by the collector.
pub const RAW_ANSWER_HEADER: &[&str] = &["id", "image", "question_id", "vqa_answer"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ScoredAnswerRecord;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_choices() {
        assert_eq!(
            parse_choices("red| blue |green", '|').unwrap(),
            vec!["red", "blue", "green"]
        );
        assert_eq!(parse_choices("yes|no|yes", '|').unwrap(), vec!["yes", "no"]);
        assert_eq!(parse_choices("single", '|').unwrap(), vec!["single"]);
        assert!(parse_choices("", '|').is_err());
        assert!(parse_choices(" | ", '|').is_err());
    }

    #[test]
    fn test_load_questions_rejects_empty_choices() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "q.csv",
            "id,prompt,question_id,question,choices,answer\n\
             42,a cat,1,Is there a cat?,yes|no,yes\n\
             42,a cat,2,What color?,red|blue|green,blue\n\
             43,a dog,1,Is there a dog?,,yes\n",
        );

        let set = load_questions(&path, '|').unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.rejected.len(), 1);
        assert_eq!(set.rejected[0].image_id, "43");
        assert!(set.rejected[0].reason.contains("row 4"));

        let ids: Vec<_> = set.for_image("42").map(|q| q.question_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(set.get("42", "2").unwrap().choices.len(), 3);
        assert_eq!(set.for_image("43").count(), 0);
    }

    #[test]
    fn test_load_images_ignores_extra_columns() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "images.csv",
            "id,prompt,file_name,source\n1,a cat,cat.png,sd\n2,a dog,dog.jpg,dalle\n",
        );
        let loaded = load_images(&path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].file_path, PathBuf::from("dog.jpg"));
        assert!(loaded.rejected.is_empty());
    }

    #[test]
    fn test_load_raw_answers_first_duplicate_wins() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "a.csv",
            "id,image,question_id,vqa_answer\n\
             1,cat.png,1,\"yes, a cat\"\n\
             1,cat.png,1,no\n\
             1,cat.png,2,blue\n",
        );
        let answers = load_raw_answers(&path).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers.duplicates, 1);
        assert_eq!(answers.get("1", "1").unwrap().free_form_answer, "yes, a cat");
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("042"), "42");
        assert_eq!(normalize_id(" 7 "), "7");
        assert_eq!(normalize_id("000"), "0");
        assert_eq!(normalize_id("img_01"), "img_01");
        assert_eq!(normalize_id(""), "");
    }

    #[test]
    fn test_zero_padded_ids_join() {
        let dir = TempDir::new().unwrap();
        let questions = write(
            &dir,
            "q.csv",
            "id,question_id,question,choices,answer\n42,1,Is there a cat?,yes|no,yes\n",
        );
        let answers = write(
            &dir,
            "a.csv",
            "id,question_id,vqa_answer\n042,01,yes\n",
        );

        let questions = load_questions(&questions, '|').unwrap();
        let answers = load_raw_answers(&answers).unwrap();
        let answer = answers.get("42", "1").unwrap();
        assert_eq!(answer.image_id, "42");
        assert!(questions.get("0042", "1").is_some());
        assert_eq!(questions.for_image("042").count(), 1);
    }

    #[test]
    fn test_load_raw_answers_without_image_column() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.csv", "id,question_id,vqa_answer\n7,3,green\n");
        let answers = load_raw_answers(&path).unwrap();
        let answer = answers.get("7", "3").unwrap();
        assert_eq!(answer.image, None);
        assert_eq!(answer.free_form_answer, "green");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_images(Path::new("/nonexistent/images.csv")).unwrap_err();
        assert!(matches!(err, GraderError::Io { .. }));
    }

    #[test]
    fn test_write_table_creates_parent_and_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out_mc.csv");
        let rows = vec![ScoredAnswerRecord {
            image_id: "1".into(),
            question_id: "2".into(),
            free_form_answer: "blue, I think".into(),
            resolved_choice: "blue".into(),
            is_correct: false,
        }];
        write_table(&path, &rows, SCORED_HEADER).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "id,question_id,vqa_answer,mc_answer,correct\n1,2,\"blue, I think\",blue,0\n"
        );

        let back: Vec<ScoredAnswerRecord> = load_table(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_write_empty_table_keeps_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fail.csv");
        write_table::<FailureRecord>(&path, &[], FAILURE_HEADER).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "id,file_name,reason\n");
    }
}
