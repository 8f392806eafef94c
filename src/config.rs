//! Configuration for the VQA grader.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{GraderError, Result};
use crate::resolver::NegativePolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the benchmark datasets live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Directory holding `Q_<SCORE>_final.csv` question files.
    pub questions_dir: PathBuf,
    /// Directory holding `a_<model>_<score>.csv` answer files.
    pub answers_dir: PathBuf,
    /// Image listing CSV (`id, ..., file_name, ...`).
    pub images_csv: PathBuf,
    /// Directory the image `file_name` column is relative to.
    pub images_root: PathBuf,
    /// Separator used inside the `choices` column.
    pub choice_delimiter: char,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            questions_dir: PathBuf::from("HalluVisionAllFinal"),
            answers_dir: PathBuf::from("output_csvs"),
            images_csv: PathBuf::from("HalluVisionFull/HalluVisionAll.csv"),
            images_root: PathBuf::from("HalluVisionFull/Final-HalluVision"),
            choice_delimiter: '|',
        }
    }
}

impl DatasetConfig {
    /// Question file for a score name, e.g. `Q_DSG_final.csv`.
    pub fn question_file(&self, score: &str) -> PathBuf {
        self.questions_dir
            .join(format!("Q_{}_final.csv", score.to_uppercase()))
    }

    /// Raw answer file for a model and score, e.g. `a_fuyu_dsg.csv`.
    pub fn answer_file(&self, model: &str, score: &str) -> PathBuf {
        self.answers_dir.join(format!("a_{}_{}.csv", model, score))
    }
}

/// Scored output path next to an answer file (`a_fuyu_dsg_mc.csv`).
pub fn scored_file(answer_file: &Path) -> PathBuf {
    with_suffix(answer_file, "_mc.csv")
}

/// Failure table path for an output file (`<output>.fail.csv`).
pub fn failure_file(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".fail.csv");
    PathBuf::from(name)
}

/// Output path for a sliced collection run: `<output>.<start>-<end>.csv`.
///
/// Unsliced runs keep the path as given.
pub fn sliced_output(output: &Path, start: usize, end: Option<usize>) -> PathBuf {
    if start == 0 && end.is_none() {
        return output.to_path_buf();
    }
    let end = end.map(|e| e.to_string()).unwrap_or_else(|| "end".to_string());
    let mut name = output.as_os_str().to_owned();
    name.push(format!(".{}-{}.csv", start, end));
    PathBuf::from(name)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", stem, suffix))
}

/// Sentence embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Hugging Face model id of a BERT-family sentence encoder.
    pub model_id: String,
    /// Token limit; longer inputs are truncated.
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
}

fn default_max_seq_len() -> usize {
    512
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            max_seq_len: default_max_seq_len(),
        }
    }
}

/// VQA backend configuration (OpenAI-compatible vision endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VqaConfig {
    /// Base URL for the API (e.g., "http://localhost:8000")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Vision-language model name (e.g., "mplug-owl2")
    pub model: String,

    /// Maximum tokens for the answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.0
}

impl Default for VqaConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "mplug-owl2-llama2-7b".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Batch pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Per-pair limit for answer collection; 0 disables it.
    pub pair_timeout_secs: u64,
    /// How a `"no"` resolution on the yes/no path is graded.
    pub negative_policy: NegativePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pair_timeout_secs: 120,
            negative_policy: NegativePolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn pair_timeout(&self) -> Option<Duration> {
        (self.pair_timeout_secs > 0).then(|| Duration::from_secs(self.pair_timeout_secs))
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub datasets: DatasetConfig,
    pub embedding: EmbeddingConfig,
    pub vqa: VqaConfig,
    pub pipeline: PipelineSettings,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    datasets: Option<DatasetFileSection>,
    embedding: Option<EmbeddingFileSection>,
    vqa: Option<VqaFileSection>,
    pipeline: Option<PipelineFileSection>,
}

#[derive(Debug, Deserialize)]
struct DatasetFileSection {
    questions_dir: Option<PathBuf>,
    answers_dir: Option<PathBuf>,
    images_csv: Option<PathBuf>,
    images_root: Option<PathBuf>,
    choice_delimiter: Option<char>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingFileSection {
    model_id: Option<String>,
    max_seq_len: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct VqaFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct PipelineFileSection {
    pair_timeout_secs: Option<u64>,
    negative_policy: Option<NegativePolicy>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (VQA_API_BASE, VQA_API_KEY, VQA_MODEL, ...)
    /// 2. Config file (~/.config/vqa-grader/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("VQA_API_BASE") {
            self.vqa.api_base = api_base;
        }

        if let Ok(api_key) = env::var("VQA_API_KEY") {
            self.vqa.api_key = api_key;
        }

        if let Ok(model) = env::var("VQA_MODEL") {
            self.vqa.model = model;
        }

        if let Ok(max_tokens) = env::var("VQA_MAX_TOKENS") {
            if let Ok(tokens) = max_tokens.parse() {
                self.vqa.max_tokens = tokens;
            }
        }

        if let Ok(temperature) = env::var("VQA_TEMPERATURE") {
            if let Ok(temp) = temperature.parse() {
                self.vqa.temperature = temp;
            }
        }

        if let Ok(model_id) = env::var("EMBEDDING_MODEL") {
            self.embedding.model_id = model_id;
        }

        if let Ok(timeout) = env::var("VQA_PAIR_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.pipeline.pair_timeout_secs = secs;
            }
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GraderError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML document, filling unspecified values with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| GraderError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(ds) = file_config.datasets {
            if let Some(dir) = ds.questions_dir {
                config.datasets.questions_dir = dir;
            }
            if let Some(dir) = ds.answers_dir {
                config.datasets.answers_dir = dir;
            }
            if let Some(csv) = ds.images_csv {
                config.datasets.images_csv = csv;
            }
            if let Some(root) = ds.images_root {
                config.datasets.images_root = root;
            }
            if let Some(delim) = ds.choice_delimiter {
                config.datasets.choice_delimiter = delim;
            }
        }

        if let Some(emb) = file_config.embedding {
            if let Some(model_id) = emb.model_id {
                config.embedding.model_id = model_id;
            }
            if let Some(max_seq_len) = emb.max_seq_len {
                config.embedding.max_seq_len = max_seq_len;
            }
        }

        if let Some(vqa) = file_config.vqa {
            if let Some(api_base) = vqa.api_base {
                config.vqa.api_base = api_base;
            }
            if let Some(api_key) = vqa.api_key {
                config.vqa.api_key = api_key;
            }
            if let Some(model) = vqa.model {
                config.vqa.model = model;
            }
            if let Some(max_tokens) = vqa.max_tokens {
                config.vqa.max_tokens = max_tokens;
            }
            if let Some(temperature) = vqa.temperature {
                config.vqa.temperature = temperature;
            }
        }

        if let Some(pipeline) = file_config.pipeline {
            if let Some(secs) = pipeline.pair_timeout_secs {
                config.pipeline.pair_timeout_secs = secs;
            }
            if let Some(policy) = pipeline.negative_policy {
                config.pipeline.negative_policy = policy;
            }
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "vqa-grader")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate settings that every run needs.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.model_id.is_empty() {
            return Err(GraderError::Config(
                "Embedding model id is required. Set EMBEDDING_MODEL or add to config file."
                    .to_string(),
            ));
        }

        if self.embedding.max_seq_len == 0 {
            return Err(GraderError::Config(
                "embedding.max_seq_len must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate that the VQA backend settings are present (live modes only).
    pub fn validate_vqa(&self) -> Result<()> {
        if self.vqa.api_base.is_empty() {
            return Err(GraderError::Config(
                "VQA API base URL is required. Set VQA_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.vqa.model.is_empty() {
            return Err(GraderError::Config(
                "VQA model is required. Set VQA_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Create a config from explicit VQA values (useful for testing).
    pub fn with_vqa(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            vqa: VqaConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.vqa.api_base.is_empty());
        assert_eq!(config.vqa.max_tokens, 256);
        assert_eq!(config.datasets.choice_delimiter, '|');
        assert_eq!(config.pipeline.pair_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(
            config.pipeline.negative_policy,
            NegativePolicy::GradeAgainstAnswer
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_vqa_fails_without_api_base() {
        let config = Config::default();
        assert!(config.validate_vqa().is_err());
    }

    #[test]
    fn test_with_vqa() {
        let config = Config::with_vqa("http://localhost:8000", "key", "llava");
        assert_eq!(config.vqa.api_base, "http://localhost:8000");
        assert_eq!(config.vqa.model, "llava");
        assert!(config.validate_vqa().is_ok());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = r#"
datasets:
  questions_dir: data/questions
  choice_delimiter: ";"
pipeline:
  pair_timeout_secs: 0
  negative_policy: always_incorrect
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.datasets.questions_dir, PathBuf::from("data/questions"));
        assert_eq!(config.datasets.choice_delimiter, ';');
        assert_eq!(config.datasets.answers_dir, PathBuf::from("output_csvs"));
        assert_eq!(config.pipeline.pair_timeout(), None);
        assert_eq!(
            config.pipeline.negative_policy,
            NegativePolicy::AlwaysIncorrect
        );
    }

    #[test]
    fn test_dataset_paths() {
        let ds = DatasetConfig::default();
        assert_eq!(
            ds.question_file("dsg"),
            PathBuf::from("HalluVisionAllFinal/Q_DSG_final.csv")
        );
        let answers = ds.answer_file("fuyu", "dsg");
        assert_eq!(answers, PathBuf::from("output_csvs/a_fuyu_dsg.csv"));
        assert_eq!(
            scored_file(&answers),
            PathBuf::from("output_csvs/a_fuyu_dsg_mc.csv")
        );
        assert_eq!(
            failure_file(&answers),
            PathBuf::from("output_csvs/a_fuyu_dsg.csv.fail.csv")
        );
    }

    #[test]
    fn test_sliced_output() {
        let out = Path::new("out/a_mplug_tifa.csv");
        assert_eq!(sliced_output(out, 0, None), out.to_path_buf());
        assert_eq!(
            sliced_output(out, 10, Some(20)),
            PathBuf::from("out/a_mplug_tifa.csv.10-20.csv")
        );
        assert_eq!(
            sliced_output(out, 5, None),
            PathBuf::from("out/a_mplug_tifa.csv.5-end.csv")
        );
    }
}
