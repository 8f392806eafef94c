//! VQA Grader CLI
//!
//! Collects free-form answers from a vision-language model and re-grades
//! scored tables. Scoring with sentence embeddings lives in `vqa-score`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vqa_grader::{
    collector::LiveCollector,
    config::{Config, failure_file, sliced_output},
    dataset::{
        FAILURE_HEADER, RAW_ANSWER_HEADER, SCORED_HEADER, load_images, load_questions, load_table,
        write_table,
    },
    grader::{accuracy, regrade},
    pipeline::{EvaluationPipeline, PipelineConfig},
    records::{ScoreMode, ScoredAnswerRecord},
    resolver::NegativePolicy,
    vqa::VqaClient,
};

/// VQA Grader - collect and grade vision-language model answers
#[derive(Parser)]
#[command(name = "vqa-grader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the VQA backend every benchmark question and save the answers
    Collect {
        /// Question set to answer (e.g. dsg, tifa)
        #[arg(short, long)]
        score: String,

        /// Name used in the output file (defaults to the configured VQA model)
        #[arg(short, long)]
        model: Option<String>,

        /// Question file (defaults to <questions_dir>/Q_<SCORE>_final.csv)
        #[arg(short, long)]
        questions: Option<PathBuf>,

        /// Image listing CSV
        #[arg(long)]
        images_csv: Option<PathBuf>,

        /// Directory containing the image files
        #[arg(short = 'b', long)]
        images_root: Option<PathBuf>,

        /// Output answer file (defaults to <answers_dir>/a_<model>_<score>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// First image to process (0-based)
        #[arg(long, default_value_t = 0)]
        start_index: usize,

        /// Image index to stop before
        #[arg(long)]
        end_index: Option<usize>,
    },

    /// Recompute the correct column of a scored table
    Regrade {
        /// Scored table (`*_mc.csv`)
        scored: PathBuf,

        /// Question set the table was scored against
        #[arg(short, long)]
        score: String,

        /// Question file (defaults to <questions_dir>/Q_<SCORE>_final.csv)
        #[arg(short, long)]
        questions: Option<PathBuf>,

        /// Where to write the re-graded table (defaults to overwriting input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Grade every "no" on the yes/no path as incorrect
        #[arg(long)]
        legacy_no_scoring: bool,
    },

    /// Test VQA backend connection
    Test,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Collect {
            score,
            model,
            questions,
            images_csv,
            images_root,
            output,
            start_index,
            end_index,
        } => {
            cmd_collect(
                score,
                model,
                questions,
                images_csv,
                images_root,
                output,
                start_index,
                end_index,
            )
            .await
        }
        Commands::Regrade {
            scored,
            score,
            questions,
            output,
            legacy_no_scoring,
        } => cmd_regrade(scored, score, questions, output, legacy_no_scoring),
        Commands::Test => cmd_test().await,
        Commands::Config => cmd_config(),
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[allow(clippy::too_many_arguments)]
async fn cmd_collect(
    score: String,
    model: Option<String>,
    questions_path: Option<PathBuf>,
    images_csv: Option<PathBuf>,
    images_root: Option<PathBuf>,
    output: Option<PathBuf>,
    start_index: usize,
    end_index: Option<usize>,
) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate_vqa().context("Invalid configuration")?;

    let datasets = &config.datasets;
    let model = model.unwrap_or_else(|| config.vqa.model.clone());
    let questions_path = questions_path.unwrap_or_else(|| datasets.question_file(&score));
    let images_csv = images_csv.unwrap_or_else(|| datasets.images_csv.clone());
    let images_root = images_root.unwrap_or_else(|| datasets.images_root.clone());
    let output = output.unwrap_or_else(|| datasets.answer_file(&model, &score));
    let output = sliced_output(&output, start_index, end_index);

    println!("Collecting answers from: {}", config.vqa.model);
    println!("  Questions: {}", questions_path.display());
    println!("  Images:    {}", images_root.display());

    let questions = load_questions(&questions_path, datasets.choice_delimiter)
        .context("Failed to load questions")?;
    let images = load_images(&images_csv).context("Failed to load image listing")?;

    let collector = LiveCollector::new(VqaClient::new(config.vqa.clone()), images_root);
    let pipeline = EvaluationPipeline::new(PipelineConfig {
        mode: ScoreMode::from_score(&score),
        pair_timeout: config.pipeline.pair_timeout(),
        start_index,
        end_index,
    });

    let mut results = pipeline
        .collect(&images.records, &questions, &collector)
        .await
        .context("Collection run aborted")?;
    results.failures.extend(images.rejected);
    results.summary.failures = results.failures.len();

    write_table(&output, &results.answers, RAW_ANSWER_HEADER)
        .context("Failed to write answers")?;
    let failures_path = failure_file(&output);
    write_table(&failures_path, &results.failures, FAILURE_HEADER)
        .context("Failed to write failures")?;

    results.summary.print_summary();
    println!("Answers saved to:  {}", output.display());
    println!("Failures saved to: {}", failures_path.display());

    Ok(())
}

fn cmd_regrade(
    scored_path: PathBuf,
    score: String,
    questions_path: Option<PathBuf>,
    output: Option<PathBuf>,
    legacy_no_scoring: bool,
) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let policy = if legacy_no_scoring {
        NegativePolicy::AlwaysIncorrect
    } else {
        config.pipeline.negative_policy
    };
    let questions_path =
        questions_path.unwrap_or_else(|| config.datasets.question_file(&score));

    let questions = load_questions(&questions_path, config.datasets.choice_delimiter)
        .context("Failed to load questions")?;
    let scored: Vec<ScoredAnswerRecord> =
        load_table(&scored_path).context("Failed to load scored table")?;

    let before = accuracy(&scored);
    let report = regrade(&scored, &questions, ScoreMode::from_score(&score), policy);
    let after = accuracy(&report.records);

    let output = output.unwrap_or(scored_path);
    write_table(&output, &report.records, SCORED_HEADER)
        .context("Failed to write re-graded table")?;

    println!("Re-graded {} records", report.records.len());
    println!("  Changed verdicts:  {}", report.changed);
    println!("  Missing questions: {}", report.missing.len());
    println!("  Accuracy:          {:.1}% -> {:.1}%", before * 100.0, after * 100.0);
    println!("Saved to: {}", output.display());

    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing VQA connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:  {}", config.vqa.api_base);
    println!("  Model:     {}", config.vqa.model);
    println!();

    if let Err(e) = config.validate_vqa() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = VqaClient::new(config.vqa);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}

fn cmd_config() -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if !config.vqa.api_key.is_empty() {
        let shown: String = config.vqa.api_key.chars().take(4).collect();
        config.vqa.api_key = format!("{}...", shown);
    }

    if let Some(path) = Config::config_file_path() {
        println!("# Config file: {}", path.display());
    }
    print!(
        "{}",
        serde_yaml::to_string(&config).context("Failed to serialize configuration")?
    );

    Ok(())
}
