//! Batch scoring CLI: resolves free-form answers onto choices and grades them.
//!
//! Usage:
//!   vqa-score --model fuyu --score tifa          # Score recorded answers
//!   vqa-score --score dsg --live                 # Ask the VQA backend and score
//!
//! Options:
//!   --start-index <N> / --end-index <N>          # Process a slice of the images
//!   --legacy-no-scoring                          # Grade every "no" as incorrect
//!   --output <path>                              # Save the run summary as JSON
//!   --verbose                                    # Verbose output

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use vqa_grader::{
    collector::{LiveCollector, RecordedAnswers},
    config::{Config, failure_file, scored_file, sliced_output},
    dataset::{
        FAILURE_HEADER, RAW_ANSWER_HEADER, SCORED_HEADER, load_images, load_questions,
        load_raw_answers, write_table,
    },
    embedding::SbertModel,
    pipeline::{EvaluationPipeline, PipelineConfig, RunResults},
    records::ScoreMode,
    resolver::{ChoiceResolver, NegativePolicy},
    vqa::VqaClient,
};

#[derive(Parser)]
#[command(name = "vqa-score")]
#[command(about = "Grade free-form VQA answers against multiple-choice ground truth", long_about = None)]
struct Cli {
    /// Question set (dsg grades every question as yes/no)
    #[arg(short, long)]
    score: String,

    /// Model whose answers are scored (defaults to the configured VQA model)
    #[arg(short, long)]
    model: Option<String>,

    /// Ask the VQA backend instead of reading recorded answers
    #[arg(long)]
    live: bool,

    /// Question file (defaults to <questions_dir>/Q_<SCORE>_final.csv)
    #[arg(short, long)]
    questions: Option<PathBuf>,

    /// Raw answer file (defaults to <answers_dir>/a_<model>_<score>.csv)
    #[arg(short, long)]
    answers: Option<PathBuf>,

    /// Image listing CSV
    #[arg(long)]
    images_csv: Option<PathBuf>,

    /// Directory containing the image files (live mode)
    #[arg(short = 'b', long)]
    images_root: Option<PathBuf>,

    /// Scored table to write (defaults to <answers>_mc.csv)
    #[arg(long)]
    scored: Option<PathBuf>,

    /// First image to process (0-based)
    #[arg(long, default_value_t = 0)]
    start_index: usize,

    /// Image index to stop before
    #[arg(long)]
    end_index: Option<usize>,

    /// Grade every "no" on the yes/no path as incorrect
    #[arg(long)]
    legacy_no_scoring: bool,

    /// Save the run summary to a JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    if cli.live {
        config.validate_vqa().context("Invalid configuration")?;
    }

    let datasets = &config.datasets;
    let model = cli.model.clone().unwrap_or_else(|| config.vqa.model.clone());
    let mode = ScoreMode::from_score(&cli.score);
    let questions_path = cli
        .questions
        .clone()
        .unwrap_or_else(|| datasets.question_file(&cli.score));
    let answers_path = cli
        .answers
        .clone()
        .unwrap_or_else(|| datasets.answer_file(&model, &cli.score));
    let images_csv = cli
        .images_csv
        .clone()
        .unwrap_or_else(|| datasets.images_csv.clone());
    let scored_path = sliced_output(
        &cli.scored.clone().unwrap_or_else(|| scored_file(&answers_path)),
        cli.start_index,
        cli.end_index,
    );

    println!("Score: {} ({})", cli.score, mode);
    println!("Model: {}", model);
    println!("Embedding model: {}", config.embedding.model_id);

    // Without the encoder nothing can be graded; fail before touching any pair.
    let embedder = SbertModel::load(&config.embedding).context("Failed to load embedding model")?;
    let policy = if cli.legacy_no_scoring {
        NegativePolicy::AlwaysIncorrect
    } else {
        config.pipeline.negative_policy
    };
    let resolver = ChoiceResolver::new(&embedder).with_negative_policy(policy);

    println!("Loading questions from {:?}...", questions_path);
    let questions = load_questions(&questions_path, datasets.choice_delimiter)
        .context("Failed to load questions")?;
    let images = load_images(&images_csv).context("Failed to load image listing")?;
    println!(
        "Dataset: {} images, {} questions",
        images.records.len(),
        questions.len()
    );

    let pipeline = EvaluationPipeline::new(PipelineConfig {
        mode,
        pair_timeout: config.pipeline.pair_timeout(),
        start_index: cli.start_index,
        end_index: cli.end_index,
    });

    let mut results: RunResults = if cli.live {
        let images_root = cli
            .images_root
            .clone()
            .unwrap_or_else(|| datasets.images_root.clone());
        let collector = LiveCollector::new(VqaClient::new(config.vqa.clone()), images_root);
        let results = pipeline
            .score(&images.records, &questions, &collector, &resolver)
            .await
            .context("Scoring run aborted")?;

        let raw_path = sliced_output(&answers_path, cli.start_index, cli.end_index);
        write_table(&raw_path, &results.answers, RAW_ANSWER_HEADER)
            .context("Failed to write answers")?;
        println!("Answers saved to {:?}", raw_path);
        results
    } else {
        if !answers_path.exists() {
            bail!("Answer file {:?} does not exist", answers_path);
        }
        println!("Loading answers from {:?}...", answers_path);
        let answers = load_raw_answers(&answers_path).context("Failed to load answers")?;
        if answers.duplicates > 0 {
            warn!(
                "{} duplicate answers in {:?}; kept the first of each",
                answers.duplicates, answers_path
            );
        }
        let mut results = pipeline
            .score(
                &images.records,
                &questions,
                &RecordedAnswers::new(&answers),
                &resolver,
            )
            .await
            .context("Scoring run aborted")?;
        results.failures.extend(answers.rejected.iter().cloned());
        results
    };

    results.failures.extend(images.rejected);
    results.summary.failures = results.failures.len();

    write_table(&scored_path, &results.scored, SCORED_HEADER)
        .context("Failed to write scored table")?;
    let failures_path = failure_file(&scored_path);
    write_table(&failures_path, &results.failures, FAILURE_HEADER)
        .context("Failed to write failures")?;

    results.summary.print_summary();
    println!("Scored table saved to {:?}", scored_path);
    println!("Failures saved to {:?}", failures_path);

    if let Some(output_path) = cli.output {
        let json = serde_json::to_string_pretty(&results.summary)?;
        std::fs::write(&output_path, json)?;
        println!("Summary saved to {:?}", output_path);
    }

    Ok(())
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
