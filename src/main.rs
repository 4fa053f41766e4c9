use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use gt_rank::config::AuditConfig;
use gt_rank::inputs::min_pred_prob;
use gt_rank::models::{ImageScoreEntry, ScoreReport};
use gt_rank::report::{JsonReporter, Reporter};
use gt_rank::{
    audit_dataset, compute_label_quality_scores_with_progress, issues_from_scores, Dataset,
    ScoringMethod, ScoringOptions,
};

#[derive(Parser)]
#[command(name = "gt-rank")]
#[command(author = "Artifactiq <hello@artifactiq.ai>")]
#[command(version)]
#[command(about = "Label quality scoring for object detection datasets")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct InputArgs {
    /// Annotations JSON: one {"bboxes", "labels"} record per image
    #[arg(value_name = "LABELS")]
    labels: PathBuf,

    /// Predictions JSON: one prediction per image, same order as LABELS
    #[arg(value_name = "PREDICTIONS")]
    predictions: PathBuf,
}

#[derive(clap::Args)]
struct ScoringArgs {
    /// YAML file with scoring tunables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drop predicted boxes below this probability before scoring
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Do not treat overlapping annotations of different classes as swaps
    #[arg(long)]
    no_overlap_check: bool,

    /// Number of images to sample (0 = all)
    #[arg(long, default_value = "0")]
    sample: usize,

    /// Random seed for sampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of parallel workers
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Output JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of worst images to print
    #[arg(long, default_value = "10")]
    top: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every image and rank them worst first
    Score {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        scoring: ScoringArgs,
    },

    /// Flag images with overlooked, badly located or swapped annotations
    Audit {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        scoring: ScoringArgs,

        /// Fail if the number of flagged images exceeds this count
        #[arg(long)]
        fail_on_issues: Option<usize>,
    },

    /// Show information about a dataset
    Info {
        #[command(flatten)]
        input: InputArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Score { input, scoring } => run_score(&input, &scoring),
        Commands::Audit {
            input,
            scoring,
            fail_on_issues,
        } => run_audit(&input, &scoring, fail_on_issues),
        Commands::Info { input } => run_info(&input),
    }
}

/// Configuration file values with command line overrides applied.
fn load_config(scoring: &ScoringArgs) -> Result<AuditConfig> {
    let mut config = match &scoring.config {
        Some(path) => AuditConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AuditConfig::default(),
    };
    if scoring.threshold.is_some() {
        config.prune_threshold = scoring.threshold;
    }
    if scoring.no_overlap_check {
        config.overlapping_label_check = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_dataset(input: &InputArgs, scoring: &ScoringArgs) -> Result<Dataset> {
    println!("📂 Loading dataset: {}", input.labels.display());
    let dataset = Dataset::load(&input.labels, &input.predictions)?;
    println!("   Images: {}", dataset.image_count());

    let dataset = dataset.sample(scoring.sample, scoring.seed);
    if dataset.image_count() < dataset.total_images {
        println!(
            "   Sampled: {} images (seed={})",
            dataset.image_count(),
            scoring.seed
        );
    }

    if let Some(w) = scoring.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(w)
            .build_global()
            .ok();
    }
    Ok(dataset)
}

fn save_json(output: Option<&Path>, save: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    if let Some(output_path) = output {
        save(output_path)?;
        println!("📄 JSON report saved: {}", output_path.display());
    }
    Ok(())
}

fn image_label(image: &Option<String>, index: usize) -> String {
    image.clone().unwrap_or_else(|| format!("#{}", index))
}

fn run_score(input: &InputArgs, scoring: &ScoringArgs) -> Result<()> {
    let start = Instant::now();
    let config = load_config(scoring)?;
    let dataset = load_dataset(input, scoring)?;

    let options = ScoringOptions {
        method: ScoringMethod::Subtype.to_string(),
        aggregation_weights: config.aggregation_weights,
        overlapping_label_check: config.overlapping_label_check,
        verbose: true,
        params: config.score_overrides(),
    };

    let pb = ProgressBar::new(dataset.image_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    println!();
    println!("🔬 Scoring {} images...", dataset.image_count());
    let scores = compute_label_quality_scores_with_progress(
        &dataset.annotations,
        &dataset.predictions,
        &options,
        config.prune_threshold,
        || pb.inc(1),
    )?;
    pb.finish_with_message("Done!");

    let mut report = ScoreReport::new(options.method.clone());
    for (position, s) in scores.iter().enumerate() {
        report.scores.push(ImageScoreEntry {
            index: dataset.indices[position],
            image: dataset.images[position].clone(),
            score: s.score,
            overlooked_score: s.overlooked,
            badloc_score: s.badloc,
            swap_score: s.swap,
        });
    }
    let overall: Vec<f64> = scores.iter().map(|s| s.score).collect();
    let ranking = issues_from_scores(&overall, 1.0)?;
    report.ranking = ranking.iter().map(|&p| dataset.indices[p]).collect();

    println!();
    println!("  Worst images:");
    println!("    {:<32} {:>8} {:>10} {:>8} {:>8}", "image", "score", "overlooked", "badloc", "swap");
    for &position in ranking.iter().take(scoring.top) {
        let entry = &report.scores[position];
        println!(
            "    {:<32} {:>8.4} {:>10.4} {:>8.4} {:>8.4}",
            image_label(&entry.image, entry.index),
            entry.score,
            entry.overlooked_score,
            entry.badloc_score,
            entry.swap_score
        );
    }
    println!();
    println!("  Time: {:.2}s", start.elapsed().as_secs_f64());

    save_json(scoring.output.as_deref(), |path| {
        JsonReporter::new().generate_scores(&report, path)
    })
}

fn run_audit(input: &InputArgs, scoring: &ScoringArgs, fail_on_issues: Option<usize>) -> Result<()> {
    let start = Instant::now();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║             gt-rank - Label Quality Auditor              ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let config = load_config(scoring)?;
    let dataset = load_dataset(input, scoring)?;

    println!();
    println!("🔬 Auditing {} images...", dataset.image_count());
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message("scoring boxes");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let audit_result = audit_dataset(&dataset, &config)?;
    spinner.finish_with_message("Done!");

    println!();
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║                      AUDIT SUMMARY                       ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();
    println!("  Total images:       {}", audit_result.total_images);
    println!("  Images audited:     {}", audit_result.images_audited);
    println!("  Images with issues: {}", audit_result.images_with_issues());
    println!("  Total issues:       {}", audit_result.total_issues());
    println!();
    println!("  By type:");
    for (issue_type, count) in audit_result.issues_by_type() {
        println!("    {}: {}", issue_type, count);
    }
    if !audit_result.flagged_images.is_empty() {
        println!();
        println!("  Worst flagged images:");
        for image in audit_result.flagged_images.iter().take(scoring.top) {
            let types: Vec<String> = image.issues.iter().map(|i| i.issue_type.to_string()).collect();
            println!(
                "    {:<32} {:>8.4}  {}",
                image_label(&image.image, image.index),
                image.score,
                types.join(", ")
            );
        }
    }
    println!();
    println!("  Time: {:.2}s", start.elapsed().as_secs_f64());

    save_json(scoring.output.as_deref(), |path| {
        JsonReporter::new().generate(&audit_result, path)
    })?;

    // Check thresholds for CI
    let mut exit_code = 0;
    if let Some(threshold) = fail_on_issues {
        if audit_result.images_with_issues() > threshold {
            eprintln!(
                "❌ FAIL: Images with issues ({}) exceed threshold ({})",
                audit_result.images_with_issues(),
                threshold
            );
            exit_code = 1;
        } else {
            println!("✅ PASS: Flagged images within threshold");
        }
    }

    std::process::exit(exit_code);
}

fn run_info(input: &InputArgs) -> Result<()> {
    let dataset = Dataset::load(&input.labels, &input.predictions)?;
    let (class_nested, flat) = dataset.layout_counts();

    println!("Labels: {}", input.labels.display());
    println!("Predictions: {}", input.predictions.display());
    println!("Images: {}", dataset.image_count());
    println!("Annotated boxes: {}", dataset.label_count());
    println!("Predicted boxes: {}", dataset.prediction_count());
    println!("Prediction layouts: {} class-nested, {} flat", class_nested, flat);
    println!(
        "Lowest prediction probability: {:.4}",
        min_pred_prob(&dataset.predictions)?
    );

    if !dataset.class_names.is_empty() {
        println!();
        println!("Class names:");
        let mut ids: Vec<_> = dataset.class_names.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            println!("  {}: {}", id, dataset.get_class_name(id));
        }
    }

    Ok(())
}
