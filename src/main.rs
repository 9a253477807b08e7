use anyhow::Context as _;
use clap::Parser;
use dotenvy::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_deid::pipeline::{OutputLayout, discover_inputs};
use voice_deid::qa::{
    DEFAULT_SPOT_CHECK_SAMPLES, DEFAULT_SPOT_CHECK_SEED, QaStatus, SPOT_CHECK_FILE, SpotChecker,
    save_samples,
};
use voice_deid::{AppConfig, Pipeline};

#[derive(Debug, Parser)]
#[command(name = "voice-deid")]
#[command(about = "Remove PII from paired conversation audio and transcripts")]
struct Args {
    /// PII categories and pipeline settings
    #[arg(long, env = "DEID_CONFIG", default_value = "deid.toml")]
    config: PathBuf,
    /// Directory of `<id>.wav` + `<id>.txt` pairs
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    /// Process only the first N conversations
    #[arg(long)]
    limit: Option<usize>,
    /// Overrides `pipeline.workers`
    #[arg(long)]
    workers: Option<usize>,
    /// Redacted segments to sample for manual review (0 to skip)
    #[arg(long, default_value_t = DEFAULT_SPOT_CHECK_SAMPLES)]
    spot_check: usize,
    #[arg(long, default_value_t = DEFAULT_SPOT_CHECK_SEED)]
    seed: u64,
    #[arg(long, default_value_t = false)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {:?}", args.config))?;
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers.max(1);
    }

    let pipeline = Arc::new(Pipeline::from_config(&config).context("Failed to build pipeline")?);

    let inputs = discover_inputs(&args.input, args.limit)
        .with_context(|| format!("Failed to read input directory {:?}", args.input))?;
    if inputs.is_empty() {
        warn!("No conversations found in {:?}", args.input);
    }

    let layout = OutputLayout::new(&args.output);
    layout
        .create()
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    let progress = if args.no_progress {
        None
    } else {
        let pb = ProgressBar::new(inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let report = pipeline.run_batch(inputs, Some(layout.clone()), progress.clone()).await;

    if let Some(pb) = progress {
        pb.finish_with_message("done");
    }

    let qa = report.qa_report();
    let (json_path, md_path) = qa
        .write_to(&layout.qa_dir())
        .context("Failed to write QA report")?;

    info!("Report: {:?} / {:?}", json_path, md_path);

    if args.spot_check > 0 {
        let samples = report.spot_check(&SpotChecker::new(args.seed), args.spot_check);
        let samples_path = layout.qa_dir().join(SPOT_CHECK_FILE);
        save_samples(&samples, &samples_path)
            .with_context(|| format!("Failed to write spot-check samples {:?}", samples_path))?;
    }

    println!("Processed:     {}", report.completed.len());
    println!("Failed:        {}", report.failed.len());
    for failed in &report.failed {
        println!("  {}: {}", failed.conversation_id, failed.error);
    }
    println!("PII found:     {}", report.stats.total_pii_instances);
    println!("PII remaining: {}", qa.verification.pii_remaining);
    println!("Pass rate:     {:.2}%", qa.verification.pass_rate * 100.0);
    println!(
        "QA status:     {}",
        match qa.status {
            QaStatus::Pass => "PASS",
            QaStatus::Fail => "FAIL",
        }
    );

    if qa.status == QaStatus::Fail || !report.failed.is_empty() {
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
