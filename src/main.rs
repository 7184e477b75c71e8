// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validated ensemble evaluation CLI for GermEval 2021
//!
//! Usage:
//!   germeval-cv --data GermEval21_Toxic_Train.csv
//!   germeval-cv --synthetic-size 200 --folds 3 --model-count 2 --models gbert

use anyhow::{Context, Result};
use clap::Parser;
use germeval_eval::datasets::TaskLabel;
use germeval_eval::lexical::LexicalBackend;
use germeval_eval::models::parse_model_list;
use germeval_eval::pipeline::{generate_report, save_results, CrossValidationConfig, CrossValidationDriver};
use germeval_eval::report::{publish, ReportSink, SvgChartSink, TextSummarySink};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "germeval-cv")]
#[command(about = "Cross-validate bagged comment classifiers on GermEval 2021")]
#[command(version)]
struct Args {
    /// CSV with comment_text and the three Sub*_ label columns
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// JSON config; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the dataset shuffle
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of cross-validation folds
    #[arg(long)]
    folds: Option<usize>,

    /// Bootstrap repetitions per base model
    #[arg(long)]
    model_count: Option<usize>,

    /// Base models (comma-separated: gbert, gelectra, gottbert)
    #[arg(short, long)]
    models: Option<String>,

    /// Labels to evaluate (comma-separated: toxic, engaging, fact)
    #[arg(short, long)]
    labels: Option<String>,

    /// Checkpoint cache directory
    #[arg(long)]
    checkpoints: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Synthetic dataset size when no CSV is given
    #[arg(long)]
    synthetic_size: Option<usize>,

    /// Output format (json, markdown, both)
    #[arg(short, long, default_value = "both")]
    format: String,
}

impl Args {
    fn into_config(self) -> Result<(CrossValidationConfig, String)> {
        let mut config = match self.config {
            Some(ref path) => CrossValidationConfig::from_json_file(path)?,
            None => CrossValidationConfig::default(),
        };

        if let Some(path) = self.data {
            config.dataset_path = Some(path.to_string_lossy().to_string());
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(folds) = self.folds {
            config.folds = folds;
        }
        if let Some(count) = self.model_count {
            config.model_count = count;
        }
        if let Some(ref models) = self.models {
            config.base_models = parse_model_list(models)?;
        }
        if let Some(ref labels) = self.labels {
            config.labels = labels
                .split(',')
                .map(|s| s.trim().parse::<TaskLabel>())
                .collect::<Result<_, _>>()?;
        }
        if let Some(dir) = self.checkpoints {
            config.checkpoint_dir = dir.to_string_lossy().to_string();
        }
        if let Some(dir) = self.output {
            config.output_dir = dir.to_string_lossy().to_string();
        }
        if let Some(size) = self.synthetic_size {
            config.synthetic_size = size;
        }

        Ok((config, self.format))
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, format) = Args::parse().into_config()?;
    if !matches!(format.as_str(), "json" | "markdown" | "both") {
        anyhow::bail!("Unknown output format: {}", format);
    }

    let models: Vec<String> = config.base_models.iter().map(|m| m.to_string()).collect();
    tracing::info!("GermEval 2021 Ensemble Cross-Validation");
    tracing::info!("=======================================");
    tracing::info!("Seed: {}", config.seed);
    tracing::info!("Folds: {}", config.folds);
    tracing::info!("Base models: {} x {}", models.join(", "), config.model_count);
    tracing::info!("Checkpoints: {}", config.checkpoint_dir);

    let backend = LexicalBackend::default();
    let driver = CrossValidationDriver::new(config, &backend)?;
    let dataset = driver.load_dataset()?;
    tracing::info!("Loaded {} comments from {}", dataset.len(), dataset.name);

    let pb = ProgressBar::new(driver.total_units());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let driver = driver.with_progress(pb.clone());
    let results = driver.run(&dataset)?;
    pb.finish_with_message("done");

    // Print summary to console
    println!("\n{}", "=".repeat(70));
    println!("CROSS-VALIDATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("Sub-models trained: {}", results.sub_models_trained);
    println!("{:-<70}", "");
    println!("{:<15} {:>13} {:>13} {:>13} {:>13}", "Label", "Precision", "Recall", "F1", "AUC");
    println!("{:-<70}", "");
    for (title, scores) in results.report_entries() {
        let cells: Vec<String> = scores
            .summary()
            .iter()
            .map(|s| format!("{:.2}±{:.2}", s.mean * 100.0, s.std * 100.0))
            .collect();
        println!(
            "{:<15} {:>13} {:>13} {:>13} {:>13}",
            title, cells[0], cells[1], cells[2], cells[3]
        );
    }
    println!("{:-<70}", "");

    // Save outputs
    let output = PathBuf::from(&results.config.output_dir);
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut text_sink = TextSummarySink::new(output.clone(), true);
    let mut chart_sink = SvgChartSink::new(output.clone());
    let mut sinks: [&mut dyn ReportSink; 2] = [&mut text_sink, &mut chart_sink];
    publish(&results, &mut sinks)?;
    println!(
        "\nReports saved to: {} ({} summaries, {} charts)",
        output.display(),
        text_sink.written().len(),
        chart_sink.written().len()
    );

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");

    if format == "json" || format == "both" {
        let json_path = output.join(format!("cv_{}.json", timestamp));
        save_results(&results, &json_path)?;
        println!("JSON results saved to: {}", json_path.display());
    }

    if format == "markdown" || format == "both" {
        let md_path = output.join(format!("cv_{}.md", timestamp));
        std::fs::write(&md_path, generate_report(&results))?;
        println!("Markdown report saved to: {}", md_path.display());
    }

    println!("\nCross-validation complete!");

    Ok(())
}
