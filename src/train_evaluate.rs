// P4SENTRY: Anomaly Detection on P4/BMv2 Match-Action Tables
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Train and evaluate all classifier variants on a labeled table.
//!
//! Writes, per variant, the fitted pipeline, a classification report, and a confusion matrix to the
//! output directory, plus the consolidated `model_metrics.csv` and `evaluation.json`.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;

use p4sentry::{
    comparator::EvaluationResult,
    config::{SplitSettings, TrainSettings},
    models::ModelKind,
    table::Table,
    trainer::{self, Prepared, TrainingSummary},
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Labeled CSV table.
    data: PathBuf,
    /// Directory for the fitted pipelines, reports, and the metrics table.
    #[arg(short, long, default_value = "models")]
    outdir: PathBuf,
    /// Column to predict.
    #[arg(short, long, default_value = "label")]
    target: String,
    /// Columns never used as features. Can be given multiple times.
    #[arg(short, long = "exclude", default_values = ["timestamp"])]
    excluded: Vec<String>,
    /// Fraction of rows held out for testing.
    #[arg(long, default_value_t = 0.25)]
    test_size: f64,
    /// Seed of the split and of the model initialization.
    #[arg(long, default_value_t = p4sentry::RANDOM_STATE)]
    seed: u64,
    /// Split without preserving the class proportions.
    #[arg(long)]
    no_stratify: bool,
    /// Classifier variants to fit. Can be given multiple times.
    #[arg(short, long = "model", value_enum, default_values = ["NeuralNet_MLP", "RandomForest", "GradientBoosting"])]
    models: Vec<ModelKind>,
}

fn main() -> Result<()> {
    let logger = pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .build();
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger)
        .try_init()
        .context("Cannot initialize logging")?;

    let args = Args::parse();
    if !args.data.exists() {
        bail!("Input file {} not found", args.data.display());
    }
    let settings = TrainSettings {
        target: args.target,
        excluded: args.excluded,
        schema: None,
        split: SplitSettings {
            test_size: args.test_size,
            seed: args.seed,
            stratify: !args.no_stratify,
        },
        models: args.models,
    };

    std::fs::create_dir_all(&args.outdir)
        .with_context(|| format!("Cannot create {}", args.outdir.display()))?;
    let table = Table::read_csv(&args.data)
        .with_context(|| format!("Cannot read {}", args.data.display()))?;
    let prepared = Prepared::new(&table, &settings)?;

    let pb = multi.add(
        ProgressBar::new(settings.models.len() as u64).with_style(
            ProgressStyle::with_template("[{bar:40}] {pos}/{len} models, elapsed: {elapsed} {msg}")?
                .progress_chars("##-"),
        ),
    );
    let mut outcomes = Vec::new();
    for kind in settings.models.iter() {
        pb.set_message(kind.to_string());
        outcomes.push(
            prepared
                .run(*kind, &args.outdir)
                .with_context(|| format!("Cannot train {kind}"))?,
        );
        pb.inc(1);
    }
    pb.finish_and_clear();

    let metrics_path = args.outdir.join(trainer::METRICS_FILE);
    trainer::write_metrics_table(&outcomes, &metrics_path)?;
    let summary = TrainingSummary {
        outcomes,
        metrics_path,
    };
    println!("{}", trainer::format_metrics_table(&summary.rows()));
    println!("Results saved to {}", summary.metrics_path.display());

    // input of `generate_report`
    let evaluation = args.outdir.join("evaluation.json");
    EvaluationResult::from(&summary).write_json(&evaluation)?;
    log::info!("Metrics of all models saved to {evaluation:?}");
    Ok(())
}
