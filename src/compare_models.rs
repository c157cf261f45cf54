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
//! Reload the persisted classifiers, evaluate them on their held-out rows, and write the report.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use p4sentry::{
    comparator::{compare_models, discover_artifacts},
    models::ModelKind,
    report::write_report,
    table::Table,
    util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Labeled CSV table the models were trained on.
    data: PathBuf,
    /// Directory containing the persisted pipelines.
    #[arg(short, long, default_value = "models")]
    models_dir: PathBuf,
    /// Classifier variants to compare. Defaults to all persisted pipelines in `models_dir`.
    #[arg(long = "model", value_enum)]
    models: Vec<ModelKind>,
    /// Write the metrics as JSON to this file.
    #[arg(long)]
    json: Option<PathBuf>,
    /// Path of the rendered report.
    #[arg(short, long, default_value = "evaluation/model_evaluation_report.txt")]
    report: PathBuf,
}

fn main() -> Result<()> {
    util::init_logging();
    let args = Args::parse();

    let table = Table::read_csv(&args.data)
        .with_context(|| format!("Cannot read {}", args.data.display()))?;
    let kinds = if args.models.is_empty() {
        discover_artifacts(&args.models_dir)?
    } else {
        args.models
    };
    if kinds.is_empty() {
        log::warn!("No persisted models found in {:?}", args.models_dir);
    }

    let result = compare_models(&table, &args.models_dir, &kinds)?;
    for model in result.models.iter() {
        println!("Model: {}", model.name);
        for (key, value) in model.metrics.entries() {
            println!("  {key}: {value:.4}");
        }
    }
    if let Some(json) = &args.json {
        result.write_json(json)?;
    }
    write_report(&result, &args.report)
        .with_context(|| format!("Cannot write {}", args.report.display()))?;
    Ok(())
}
