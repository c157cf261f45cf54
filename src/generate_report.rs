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
//! Render the evaluation report from metrics stored as JSON by `compare_models --json`.
use std::path::PathBuf;

use clap::Parser;

use p4sentry::{comparator::EvaluationResult, report, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// JSON file with the metrics of every model.
    results: PathBuf,
    /// Path of the rendered report.
    #[arg(short, long, default_value = "evaluation/model_evaluation_report.txt")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let results = EvaluationResult::read_json(&args.results)?;
    report::write_report(&results, &args.output)?;
    println!("Report generated at {}", args.output.display());
    Ok(())
}
