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
//! Run the whole pipeline: collect, preprocess, clean, train on the forwarding tables, label the
//! telemetry, train the anomaly detectors, and write the comparison report.
use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches};

use p4sentry::{
    config::{PipelineConfig, PipelineDirs},
    pipeline::{run_pipeline, Source},
    util,
};

#[derive(clap::Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// JSON file with the pipeline configuration. Missing fields take their default values, and
    /// directories given on the command line replace those of the file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write synthetic table entries and telemetry instead of collecting from a switch.
    #[arg(long)]
    simulate: bool,
    #[command(flatten)]
    dirs: PipelineDirs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches)?;

    let config = match args.config {
        Some(path) => {
            let mut config = PipelineConfig::from_file(path)?;
            config.dirs.override_with(&args.dirs, &matches);
            config
        }
        None => PipelineConfig {
            dirs: args.dirs,
            ..PipelineConfig::new()
        },
    };
    let source = if args.simulate {
        Source::Simulated
    } else {
        Source::Switch
    };

    let summary = run_pipeline(&config, source).await?;
    for (unit, error) in summary.failed.iter() {
        eprintln!("{unit} failed: {error}");
    }
    if let Some(report) = summary.report {
        println!("Evaluation report written to {}", report.display());
    }
    Ok(())
}
