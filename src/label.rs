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
//! Label every row of a telemetry table as anomalous (1) or normal (0) using z-scores.
use std::path::PathBuf;

use clap::Parser;

use p4sentry::{
    config::LabelSettings,
    labeler::{label_file, DEFAULT_THRESHOLD},
    util::{self, Outcome, PathBufExt},
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Telemetry table to label.
    input: PathBuf,
    /// Output file. Defaults to `labeled_data/labeled_<input name>.csv`.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// A row is anomalous if the absolute z-score of any signal exceeds this value.
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,
    /// Signal column to score. Can be given multiple times. Defaults to the known link signals.
    #[arg(short, long = "signal")]
    signals: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let mut settings = LabelSettings {
        threshold: args.threshold,
        ..Default::default()
    };
    if !args.signals.is_empty() {
        settings.signals = args.signals;
    }
    let output = match args.output {
        Some(output) => output,
        None => {
            let stem = args
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            PathBuf::from("labeled_data").then_named("labeled_{}.csv", &stem)
        }
    };

    let outcome = label_file(&args.input, &output, &settings)?.warn_absent("labeling");
    if let Outcome::Done(stats) = outcome {
        println!(
            "Labeled {} of {} rows as anomalous. Saved to {}",
            stats.anomalies,
            stats.rows,
            output.display()
        );
    }
    Ok(())
}
