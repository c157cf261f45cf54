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
//! Flatten the collected table entries into one CSV table per table type.
use std::path::PathBuf;

use clap::Parser;
use strum::IntoEnumIterator;

use p4sentry::{
    preprocessor::{preprocess_counters_file, preprocess_file, TableKind},
    util::{self, PathBufExt},
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Directory containing the collected entries.
    #[arg(long, default_value = "collected_data")]
    collected_data: PathBuf,
    /// Directory to write the flattened tables to.
    #[arg(long, default_value = "processed_data")]
    processed_data: PathBuf,
    /// Counter arrays whose collected values should be flattened as well. Can be given multiple
    /// times.
    #[arg(long = "counter")]
    counters: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();
    std::fs::create_dir_all(&args.processed_data)?;

    for kind in TableKind::iter() {
        preprocess_file(
            kind,
            kind.collected_path(&args.collected_data),
            kind.processed_path(&args.processed_data),
        )?
        .warn_absent(format!("the {kind} table"));
    }

    for counter in args.counters.iter() {
        let output = args
            .processed_data
            .clone()
            .then_named("processed_{}_counters.csv", counter);
        preprocess_counters_file(
            p4sentry::collector::counters_path(&args.collected_data, counter),
            output,
        )?
        .warn_absent(format!("counter {counter}"));
    }
    Ok(())
}
