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
//! Remove rows without an egress port and exact duplicates from the flattened tables.
use std::path::PathBuf;

use clap::Parser;
use strum::IntoEnumIterator;

use p4sentry::{cleaner::clean_file, preprocessor::TableKind, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Directory containing the flattened tables.
    #[arg(long, default_value = "processed_data")]
    processed_data: PathBuf,
    /// Directory to write the cleaned tables to.
    #[arg(long, default_value = "cleaned_data")]
    cleaned_data: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();
    std::fs::create_dir_all(&args.cleaned_data)?;

    for kind in TableKind::iter() {
        let outcome = clean_file(
            kind.processed_path(&args.processed_data),
            kind.cleaned_path(&args.cleaned_data),
            kind.required_field(),
        )?
        .warn_absent(format!("the {kind} table"));
        if let Some(stats) = outcome.done() {
            println!(
                "{kind}: removed {} rows with missing values and {} duplicates",
                stats.missing_removed, stats.duplicates_removed
            );
        }
    }
    Ok(())
}
