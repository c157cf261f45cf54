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
//! Dump the match-action tables (and counters) of a running BMv2 switch into JSON files.
use clap::Parser;

use p4sentry::{collector, config::CollectorConfig, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: CollectorConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let mut client = collector::switch_cli(&args.config)?;
    let summary = collector::collect(&mut client, &args.config).await?;
    for (table, n) in summary.tables.iter() {
        println!("{table}: {n} entries");
    }
    for (counter, n) in summary.counters.iter() {
        println!("{counter}: {n} cells");
    }
    Ok(())
}
