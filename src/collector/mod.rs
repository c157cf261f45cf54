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
//! Module that collects match-action table entries from the control plane of a switch.
//!
//! Entries are written exactly as reported, one JSON array per table. Any connectivity or protocol
//! error is returned to the caller; there are no retries.
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    config::CollectorConfig,
    entries::{write_json, CounterEntry, TableEntry},
    util::PathBufExt,
};

pub mod bmv2_json;
pub mod cli;

pub use bmv2_json::ProgramInfo;
pub use cli::SwitchCli;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Runtime CLI exited with {status}: {stderr}")]
    Cli { status: String, stderr: String },
    #[error("Runtime CLI reported an error: {0}")]
    Command(String),
    #[error("Size of counter array `{0}` is unknown. Provide the BMv2 JSON or the counter size.")]
    UnknownCounterSize(String),
}

/// Access to the tables and counters of a programmable switch.
#[async_trait]
pub trait ControlPlane {
    /// All entries of a match-action table, in the order reported by the switch.
    async fn table_entries(&mut self, table: &str) -> Result<Vec<TableEntry>, CollectError>;

    /// All cells of a counter array.
    async fn counter_values(
        &mut self,
        counter: &str,
        size: Option<usize>,
    ) -> Result<Vec<CounterEntry>, CollectError>;
}

/// File name of the collected entries of `table`.
pub fn entries_path(dir: impl AsRef<Path>, table: &str) -> PathBuf {
    dir.as_ref().then_named("{}_entries.json", table)
}

/// File name of the collected values of `counter`.
pub fn counters_path(dir: impl AsRef<Path>, counter: &str) -> PathBuf {
    dir.as_ref().then_named("{}_counters.json", counter)
}

/// Build the CLI client described by `config`, loading the BMv2 JSON if one is given.
pub fn switch_cli(config: &CollectorConfig) -> Result<SwitchCli, CollectError> {
    let program = config
        .p4_json
        .as_ref()
        .map(ProgramInfo::from_file)
        .transpose()?;
    Ok(SwitchCli::new(&config.cli, config.thrift_port, program))
}

/// Number of collected entries per table and cells per counter array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub tables: Vec<(String, usize)>,
    pub counters: Vec<(String, usize)>,
}

/// Collect all configured tables and counters and write them to `config.output_dir`.
pub async fn collect<C>(
    client: &mut C,
    config: &CollectorConfig,
) -> Result<CollectionSummary, CollectError>
where
    C: ControlPlane + Send + ?Sized,
{
    std::fs::create_dir_all(&config.output_dir)?;
    let mut summary = CollectionSummary::default();

    log::debug!("collecting from {} on port {}", config.p4_name, config.thrift_port);

    for table in config.tables.iter() {
        let entries = client.table_entries(table).await?;
        write_json(entries_path(&config.output_dir, table), &entries)?;
        log::info!("Collected {} entries from {table}.", entries.len());
        summary.tables.push((table.clone(), entries.len()));
    }

    for counter in config.counters.iter() {
        let values = client.counter_values(counter, config.counter_size).await?;
        write_json(counters_path(&config.output_dir, counter), &values)?;
        log::info!("Collected {} cells from counter {counter}.", values.len());
        summary.counters.push((counter.clone(), values.len()));
    }

    log::info!("Data collection done.");
    Ok(summary)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::entries::read_json;

    /// Control plane that answers from memory.
    struct StaticControlPlane {
        tables: HashMap<String, Vec<TableEntry>>,
    }

    #[async_trait]
    impl ControlPlane for StaticControlPlane {
        async fn table_entries(&mut self, table: &str) -> Result<Vec<TableEntry>, CollectError> {
            self.tables
                .get(table)
                .cloned()
                .ok_or_else(|| CollectError::Command(format!("Invalid table name ({table})")))
        }

        async fn counter_values(
            &mut self,
            _counter: &str,
            size: Option<usize>,
        ) -> Result<Vec<CounterEntry>, CollectError> {
            Ok((0..size.unwrap_or(0))
                .map(|index| CounterEntry {
                    index,
                    packets: index as u64,
                    bytes: 100 * index as u64,
                })
                .collect())
        }
    }

    fn entry(mac: &str, port: u64) -> TableEntry {
        serde_json::from_value(json!({
            "match_fields": {"hdr.ethernet.dstAddr": mac},
            "action_name": "set_egress_port",
            "action_params": {"port": port}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn writes_entries_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![entry("00:00:00:00:00:02", 2), entry("00:00:00:00:00:01", 1)];
        let mut client = StaticControlPlane {
            tables: HashMap::from([("ethernet_table".to_string(), entries.clone())]),
        };
        let config = CollectorConfig {
            tables: vec!["ethernet_table".to_string()],
            counters: vec!["packet_counter".to_string()],
            counter_size: Some(4),
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let summary = collect(&mut client, &config).await.unwrap();
        assert_eq!(summary.tables, vec![("ethernet_table".to_string(), 2)]);
        assert_eq!(summary.counters, vec![("packet_counter".to_string(), 4)]);

        let de: Vec<TableEntry> = read_json(entries_path(dir.path(), "ethernet_table")).unwrap();
        assert_eq!(de, entries);
        let counters: Vec<CounterEntry> =
            read_json(counters_path(dir.path(), "packet_counter")).unwrap();
        assert_eq!(counters[3].bytes, 300);
    }

    #[tokio::test]
    async fn errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = StaticControlPlane {
            tables: HashMap::new(),
        };
        let config = CollectorConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(matches!(
            collect(&mut client, &config).await,
            Err(CollectError::Command(_))
        ));
    }
}
