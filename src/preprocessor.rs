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
//! Module that flattens collected table entries into the row-tabular format.
//!
//! Every table type declares which columns it produces and where each column's value comes from
//! in a table entry. Fields that are absent from an entry are rendered as the `N/A` sentinel.
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{
    collector,
    entries::{read_json, CounterEntry, TableEntry},
    schema::FeatureSchema,
    table::{Table, TableError, MISSING},
    util::{Outcome, PathBufExt},
};

/// Source of a flattened column within a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Value of a match field.
    Match(&'static str),
    /// Name of the action.
    ActionName,
    /// Value of an action parameter.
    ActionParam(&'static str),
}

/// Declared projection of a table entry onto a fixed list of columns.
pub type FlattenSchema = &'static [(&'static str, FieldSource)];

const ETHERNET_SCHEMA: FlattenSchema = &[
    ("dst_mac", FieldSource::Match("hdr.ethernet.dstAddr")),
    ("action_name", FieldSource::ActionName),
    ("egress_port", FieldSource::ActionParam("port")),
];

const IPV4_SCHEMA: FlattenSchema = &[
    ("dst_ip", FieldSource::Match("hdr.ipv4.dstAddr")),
    ("prefix_len", FieldSource::Match("hdr.ipv4.dstAddr_prefix_len")),
    ("action_name", FieldSource::ActionName),
    ("egress_port", FieldSource::ActionParam("port")),
    ("dst_mac", FieldSource::ActionParam("dst_mac")),
];

/// Forwarding tables known to the pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Ethernet,
    Ipv4,
}

impl TableKind {
    /// Name of the match-action table on the switch.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Ethernet => "ethernet_table",
            Self::Ipv4 => "ipv4_table",
        }
    }

    pub fn flatten_schema(&self) -> FlattenSchema {
        match self {
            Self::Ethernet => ETHERNET_SCHEMA,
            Self::Ipv4 => IPV4_SCHEMA,
        }
    }

    /// Column that must be present for a row to be kept by the cleaner.
    pub fn required_field(&self) -> &'static str {
        "egress_port"
    }

    /// Declared feature columns for predicting the egress port from this table.
    pub fn feature_schema(&self) -> FeatureSchema {
        match self {
            Self::Ethernet => FeatureSchema::new(Vec::<String>::new(), ["action_name"]),
            Self::Ipv4 => FeatureSchema::new(["prefix_len"], ["action_name"]),
        }
    }

    pub fn collected_path(&self, collected_dir: impl AsRef<Path>) -> PathBuf {
        collector::entries_path(collected_dir, self.table_name())
    }

    pub fn processed_path(&self, processed_dir: impl AsRef<Path>) -> PathBuf {
        processed_dir
            .as_ref()
            .then_named("processed_{}_data.csv", &self.to_string())
    }

    pub fn cleaned_path(&self, cleaned_dir: impl AsRef<Path>) -> PathBuf {
        cleaned_dir
            .as_ref()
            .then_named("cleaned_{}_data.csv", &self.to_string())
    }
}

/// Render a JSON value as a cell. Strings are taken verbatim, and `null` is missing.
fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

/// Flatten one entry per row, in input order.
pub fn flatten_entries(entries: &[TableEntry], schema: FlattenSchema) -> Result<Table, TableError> {
    let mut table = Table::new(schema.iter().map(|(column, _)| *column))?;
    for entry in entries {
        table.push_row(
            schema
                .iter()
                .map(|(_, source)| {
                    Some(match source {
                        FieldSource::Match(key) => render(entry.match_fields.get(*key)),
                        FieldSource::ActionName => entry.action_name.clone(),
                        FieldSource::ActionParam(key) => render(entry.action_params.get(*key)),
                    })
                })
                .collect(),
        )?;
    }
    Ok(table)
}

/// Flatten counter cells into `index, packets, bytes` rows.
pub fn flatten_counters(counters: &[CounterEntry]) -> Result<Table, TableError> {
    let mut table = Table::new(["index", "packets", "bytes"])?;
    for c in counters {
        table.push_row(vec![
            Some(c.index.to_string()),
            Some(c.packets.to_string()),
            Some(c.bytes.to_string()),
        ])?;
    }
    Ok(table)
}

/// Flatten the collected entries in `input` and write them to `output`. Returns the number of
/// rows written.
pub fn preprocess_file(
    kind: TableKind,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<Outcome<usize>, TableError> {
    Outcome::if_exists(input, |input| {
        let entries: Vec<TableEntry> = read_json(input)?;
        let table = flatten_entries(&entries, kind.flatten_schema())?;
        table.write_csv(output.as_ref())?;
        log::info!(
            "Preprocessed {} entries of the {} table into {:?}",
            table.len(),
            kind.table_name(),
            output.as_ref()
        );
        Ok(table.len())
    })
}

/// Flatten collected counter values in `input` and write them to `output`.
pub fn preprocess_counters_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<Outcome<usize>, TableError> {
    Outcome::if_exists(input, |input| {
        let counters: Vec<CounterEntry> = read_json(input)?;
        let table = flatten_counters(&counters)?;
        table.write_csv(output.as_ref())?;
        Ok(table.len())
    })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn entries(value: Value) -> Vec<TableEntry> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn flatten_ethernet() {
        let e = entries(json!([
            {"match_fields": {"hdr.ethernet.dstAddr": "00:00:00:00:00:02"}, "action_name": "set_egress_port", "action_params": {"port": 2}},
            {"match_fields": {"hdr.ethernet.dstAddr": "00:00:00:00:00:01"}, "action_name": "set_egress_port", "action_params": {"port": 1}},
        ]));
        let table = flatten_entries(&e, TableKind::Ethernet.flatten_schema()).unwrap();
        assert_eq!(table.columns(), &["dst_mac", "action_name", "egress_port"]);
        assert_eq!(table.len(), 2);
        // row order matches input order
        assert_eq!(table.rows()[0][0].as_deref(), Some("00:00:00:00:00:02"));
        assert_eq!(table.rows()[1][2].as_deref(), Some("1"));
    }

    #[test]
    fn flatten_ipv4_missing_fields() {
        let e = entries(json!([
            {"match_fields": {"hdr.ipv4.dstAddr": "10.0.1.1", "hdr.ipv4.dstAddr_prefix_len": 24}, "action_name": "ipv4_forward", "action_params": {"port": 1}},
            {"action_name": "drop"},
        ]));
        let table = flatten_entries(&e, TableKind::Ipv4.flatten_schema()).unwrap();
        assert_eq!(
            table.columns(),
            &["dst_ip", "prefix_len", "action_name", "egress_port", "dst_mac"]
        );
        let row = |i: usize| -> Vec<&str> {
            table.rows()[i]
                .iter()
                .map(|c| c.as_deref().unwrap())
                .collect()
        };
        assert_eq!(row(0), vec!["10.0.1.1", "24", "ipv4_forward", "1", "N/A"]);
        assert_eq!(row(1), vec!["N/A", "N/A", "drop", "N/A", "N/A"]);
    }

    #[test]
    fn absent_input_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = preprocess_file(
            TableKind::Ethernet,
            TableKind::Ethernet.collected_path(dir.path()),
            TableKind::Ethernet.processed_path(dir.path()),
        )
        .unwrap();
        assert!(matches!(outcome, Outcome::InputAbsent(_)));
        assert!(!TableKind::Ethernet.processed_path(dir.path()).exists());
    }

    #[test]
    fn file_names() {
        assert_eq!(
            TableKind::Ipv4.processed_path("processed_data"),
            PathBuf::from("processed_data/processed_ipv4_data.csv")
        );
        assert_eq!(
            TableKind::Ethernet.collected_path("collected_data"),
            PathBuf::from("collected_data/ethernet_table_entries.json")
        );
    }
}
