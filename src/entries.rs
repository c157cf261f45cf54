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
//! Module defining the data collected from the control plane of a switch.
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of one match-action rule as reported by the control plane.
///
/// Entries have no stable identity; they are identified by their position within the response.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TableEntry {
    /// Match field name (e.g., `hdr.ethernet.dstAddr`) to its value.
    #[serde(default)]
    pub match_fields: Map<String, Value>,
    /// Name of the action executed on a hit.
    #[serde(default = "missing_action")]
    pub action_name: String,
    /// Action parameter name (e.g., `port`) to its value.
    #[serde(default)]
    pub action_params: Map<String, Value>,
}

fn missing_action() -> String {
    crate::table::MISSING.to_string()
}

/// Value of a single cell of a counter array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CounterEntry {
    pub index: usize,
    pub packets: u64,
    pub bytes: u64,
}

/// Read a JSON array of `T` from a file.
pub fn read_json<T: for<'de> Deserialize<'de>>(
    path: impl AsRef<Path>,
) -> Result<Vec<T>, std::io::Error> {
    let serialized = fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&serialized).map_err(std::io::Error::from)
}

/// Write a slice of `T` as a pretty-printed JSON array, overwriting `path`.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, values: &[T]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let serialized = serde_json::to_string_pretty(values).map_err(std::io::Error::from)?;
    fs::write(path.as_ref(), serialized)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_entry() {
        let de: Vec<TableEntry> = serde_json::from_value(json!([
            {
                "match_fields": {"hdr.ipv4.dstAddr": "10.0.1.1", "hdr.ipv4.dstAddr_prefix_len": 24},
                "action_name": "ipv4_forward",
                "action_params": {"port": 1, "dst_mac": "00:00:00:00:00:01"}
            },
            { "action_name": "drop" }
        ]))
        .unwrap();
        assert_eq!(de.len(), 2);
        assert_eq!(de[0].match_fields["hdr.ipv4.dstAddr_prefix_len"], json!(24));
        assert_eq!(de[0].action_params["port"], json!(1));
        assert!(de[1].match_fields.is_empty());
        assert!(de[1].action_params.is_empty());
    }

    #[test]
    fn missing_action_name_is_sentinel() {
        let de: TableEntry = serde_json::from_value(json!({"match_fields": {}})).unwrap();
        assert_eq!(de.action_name, "N/A");
    }
}
