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
//! Metadata extracted from the compiled BMv2 JSON of a P4 program.
//!
//! The runtime CLI reports action parameters positionally and without names. The compiled program
//! knows the name and bit width of every action parameter, as well as the size of every counter
//! array.
use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParam {
    pub name: String,
    pub bitwidth: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInfo {
    actions: HashMap<String, Vec<ActionParam>>,
    counters: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct RawProgram {
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    counter_arrays: Vec<RawCounter>,
}

#[derive(Deserialize)]
struct RawAction {
    name: String,
    #[serde(default)]
    runtime_data: Vec<RawRuntimeData>,
}

#[derive(Deserialize)]
struct RawRuntimeData {
    name: String,
    bitwidth: Option<usize>,
}

#[derive(Deserialize)]
struct RawCounter {
    name: String,
    size: usize,
}

impl ProgramInfo {
    pub fn parse(serialized: &str) -> Result<Self, serde_json::Error> {
        let raw: RawProgram = serde_json::from_str(serialized)?;
        Ok(Self {
            actions: raw
                .actions
                .into_iter()
                .map(|a| {
                    (
                        a.name,
                        a.runtime_data
                            .into_iter()
                            .map(|r| ActionParam {
                                name: r.name,
                                bitwidth: r.bitwidth,
                            })
                            .collect(),
                    )
                })
                .collect(),
            counters: raw
                .counter_arrays
                .into_iter()
                .map(|c| (c.name, c.size))
                .collect(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::parse(&fs::read_to_string(path.as_ref())?).map_err(std::io::Error::from)
    }

    /// Parameters of an action. Actions are matched by their full name, or by the last component
    /// of a dotted name (`MyIngress.set_egress_port` matches `set_egress_port`).
    pub fn action_params(&self, action: &str) -> Option<&[ActionParam]> {
        self.actions
            .get(action)
            .or_else(|| {
                self.actions
                    .iter()
                    .find(|(name, _)| short_name(name) == short_name(action))
                    .map(|(_, params)| params)
            })
            .map(Vec::as_slice)
    }

    /// Number of cells of a counter array, matched like `action_params`.
    pub fn counter_size(&self, counter: &str) -> Option<usize> {
        self.counters.get(counter).copied().or_else(|| {
            self.counters
                .iter()
                .find(|(name, _)| short_name(name) == short_name(counter))
                .map(|(_, size)| *size)
        })
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
