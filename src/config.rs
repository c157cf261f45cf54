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
//! Configuration of the pipeline stages.
//!
//! All structs can be flattened into `clap` argument parsers and (de-)serialized with `serde`, such
//! that the orchestrator can read the whole configuration from a single JSON file.
use std::{fs, path::Path, path::PathBuf};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{models::ModelKind, schema::FeatureSchema, util::PathBufExt};

/// Conventional directory names shared by all stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct PipelineDirs {
    /// Directory containing the collected table entries (JSON).
    #[arg(long, default_value = "collected_data")]
    pub collected_data: PathBuf,
    /// Directory containing the flattened tables (CSV).
    #[arg(long, default_value = "processed_data")]
    pub processed_data: PathBuf,
    /// Directory containing the cleaned tables (CSV).
    #[arg(long, default_value = "cleaned_data")]
    pub cleaned_data: PathBuf,
    /// Directory containing the labeled telemetry tables (CSV).
    #[arg(long, default_value = "labeled_data")]
    pub labeled_data: PathBuf,
    /// Directory for persisted models and their reports.
    #[arg(long, default_value = "models")]
    pub models: PathBuf,
    /// Directory for the comparison report.
    #[arg(long, default_value = "evaluation")]
    pub evaluation: PathBuf,
}

impl Default for PipelineDirs {
    fn default() -> Self {
        Self {
            collected_data: "collected_data".into(),
            processed_data: "processed_data".into(),
            cleaned_data: "cleaned_data".into(),
            labeled_data: "labeled_data".into(),
            models: "models".into(),
            evaluation: "evaluation".into(),
        }
    }
}

impl PipelineDirs {
    /// Place all directories below `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let default = Self::default();
        Self {
            collected_data: root.then(default.collected_data),
            processed_data: root.then(default.processed_data),
            cleaned_data: root.then(default.cleaned_data),
            labeled_data: root.then(default.labeled_data),
            models: root.then(default.models),
            evaluation: root.then(default.evaluation),
        }
    }

    /// Replace the directories that were given explicitly on the command line parsed into
    /// `matches`, keeping the others.
    pub fn override_with(&mut self, cli: &PipelineDirs, matches: &clap::ArgMatches) {
        let given =
            |id: &str| matches.value_source(id) == Some(clap::parser::ValueSource::CommandLine);
        for (id, dir, value) in [
            ("collected_data", &mut self.collected_data, &cli.collected_data),
            ("processed_data", &mut self.processed_data, &cli.processed_data),
            ("cleaned_data", &mut self.cleaned_data, &cli.cleaned_data),
            ("labeled_data", &mut self.labeled_data, &cli.labeled_data),
            ("models", &mut self.models, &cli.models),
            ("evaluation", &mut self.evaluation, &cli.evaluation),
        ] {
            if given(id) {
                *dir = value.clone();
            }
        }
    }

    /// Create all directories.
    pub fn create_all(&self) -> Result<(), std::io::Error> {
        for dir in [
            &self.collected_data,
            &self.processed_data,
            &self.cleaned_data,
            &self.labeled_data,
            &self.models,
            &self.evaluation,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Settings for connecting to the control plane of a BMv2 switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct CollectorConfig {
    /// Name of the P4 program loaded on the switch.
    #[arg(long, default_value = "basic_forwarding")]
    pub p4_name: String,
    /// Thrift port of the BMv2 switch.
    #[arg(long, default_value_t = 9090)]
    pub thrift_port: u16,
    /// Executable of the runtime CLI.
    #[arg(long, default_value = "simple_switch_CLI")]
    pub cli: String,
    /// Compiled BMv2 JSON of the P4 program, used to name action parameters and size counters.
    #[arg(long)]
    pub p4_json: Option<PathBuf>,
    /// Tables to dump. Can be given multiple times.
    #[arg(long = "table", default_values = ["ethernet_table", "ipv4_table"])]
    pub tables: Vec<String>,
    /// Counter arrays to read. Can be given multiple times.
    #[arg(long = "counter")]
    pub counters: Vec<String>,
    /// Number of cells of each counter array, if it cannot be taken from the BMv2 JSON.
    #[arg(long)]
    pub counter_size: Option<usize>,
    /// Directory to save the collected data.
    #[arg(long, default_value = "collected_data")]
    pub output_dir: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            p4_name: "basic_forwarding".to_string(),
            thrift_port: 9090,
            cli: "simple_switch_CLI".to_string(),
            p4_json: None,
            tables: vec!["ethernet_table".to_string(), "ipv4_table".to_string()],
            counters: Vec::new(),
            counter_size: None,
            output_dir: "collected_data".into(),
        }
    }
}

/// Settings for the train/test split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    /// Fraction of rows held out for testing.
    pub test_size: f64,
    /// Seed of the random permutation.
    pub seed: u64,
    /// Preserve the class proportions in both splits.
    pub stratify: bool,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            test_size: 0.25,
            seed: crate::RANDOM_STATE,
            stratify: true,
        }
    }
}

/// Settings for the anomaly labeling of telemetry tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    /// Candidate numeric signal columns. Signals that are not present are ignored.
    pub signals: Vec<String>,
    /// A row is anomalous if any signal's |z| exceeds this value.
    pub threshold: f64,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            signals: crate::labeler::DEFAULT_SIGNALS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            threshold: crate::labeler::DEFAULT_THRESHOLD,
        }
    }
}

/// Settings for training and evaluating classifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSettings {
    /// Column to predict.
    pub target: String,
    /// Columns never used as features.
    pub excluded: Vec<String>,
    /// Declared feature columns. If absent, the schema is inferred from the training table.
    pub schema: Option<FeatureSchema>,
    pub split: SplitSettings,
    /// Classifier variants to fit, in this order.
    pub models: Vec<ModelKind>,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            target: "label".to_string(),
            excluded: vec!["timestamp".to_string()],
            schema: None,
            split: SplitSettings::default(),
            models: vec![
                ModelKind::NeuralNetMlp,
                ModelKind::RandomForest,
                ModelKind::GradientBoosting,
            ],
        }
    }
}

impl TrainSettings {
    /// Settings used to predict the egress port from the flattened forwarding tables.
    pub fn forwarding() -> Self {
        Self {
            target: "egress_port".to_string(),
            excluded: vec!["dst_mac".to_string(), "dst_ip".to_string()],
            schema: None,
            split: SplitSettings {
                test_size: 0.2,
                seed: crate::RANDOM_STATE,
                stratify: false,
            },
            models: vec![
                ModelKind::LogisticRegression,
                ModelKind::RandomForest,
                ModelKind::NeuralNetMlp,
            ],
        }
    }
}

/// Complete configuration of the orchestrated pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dirs: PipelineDirs,
    pub collector: CollectorConfig,
    pub label: LabelSettings,
    pub anomaly: TrainSettings,
    /// Missing fields are taken from [`TrainSettings::forwarding`].
    #[serde(
        default = "TrainSettings::forwarding",
        deserialize_with = "deserialize_forwarding"
    )]
    pub forwarding: TrainSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    /// Build the default configuration, with forwarding-table training set up to predict the
    /// egress port.
    pub fn new() -> Self {
        Self {
            dirs: PipelineDirs::default(),
            collector: CollectorConfig::default(),
            label: LabelSettings::default(),
            anomaly: TrainSettings::default(),
            forwarding: TrainSettings::forwarding(),
        }
    }

    /// Read the configuration from a JSON file. Missing fields take their default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let serialized = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&serialized).map_err(std::io::Error::from)
    }
}

/// Read a (possibly partial) forwarding section on top of [`TrainSettings::forwarding`].
fn deserialize_forwarding<'de, D: Deserializer<'de>>(d: D) -> Result<TrainSettings, D::Error> {
    let overrides = Value::deserialize(d)?;
    let mut merged = serde_json::to_value(TrainSettings::forwarding()).map_err(D::Error::custom)?;
    merge_json(&mut merged, overrides);
    serde_json::from_value(merged).map_err(D::Error::custom)
}

/// Recursively overwrite the fields of `base` with those present in `overrides`.
fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overrides) => *base = overrides,
    }
}

#[cfg(test)]
mod test {
    use clap::{CommandFactory, FromArgMatches, Parser};

    use super::*;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        dirs: PipelineDirs,
    }

    #[test]
    fn command_line_dirs_override_file() {
        let matches = Cli::command().get_matches_from([
            "main",
            "--models",
            "/tmp/m",
            "--labeled-data",
            "lab",
        ]);
        let cli = Cli::from_arg_matches(&matches).unwrap();
        let mut dirs = PipelineDirs::rooted_at("/data");
        dirs.override_with(&cli.dirs, &matches);
        assert_eq!(dirs.models, PathBuf::from("/tmp/m"));
        assert_eq!(dirs.labeled_data, PathBuf::from("lab"));
        assert_eq!(dirs.collected_data, PathBuf::from("/data/collected_data"));
        assert_eq!(dirs.evaluation, PathBuf::from("/data/evaluation"));
    }

    #[test]
    fn partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"collector": {"thrift_port": 9091}, "anomaly": {"target": "is_error"}}"#,
        )
        .unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.collector.thrift_port, 9091);
        assert_eq!(config.collector.cli, "simple_switch_CLI");
        assert_eq!(config.anomaly.target, "is_error");
        assert_eq!(config.anomaly.split.test_size, 0.25);
        assert_eq!(config.forwarding, TrainSettings::forwarding());
        assert_eq!(config.dirs, PipelineDirs::default());
        assert_eq!(PipelineConfig::default(), PipelineConfig::new());
    }

    #[test]
    fn partial_forwarding_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"forwarding": {"models": ["RandomForest"], "split": {"seed": 7}}}"#,
        )
        .unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.forwarding.models, vec![ModelKind::RandomForest]);
        assert_eq!(config.forwarding.target, "egress_port");
        assert_eq!(config.forwarding.excluded, vec!["dst_mac", "dst_ip"]);
        assert_eq!(
            config.forwarding.split,
            SplitSettings {
                test_size: 0.2,
                seed: 7,
                stratify: false,
            }
        );
        assert_eq!(config.anomaly, TrainSettings::default());

        fs::write(&path, r#"{"forwarding": {"target": 3}}"#).unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());
    }
}
