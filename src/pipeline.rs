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
//! Module that runs all stages of the pipeline in sequence.
//!
//! Every stage reads the files written by the previous one. A unit of work (a table, or a
//! telemetry file) whose input is absent is skipped with a warning, and a unit that fails is
//! logged and does not stop the remaining units. Only a failing collection aborts the run.

use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand_distr::Normal;
use serde_json::json;
use strum::IntoEnumIterator;

use crate::{
    cleaner,
    collector::{self, CollectError},
    comparator::{self, EvaluationResult, ModelEvaluation},
    config::{PipelineConfig, TrainSettings},
    entries::{write_json, TableEntry},
    labeler::{self, DEFAULT_SIGNALS},
    preprocessor::{self, TableKind},
    report,
    table::Table,
    trainer::{self, TrainingSummary},
    util::{Outcome, PathBufExt},
};

/// File name of the rendered comparison report.
pub const REPORT_FILE: &str = "model_evaluation_report.txt";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Data collection failed: {0}")]
    Collect(#[from] CollectError),
    #[error("Table error: {0}")]
    Table(#[from] crate::table::TableError),
    #[error("Invalid signal distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),
}

/// Where the collected table entries come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Dump the tables from the running switch.
    Switch,
    /// Write synthetic entries and telemetry instead of talking to a switch.
    Simulated,
}

/// What the pipeline produced.
#[derive(Debug, Default)]
pub struct PipelineSummary {
    /// Units of work that were done, with their training results.
    pub trained: Vec<(String, TrainingSummary)>,
    /// Units of work whose input was absent.
    pub skipped: Vec<String>,
    /// Units of work that failed, with the error message.
    pub failed: Vec<(String, String)>,
    /// Path of the comparison report, if it was written.
    pub report: Option<PathBuf>,
}

impl PipelineSummary {
    fn record<T, E: std::fmt::Display>(
        &mut self,
        unit: &str,
        result: Result<Outcome<T>, E>,
    ) -> Option<T> {
        match result {
            Ok(Outcome::Done(t)) => Some(t),
            Ok(absent) => {
                absent.warn_absent(unit);
                self.skipped.push(unit.to_string());
                None
            }
            Err(e) => {
                log::error!("{unit} failed: {e}");
                self.failed.push((unit.to_string(), e.to_string()));
                None
            }
        }
    }
}

/// Synthetic forwarding entries of `kind`, mirroring a small lab setup.
pub fn simulated_entries(kind: TableKind) -> Vec<TableEntry> {
    let values = match kind {
        TableKind::Ethernet => (1..=5)
            .zip([1, 2, 1, 2, 1])
            .map(|(host, port)| {
                json!({
                    "match_fields": {"hdr.ethernet.dstAddr": format!("00:00:00:00:00:{host:02x}")},
                    "action_name": "set_egress_port",
                    "action_params": {"port": port},
                })
            })
            .collect::<Vec<_>>(),
        TableKind::Ipv4 => [("10.0.1.1", 1), ("10.0.2.1", 2), ("10.0.1.2", 1), ("10.0.3.1", 3), ("10.0.2.2", 2)]
            .into_iter()
            .map(|(ip, port)| {
                json!({
                    "match_fields": {"hdr.ipv4.dstAddr": ip, "hdr.ipv4.dstAddr_prefix_len": 24},
                    "action_name": "ipv4_forward",
                    "action_params": {"port": port, "dst_mac": format!("00:00:00:00:00:{port:02x}")},
                })
            })
            .collect(),
    };
    values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

/// Synthetic telemetry with `n` samples of all default signals. Every 20th sample has one signal
/// far off its normal range.
pub fn simulated_telemetry(n: usize, seed: u64) -> Result<Table, PipelineError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = Table::new(["timestamp", "port"].into_iter().chain(DEFAULT_SIGNALS))?;
    // (mean, std) of every signal
    let signals: Vec<(Normal<f64>, f64)> = [(2.0, 1.0), (2.0, 1.0), (5.0, 2.0), (0.5, 0.5), (1.5, 0.3), (20.0, 5.0)]
        .into_iter()
        .map(|(mean, sigma)| Ok((Normal::new(mean, sigma)?, sigma)))
        .collect::<Result<Vec<_>, PipelineError>>()?;
    for i in 0..n {
        let anomalous = i % 20 == 19;
        let spiked = rng.gen_range(0..signals.len());
        let mut row = vec![Some((1_700_000_000 + i).to_string()), Some((i % 4 + 1).to_string())];
        for (j, (normal, sigma)) in signals.iter().enumerate() {
            let mut value: f64 = normal.sample(&mut rng).max(0.0);
            if anomalous && j == spiked {
                value += 20.0 * sigma;
            }
            row.push(Some(format!("{value:.3}")));
        }
        table.push_row(row)?;
    }
    Ok(table)
}

/// Write the synthetic entries of all table kinds and a synthetic telemetry table.
pub fn write_simulated_inputs(collected_dir: impl AsRef<Path>) -> Result<(), PipelineError> {
    let dir = collected_dir.as_ref();
    std::fs::create_dir_all(dir)?;
    for kind in TableKind::iter() {
        write_json(kind.collected_path(dir), &simulated_entries(kind))?;
    }
    simulated_telemetry(200, crate::RANDOM_STATE)?.write_csv(dir.then("telemetry.csv"))?;
    log::info!("Wrote simulated table entries and telemetry to {dir:?}");
    Ok(())
}

/// Telemetry tables in the collected data directory (files named `*telemetry*.csv`).
fn telemetry_files(collected_dir: &Path) -> Vec<PathBuf> {
    let pattern = collected_dir.join("*telemetry*.csv");
    match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths.flatten().collect(),
        Err(e) => {
            log::warn!("Cannot search for telemetry tables: {e}");
            Vec::new()
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Train on the table in `input`, and evaluate the persisted models again afterwards.
fn train_unit(
    summary: &mut PipelineSummary,
    evaluations: &mut EvaluationResult,
    unit: &str,
    input: &Path,
    settings: &TrainSettings,
    outdir: &Path,
) {
    let trained = summary.record(
        &format!("training on {unit}"),
        trainer::train_evaluate_file(input, settings, outdir),
    );
    let Some(trained) = trained else { return };
    println!(
        "{unit}:\n{}",
        trainer::format_metrics_table(&trained.rows())
    );
    summary.trained.push((unit.to_string(), trained));

    let compared = Table::read_csv(input)
        .map_err(|e| e.to_string())
        .and_then(|table| {
            comparator::compare_models(&table, outdir, &settings.models).map_err(|e| e.to_string())
        });
    match compared {
        Ok(result) => evaluations
            .models
            .extend(result.models.into_iter().map(|m| ModelEvaluation {
                name: format!("{unit}/{}", m.name),
                metrics: m.metrics,
            })),
        Err(e) => {
            log::error!("Comparison on {unit} failed: {e}");
            summary.failed.push((format!("comparison on {unit}"), e));
        }
    }
}

/// Run all stages.
pub async fn run_pipeline(
    config: &PipelineConfig,
    source: Source,
) -> Result<PipelineSummary, PipelineError> {
    config.dirs.create_all()?;
    match source {
        Source::Simulated => write_simulated_inputs(&config.dirs.collected_data)?,
        Source::Switch => {
            let mut collector_config = config.collector.clone();
            collector_config.output_dir = config.dirs.collected_data.clone();
            let mut client = collector::switch_cli(&collector_config)?;
            collector::collect(&mut client, &collector_config).await?;
        }
    }
    run_stages(config)
}

/// Run all stages after the collection, on the files in `config.dirs.collected_data`.
pub fn run_stages(config: &PipelineConfig) -> Result<PipelineSummary, PipelineError> {
    let dirs = &config.dirs;
    dirs.create_all()?;
    let mut summary = PipelineSummary::default();
    let mut evaluations = EvaluationResult::default();

    for kind in TableKind::iter() {
        let processed = kind.processed_path(&dirs.processed_data);
        let cleaned = kind.cleaned_path(&dirs.cleaned_data);
        summary.record(
            &format!("preprocessing of the {kind} table"),
            preprocessor::preprocess_file(kind, kind.collected_path(&dirs.collected_data), &processed),
        );
        summary.record(
            &format!("cleaning of the {kind} table"),
            cleaner::clean_file(&processed, &cleaned, kind.required_field()),
        );

        let settings = TrainSettings {
            schema: Some(kind.feature_schema()),
            ..config.forwarding.clone()
        };
        train_unit(
            &mut summary,
            &mut evaluations,
            &kind.to_string(),
            &cleaned,
            &settings,
            &dirs.models.clone().then(kind.to_string()),
        );
    }

    let telemetry = telemetry_files(&dirs.collected_data);
    if telemetry.is_empty() {
        log::warn!("No telemetry tables in {:?}. Skipping anomaly detection.", dirs.collected_data);
    }
    for input in telemetry {
        let stem = file_stem(&input);
        let labeled = dirs.labeled_data.clone().then_named("labeled_{}.csv", &stem);
        let stats = summary.record(
            &format!("labeling of {stem}"),
            labeler::label_file(&input, &labeled, &config.label),
        );
        if stats.is_none() {
            continue;
        }
        train_unit(
            &mut summary,
            &mut evaluations,
            &stem,
            &labeled,
            &config.anomaly,
            &dirs.models.clone().then(&stem),
        );
    }

    let report_path = dirs.evaluation.clone().then(REPORT_FILE);
    match report::write_report(&evaluations, &report_path) {
        Ok(()) => summary.report = Some(report_path),
        Err(e) => log::error!("Cannot write the report to {report_path:?}: {e}"),
    }

    log::info!(
        "Pipeline done: {} trained, {} skipped, {} failed.",
        summary.trained.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simulated_entries_flatten() {
        let eth = preprocessor::flatten_entries(
            &simulated_entries(TableKind::Ethernet),
            TableKind::Ethernet.flatten_schema(),
        )
        .unwrap();
        assert_eq!(eth.len(), 5);
        let ports: Vec<_> = eth.column("egress_port").unwrap().flatten().collect();
        assert_eq!(ports, vec!["1", "2", "1", "2", "1"]);

        let ipv4 = preprocessor::flatten_entries(
            &simulated_entries(TableKind::Ipv4),
            TableKind::Ipv4.flatten_schema(),
        )
        .unwrap();
        let macs: Vec<_> = ipv4.column("dst_mac").unwrap().flatten().collect();
        assert_eq!(macs[3], "00:00:00:00:00:03");
        let prefix: Vec<_> = ipv4.column("prefix_len").unwrap().flatten().collect();
        assert_eq!(prefix, vec!["24"; 5]);
    }

    #[test]
    fn simulated_telemetry_has_anomalies() {
        let mut t = simulated_telemetry(200, 1).unwrap();
        assert_eq!(t.len(), 200);
        assert_eq!(t, simulated_telemetry(200, 1).unwrap());
        let stats = labeler::label(&mut t, &Default::default()).unwrap();
        assert_eq!(stats.signals.len(), DEFAULT_SIGNALS.len());
        assert!(stats.anomalies >= 5, "only {} anomalies", stats.anomalies);
        assert!(stats.anomalies < 40, "{} anomalies", stats.anomalies);
    }

    #[test]
    fn absent_unit_is_skipped() {
        let mut summary = PipelineSummary::default();
        let dir = tempfile::tempdir().unwrap();
        let out = summary.record(
            "cleaning",
            cleaner::clean_file(dir.path().then("absent.csv"), dir.path().then("out.csv"), "x"),
        );
        assert!(out.is_none());
        assert_eq!(summary.skipped, vec!["cleaning".to_string()]);
        assert!(summary.failed.is_empty());
    }
}
