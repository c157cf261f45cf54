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
//! Module that labels telemetry rows as anomalous using standard scores.
//!
//! For every candidate signal present in the table, missing values are replaced by the signal's
//! median (for scoring only), and the population z-score of every row is computed. A row is
//! anomalous (`label = 1`) if the largest |z| over all present signals exceeds the threshold.
//!
//! A signal with zero variance has no defined z-score. Such a signal contributes no score and can
//! therefore never mark a row as anomalous. If no signal is present at all, every row is normal.
use std::path::Path;

use p4sentry_utils::stats;

use crate::{
    config::LabelSettings,
    table::{Table, TableError},
    util::Outcome,
};

/// Candidate telemetry signals.
pub const DEFAULT_SIGNALS: [&str; 6] = [
    "rx_errors",
    "tx_errors",
    "drops",
    "collisions",
    "latency_ms",
    "queue_occupancy",
];

/// A row is anomalous if any |z| exceeds this value.
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Name of the label column.
pub const LABEL: &str = "label";

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("Signal `{column}` is not numeric: {source}")]
    NonNumericSignal {
        column: String,
        #[source]
        source: TableError,
    },
}

/// Outcome of labeling a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelStats {
    /// Signals found in the table.
    pub signals: Vec<String>,
    /// Signals skipped because they have zero variance.
    pub constant_signals: Vec<String>,
    pub rows: usize,
    pub anomalies: usize,
}

/// Compute the maximum |z| per row over all present signals. Rows without any defined score get
/// `None`.
pub fn max_abs_scores(
    table: &Table,
    settings: &LabelSettings,
) -> Result<(Vec<Option<f64>>, LabelStats), LabelError> {
    let mut max_scores: Vec<Option<f64>> = vec![None; table.len()];
    let mut summary = LabelStats {
        rows: table.len(),
        ..Default::default()
    };

    for signal in settings.signals.iter().filter(|s| table.has_column(s)) {
        let values = table
            .numeric_column(signal)
            .map_err(|source| LabelError::NonNumericSignal {
                column: signal.clone(),
                source,
            })?;
        summary.signals.push(signal.clone());

        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let median = stats::median(&present);
        let filled: Vec<f64> = values.iter().map(|v| v.unwrap_or(median)).collect();

        let Some(scores) = stats::zscores(&filled) else {
            log::debug!("signal `{signal}` has zero variance, ignoring it.");
            summary.constant_signals.push(signal.clone());
            continue;
        };

        for (max, z) in max_scores.iter_mut().zip(scores) {
            let z = z.abs();
            if z.is_nan() {
                continue;
            }
            *max = Some(max.map_or(z, |m| m.max(z)));
        }
    }

    Ok((max_scores, summary))
}

/// Add (or overwrite) the `label` column of `table`.
pub fn label(table: &mut Table, settings: &LabelSettings) -> Result<LabelStats, LabelError> {
    let (max_scores, mut stats) = max_abs_scores(table, settings)?;
    let labels: Vec<bool> = max_scores
        .iter()
        .map(|z| z.is_some_and(|z| z > settings.threshold))
        .collect();
    stats.anomalies = labels.iter().filter(|l| **l).count();
    table.set_column(
        LABEL,
        labels
            .into_iter()
            .map(|l| Some(if l { "1" } else { "0" }.to_string()))
            .collect(),
    )?;
    if stats.signals.is_empty() {
        log::warn!("None of the signals {:?} is present; all rows are normal.", settings.signals);
    }
    log::info!(
        "Labeled {} of {} rows as anomalous using signals {:?}.",
        stats.anomalies,
        stats.rows,
        stats.signals
    );
    Ok(stats)
}

/// Label the table in `input` and write it to `output`.
pub fn label_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    settings: &LabelSettings,
) -> Result<Outcome<LabelStats>, LabelError> {
    Outcome::if_exists(input, |input| {
        let mut table = Table::read_csv(input)?;
        let stats = label(&mut table, settings)?;
        table.write_csv(output.as_ref())?;
        Ok(stats)
    })
}
