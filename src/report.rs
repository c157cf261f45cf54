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
//! Module that renders the human-readable evaluation report.

use std::{fs, path::Path};

use crate::comparator::EvaluationResult;

pub const REPORT_TITLE: &str = "Model Evaluation Report";

/// Turn a metric key like `f1_score` into its label `F1 Score`. A letter is capitalized when it
/// does not follow another letter; all other letters are lower-cased.
pub fn title_case(key: &str) -> String {
    let mut prev_is_letter = false;
    key.replace('_', " ")
        .chars()
        .map(|c| {
            let out = if prev_is_letter {
                c.to_lowercase().collect::<String>()
            } else {
                c.to_uppercase().collect::<String>()
            };
            prev_is_letter = c.is_alphabetic();
            out
        })
        .collect()
}

/// Render the report: a header, followed by one section per model in the given order.
pub fn render_report(results: &EvaluationResult) -> String {
    let mut out = format!("{REPORT_TITLE}\n{}\n\n", "=".repeat(35));
    for model in results.models.iter() {
        out.push_str(&format!("Model: {}\n", model.name));
        for (key, value) in model.metrics.entries() {
            out.push_str(&format!(" {}: {value:.4}\n", title_case(key)));
        }
        out.push('\n');
    }
    out
}

/// Render the report and write it to `path`, creating the parent directory if needed.
pub fn write_report(results: &EvaluationResult, path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_report(results))?;
    log::info!("Evaluation report saved to {path:?}");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        comparator::ModelEvaluation,
        metrics::{ConfusionMatrix, MetricsRecord},
    };

    fn record(accuracy: f64, roc_auc: f64) -> MetricsRecord {
        MetricsRecord {
            accuracy,
            precision: 0.5,
            recall: 1.0 / 3.0,
            f1_score: 0.4,
            roc_auc,
            confusion_matrix: ConfusionMatrix::new(&[], &[]),
        }
    }

    #[test]
    fn labels() {
        assert_eq!(title_case("accuracy"), "Accuracy");
        assert_eq!(title_case("f1_score"), "F1 Score");
        assert_eq!(title_case("roc_auc"), "Roc Auc");
    }

    #[test]
    fn two_models() {
        let results = EvaluationResult {
            models: vec![
                ModelEvaluation {
                    name: "NeuralNet_MLP".to_string(),
                    metrics: record(0.91234, 0.95),
                },
                ModelEvaluation {
                    name: "RandomForest".to_string(),
                    metrics: record(1.0, f64::NAN),
                },
            ],
        };
        let expected = "Model Evaluation Report\n\
            ===================================\n\
            \n\
            Model: NeuralNet_MLP\n \
            Accuracy: 0.9123\n \
            Precision: 0.5000\n \
            Recall: 0.3333\n \
            F1 Score: 0.4000\n \
            Roc Auc: 0.9500\n\
            \n\
            Model: RandomForest\n \
            Accuracy: 1.0000\n \
            Precision: 0.5000\n \
            Recall: 0.3333\n \
            F1 Score: 0.4000\n \
            Roc Auc: NaN\n\
            \n";
        assert_eq!(render_report(&results), expected);
        assert_eq!(render_report(&results), render_report(&results.clone()));
    }

    #[test]
    fn empty_results() {
        let rendered = render_report(&EvaluationResult::default());
        assert_eq!(rendered, format!("{REPORT_TITLE}\n{}\n\n", "=".repeat(35)));
    }
}
