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
//! Module that trains and evaluates classifiers on a labeled table.
//!
//! The table is split once into a training and a held-out test set. A preprocessing transform is
//! fitted on the training rows, and every scheduled classifier variant is fitted independently on
//! the same encoded training set. For every variant, the trainer measures the fit time and the
//! prediction latency, computes the metrics on the test set, and writes
//!
//! - `<name>.model.json`: the fitted pipeline (transform and classifier),
//! - `<name>_report.txt`: the per-class classification report,
//! - `<name>_confusion_matrix.json`: the confusion matrix and its class labels.
//!
//! Finally, `model_metrics.csv` contains one row per variant, sorted by F1-score.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use itertools::Itertools;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    config::{SplitSettings, TrainSettings},
    metrics::{self, Average, MetricsRecord, POSITIVE_CLASS},
    models::{
        argmax_rows, train_test_split, Classifier, ColumnTransform, Model, ModelError, ModelKind,
        Split, SplitError,
    },
    schema::{FeatureSchema, SchemaError},
    table::{Table, TableError},
    util::PathBufExt,
};

/// Name of the consolidated metrics table.
pub const METRICS_FILE: &str = "model_metrics.csv";

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Target column `{0}` not found in the table.")]
    MissingTarget(String),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Cannot split the table: {0}")]
    Split(#[from] SplitError),
    #[error("Cannot fit {model}: {source}")]
    Fit {
        model: ModelKind,
        #[source]
        source: ModelError,
    },
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// The target of every row with a present target value, and the sorted list of classes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTarget {
    /// Table without the rows whose target is missing.
    pub table: Table,
    pub classes: Vec<String>,
    /// Class index of every row.
    pub y: Vec<usize>,
}

impl EncodedTarget {
    pub fn new(table: &Table, target: &str) -> Result<Self, TrainError> {
        let idx = table
            .column_index(target)
            .map_err(|_| TrainError::MissingTarget(target.to_string()))?;
        let mut table = table.clone();
        let before = table.len();
        table.retain_rows(|row| row[idx].is_some());
        if table.len() < before {
            log::warn!(
                "Ignoring {} rows with a missing `{target}` value.",
                before - table.len()
            );
        }

        let values: Vec<&str> = table.rows().iter().filter_map(|r| r[idx].as_deref()).collect();
        let classes: Vec<String> = values
            .iter()
            .unique()
            .map(|c| c.to_string())
            .sorted_by(|a, b| metrics::compare_classes(a, b))
            .collect();
        let y = values
            .iter()
            .map(|v| classes.iter().position(|c| c == v).unwrap_or_default())
            .collect();
        Ok(Self { table, classes, y })
    }

    /// Class names of the given rows.
    pub fn names(&self, rows: &[usize]) -> Vec<String> {
        rows.iter().map(|i| self.classes[self.y[*i]].clone()).collect()
    }
}

/// Column of the positive class in the probability matrix, if there is one.
fn positive_column(classes: &[String]) -> Option<usize> {
    classes.iter().position(|c| c == POSITIVE_CLASS)
}

/// Persisted artifact: everything needed to predict the target of a table.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedPipeline {
    pub name: String,
    /// Local time at which the pipeline was fitted.
    #[serde(default)]
    pub trained_at: String,
    pub target: String,
    pub classes: Vec<String>,
    pub split: SplitSettings,
    pub transform: ColumnTransform,
    pub model: Model,
}

impl TrainedPipeline {
    /// File name of the pipeline of `kind` in `dir`.
    pub fn path(dir: impl AsRef<Path>, kind: ModelKind) -> PathBuf {
        dir.as_ref().then_named("{}.model.json", &kind.to_string())
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.transform.schema()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TrainError> {
        let file = fs::File::create(path.as_ref())?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainError> {
        let file = fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Class probabilities of every row. The table must match the feature schema.
    pub fn predict_proba(&self, table: &Table) -> Result<Array2<f64>, TrainError> {
        let x = self.transform.transform(table)?;
        Ok(self.model.predict_proba(&x)?)
    }

    /// Predicted class name of every row.
    pub fn predict(&self, table: &Table) -> Result<Vec<String>, TrainError> {
        Ok(self.decode(&self.predict_proba(table)?))
    }

    fn decode(&self, proba: &Array2<f64>) -> Vec<String> {
        argmax_rows(proba)
            .into_iter()
            .map(|k| self.classes[k].clone())
            .collect()
    }

    /// Predict the test rows of `data` and compute the metrics.
    pub fn evaluate(
        &self,
        data: &EncodedTarget,
        test: &[usize],
        average: Average,
    ) -> Result<MetricsRecord, TrainError> {
        let proba = self.predict_proba(&data.table.take_rows(test))?;
        let y_pred = self.decode(&proba);
        let scores = positive_column(&self.classes).map(|k| proba.column(k).to_vec());
        Ok(MetricsRecord::compute(
            &data.names(test),
            &y_pred,
            scores.as_deref(),
            average,
        ))
    }
}

/// One row of the consolidated metrics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetricsRow {
    pub model: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub fit_time_s: f64,
    pub predict_time_ms_per_1k: f64,
}

/// Result of training and evaluating a single variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutcome {
    pub kind: ModelKind,
    pub metrics: MetricsRecord,
    pub fit_time_s: f64,
    pub predict_time_ms_per_1k: f64,
    /// Path of the persisted pipeline, if it could be written.
    pub artifact: Option<PathBuf>,
}

impl ModelOutcome {
    pub fn name(&self) -> String {
        self.kind.to_string()
    }

    pub fn row(&self) -> ModelMetricsRow {
        ModelMetricsRow {
            model: self.name(),
            accuracy: self.metrics.accuracy,
            precision: self.metrics.precision,
            recall: self.metrics.recall,
            f1: self.metrics.f1_score,
            roc_auc: self.metrics.roc_auc,
            fit_time_s: self.fit_time_s,
            predict_time_ms_per_1k: self.predict_time_ms_per_1k,
        }
    }
}

/// A table prepared for training: split, encoded, and with a fitted transform.
pub struct Prepared {
    pub settings: TrainSettings,
    pub data: EncodedTarget,
    pub split: Split,
    pub transform: ColumnTransform,
    pub average: Average,
    x_train: Array2<f64>,
    x_test: Array2<f64>,
}

impl Prepared {
    pub fn new(table: &Table, settings: &TrainSettings) -> Result<Self, TrainError> {
        let data = EncodedTarget::new(table, &settings.target)?;
        let schema = match &settings.schema {
            Some(schema) => schema.clone(),
            None => {
                let excluded: Vec<&str> = settings
                    .excluded
                    .iter()
                    .map(String::as_str)
                    .chain([settings.target.as_str()])
                    .collect();
                FeatureSchema::infer(&data.table, &excluded)?
            }
        };
        schema.validate(&data.table)?;

        let split = train_test_split(&data.y, &settings.split)?;
        let train = data.table.take_rows(&split.train);
        let transform = ColumnTransform::fit(&train, &schema)?;
        let x_train = transform.transform(&train)?;
        let x_test = transform.transform(&data.table.take_rows(&split.test))?;
        let average = Average::for_classes(&data.classes);

        log::info!(
            "Training on {} rows, testing on {} rows, with {} encoded features and classes {:?} ({:?} average)",
            split.train.len(),
            split.test.len(),
            transform.n_features(),
            data.classes,
            average
        );

        Ok(Self {
            settings: settings.clone(),
            data,
            split,
            transform,
            average,
            x_train,
            x_test,
        })
    }

    fn y_train(&self) -> Vec<usize> {
        self.split.train.iter().map(|i| self.data.y[*i]).collect()
    }

    /// Fit, evaluate, and persist a single classifier variant.
    pub fn run(&self, kind: ModelKind, outdir: impl AsRef<Path>) -> Result<ModelOutcome, TrainError> {
        let outdir = outdir.as_ref();
        fs::create_dir_all(outdir)?;
        let name = kind.to_string();

        let mut model = kind.build(self.settings.split.seed);
        let start = Instant::now();
        model
            .fit(&self.x_train, &self.y_train(), self.data.classes.len())
            .map_err(|source| TrainError::Fit {
                model: kind,
                source,
            })?;
        let fit_time_s = start.elapsed().as_secs_f64();

        let start = Instant::now();
        let proba = model.predict_proba(&self.x_test)?;
        let y_pred: Vec<String> = argmax_rows(&proba)
            .into_iter()
            .map(|k| self.data.classes[k].clone())
            .collect();
        let predict_time = start.elapsed().as_secs_f64();
        let n_test = self.split.test.len();
        let predict_time_ms_per_1k = if n_test > 0 {
            predict_time / n_test as f64 * 1e6
        } else {
            f64::NAN
        };

        let y_test = self.data.names(&self.split.test);
        let scores = positive_column(&self.data.classes).map(|k| proba.column(k).to_vec());
        let metrics = MetricsRecord::compute(&y_test, &y_pred, scores.as_deref(), self.average);
        if metrics.roc_auc.is_nan() {
            log::debug!("ROC-AUC of {name} is undefined");
        }

        fs::write(
            outdir.then_named("{}_report.txt", &name),
            metrics::classification_report(&y_test, &y_pred, 4),
        )?;
        fs::write(
            outdir.then_named("{}_confusion_matrix.json", &name),
            serde_json::to_string_pretty(&metrics.confusion_matrix)?,
        )?;

        let pipeline = TrainedPipeline {
            name: name.clone(),
            trained_at: p4sentry_utils::other::get_readable_timestamp(),
            target: self.settings.target.clone(),
            classes: self.data.classes.clone(),
            split: self.settings.split,
            transform: self.transform.clone(),
            model,
        };
        let path = TrainedPipeline::path(outdir, kind);
        let artifact = match pipeline.save(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                log::warn!("Cannot save {name} to {path:?}: {e}");
                None
            }
        };

        log::info!(
            "[OK] {name}: acc={:.4} f1={:.4} recall={:.4} auc={:.4} fit={:.2}s",
            metrics.accuracy,
            metrics.f1_score,
            metrics.recall,
            metrics.roc_auc,
            fit_time_s
        );

        Ok(ModelOutcome {
            kind,
            metrics,
            fit_time_s,
            predict_time_ms_per_1k,
            artifact,
        })
    }
}

/// Result of training all scheduled variants.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub outcomes: Vec<ModelOutcome>,
    pub metrics_path: PathBuf,
}

impl TrainingSummary {
    /// Consolidated rows, sorted by F1-score (descending).
    pub fn rows(&self) -> Vec<ModelMetricsRow> {
        sorted_rows(&self.outcomes)
    }
}

fn sorted_rows(outcomes: &[ModelOutcome]) -> Vec<ModelMetricsRow> {
    outcomes
        .iter()
        .map(ModelOutcome::row)
        .sorted_by(|a, b| b.f1.total_cmp(&a.f1))
        .collect()
}

/// Write the consolidated metrics table, sorted by F1-score.
pub fn write_metrics_table(
    outcomes: &[ModelOutcome],
    path: impl AsRef<Path>,
) -> Result<(), TrainError> {
    if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())?;
    for row in sorted_rows(outcomes) {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Render the consolidated rows as an aligned text table.
pub fn format_metrics_table(rows: &[ModelMetricsRow]) -> String {
    let width = rows.iter().map(|r| r.model.len()).chain([5]).max().unwrap_or(5);
    let mut out = format!(
        "{:>width$} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10} {:>22}\n",
        "model", "accuracy", "precision", "recall", "f1", "roc_auc", "fit_time_s", "predict_time_ms_per_1k"
    );
    for r in rows {
        out.push_str(&format!(
            "{:>width$} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>10.4} {:>22.4}\n",
            r.model, r.accuracy, r.precision, r.recall, r.f1, r.roc_auc, r.fit_time_s, r.predict_time_ms_per_1k
        ));
    }
    out
}

/// Train and evaluate all variants of `settings` on `table`, writing all outputs to `outdir`.
pub fn train_evaluate(
    table: &Table,
    settings: &TrainSettings,
    outdir: impl AsRef<Path>,
) -> Result<TrainingSummary, TrainError> {
    let outdir = outdir.as_ref();
    fs::create_dir_all(outdir)?;
    let prepared = Prepared::new(table, settings)?;
    let outcomes = settings
        .models
        .iter()
        .map(|kind| prepared.run(*kind, outdir))
        .collect::<Result<Vec<_>, _>>()?;
    let metrics_path = outdir.then(METRICS_FILE);
    write_metrics_table(&outcomes, &metrics_path)?;
    log::info!("Consolidated results saved to {metrics_path:?}");
    Ok(TrainingSummary {
        outcomes,
        metrics_path,
    })
}

/// Read the table in `input` and train all variants on it.
pub fn train_evaluate_file(
    input: impl AsRef<Path>,
    settings: &TrainSettings,
    outdir: impl AsRef<Path>,
) -> Result<crate::util::Outcome<TrainingSummary>, TrainError> {
    crate::util::Outcome::if_exists(input, |input| {
        train_evaluate(&Table::read_csv(input)?, settings, outdir)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn encode_target_natural_order() {
        let t = table("x,egress_port\n1,10\n2,2\n3,\n4,2\n");
        let e = EncodedTarget::new(&t, "egress_port").unwrap();
        assert_eq!(e.table.len(), 3);
        assert_eq!(e.classes, vec!["2", "10"]);
        assert_eq!(e.y, vec![1, 0, 0]);
        assert_eq!(e.names(&[0, 2]), vec!["10", "2"]);
    }

    #[test]
    fn missing_target_is_fatal() {
        let t = table("x,y\n1,2\n");
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            train_evaluate(&t, &TrainSettings::default(), dir.path()),
            Err(TrainError::MissingTarget(c)) if c == "label"
        ));
    }

    #[test]
    fn rows_sorted_by_f1() {
        let outcome = |kind, f1_score| ModelOutcome {
            kind,
            metrics: MetricsRecord {
                accuracy: 0.5,
                precision: 0.5,
                recall: 0.5,
                f1_score,
                roc_auc: f64::NAN,
                confusion_matrix: metrics::ConfusionMatrix::new(&[], &[]),
            },
            fit_time_s: 0.1,
            predict_time_ms_per_1k: 1.0,
            artifact: None,
        };
        let outcomes = vec![
            outcome(ModelKind::NeuralNetMlp, 0.2),
            outcome(ModelKind::RandomForest, 0.9),
            outcome(ModelKind::GradientBoosting, 0.5),
        ];
        let names: Vec<String> = sorted_rows(&outcomes).into_iter().map(|r| r.model).collect();
        assert_eq!(names, vec!["RandomForest", "GradientBoosting", "NeuralNet_MLP"]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(METRICS_FILE);
        write_metrics_table(&outcomes, &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next(),
            Some("model,accuracy,precision,recall,f1,roc_auc,fit_time_s,predict_time_ms_per_1k")
        );
        assert!(lines.next().unwrap().starts_with("RandomForest,0.5,0.5,0.5,0.9,NaN,"));
        assert!(format_metrics_table(&sorted_rows(&outcomes)).contains("NeuralNet_MLP"));
    }

    #[test]
    fn no_models_still_writes_metrics() {
        let t = table("x,label
1,0
2,1
3,0
4,1
5,0
6,1
7,0
8,1
");
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("nested").join("models");
        let settings = TrainSettings {
            models: Vec::new(),
            ..Default::default()
        };
        let summary = train_evaluate(&t, &settings, &outdir).unwrap();
        assert!(summary.outcomes.is_empty());
        assert!(summary.metrics_path.exists());
        assert!(outdir.is_dir());
    }
}
