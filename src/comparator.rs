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
//! Module that compares persisted classifiers on a labeled table.
//!
//! Every artifact is reloaded, the table is checked against the artifact's feature schema, the
//! artifact's held-out split is recreated, and the metrics are computed with weighted averaging.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    metrics::{Average, MetricsRecord},
    models::{train_test_split, ModelKind},
    schema::SchemaError,
    table::Table,
    trainer::{EncodedTarget, TrainError, TrainedPipeline, TrainingSummary},
};

const ARTIFACT_SUFFIX: &str = ".model.json";

#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid artifact pattern: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("Table does not match the features of {path:?}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
    #[error("Cannot evaluate {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: TrainError,
    },
}

/// Metrics of a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub name: String,
    pub metrics: MetricsRecord,
}

/// Metrics of all compared models, in evaluation order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub models: Vec<ModelEvaluation>,
}

impl EvaluationResult {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CompareError> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Self, CompareError> {
        Ok(serde_json::from_str(&fs::read_to_string(path.as_ref())?)?)
    }
}

impl From<&TrainingSummary> for EvaluationResult {
    fn from(summary: &TrainingSummary) -> Self {
        Self {
            models: summary
                .outcomes
                .iter()
                .map(|o| ModelEvaluation {
                    name: o.name(),
                    metrics: o.metrics.clone(),
                })
                .collect(),
        }
    }
}

/// Find all persisted pipelines in `dir`, sorted by file name. Files whose name is not a known
/// variant are ignored.
pub fn discover_artifacts(dir: impl AsRef<Path>) -> Result<Vec<ModelKind>, CompareError> {
    let pattern = dir.as_ref().join(format!("*{ARTIFACT_SUFFIX}"));
    let mut kinds = Vec::new();
    for path in glob::glob(&pattern.to_string_lossy())?.flatten() {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(ARTIFACT_SUFFIX))
            .unwrap_or_default();
        match ModelKind::from_str(name) {
            Ok(kind) => kinds.push(kind),
            Err(_) => log::debug!("Ignoring unknown artifact {path:?}"),
        }
    }
    Ok(kinds)
}

/// Evaluate one persisted pipeline on its held-out rows of `table`.
pub fn evaluate_artifact(
    table: &Table,
    path: impl AsRef<Path>,
) -> Result<ModelEvaluation, CompareError> {
    let path = path.as_ref();
    let artifact = |source| CompareError::Artifact {
        path: path.to_path_buf(),
        source,
    };
    let pipeline = TrainedPipeline::load(path).map_err(artifact)?;
    pipeline
        .schema()
        .validate(table)
        .map_err(|source| CompareError::Schema {
            path: path.to_path_buf(),
            source,
        })?;

    let data = EncodedTarget::new(table, &pipeline.target).map_err(artifact)?;
    let split = train_test_split(&data.y, &pipeline.split)
        .map_err(|e| artifact(TrainError::Split(e)))?;
    let metrics = pipeline
        .evaluate(&data, &split.test, Average::Weighted)
        .map_err(artifact)?;
    log::info!(
        "Evaluated {} on {} held-out rows: acc={:.4} f1={:.4}",
        pipeline.name,
        split.test.len(),
        metrics.accuracy,
        metrics.f1_score
    );
    Ok(ModelEvaluation {
        name: pipeline.name,
        metrics,
    })
}

/// Evaluate the persisted pipelines of `kinds` found in `dir`. Absent artifacts are skipped.
pub fn compare_models(
    table: &Table,
    dir: impl AsRef<Path>,
    kinds: &[ModelKind],
) -> Result<EvaluationResult, CompareError> {
    let dir = dir.as_ref();
    let mut result = EvaluationResult::default();
    for kind in kinds {
        let path = TrainedPipeline::path(dir, *kind);
        if !path.exists() {
            log::warn!("Model file {path:?} not found. Skipping {kind}.");
            continue;
        }
        result.models.push(evaluate_artifact(table, &path)?);
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::PathBufExt;

    #[test]
    fn discover_known_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["RandomForest.model.json", "NeuralNet_MLP.model.json", "Other.model.json"] {
            fs::write(dir.path().then(name), "{}").unwrap();
        }
        fs::write(dir.path().then("RandomForest_report.txt"), "").unwrap();
        assert_eq!(
            discover_artifacts(dir.path()).unwrap(),
            vec![ModelKind::NeuralNetMlp, ModelKind::RandomForest]
        );
    }

    #[test]
    fn absent_artifacts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::from_reader("x,label\n1,0\n2,1\n".as_bytes()).unwrap();
        let result = compare_models(&table, dir.path(), &[ModelKind::GradientBoosting]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn corrupt_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(TrainedPipeline::path(dir.path(), ModelKind::RandomForest), "not json").unwrap();
        let table = Table::from_reader("x,label\n1,0\n2,1\n".as_bytes()).unwrap();
        assert!(matches!(
            compare_models(&table, dir.path(), &[ModelKind::RandomForest]),
            Err(CompareError::Artifact { .. })
        ));
    }

    #[test]
    fn json_roundtrip_keeps_nan() {
        let dir = tempfile::tempdir().unwrap();
        let y = vec!["0".to_string(), "0".to_string()];
        let result = EvaluationResult {
            models: vec![ModelEvaluation {
                name: "RandomForest".to_string(),
                metrics: MetricsRecord::compute(&y, &y, Some(&[0.1, 0.2]), Average::Binary),
            }],
        };
        let path = dir.path().then("evaluation.json");
        result.write_json(&path).unwrap();
        let read = EvaluationResult::read_json(&path).unwrap();
        assert_eq!(read.models[0].name, "RandomForest");
        assert!(read.models[0].metrics.roc_auc.is_nan());
        assert_eq!(read.models[0].metrics.accuracy, 1.0);
    }
}
