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
//! Module containing the classifier variants and the common interface to fit them and to predict
//! class-membership probabilities.
//!
//! Classes are always encoded as indices `0..n_classes`. Mapping the original labels to indices
//! (and back) is the responsibility of the caller.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

pub mod gradient_boosting;
pub mod logistic;
pub mod mlp;
pub mod random_forest;
pub mod split;
pub mod transform;

pub use gradient_boosting::GradientBoosting;
pub use logistic::LogisticRegression;
pub use mlp::MlpClassifier;
pub use random_forest::RandomForest;
pub use split::{train_test_split, Split, SplitError};
pub use transform::ColumnTransform;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("smartcore error: {0}")]
    Smartcore(#[from] smartcore::error::Failed),
    #[error("Cannot fit a model on an empty training set.")]
    EmptyTrainingSet,
    #[error("Got {labels} labels for {rows} rows.")]
    LabelMismatch { rows: usize, labels: usize },
    #[error("Label {label} is out of range for {n_classes} classes.")]
    LabelOutOfRange { label: usize, n_classes: usize },
    #[error("The model expects {expected} features, but got {found}.")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("The model was not fitted yet.")]
    NotFitted,
}

/// A multi-class classifier that predicts class-membership probabilities.
pub trait Classifier {
    /// Fit the classifier on the rows of `x` with class indices `y` (all below `n_classes`).
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<(), ModelError>;

    /// Probability of each class (columns) for each row of `x`. Rows sum up to 1.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, ModelError>;

    /// Most likely class of each row of `x`.
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>, ModelError> {
        Ok(argmax_rows(&self.predict_proba(x)?))
    }
}

/// Classifier variants. The names are used in file names and in all reports.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
    clap::ValueEnum,
)]
#[value(rename_all = "verbatim")]
pub enum ModelKind {
    #[serde(rename = "NeuralNet_MLP")]
    #[strum(serialize = "NeuralNet_MLP")]
    #[value(name = "NeuralNet_MLP")]
    NeuralNetMlp,
    RandomForest,
    GradientBoosting,
    LogisticRegression,
}

impl ModelKind {
    /// Build an unfitted model of this kind with its default hyper-parameters.
    pub fn build(&self, seed: u64) -> Model {
        match self {
            Self::NeuralNetMlp => Model::NeuralNetMlp(MlpClassifier::new(seed)),
            Self::RandomForest => Model::RandomForest(RandomForest::new(seed)),
            Self::GradientBoosting => Model::GradientBoosting(GradientBoosting::new()),
            Self::LogisticRegression => Model::LogisticRegression(LogisticRegression::new()),
        }
    }
}

/// A classifier of any variant.
#[derive(Debug, Serialize, Deserialize)]
pub enum Model {
    NeuralNetMlp(MlpClassifier),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::NeuralNetMlp(_) => ModelKind::NeuralNetMlp,
            Self::RandomForest(_) => ModelKind::RandomForest,
            Self::GradientBoosting(_) => ModelKind::GradientBoosting,
            Self::LogisticRegression(_) => ModelKind::LogisticRegression,
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::NeuralNetMlp(m) => m,
            Self::RandomForest(m) => m,
            Self::GradientBoosting(m) => m,
            Self::LogisticRegression(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Self::NeuralNetMlp(m) => m,
            Self::RandomForest(m) => m,
            Self::GradientBoosting(m) => m,
            Self::LogisticRegression(m) => m,
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<(), ModelError> {
        self.inner_mut().fit(x, y, n_classes)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
        self.inner().predict_proba(x)
    }
}

/// Check the training data shared by all variants.
pub(crate) fn check_training_data(
    x: &Array2<f64>,
    y: &[usize],
    n_classes: usize,
) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::LabelMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    if let Some(label) = y.iter().copied().find(|l| *l >= n_classes) {
        return Err(ModelError::LabelOutOfRange { label, n_classes });
    }
    Ok(())
}

/// Check that `x` has the number of features the model was fitted on.
pub(crate) fn check_features(x: &Array2<f64>, expected: usize) -> Result<(), ModelError> {
    if x.ncols() != expected {
        return Err(ModelError::FeatureMismatch {
            expected,
            found: x.ncols(),
        });
    }
    Ok(())
}

/// Index of the largest value in each row. Ties go to the lowest index.
pub fn argmax_rows(proba: &Array2<f64>) -> Vec<usize> {
    proba
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(best, max), (i, p)| {
                    if *p > max {
                        (i, *p)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect()
}

/// Turn each row of raw scores into probabilities.
pub(crate) fn softmax_rows(mut scores: Array2<f64>) -> Array2<f64> {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, v| m.max(*v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    scores
}

/// Copy the selected rows and columns of `x` into a row-major smartcore matrix.
pub(crate) fn to_dense(
    x: &Array2<f64>,
    rows: &[usize],
    cols: &[usize],
) -> Result<DenseMatrix<f64>, ModelError> {
    let mut values = Vec::with_capacity(rows.len() * cols.len());
    for r in rows {
        values.extend(cols.iter().map(|c| x[[*r, *c]]));
    }
    Ok(DenseMatrix::new(rows.len(), cols.len(), values, false)?)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use ndarray::array;
    use smartcore::linalg::basic::arrays::Array;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn model_names() {
        assert_eq!(ModelKind::NeuralNetMlp.to_string(), "NeuralNet_MLP");
        assert_eq!(
            ModelKind::from_str("NeuralNet_MLP").unwrap(),
            ModelKind::NeuralNetMlp
        );
        assert_eq!(
            serde_json::to_string(&ModelKind::RandomForest).unwrap(),
            "\"RandomForest\""
        );
        for kind in ModelKind::iter() {
            assert_eq!(kind.build(42).kind(), kind);
            assert_eq!(
                <ModelKind as clap::ValueEnum>::from_str(&kind.to_string(), false),
                Ok(kind)
            );
        }
    }

    #[test]
    fn argmax_and_softmax() {
        let p = softmax_rows(array![[1.0, 3.0, 2.0], [0.0, 0.0, 0.0], [1000.0, 0.0, 0.0]]);
        for row in p.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert_eq!(argmax_rows(&p), vec![1, 0, 0]);
    }

    #[test]
    fn dense_selection() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let d = to_dense(&x, &[1, 1, 0], &[2, 0]).unwrap();
        assert_eq!(*d.get((0, 0)), 6.0);
        assert_eq!(*d.get((1, 1)), 4.0);
        assert_eq!(*d.get((2, 0)), 3.0);
    }

    #[test]
    fn training_data_checks() {
        let x = array![[1.0], [2.0]];
        assert!(matches!(
            check_training_data(&x, &[0], 2),
            Err(ModelError::LabelMismatch { .. })
        ));
        assert!(matches!(
            check_training_data(&x, &[0, 2], 2),
            Err(ModelError::LabelOutOfRange { label: 2, .. })
        ));
        assert!(matches!(
            check_training_data(&Array2::zeros((0, 1)), &[], 2),
            Err(ModelError::EmptyTrainingSet)
        ));
        check_training_data(&x, &[0, 1], 2).unwrap();
    }
}
