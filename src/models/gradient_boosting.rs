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
//! Gradient boosting of smartcore regression trees for multi-class classification.
//!
//! The model keeps one additive score per class, starting at the log of the class prior. In every
//! round, one regression tree per class is fitted to the negative gradient of the cross-entropy
//! (the difference between the one-hot target and the current softmax probability), and its
//! prediction is added to the class score, shrunk by the learning rate.

use std::fmt;

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::{
    linalg::basic::matrix::DenseMatrix,
    tree::decision_tree_regressor::{DecisionTreeRegressor, DecisionTreeRegressorParameters},
};

use super::{check_features, check_training_data, softmax_rows, to_dense, Classifier, ModelError};

type RegressionTree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Boosting stops early once no residual exceeds this value.
const RESIDUAL_TOL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 300,
            learning_rate: 0.1,
            max_depth: 4,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostingParams,
    /// Initial score of every class.
    init: Vec<f64>,
    /// One tree per class and round.
    rounds: Vec<Vec<RegressionTree>>,
    n_features: usize,
    n_classes: usize,
}

impl fmt::Debug for GradientBoosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBoosting")
            .field("params", &self.params)
            .field("init", &self.init)
            .field("rounds", &self.rounds.len())
            .field("n_features", &self.n_features)
            .field("n_classes", &self.n_classes)
            .finish()
    }
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientBoosting {
    pub fn new() -> Self {
        Self::with_params(BoostingParams::default())
    }

    pub fn with_params(params: BoostingParams) -> Self {
        Self {
            params,
            init: Vec::new(),
            rounds: Vec::new(),
            n_features: 0,
            n_classes: 0,
        }
    }

    /// Number of boosting rounds done during the last fit.
    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    fn tree_params(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.params.max_depth)
            .with_min_samples_leaf(self.params.min_samples_leaf)
    }

    fn initial_scores(&self, n_rows: usize) -> Array2<f64> {
        let init = Array1::from_vec(self.init.clone());
        Array2::<f64>::zeros((n_rows, self.n_classes)) + &init
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<(), ModelError> {
        check_training_data(x, y, n_classes)?;
        self.n_features = x.ncols();
        self.n_classes = n_classes;
        self.rounds.clear();

        let n = x.nrows();
        let mut counts = vec![0usize; n_classes];
        y.iter().for_each(|c| counts[*c] += 1);
        self.init = counts
            .iter()
            .map(|c| (*c as f64 / n as f64).max(1e-12).ln())
            .collect();
        if n_classes < 2 {
            return Ok(());
        }

        let rows: Vec<usize> = (0..n).collect();
        let cols: Vec<usize> = (0..x.ncols()).collect();
        let x_dense = to_dense(x, &rows, &cols)?;
        let mut scores = self.initial_scores(n);
        let tree_params = self.tree_params();

        for _ in 0..self.params.n_rounds {
            let proba = softmax_rows(scores.clone());
            let residuals: Vec<Vec<f64>> = (0..n_classes)
                .map(|k| {
                    proba
                        .column(k)
                        .iter()
                        .zip(y)
                        .map(|(p, c)| if *c == k { 1.0 - p } else { -p })
                        .collect()
                })
                .collect();
            if residuals.iter().flatten().all(|r| r.abs() < RESIDUAL_TOL) {
                break;
            }

            let trees = residuals
                .par_iter()
                .map(|r| RegressionTree::fit(&x_dense, r, tree_params.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            for (k, tree) in trees.iter().enumerate() {
                let update = Array1::from_vec(tree.predict(&x_dense)?);
                scores
                    .column_mut(k)
                    .scaled_add(self.params.learning_rate, &update);
            }
            self.rounds.push(trees);
        }

        log::debug!("Gradient boosting finished after {} rounds", self.rounds.len());
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
        if self.init.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_features(x, self.n_features)?;
        let mut scores = self.initial_scores(x.nrows());
        if x.nrows() > 0 && !self.rounds.is_empty() {
            let rows: Vec<usize> = (0..x.nrows()).collect();
            let cols: Vec<usize> = (0..x.ncols()).collect();
            let x_dense = to_dense(x, &rows, &cols)?;
            for trees in self.rounds.iter() {
                for (k, tree) in trees.iter().enumerate() {
                    let update = Array1::from_vec(tree.predict(&x_dense)?);
                    scores
                        .column_mut(k)
                        .scaled_add(self.params.learning_rate, &update);
                }
            }
        }
        let mut proba = softmax_rows(scores);
        // softmax over the log-priors is not exactly zero for absent classes
        proba.axis_iter_mut(Axis(0)).for_each(|mut row| {
            row.mapv_inplace(|p| if p < 1e-12 { 0.0 } else { p });
            let sum = row.sum();
            row /= sum;
        });
        Ok(proba)
    }
}

#[cfg(test)]
mod test {
    use rand::prelude::*;

    use super::*;

    fn small_boosting() -> GradientBoosting {
        GradientBoosting::with_params(BoostingParams {
            n_rounds: 50,
            ..Default::default()
        })
    }

    #[test]
    fn learns_thresholds() {
        let mut rng = StdRng::seed_from_u64(0);
        let x: Array2<f64> = Array2::from_shape_fn((150, 2), |_| rng.gen_range(0.0..3.0));
        // class is the integer part of the first feature
        let y: Vec<usize> = x.column(0).iter().map(|v| v.floor() as usize).collect();
        let mut gb = small_boosting();
        gb.fit(&x, &y, 3).unwrap();
        assert!(gb.n_rounds() > 0);
        let pred = gb.predict(&x).unwrap();
        let acc = pred.iter().zip(&y).filter(|(p, t)| p == t).count() as f64 / 150.0;
        assert!(acc > 0.95, "accuracy {acc}");
        for row in gb.predict_proba(&x).unwrap().axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn single_class_is_prior() {
        let x = Array2::from_shape_fn((5, 1), |(i, _)| i as f64);
        let mut gb = small_boosting();
        gb.fit(&x, &[1; 5], 2).unwrap();
        assert_eq!(gb.n_rounds(), 0);
        assert_eq!(gb.predict(&x).unwrap(), vec![1; 5]);
        let proba = gb.predict_proba(&x).unwrap();
        assert!(proba.column(0).iter().all(|p| *p == 0.0));
    }
}
