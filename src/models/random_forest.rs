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
//! Random forest built on smartcore's ensemble.
//!
//! smartcore's `RandomForestClassifier` bootstraps the rows (per class) and samples the square
//! root of the number of features at every split, but it only predicts the majority vote. To get
//! the share of trees voting for each class, the forest is made of single-tree smartcore forests,
//! each with its own seed. The members are fitted in parallel, and the forest does not depend on
//! thread scheduling.

use std::fmt;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::{
    ensemble::random_forest_classifier::{
        RandomForestClassifier, RandomForestClassifierParameters,
    },
    linalg::basic::matrix::DenseMatrix,
};

use super::{check_features, check_training_data, to_dense, Classifier, ModelError};

type Member = RandomForestClassifier<f64, usize, DenseMatrix<f64>, Vec<usize>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 300,
            max_depth: None,
            min_samples_leaf: 1,
            seed: crate::RANDOM_STATE,
        }
    }
}

/// Trees need at least two classes, so a single-class training set becomes a constant vote.
#[derive(Serialize, Deserialize)]
enum Fitted {
    Constant(usize),
    Trees(Vec<Member>),
}

#[derive(Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    fitted: Option<Fitted>,
    n_features: usize,
    n_classes: usize,
}

impl fmt::Debug for RandomForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomForest")
            .field("params", &self.params)
            .field("trees", &self.n_trees())
            .field("n_features", &self.n_features)
            .field("n_classes", &self.n_classes)
            .finish()
    }
}

impl RandomForest {
    pub fn new(seed: u64) -> Self {
        Self::with_params(ForestParams {
            seed,
            ..Default::default()
        })
    }

    pub fn with_params(params: ForestParams) -> Self {
        Self {
            params,
            fitted: None,
            n_features: 0,
            n_classes: 0,
        }
    }

    pub fn n_trees(&self) -> usize {
        match &self.fitted {
            Some(Fitted::Trees(trees)) => trees.len(),
            Some(Fitted::Constant(_)) => self.params.n_trees,
            None => 0,
        }
    }

    fn member_params(&self, i: usize) -> RandomForestClassifierParameters {
        let params = RandomForestClassifierParameters::default()
            .with_n_trees(1)
            .with_min_samples_leaf(self.params.min_samples_leaf)
            .with_seed(self.params.seed.wrapping_add(i as u64));
        match self.params.max_depth {
            Some(depth) => params.with_max_depth(depth),
            None => params,
        }
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<(), ModelError> {
        check_training_data(x, y, n_classes)?;
        if x.ncols() == 0 {
            return Err(ModelError::FeatureMismatch {
                expected: 1,
                found: 0,
            });
        }
        self.n_features = x.ncols();
        self.n_classes = n_classes;
        if y.iter().all(|c| *c == y[0]) {
            self.fitted = Some(Fitted::Constant(y[0]));
            return Ok(());
        }

        let rows: Vec<usize> = (0..x.nrows()).collect();
        let cols: Vec<usize> = (0..x.ncols()).collect();
        let x = to_dense(x, &rows, &cols)?;
        let y = y.to_vec();
        let trees = (0..self.params.n_trees)
            .into_par_iter()
            .map(|i| Member::fit(&x, &y, self.member_params(i)))
            .collect::<Result<Vec<_>, _>>()?;
        self.fitted = Some(Fitted::Trees(trees));
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
        let fitted = self.fitted.as_ref().ok_or(ModelError::NotFitted)?;
        check_features(x, self.n_features)?;
        let mut votes = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        if x.nrows() == 0 {
            return Ok(votes);
        }
        let trees = match fitted {
            Fitted::Constant(class) => {
                votes.column_mut(*class).fill(1.0);
                return Ok(votes);
            }
            Fitted::Trees(trees) => trees,
        };

        let rows: Vec<usize> = (0..x.nrows()).collect();
        let cols: Vec<usize> = (0..x.ncols()).collect();
        let x = to_dense(x, &rows, &cols)?;
        let predictions = trees
            .par_iter()
            .map(|member| member.predict(&x))
            .collect::<Result<Vec<_>, _>>()?;
        for pred in predictions {
            for (i, class) in pred.into_iter().enumerate() {
                votes[[i, class]] += 1.0;
            }
        }
        votes /= trees.len() as f64;
        Ok(votes)
    }
}

#[cfg(test)]
mod test {
    use ndarray::Axis;
    use rand::prelude::*;

    use super::*;

    fn blobs(n: usize) -> (Array2<f64>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(5);
        let y: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let x = Array2::from_shape_fn((n, 3), |(i, j)| {
            let signal = if j == 1 { 4.0 * y[i] as f64 } else { 0.0 };
            signal + rng.gen_range(-1.0..1.0)
        });
        (x, y)
    }

    fn small_forest() -> RandomForest {
        RandomForest::with_params(ForestParams {
            n_trees: 25,
            ..Default::default()
        })
    }

    #[test]
    fn vote_shares() {
        let (x, y) = blobs(100);
        let mut rf = small_forest();
        rf.fit(&x, &y, 2).unwrap();
        assert_eq!(rf.n_trees(), 25);
        let proba = rf.predict_proba(&x).unwrap();
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        let pred = rf.predict(&x).unwrap();
        let acc = pred.iter().zip(&y).filter(|(p, t)| p == t).count() as f64 / 100.0;
        assert!(acc > 0.9, "accuracy {acc}");
    }

    #[test]
    fn independent_of_scheduling() {
        let (x, y) = blobs(60);
        let mut a = small_forest();
        a.fit(&x, &y, 2).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut b = small_forest();
        pool.install(|| b.fit(&x, &y, 2)).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn single_class() {
        let (x, _) = blobs(10);
        let mut rf = small_forest();
        rf.fit(&x, &[1; 10], 2).unwrap();
        assert_eq!(rf.predict(&x).unwrap(), vec![1; 10]);
    }

    #[test]
    fn class_absent_from_training() {
        // class 2 exists but never occurs; it gets zero probability
        let (x, y) = blobs(40);
        let mut rf = small_forest();
        rf.fit(&x, &y, 3).unwrap();
        let proba = rf.predict_proba(&x).unwrap();
        assert!(proba.column(2).iter().all(|p| *p == 0.0));
    }
}
