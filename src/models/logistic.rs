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
//! Multinomial logistic regression with an L2 penalty, fitted by smartcore's L-BFGS solver.
//!
//! smartcore only predicts labels, so the class probabilities are computed from the fitted
//! coefficients: the sigmoid of the single decision function for two classes, and the softmax of
//! one decision function per class otherwise.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::{arrays::Array, matrix::DenseMatrix};

use super::{check_features, check_training_data, softmax_rows, to_dense, Classifier, ModelError};

type Inner = smartcore::linear::logistic_regression::LogisticRegression<
    f64,
    usize,
    DenseMatrix<f64>,
    Vec<usize>,
>;
type InnerParams = smartcore::linear::logistic_regression::LogisticRegressionParameters<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse of the regularization strength.
    pub c: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self { c: 1.0 }
    }
}

/// The fitted state. With a single training class, smartcore cannot fit a model and every row
/// gets that class.
#[derive(Debug, Serialize, Deserialize)]
enum Fitted {
    Constant(usize),
    Linear(Inner),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    fitted: Option<Fitted>,
    n_features: usize,
    n_classes: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self::with_params(LogisticParams::default())
    }

    pub fn with_params(params: LogisticParams) -> Self {
        Self {
            params,
            fitted: None,
            n_features: 0,
            n_classes: 0,
        }
    }

    fn linear_proba(&self, model: &Inner, x: &Array2<f64>) -> Array2<f64> {
        let coef = model.coefficients();
        let intercept = model.intercept();
        let classes = model.classes();
        let decision = |r: usize, k: usize| {
            (0..self.n_features)
                .map(|j| x[[r, j]] * *coef.get((k, j)))
                .sum::<f64>()
                + *intercept.get((k, 0))
        };

        let mut proba = Array2::zeros((x.nrows(), self.n_classes));
        if classes.len() == 2 {
            for r in 0..x.nrows() {
                let p = 1.0 / (1.0 + (-decision(r, 0)).exp());
                proba[[r, classes[0]]] = 1.0 - p;
                proba[[r, classes[1]]] = p;
            }
        } else {
            let scores = softmax_rows(Array2::from_shape_fn((x.nrows(), classes.len()), |(r, k)| {
                decision(r, k)
            }));
            for ((r, k), p) in scores.indexed_iter() {
                proba[[r, classes[k]]] = *p;
            }
        }
        proba
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<(), ModelError> {
        check_training_data(x, y, n_classes)?;
        self.n_features = x.ncols();
        self.n_classes = n_classes;
        if y.iter().all(|c| *c == y[0]) {
            self.fitted = Some(Fitted::Constant(y[0]));
            return Ok(());
        }
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let cols: Vec<usize> = (0..x.ncols()).collect();
        let params = InnerParams::default().with_alpha(1.0 / self.params.c);
        let model = Inner::fit(&to_dense(x, &rows, &cols)?, &y.to_vec(), params)?;
        self.fitted = Some(Fitted::Linear(model));
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
        let fitted = self.fitted.as_ref().ok_or(ModelError::NotFitted)?;
        check_features(x, self.n_features)?;
        Ok(match fitted {
            Fitted::Constant(class) => {
                Array2::from_shape_fn((x.nrows(), self.n_classes), |(_, c)| {
                    if c == *class {
                        1.0
                    } else {
                        0.0
                    }
                })
            }
            Fitted::Linear(model) => self.linear_proba(model, x),
        })
    }
}

#[cfg(test)]
mod test {
    use ndarray::{array, Axis};

    use super::*;

    #[test]
    fn separable_classes() {
        let x = array![[-2.0, 0.0], [-1.5, 0.5], [-1.0, 0.0], [1.0, 0.0], [1.5, -0.5], [2.0, 0.0]];
        let y = [0, 0, 0, 1, 1, 1];
        let mut lr = LogisticRegression::new();
        lr.fit(&x, &y, 2).unwrap();
        assert_eq!(lr.predict(&x).unwrap(), y.to_vec());
        let proba = lr.predict_proba(&array![[0.0, 0.0]]).unwrap();
        // the decision boundary is close to the origin
        assert!((proba[[0, 0]] - 0.5).abs() < 0.1);
    }

    #[test]
    fn three_classes() {
        let x = array![[-3.0], [-2.8], [0.0], [0.1], [2.8], [3.0]];
        let y = [0, 0, 1, 1, 2, 2];
        let mut lr = LogisticRegression::new();
        lr.fit(&x, &y, 3).unwrap();
        assert_eq!(lr.predict(&array![[-2.9], [2.9]]).unwrap(), vec![0, 2]);
        let proba = lr.predict_proba(&x).unwrap();
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn classes_missing_from_training() {
        // classes 0 and 2 of 3; class 1 never occurs and gets zero probability
        let x = array![[-2.0], [-1.0], [1.0], [2.0]];
        let mut lr = LogisticRegression::new();
        lr.fit(&x, &[0, 0, 2, 2], 3).unwrap();
        let proba = lr.predict_proba(&x).unwrap();
        assert!(proba.column(1).iter().all(|p| *p == 0.0));
        assert_eq!(lr.predict(&x).unwrap(), vec![0, 0, 2, 2]);

        let mut single = LogisticRegression::new();
        single.fit(&x, &[1; 4], 3).unwrap();
        assert_eq!(single.predict(&x).unwrap(), vec![1; 4]);
    }

    #[test]
    fn not_fitted() {
        assert!(matches!(
            LogisticRegression::new().predict_proba(&Array2::zeros((1, 1))),
            Err(ModelError::NotFitted)
        ));
    }
}
