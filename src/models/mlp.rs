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
//! Multi-layer perceptron with ReLU hidden layers and a softmax output layer, trained with Adam on
//! mini-batches to minimize the L2-regularized cross-entropy.
//!
//! With early stopping enabled, a stratified fraction of the training rows is held out, and
//! training stops once the validation score did not improve for more than `n_iter_no_change`
//! epochs. The score is the validation accuracy, and at equal accuracy the validation loss: an
//! epoch improves if the accuracy grows by `tol`, or if the accuracy is kept and the loss drops by
//! `tol`. A small validation set is quickly classified perfectly, so the loss keeps training going
//! until the model is confident. The weights with the best score are kept. If the training set is
//! too small to hold out a row of each class, the training loss is monitored instead.

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

use super::{
    argmax_rows, check_features, check_training_data, softmax_rows, train_test_split, Classifier,
    ModelError,
};
use crate::config::SplitSettings;

const BETA_1: f64 = 0.9;
const BETA_2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

/// Hyper-parameters of the MLP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    /// L2 penalty.
    pub alpha: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub early_stopping: bool,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64],
            learning_rate: 1e-3,
            alpha: 1e-4,
            batch_size: 64,
            max_epochs: 200,
            early_stopping: true,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            tol: 1e-4,
            seed: crate::RANDOM_STATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// First and second moment estimates of Adam.
struct Adam {
    m_w: Vec<Array2<f64>>,
    v_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_b: Vec<Array1<f64>>,
    t: i32,
}

impl Adam {
    fn new(layers: &[Dense]) -> Self {
        Self {
            m_w: layers.iter().map(|l| Array2::zeros(l.weights.raw_dim())).collect(),
            v_w: layers.iter().map(|l| Array2::zeros(l.weights.raw_dim())).collect(),
            m_b: layers.iter().map(|l| Array1::zeros(l.bias.raw_dim())).collect(),
            v_b: layers.iter().map(|l| Array1::zeros(l.bias.raw_dim())).collect(),
            t: 0,
        }
    }

    fn step(&mut self, layers: &mut [Dense], grads: Vec<(Array2<f64>, Array1<f64>)>, lr: f64) {
        self.t += 1;
        let lr_t =
            lr * (1.0 - BETA_2.powi(self.t)).sqrt() / (1.0 - BETA_1.powi(self.t));
        for (l, (g_w, g_b)) in grads.into_iter().enumerate() {
            self.m_w[l].zip_mut_with(&g_w, |m, g| *m = BETA_1 * *m + (1.0 - BETA_1) * g);
            self.v_w[l].zip_mut_with(&g_w, |v, g| *v = BETA_2 * *v + (1.0 - BETA_2) * g * g);
            self.m_b[l].zip_mut_with(&g_b, |m, g| *m = BETA_1 * *m + (1.0 - BETA_1) * g);
            self.v_b[l].zip_mut_with(&g_b, |v, g| *v = BETA_2 * *v + (1.0 - BETA_2) * g * g);

            ndarray::Zip::from(&mut layers[l].weights)
                .and(&self.m_w[l])
                .and(&self.v_w[l])
                .for_each(|w, m, v| *w -= lr_t * m / (v.sqrt() + EPSILON));
            ndarray::Zip::from(&mut layers[l].bias)
                .and(&self.m_b[l])
                .and(&self.v_b[l])
                .for_each(|b, m, v| *b -= lr_t * m / (v.sqrt() + EPSILON));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpClassifier {
    params: MlpParams,
    layers: Vec<Dense>,
    n_features: usize,
    n_classes: usize,
    /// Number of epochs run during the last fit.
    n_epochs: usize,
}

impl MlpClassifier {
    pub fn new(seed: u64) -> Self {
        Self::with_params(MlpParams {
            seed,
            ..Default::default()
        })
    }

    pub fn with_params(params: MlpParams) -> Self {
        Self {
            params,
            layers: Vec::new(),
            n_features: 0,
            n_classes: 0,
            n_epochs: 0,
        }
    }

    pub fn params(&self) -> &MlpParams {
        &self.params
    }

    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }

    /// Glorot-uniform initialization of all layers.
    fn init_layers(&self, rng: &mut StdRng) -> Vec<Dense> {
        let sizes: Vec<usize> = std::iter::once(self.n_features)
            .chain(self.params.hidden_layers.iter().copied())
            .chain(std::iter::once(self.n_classes))
            .collect();
        sizes
            .windows(2)
            .map(|w| {
                let (fan_in, fan_out) = (w[0], w[1]);
                let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
                let dist = Uniform::new(-bound, bound);
                Dense {
                    weights: Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(rng)),
                    bias: Array1::from_shape_fn(fan_out, |_| dist.sample(rng)),
                }
            })
            .collect()
    }

    /// Activations of every layer, starting with the input.
    fn forward(layers: &[Dense], x: Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = Vec::with_capacity(layers.len() + 1);
        activations.push(x);
        for (l, layer) in layers.iter().enumerate() {
            let z = activations[l].dot(&layer.weights) + &layer.bias;
            let a = if l + 1 == layers.len() {
                softmax_rows(z)
            } else {
                z.mapv(|v| v.max(0.0))
            };
            activations.push(a);
        }
        activations
    }

    /// Run one epoch over `rows` and return the average regularized loss.
    fn epoch(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        rows: &mut [usize],
        adam: &mut Adam,
        rng: &mut StdRng,
    ) -> f64 {
        rows.shuffle(rng);
        let batch_size = self.params.batch_size.clamp(1, rows.len());
        let n_layers = self.layers.len();
        let mut loss = 0.0;

        for batch in rows.chunks(batch_size) {
            let n = batch.len() as f64;
            let targets =
                Array2::from_shape_fn((batch.len(), self.n_classes), |(i, c)| {
                    if y[batch[i]] == c {
                        1.0
                    } else {
                        0.0
                    }
                });
            let activations = Self::forward(&self.layers, x.select(Axis(0), batch));
            let output = &activations[n_layers];

            loss -= ndarray::Zip::from(output)
                .and(&targets)
                .fold(0.0, |acc, p, t| acc + t * p.max(1e-10).ln());

            let mut delta = (output - &targets) / n;
            let mut grads = Vec::with_capacity(n_layers);
            for l in (0..n_layers).rev() {
                let g_w = activations[l].t().dot(&delta)
                    + &self.layers[l].weights * (self.params.alpha / n);
                let g_b = delta.sum_axis(Axis(0));
                if l > 0 {
                    let mut next = delta.dot(&self.layers[l].weights.t());
                    next.zip_mut_with(&activations[l], |d, a| {
                        if *a <= 0.0 {
                            *d = 0.0
                        }
                    });
                    delta = next;
                }
                grads.push((g_w, g_b));
            }
            grads.reverse();
            adam.step(&mut self.layers, grads, self.params.learning_rate);
        }

        let l2: f64 = self
            .layers
            .iter()
            .map(|l| l.weights.iter().map(|w| w * w).sum::<f64>())
            .sum();
        (loss + 0.5 * self.params.alpha * l2) / rows.len() as f64
    }

    fn validation_score(&self, x: &Array2<f64>, y: &[usize], rows: &[usize]) -> ValidationScore {
        let activations = Self::forward(&self.layers, x.select(Axis(0), rows));
        let proba = &activations[self.layers.len()];
        let pred = argmax_rows(proba);
        let correct = rows.iter().zip(pred).filter(|(i, p)| y[**i] == *p).count();
        let loss: f64 = rows
            .iter()
            .enumerate()
            .map(|(k, i)| -proba[[k, y[*i]]].max(1e-10).ln())
            .sum();
        ValidationScore {
            accuracy: correct as f64 / rows.len() as f64,
            loss: loss / rows.len() as f64,
        }
    }

    /// Hold out a stratified validation set, if every class can keep a training row.
    fn validation_split(&self, y: &[usize]) -> Option<(Vec<usize>, Vec<usize>)> {
        if !self.params.early_stopping {
            return None;
        }
        let settings = SplitSettings {
            test_size: self.params.validation_fraction,
            seed: self.params.seed,
            stratify: true,
        };
        let split = train_test_split(y, &settings).ok()?;
        Some((split.train, split.test))
    }
}

#[derive(Debug, Clone, Copy)]
struct ValidationScore {
    accuracy: f64,
    loss: f64,
}

impl ValidationScore {
    const WORST: Self = Self {
        accuracy: f64::NEG_INFINITY,
        loss: f64::INFINITY,
    };

    fn improves(&self, best: &Self, tol: f64) -> bool {
        self.accuracy > best.accuracy + tol
            || (self.accuracy >= best.accuracy && self.loss < best.loss - tol)
    }
}

impl Classifier for MlpClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<(), ModelError> {
        check_training_data(x, y, n_classes)?;
        self.n_features = x.ncols();
        self.n_classes = n_classes;

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        self.layers = self.init_layers(&mut rng);
        let mut adam = Adam::new(&self.layers);

        let (mut rows, validation) = match self.validation_split(y) {
            Some((train, val)) => (train, Some(val)),
            None => ((0..x.nrows()).collect(), None),
        };

        let mut best_score = ValidationScore::WORST;
        let mut best_loss = f64::INFINITY;
        let mut best_layers = self.layers.clone();
        let mut no_improvement = 0;
        self.n_epochs = 0;

        for epoch in 0..self.params.max_epochs {
            let loss = self.epoch(x, y, &mut rows, &mut adam, &mut rng);
            self.n_epochs = epoch + 1;

            match validation.as_deref() {
                Some(val) => {
                    let score = self.validation_score(x, y, val);
                    if score.improves(&best_score, self.params.tol) {
                        no_improvement = 0;
                        best_score = score;
                        best_layers = self.layers.clone();
                    } else {
                        no_improvement += 1;
                    }
                }
                None => {
                    if loss > best_loss - self.params.tol {
                        no_improvement += 1;
                    } else {
                        no_improvement = 0;
                    }
                    best_loss = best_loss.min(loss);
                }
            }

            if no_improvement > self.params.n_iter_no_change {
                log::debug!("MLP stopped after {} epochs", self.n_epochs);
                break;
            }
        }

        if validation.is_some() {
            self.layers = best_layers;
        }
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_features(x, self.n_features)?;
        let mut activations = Self::forward(&self.layers, x.to_owned());
        Ok(activations.pop().unwrap_or_default())
    }
}
