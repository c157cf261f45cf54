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
//! Module for computing classification metrics on class names.
//!
//! All metrics use `zero_division = 0`: a precision, recall, or F1-score whose denominator is zero
//! is reported as 0. Classes are ordered with a natural sort (`2` before `10`).

use std::{cmp::Ordering, collections::HashMap};

use itertools::Itertools;
use p4sentry_utils::serde::nan_as_null;
use serde::{Deserialize, Serialize};

/// Class that counts as positive in binary problems.
pub const POSITIVE_CLASS: &str = "1";

/// How per-class precision, recall, and F1-score are combined into a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Average {
    /// Only report the positive class (`1`).
    Binary,
    /// Average over all classes, weighted by their support.
    Weighted,
}

impl Average {
    /// `Binary` if all classes are `0` or `1`, `Weighted` otherwise.
    pub fn for_classes<S: AsRef<str>>(classes: &[S]) -> Self {
        if classes.iter().all(|c| matches!(c.as_ref(), "0" | "1")) {
            Self::Binary
        } else {
            Self::Weighted
        }
    }
}

/// Natural order of class names.
pub fn compare_classes(a: &str, b: &str) -> Ordering {
    human_sort::compare(a, b)
}

/// Sorted union of all classes that occur in `y_true` or `y_pred`.
pub fn class_union(y_true: &[String], y_pred: &[String]) -> Vec<String> {
    y_true
        .iter()
        .chain(y_pred.iter())
        .unique()
        .cloned()
        .sorted_by(|a, b| compare_classes(a, b))
        .collect()
}

/// Square matrix of counts, where rows are true classes and columns are predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub confusion_matrix: Vec<Vec<usize>>,
    pub labels: Vec<String>,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[String], y_pred: &[String]) -> Self {
        let labels = class_union(y_true, y_pred);
        let index: HashMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();
        let mut confusion_matrix = vec![vec![0; labels.len()]; labels.len()];
        for (t, p) in y_true.iter().zip(y_pred) {
            confusion_matrix[index[t.as_str()]][index[p.as_str()]] += 1;
        }
        Self {
            confusion_matrix,
            labels,
        }
    }

    /// Precision, recall, F1-score, and support of every class, in the order of `labels`.
    pub fn class_scores(&self) -> Vec<ClassScores> {
        let n = self.labels.len();
        (0..n)
            .map(|k| {
                let tp = self.confusion_matrix[k][k] as f64;
                let support: usize = self.confusion_matrix[k].iter().sum();
                let predicted: usize = (0..n).map(|i| self.confusion_matrix[i][k]).sum();
                let precision = ratio(tp, predicted as f64);
                let recall = ratio(tp, support as f64);
                ClassScores {
                    precision,
                    recall,
                    f1: ratio(2.0 * precision * recall, precision + recall),
                    support,
                }
            })
            .collect()
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Fraction of correct predictions. NaN if there are no predictions.
pub fn accuracy(y_true: &[String], y_pred: &[String]) -> f64 {
    if y_true.is_empty() {
        return f64::NAN;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Precision, recall, and F1-score combined with `average`.
pub fn precision_recall_f1(y_true: &[String], y_pred: &[String], average: Average) -> ClassScores {
    let cm = ConfusionMatrix::new(y_true, y_pred);
    let scores = cm.class_scores();
    match average {
        Average::Binary => cm
            .labels
            .iter()
            .position(|l| l == POSITIVE_CLASS)
            .map(|k| scores[k])
            .unwrap_or(ClassScores {
                precision: 0.0,
                recall: 0.0,
                f1: 0.0,
                support: 0,
            }),
        Average::Weighted => {
            let total: usize = scores.iter().map(|s| s.support).sum();
            let weighted = |f: fn(&ClassScores) -> f64| {
                ratio(
                    scores.iter().map(|s| f(s) * s.support as f64).sum(),
                    total as f64,
                )
            };
            ClassScores {
                precision: weighted(|s| s.precision),
                recall: weighted(|s| s.recall),
                f1: weighted(|s| s.f1),
                support: total,
            }
        }
    }
}

/// Area under the ROC curve of a binary problem, computed from the rank statistic of the scores
/// (ties get their average rank).
///
/// `scores` is the predicted score of the `positive` class. The AUC is NaN if `y_true` does not
/// contain exactly the positive class and one other class, or if any score is not finite.
pub fn roc_auc(y_true: &[String], scores: &[f64], positive: &str) -> f64 {
    let classes: Vec<&String> = y_true.iter().unique().collect();
    if classes.len() != 2
        || !classes.iter().any(|c| *c == positive)
        || scores.len() != y_true.len()
        || scores.iter().any(|s| !s.is_finite())
    {
        return f64::NAN;
    }

    let order: Vec<usize> = (0..scores.len())
        .sorted_by(|a, b| scores[*a].total_cmp(&scores[*b]))
        .collect();
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied values share the average rank.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }

    let n_pos = y_true.iter().filter(|t| *t == positive).count() as f64;
    let n_neg = y_true.len() as f64 - n_pos;
    let rank_sum: f64 = y_true
        .iter()
        .zip(ranks)
        .filter(|(t, _)| *t == positive)
        .map(|(_, r)| r)
        .sum();
    (rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Textual report with the precision, recall, F1-score, and support of every class, followed by
/// the accuracy and the macro and weighted averages.
pub fn classification_report(y_true: &[String], y_pred: &[String], digits: usize) -> String {
    let cm = ConfusionMatrix::new(y_true, y_pred);
    let scores = cm.class_scores();
    let total: usize = scores.iter().map(|s| s.support).sum();
    let width = cm
        .labels
        .iter()
        .map(|l| l.len())
        .chain([12, digits])
        .max()
        .unwrap_or(12);

    let mut report = format!("{:>width$} ", "");
    for header in ["precision", "recall", "f1-score", "support"] {
        report.push_str(&format!(" {header:>9}"));
    }
    report.push_str("\n\n");

    let row = |name: &str, s: &ClassScores| {
        format!(
            "{name:>width$}  {:>9.digits$} {:>9.digits$} {:>9.digits$} {:>9}\n",
            s.precision, s.recall, s.f1, s.support
        )
    };
    for (label, s) in cm.labels.iter().zip(scores.iter()) {
        report.push_str(&row(label, s));
    }
    report.push('\n');

    let acc = accuracy(y_true, y_pred);
    let acc = if acc.is_nan() { 0.0 } else { acc };
    report.push_str(&format!(
        "{:>width$}  {:>9} {:>9} {acc:>9.digits$} {total:>9}\n",
        "accuracy", "", ""
    ));

    let n = scores.len().max(1) as f64;
    let macro_avg = ClassScores {
        precision: scores.iter().map(|s| s.precision).sum::<f64>() / n,
        recall: scores.iter().map(|s| s.recall).sum::<f64>() / n,
        f1: scores.iter().map(|s| s.f1).sum::<f64>() / n,
        support: total,
    };
    report.push_str(&row("macro avg", &macro_avg));
    report.push_str(&row(
        "weighted avg",
        &precision_recall_f1(y_true, y_pred, Average::Weighted),
    ));
    report
}

/// Metrics of a single model on a held-out test set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    #[serde(with = "nan_as_null")]
    pub roc_auc: f64,
    pub confusion_matrix: ConfusionMatrix,
}

impl MetricsRecord {
    /// Compute all metrics. `scores` holds the predicted score of the positive class, if any.
    pub fn compute(
        y_true: &[String],
        y_pred: &[String],
        scores: Option<&[f64]>,
        average: Average,
    ) -> Self {
        let prf = precision_recall_f1(y_true, y_pred, average);
        let roc_auc = scores
            .map(|s| roc_auc(y_true, s, POSITIVE_CLASS))
            .unwrap_or(f64::NAN);
        Self {
            accuracy: accuracy(y_true, y_pred),
            precision: prf.precision,
            recall: prf.recall,
            f1_score: prf.f1,
            roc_auc,
            confusion_matrix: ConfusionMatrix::new(y_true, y_pred),
        }
    }

    /// Named scalar metrics, in report order.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1_score", self.f1_score),
            ("roc_auc", self.roc_auc),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn binary_metrics() {
        let t = s(&["0", "0", "0", "1", "1", "1"]);
        let p = s(&["0", "0", "1", "1", "1", "0"]);
        assert!((accuracy(&t, &p) - 4.0 / 6.0).abs() < 1e-12);
        let prf = precision_recall_f1(&t, &p, Average::Binary);
        assert!((prf.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((prf.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((prf.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(Average::for_classes(&["0", "1"]), Average::Binary);
        assert_eq!(Average::for_classes(&["1", "2"]), Average::Weighted);
    }

    #[test]
    fn zero_division() {
        let t = s(&["0", "0", "1"]);
        let p = s(&["0", "0", "0"]);
        let prf = precision_recall_f1(&t, &p, Average::Binary);
        assert_eq!((prf.precision, prf.recall, prf.f1), (0.0, 0.0, 0.0));
    }

    #[test]
    fn weighted_metrics() {
        let t = s(&["1", "1", "2", "3"]);
        let p = s(&["1", "2", "2", "3"]);
        let prf = precision_recall_f1(&t, &p, Average::Weighted);
        // class 1: p=1, r=0.5; class 2: p=0.5, r=1; class 3: p=1, r=1
        assert!((prf.precision - (2.0 * 1.0 + 0.5 + 1.0) / 4.0).abs() < 1e-12);
        assert!((prf.recall - 0.75).abs() < 1e-12);
        assert_eq!(prf.support, 4);
    }

    #[test]
    fn confusion_matrix_natural_order() {
        let t = s(&["10", "2", "2"]);
        let p = s(&["2", "2", "9"]);
        let cm = ConfusionMatrix::new(&t, &p);
        assert_eq!(cm.labels, s(&["2", "9", "10"]));
        assert_eq!(
            cm.confusion_matrix,
            vec![vec![1, 1, 0], vec![0, 0, 0], vec![1, 0, 0]]
        );
        let json = serde_json::to_value(&cm).unwrap();
        assert_eq!(json["confusion_matrix"][0][1], 1);
    }

    #[test]
    fn auc_rank_statistic() {
        let t = s(&["0", "0", "1", "1"]);
        assert_eq!(roc_auc(&t, &[0.1, 0.4, 0.35, 0.8], "1"), 0.75);
        assert_eq!(roc_auc(&t, &[0.1, 0.2, 0.3, 0.4], "1"), 1.0);
        // ties count half
        assert_eq!(roc_auc(&t, &[0.5, 0.5, 0.5, 0.5], "1"), 0.5);
        assert!(roc_auc(&s(&["1", "1"]), &[0.2, 0.9], "1").is_nan());
        assert!(roc_auc(&t, &[0.1, f64::NAN, 0.3, 0.4], "1").is_nan());
        assert!(roc_auc(&s(&["0", "1", "2"]), &[0.1, 0.2, 0.3], "1").is_nan());
    }

    #[test]
    fn report_layout() {
        let t = s(&["0", "0", "1", "1"]);
        let p = s(&["0", "1", "1", "1"]);
        let report = classification_report(&t, &p, 4);
        let expected = "              precision    recall  f1-score   support\n\
                        \n\
                        \x20          0     1.0000    0.5000    0.6667         2\n\
                        \x20          1     0.6667    1.0000    0.8000         2\n\
                        \n\
                        \x20   accuracy                         0.7500         4\n\
                        \x20  macro avg     0.8333    0.7500    0.7333         4\n\
                        weighted avg     0.8333    0.7500    0.7333         4\n";
        assert_eq!(report, expected);
    }

    #[test]
    fn nan_auc_serializes_as_null() {
        let t = s(&["1", "1"]);
        let record = MetricsRecord::compute(&t, &t, Some(&[0.9, 0.8]), Average::Binary);
        assert!(record.roc_auc.is_nan());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"roc_auc\":null"));
        let back: MetricsRecord = serde_json::from_str(&json).unwrap();
        assert!(back.roc_auc.is_nan());
        assert_eq!(back.f1_score, 1.0);
    }
}
