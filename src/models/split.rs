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
//! Random train/test split with a fixed seed, optionally stratified by class.

use std::collections::BTreeMap;

use rand::prelude::*;

use crate::config::SplitSettings;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SplitError {
    #[error("The test size must be in (0, 1), but it is {0}.")]
    InvalidTestSize(f64),
    #[error("Cannot split an empty table.")]
    Empty,
    #[error("The test set of {rows} rows with test size {test_size} would be empty.")]
    EmptyTest { rows: usize, test_size: f64 },
    #[error("The training set of {rows} rows with test size {test_size} would be empty.")]
    EmptyTrain { rows: usize, test_size: f64 },
}

/// Row indices of the training and the test set, each in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split the rows with the given class `labels` into a training and a test set.
///
/// With stratification, every class contributes `round(n_c * test_size)` rows to the test set,
/// but always keeps at least one row for training. Without stratification, `ceil(n * test_size)`
/// rows are drawn from a global permutation.
pub fn train_test_split(labels: &[usize], settings: &SplitSettings) -> Result<Split, SplitError> {
    let test_size = settings.test_size;
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(SplitError::InvalidTestSize(test_size));
    }
    let rows = labels.len();
    if rows == 0 {
        return Err(SplitError::Empty);
    }

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    if settings.stratify {
        let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, l) in labels.iter().enumerate() {
            classes.entry(*l).or_default().push(i);
        }
        for (_, mut idx) in classes {
            idx.shuffle(&mut rng);
            let n_test = ((idx.len() as f64 * test_size).round() as usize).min(idx.len() - 1);
            test.extend_from_slice(&idx[..n_test]);
            train.extend_from_slice(&idx[n_test..]);
        }
    } else {
        let mut idx: Vec<usize> = (0..rows).collect();
        idx.shuffle(&mut rng);
        let n_test = ((rows as f64 * test_size).ceil() as usize).min(rows);
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }

    if test.is_empty() {
        return Err(SplitError::EmptyTest { rows, test_size });
    }
    if train.is_empty() {
        return Err(SplitError::EmptyTrain { rows, test_size });
    }
    train.sort_unstable();
    test.sort_unstable();
    log::debug!("Split {rows} rows into {} training and {} test rows", train.len(), test.len());
    Ok(Split { train, test })
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings(test_size: f64, stratify: bool) -> SplitSettings {
        SplitSettings {
            test_size,
            seed: 42,
            stratify,
        }
    }

    #[test]
    fn stratified_counts() {
        // 80 normal, 20 anomalous
        let labels: Vec<usize> = (0..100).map(|i| usize::from(i % 5 == 0)).collect();
        let split = train_test_split(&labels, &settings(0.25, true)).unwrap();
        assert_eq!(split.test.len(), 25);
        assert_eq!(split.train.len(), 75);
        assert_eq!(split.test.iter().filter(|i| labels[**i] == 1).count(), 5);
        assert_eq!(split.train.iter().filter(|i| labels[**i] == 1).count(), 15);

        // partition of all rows
        let mut all: Vec<usize> = split.train.iter().chain(split.test.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn deterministic_for_seed() {
        let labels: Vec<usize> = (0..50).map(|i| i % 3).collect();
        let a = train_test_split(&labels, &settings(0.2, true)).unwrap();
        let b = train_test_split(&labels, &settings(0.2, true)).unwrap();
        assert_eq!(a, b);
        let c = train_test_split(
            &labels,
            &SplitSettings {
                seed: 7,
                ..settings(0.2, true)
            },
        )
        .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn singleton_class_stays_in_training() {
        let labels = vec![0, 0, 0, 0, 0, 0, 0, 1];
        let split = train_test_split(&labels, &settings(0.5, true)).unwrap();
        assert!(split.train.contains(&7));
        assert_eq!(split.test.len(), 4);
    }

    #[test]
    fn unstratified_uses_ceil() {
        let split = train_test_split(&[0, 1, 2], &settings(0.2, false)).unwrap();
        assert_eq!(split.test.len(), 1);
        assert_eq!(split.train.len(), 2);
    }

    #[test]
    fn degenerate_splits() {
        assert_eq!(
            train_test_split(&[], &settings(0.25, true)),
            Err(SplitError::Empty)
        );
        assert_eq!(
            train_test_split(&[0, 1], &settings(0.25, true)),
            Err(SplitError::EmptyTest {
                rows: 2,
                test_size: 0.25
            })
        );
        assert_eq!(
            train_test_split(&[0], &settings(0.9, false)),
            Err(SplitError::EmptyTrain {
                rows: 1,
                test_size: 0.9
            })
        );
        assert!(matches!(
            train_test_split(&[0, 1], &settings(1.0, false)),
            Err(SplitError::InvalidTestSize(_))
        ));
    }
}
