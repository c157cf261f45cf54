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
//! Preprocessing transform that turns the feature columns of a table into a dense numeric matrix.
//!
//! Numeric columns are standard-scaled with the population mean and standard deviation of the
//! training table. Missing numeric values are replaced by the training mean (which is 0 after
//! scaling). Categorical columns are one-hot encoded over the sorted categories seen during
//! training, where a missing value is its own category (`N/A`). Categories that were not seen
//! during training are encoded as all zeros.

use ndarray::Array2;
use p4sentry_utils::stats;
use serde::{Deserialize, Serialize};

use crate::{
    schema::{FeatureSchema, SchemaError},
    table::{is_missing_marker, Table, MISSING},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransform {
    schema: FeatureSchema,
    means: Vec<f64>,
    scales: Vec<f64>,
    categories: Vec<Vec<String>>,
}

fn category(raw: Option<&str>) -> &str {
    match raw {
        Some(raw) if !is_missing_marker(raw) => raw,
        _ => MISSING,
    }
}

impl ColumnTransform {
    /// Learn the scaling and the categories from `table`.
    pub fn fit(table: &Table, schema: &FeatureSchema) -> Result<Self, SchemaError> {
        schema.validate(table)?;

        let mut means = Vec::with_capacity(schema.numeric.len());
        let mut scales = Vec::with_capacity(schema.numeric.len());
        for column in schema.numeric.iter() {
            let present: Vec<f64> = table.numeric_column(column)?.into_iter().flatten().collect();
            let mean = stats::mean(&present);
            let std = stats::population_std_dev(&present);
            means.push(if mean.is_finite() { mean } else { 0.0 });
            scales.push(if std.is_finite() && std > 0.0 { std } else { 1.0 });
        }

        let mut categories = Vec::with_capacity(schema.categorical.len());
        for column in schema.categorical.iter() {
            let mut values: Vec<String> = table
                .column(column)?
                .map(|raw| category(raw).to_string())
                .collect();
            values.sort();
            values.dedup();
            categories.push(values);
        }

        Ok(Self {
            schema: schema.clone(),
            means,
            scales,
            categories,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Width of the encoded matrix.
    pub fn n_features(&self) -> usize {
        self.schema.numeric.len() + self.categories.iter().map(Vec::len).sum::<usize>()
    }

    /// Name of every encoded column, e.g. `prefix_len` or `action_name=drop`.
    pub fn feature_names(&self) -> Vec<String> {
        self.schema
            .numeric
            .iter()
            .cloned()
            .chain(
                self.schema
                    .categorical
                    .iter()
                    .zip(self.categories.iter())
                    .flat_map(|(column, cats)| cats.iter().map(move |c| format!("{column}={c}"))),
            )
            .collect()
    }

    /// Encode the feature columns of `table`. Fails if the table does not match the schema.
    pub fn transform(&self, table: &Table) -> Result<Array2<f64>, SchemaError> {
        self.schema.validate(table)?;
        let mut x = Array2::zeros((table.len(), self.n_features()));

        for (j, column) in self.schema.numeric.iter().enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            for (i, v) in table.numeric_column(column)?.into_iter().enumerate() {
                x[[i, j]] = v.map(|v| (v - mean) / scale).unwrap_or(0.0);
            }
        }

        let mut offset = self.schema.numeric.len();
        for (column, cats) in self.schema.categorical.iter().zip(self.categories.iter()) {
            for (i, raw) in table.column(column)?.enumerate() {
                if let Ok(k) = cats.binary_search_by(|c| c.as_str().cmp(category(raw))) {
                    x[[i, offset + k]] = 1.0;
                }
            }
            offset += cats.len();
        }

        Ok(x)
    }
}

#[cfg(test)]
mod test {
    use ndarray::array;

    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn scale_and_encode() {
        let train = table("prefix_len,action_name\n16,fwd\n24,drop\n32,fwd\n");
        let schema = FeatureSchema::new(["prefix_len"], ["action_name"]);
        let t = ColumnTransform::fit(&train, &schema).unwrap();
        assert_eq!(
            t.feature_names(),
            vec!["prefix_len", "action_name=drop", "action_name=fwd"]
        );
        let std = (128.0f64 / 3.0).sqrt();
        let x = t.transform(&train).unwrap();
        let expected = array![
            [-8.0 / std, 0.0, 1.0],
            [0.0, 1.0, 0.0],
            [8.0 / std, 0.0, 1.0]
        ];
        assert!((x - expected).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn unknown_and_missing() {
        let train = table("drops,port\n1,a\n1,\n");
        let schema = FeatureSchema::new(["drops"], ["port"]);
        let t = ColumnTransform::fit(&train, &schema).unwrap();
        // constant column keeps scale 1, missing category is its own column
        assert_eq!(t.feature_names(), vec!["drops", "port=N/A", "port=a"]);

        let test = table("drops,port\n3,b\n,a\n,N/A\n");
        let x = t.transform(&test).unwrap();
        assert_eq!(x, array![[2.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
    }

    #[test]
    fn schema_mismatch_fails() {
        let train = table("drops,port\n1,a\n2,b\n");
        let t = ColumnTransform::fit(&train, &FeatureSchema::new(["drops"], ["port"])).unwrap();
        assert!(matches!(
            t.transform(&table("drops\n1\n")),
            Err(SchemaError::MissingColumn(_))
        ));
    }
}
