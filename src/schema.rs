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
//! Module with the declared feature schema of a table.
//!
//! The schema names which columns are numeric and which are categorical. It is either declared per
//! table type or inferred once from a training table, and it is stored with every trained model so
//! that evaluating the model on a table with different columns fails early.
use serde::{Deserialize, Serialize};

use crate::table::{is_missing_marker, Table, TableError};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Feature column `{0}` is missing from the table.")]
    MissingColumn(String),
    #[error("Numeric feature column `{column}` contains the non-numeric value `{value}` (row {row}).")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
    #[error("The table has no feature columns.")]
    NoFeatures,
    #[error("Column `{0}` is declared both numeric and categorical.")]
    Ambiguous(String),
    #[error("Table error: {0}")]
    Table(TableError),
}

impl From<TableError> for SchemaError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::NotNumeric { column, row, value } => {
                Self::NotNumeric { column, row, value }
            }
            TableError::MissingColumn(c) => Self::MissingColumn(c),
            e => Self::Table(e),
        }
    }
}

/// Numeric and categorical feature columns, in the order they are encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
}

impl FeatureSchema {
    pub fn new<N, C>(
        numeric: impl IntoIterator<Item = N>,
        categorical: impl IntoIterator<Item = C>,
    ) -> Self
    where
        N: Into<String>,
        C: Into<String>,
    {
        Self {
            numeric: numeric.into_iter().map(Into::into).collect(),
            categorical: categorical.into_iter().map(Into::into).collect(),
        }
    }

    /// Infer the schema from all columns of `table` that are not `excluded`. A column is numeric if
    /// every present value parses as a number (and at least one value is present); all other
    /// columns are categorical.
    pub fn infer(table: &Table, excluded: &[&str]) -> Result<Self, SchemaError> {
        let mut schema = Self::default();
        for (idx, column) in table.columns().iter().enumerate() {
            if excluded.contains(&column.as_str()) {
                continue;
            }
            let mut present = table
                .rows()
                .iter()
                .filter_map(|row| row[idx].as_deref())
                .filter(|raw| !is_missing_marker(raw))
                .peekable();
            let is_numeric =
                present.peek().is_some() && present.all(|raw| raw.trim().parse::<f64>().is_ok());
            if is_numeric {
                schema.numeric.push(column.clone());
            } else {
                schema.categorical.push(column.clone());
            }
        }
        if schema.is_empty() {
            return Err(SchemaError::NoFeatures);
        }
        log::debug!(
            "Inferred numeric features {:?} and categorical features {:?}",
            schema.numeric,
            schema.categorical
        );
        Ok(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.categorical.is_empty()
    }

    /// All feature columns, numeric first.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.numeric
            .iter()
            .chain(self.categorical.iter())
            .map(String::as_str)
    }

    /// Check that `table` contains every feature column, and that numeric columns only contain
    /// numbers.
    pub fn validate(&self, table: &Table) -> Result<(), SchemaError> {
        if self.is_empty() {
            return Err(SchemaError::NoFeatures);
        }
        if let Some(c) = self.numeric.iter().find(|c| self.categorical.contains(c)) {
            return Err(SchemaError::Ambiguous(c.clone()));
        }
        if let Some(missing) = self.columns().find(|c| !table.has_column(c)) {
            return Err(SchemaError::MissingColumn(missing.to_string()));
        }
        for column in self.numeric.iter() {
            table.numeric_column(column)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn infer_types() {
        let t = table(
            "timestamp,drops,port,action_name,label\n\
             t0,1,3,fwd,0\n\
             t1,,4,drop,1\n\
             t2,2.5,x,fwd,0\n",
        );
        let schema = FeatureSchema::infer(&t, &["timestamp", "label"]).unwrap();
        assert_eq!(schema.numeric, vec!["drops"]);
        assert_eq!(schema.categorical, vec!["port", "action_name"]);
        assert_eq!(
            schema.columns().collect::<Vec<_>>(),
            vec!["drops", "port", "action_name"]
        );
        schema.validate(&t).unwrap();
    }

    #[test]
    fn all_missing_column_is_categorical() {
        let t = table("a,b\n,1\n,2\n");
        let schema = FeatureSchema::infer(&t, &[]).unwrap();
        assert_eq!(schema.numeric, vec!["b"]);
        assert_eq!(schema.categorical, vec!["a"]);
    }

    #[test]
    fn no_features() {
        let t = table("label\n0\n1\n");
        assert!(matches!(
            FeatureSchema::infer(&t, &["label"]),
            Err(SchemaError::NoFeatures)
        ));
    }

    #[test]
    fn validate_fails_fast() {
        let schema = FeatureSchema::new(["prefix_len"], ["action_name"]);
        let missing = table("prefix_len,egress_port\n24,1\n");
        assert!(matches!(
            schema.validate(&missing),
            Err(SchemaError::MissingColumn(c)) if c == "action_name"
        ));
        let wrong_type = table("prefix_len,action_name\n24,fwd\nslash24,fwd\n");
        assert!(matches!(
            schema.validate(&wrong_type),
            Err(SchemaError::NotNumeric { row: 1, .. })
        ));
        let ambiguous = FeatureSchema::new(["a"], ["a"]);
        assert!(matches!(
            ambiguous.validate(&table("a\n1\n")),
            Err(SchemaError::Ambiguous(_))
        ));
    }
}
