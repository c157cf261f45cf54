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
//! Module defining the row-tabular format every stage reads and writes.
//!
//! A `Table` is an ordered list of named columns and an ordered list of rows. Each cell is an
//! `Option<String>`, where `None` marks a missing value. When reading CSV files, empty cells and the
//! usual missing-value markers (see `MISSING_MARKERS`) become `None`; when writing, `None` becomes
//! an empty cell.
use std::{
    fs,
    io::{Read, Write},
    path::Path,
};

/// Sentinel written by the preprocessor for fields that are absent from a table entry.
pub const MISSING: &str = "N/A";

/// Cell contents that are interpreted as a missing value when reading a table.
pub const MISSING_MARKERS: [&str; 7] = ["", "N/A", "NA", "NaN", "nan", "null", "None"];

/// A single cell of a `Table`.
pub type Cell = Option<String>;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Column `{0}` not found in the table.")]
    MissingColumn(String),
    #[error("Column `{0}` exists more than once.")]
    DuplicateColumn(String),
    #[error("Row {row} has {found} cells, but the table has {expected} columns.")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Value `{value}` in column `{column}` (row {row}) is not numeric.")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
}

/// Returns `true` if the raw cell content denotes a missing value.
pub fn is_missing_marker(raw: &str) -> bool {
    MISSING_MARKERS.contains(&raw.trim())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Result<Self, TableError> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].contains(c) {
                return Err(TableError::DuplicateColumn(c.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Append a row. The row must have one cell per column.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowLength {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Iterate over the cells of a single column.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = Option<&str>>, TableError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| row[idx].as_deref()))
    }

    /// Parse a column as floating point numbers. Missing cells are `None`; any present cell that
    /// does not parse yields `TableError::NotNumeric`.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>, TableError> {
        let idx = self.column_index(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row, cells)| match cells[idx].as_deref() {
                None => Ok(None),
                Some(raw) if is_missing_marker(raw) => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| TableError::NotNumeric {
                        column: name.to_string(),
                        row,
                        value: raw.to_string(),
                    }),
            })
            .collect()
    }

    /// Add a new column (or overwrite an existing one with the same name).
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::RowLength {
                row: values.len(),
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        match self.column_index(name) {
            Ok(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            Err(_) => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Remove the named columns. Names that do not exist are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        let mut i = 0;
        self.columns.retain(|_| {
            i += 1;
            keep[i - 1]
        });
        for row in self.rows.iter_mut() {
            let mut i = 0;
            row.retain(|_| {
                i += 1;
                keep[i - 1]
            });
        }
    }

    /// Keep only the rows for which `f` returns `true`, preserving their order.
    pub fn retain_rows(&mut self, mut f: impl FnMut(&[Cell]) -> bool) {
        self.rows.retain(|row| f(row));
    }

    /// Build a new table with the same columns and the rows at the given indices.
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|i| self.rows[*i].clone()).collect(),
        }
    }

    /// Read a table from CSV with a header row.
    pub fn from_reader(reader: impl Read) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let mut table = Self::new(rdr.headers()?.iter().map(|h| h.to_string()))?;
        for record in rdr.records() {
            let record = record?;
            table.push_row(
                record
                    .iter()
                    .map(|raw| (!is_missing_marker(raw)).then(|| raw.to_string()))
                    .collect(),
            )?;
        }
        Ok(table)
    }

    /// Read a table from a CSV file with a header row.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, TableError> {
        Self::from_reader(fs::File::open(path.as_ref())?)
    }

    /// Write the table as CSV with a header row.
    pub fn to_writer(&self, writer: impl Write) -> Result<(), TableError> {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(writer);
        csv.write_record(&self.columns)?;
        for row in self.rows.iter() {
            csv.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Write the table to a CSV file, creating parent directories and overwriting the file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.to_writer(
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path.as_ref())?,
        )
    }
}
