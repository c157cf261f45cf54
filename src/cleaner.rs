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
//! Module that cleans flattened tables: rows missing the required field are dropped first, then
//! exact duplicates (across all columns) are removed, keeping the first occurrence.
use std::{collections::HashSet, path::Path};

use crate::{
    table::{Cell, Table, TableError},
    util::Outcome,
};

/// Number of rows removed by each cleaning step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub missing_removed: usize,
    pub duplicates_removed: usize,
}

/// Clean `table` in place.
pub fn clean(table: &mut Table, required_field: &str) -> Result<CleanStats, TableError> {
    let idx = table.column_index(required_field)?;

    let initial_rows = table.len();
    table.retain_rows(|row| row[idx].is_some());
    let missing_removed = initial_rows - table.len();
    log::info!("Removed {missing_removed} rows with missing values in `{required_field}`.");

    let initial_rows = table.len();
    let mut seen: HashSet<Vec<Cell>> = HashSet::new();
    table.retain_rows(|row| seen.insert(row.to_vec()));
    let duplicates_removed = initial_rows - table.len();
    log::info!("Removed {duplicates_removed} duplicate rows.");

    Ok(CleanStats {
        missing_removed,
        duplicates_removed,
    })
}

/// Clean the table in `input` and write the result to `output`.
pub fn clean_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    required_field: &str,
) -> Result<Outcome<CleanStats>, TableError> {
    Outcome::if_exists(input, |input| {
        let mut table = Table::read_csv(input)?;
        let stats = clean(&mut table, required_field)?;
        table.write_csv(output.as_ref())?;
        log::info!("Saved cleaned data to {:?}", output.as_ref());
        Ok(stats)
    })
}

#[cfg(test)]
mod test {
    use rand::prelude::*;

    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn drop_missing_then_duplicates() {
        let mut t = table(
            "dst_mac,action_name,egress_port\n\
             a,fwd,1\n\
             b,fwd,N/A\n\
             a,fwd,1\n\
             c,fwd,\n\
             d,fwd,2\n\
             a,fwd,1\n",
        );
        let stats = clean(&mut t, "egress_port").unwrap();
        assert_eq!(
            stats,
            CleanStats {
                missing_removed: 2,
                duplicates_removed: 2
            }
        );
        assert_eq!(t, table("dst_mac,action_name,egress_port\na,fwd,1\nd,fwd,2\n"));
    }

    #[test]
    fn missing_in_other_columns_are_kept() {
        let mut t = table("dst_mac,action_name,egress_port\n,fwd,1\n,fwd,1\nx,,2\n");
        let stats = clean(&mut t, "egress_port").unwrap();
        assert_eq!(stats.missing_removed, 0);
        // missing values compare equal to each other
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn missing_required_column() {
        let mut t = table("a,b\n1,2\n");
        assert!(matches!(
            clean(&mut t, "egress_port"),
            Err(TableError::MissingColumn(_))
        ));
    }

    #[test]
    fn random_tables_never_grow_and_clean_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let mut t = Table::new(["a", "b", "egress_port"]).unwrap();
            for _ in 0..rng.gen_range(0..40) {
                t.push_row(
                    (0..3)
                        .map(|_| match rng.gen_range(0..4) {
                            0 => None,
                            v => Some(v.to_string()),
                        })
                        .collect(),
                )
                .unwrap();
            }
            let original = t.clone();

            let stats = clean(&mut t, "egress_port").unwrap();
            assert!(t.len() <= original.len());
            assert_eq!(
                t.len() + stats.missing_removed + stats.duplicates_removed,
                original.len()
            );

            // every present, first-seen row survives, in order
            let mut expected = Vec::new();
            for row in original.rows() {
                if row[2].is_some() && !expected.contains(row) {
                    expected.push(row.clone());
                }
            }
            assert_eq!(t.rows(), expected.as_slice());

            // cleaning again is a no-op
            let again = clean(&mut t, "egress_port").unwrap();
            assert_eq!(again, CleanStats::default());
        }
    }
}
