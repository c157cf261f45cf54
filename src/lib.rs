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
//! Library for collecting match-action table entries from P4/BMv2 switches, and for training and
//! comparing classifiers that detect anomalies in the collected data.
//!
//! The pipeline consists of independent stages that communicate through files:
//! [`collector`] → [`preprocessor`] → [`cleaner`] → ([`labeler`]) → [`trainer`] → [`comparator`]
//! and [`report`]. The [`pipeline`] module runs all of them in sequence.

pub mod cleaner;
pub mod collector;
pub mod comparator;
pub mod config;
pub mod entries;
pub mod labeler;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocessor;
pub mod report;
pub mod schema;
pub mod table;
pub mod trainer;
pub mod util;

/// Seed used for all random splits and model initializations, unless configured otherwise.
pub const RANDOM_STATE: u64 = 42;

pub mod prelude {
    pub use super::{
        config::{PipelineConfig, PipelineDirs, TrainSettings},
        models::{Classifier, ModelKind},
        preprocessor::TableKind,
        table::Table,
        util::{Outcome, PathBufExt},
    };
}

#[cfg(test)]
mod test;
