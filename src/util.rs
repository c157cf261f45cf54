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
//! Utility module collection of functions

use std::path::{Path, PathBuf};

/// Initialize logging. Uses `log4rs.yml` in the working directory if it exists, and falls back to
/// `pretty_env_logger` (configured with `RUST_LOG`) otherwise.
pub fn init_logging() {
    if Path::new("log4rs.yml").exists() {
        if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
            eprintln!("Cannot initialize log4rs from log4rs.yml: {e}");
            pretty_env_logger::init();
        }
    } else {
        pretty_env_logger::init();
    }
}

/// Result of a stage that works on a single input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The stage ran and produced `T`.
    Done(T),
    /// The expected input file does not exist; nothing was done.
    InputAbsent(PathBuf),
}

impl<T> Outcome<T> {
    /// Run `f` on `input` if the file exists.
    pub fn if_exists<E>(
        input: impl AsRef<Path>,
        f: impl FnOnce(&Path) -> Result<T, E>,
    ) -> Result<Self, E> {
        let input = input.as_ref();
        if input.exists() {
            f(input).map(Self::Done)
        } else {
            Ok(Self::InputAbsent(input.to_path_buf()))
        }
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(t) => Some(t),
            Self::InputAbsent(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Log a diagnostic if the input was absent, naming the unit of work that is skipped.
    pub fn warn_absent(self, what: impl AsRef<str>) -> Self {
        if let Self::InputAbsent(path) = &self {
            log::warn!("File {path:?} not found. Skipping {}.", what.as_ref());
        }
        self
    }
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;

    /// Append a file name built from a template where `{}` is replaced by `name`.
    fn then_named(self, template: impl AsRef<str>, name: &str) -> PathBuf {
        self.then(template.as_ref().replacen("{}", name, 1))
    }
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

impl PathBufExt for &PathBuf {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        self.as_path().then(p)
    }
}
