//! Utility library for the P4SENTRY project

pub mod other;
pub mod serde;
pub mod stats;
