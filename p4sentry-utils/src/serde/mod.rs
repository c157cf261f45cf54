//! Utility module for serde of types.

pub mod nan_as_null;
