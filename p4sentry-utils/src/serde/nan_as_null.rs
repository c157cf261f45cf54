//! Module that allows to (de-)serialize an `f64` that may be NaN with `serde`.
//!
//! JSON has no representation for NaN, and `serde_json` writes non-finite floats as `null` but
//! refuses to read `null` back into an `f64`. Use this module on such fields:
//!
//! ```ignore
//! #[serde(with = "p4sentry_utils::serde::nan_as_null")]
//! pub roc_auc: f64,
//! ```

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a float, writing `null` for NaN and infinite values.
pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_none()
    }
}

/// Deserialize a float, reading `null` as NaN.
pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Score {
        #[serde(with = "super")]
        auc: f64,
    }

    #[test]
    fn nan_is_null() {
        let ser = serde_json::to_string(&Score { auc: f64::NAN }).unwrap();
        assert_eq!(ser, r#"{"auc":null}"#);
        let de: Score = serde_json::from_str(&ser).unwrap();
        assert!(de.auc.is_nan());
    }

    #[test]
    fn finite_is_kept() {
        let ser = serde_json::to_string(&Score { auc: 0.75 }).unwrap();
        assert_eq!(ser, r#"{"auc":0.75}"#);
        let de: Score = serde_json::from_str(&ser).unwrap();
        assert_eq!(de.auc, 0.75);
    }
}
