//! Module containing some utility functions that didn't fit anywhere else.

use time::{format_description, OffsetDateTime};

/// Produces a human-readable timestamp `String` of the current time when an artifact was created.
pub fn get_readable_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
        .ok()
        .and_then(|format| now.format(&format).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamp_format() {
        let ts = get_readable_timestamp();
        // YYYY-MM-DD HH:mm:SS
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[10..11], " ");
        assert_eq!(ts.matches(':').count(), 2);
    }
}
