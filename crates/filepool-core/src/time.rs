//! Clock helpers.
//!
//! File timestamps are stored in epoch milliseconds, package download
//! times in epoch seconds; both helpers exist so call sites don't mix the
//! units up.

use chrono::Utc;

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time in epoch seconds.
#[must_use]
pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_are_consistent() {
        let millis = now_millis();
        let seconds = now_seconds();
        // Both taken "now", so they agree to within a couple of seconds.
        assert!((millis / 1000 - seconds).abs() <= 2);
    }
}
