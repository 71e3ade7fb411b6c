//! Conversions between std and chrono durations.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Convert a std `Duration` to a chrono `Duration`, saturating at the
/// chrono maximum instead of failing for out-of-range values.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
}

/// The instant `d` before now.
pub fn ago(d: Duration) -> DateTime<Utc> {
    Utc::now() - to_chrono(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_chrono_round_values() {
        assert_eq!(to_chrono(Duration::from_secs(90)), chrono::Duration::seconds(90));
    }

    #[test]
    fn test_to_chrono_saturates() {
        let huge = Duration::from_secs(u64::MAX);
        assert_eq!(to_chrono(huge), chrono::Duration::milliseconds(i64::MAX));
    }

    #[test]
    fn test_ago_is_in_the_past() {
        let t = ago(Duration::from_secs(60));
        assert!(t < Utc::now());
    }
}
