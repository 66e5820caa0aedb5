//! Per-service descriptor time periods.
//!
//! A v2 descriptor ID is valid for one "time period" of 86400 seconds.
//! The boundary is skewed by the first byte of the service's permanent
//! ID, so that not every service on the network rolls its descriptor
//! IDs over at midnight UTC.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::pk::PermanentId;

/// Length of a descriptor time period, in seconds.
pub const TIME_PERIOD_LEN: u64 = 86400;

/// Return the seconds since the Unix epoch for `when`.
///
/// Times before the epoch are clamped to zero; they cannot occur for
/// any meaningful wall-clock input.
fn unix_secs(when: SystemTime) -> u64 {
    when.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Return the skewed clock value used for period arithmetic.
fn skewed_secs(when: SystemTime, id: &PermanentId) -> u64 {
    unix_secs(when) + u64::from(id.skew_byte()) * TIME_PERIOD_LEN / 256
}

/// Return the number of the time period containing `when` for the
/// service identified by `id`.
pub fn time_period(when: SystemTime, id: &PermanentId) -> u64 {
    skewed_secs(when, id) / TIME_PERIOD_LEN
}

/// Return how many seconds remain at `when` before the service's time
/// period (and therefore its descriptor IDs) changes.
pub fn seconds_valid(when: SystemTime, id: &PermanentId) -> u64 {
    TIME_PERIOD_LEN - skewed_secs(when, id) % TIME_PERIOD_LEN
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use hex_literal::hex;
    use std::time::Duration;

    /// The permanent ID of the fixed test key, and a fixed instant
    /// (2015-06-25T10:50:21Z).
    fn test_inputs() -> (SystemTime, PermanentId) {
        let when = UNIX_EPOCH + Duration::from_secs(1_435_229_421);
        let id = PermanentId::from_bytes(hex!("4e2a58768ccb6aa06f95"));
        (when, id)
    }

    #[test]
    fn period_number() {
        let (when, id) = test_inputs();
        assert_eq!(time_period(when, &id), 16611);
    }

    #[test]
    fn remaining_validity() {
        let (when, id) = test_inputs();
        assert_eq!(seconds_valid(when, &id), 21054);
    }

    #[test]
    fn skew_moves_the_boundary() {
        let when = humantime::parse_rfc3339("2015-06-25T00:00:00Z").unwrap();
        let zero = PermanentId::from_bytes([0; 10]);
        let high = PermanentId::from_bytes(hex!("ff000000000000000000"));
        // An unskewed service starts a fresh period exactly at midnight.
        assert_eq!(seconds_valid(when, &zero), TIME_PERIOD_LEN);
        // A fully-skewed one is almost at the end of its period:
        // 255 * 86400 / 256 == 86062 seconds of skew.
        assert_eq!(seconds_valid(when, &high), TIME_PERIOD_LEN - 86062);
    }
}
