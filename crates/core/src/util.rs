use chrono::{DateTime, Utc};

/// Current wall-clock time in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole days elapsed between `then` and `now`, truncated toward zero.
///
/// A timestamp in the future yields a negative age.
pub fn age_in_days(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_days()
}
