//! Send-time pacing for a campaign launch.

use chrono::{DateTime, Duration, Utc};

/// `9999-12-31T23:59:59Z` as a Unix timestamp.
const LATEST_SEND_AT_SECS: i64 = 253_402_300_799;

/// Latest send time a task can be deferred to.
///
/// Later instants have no four-digit-year RFC3339 form, so a store keeping
/// send times as text could no longer order or parse them.
pub fn latest_send_at() -> DateTime<Utc> {
    DateTime::from_timestamp(LATEST_SEND_AT_SECS, 0).unwrap_or_default()
}

/// Spread `count` send times from `launch` towards `send_by`.
///
/// Offsets are whole minutes because the worker polls at minute granularity
/// by default. Without a usable `send_by` every task is due at `launch`.
pub fn pace(launch: DateTime<Utc>, send_by: Option<DateTime<Utc>>, count: usize) -> Vec<DateTime<Utc>> {
    let window = match send_by {
        Some(send_by) if send_by > launch && count > 0 => send_by - launch,
        _ => return vec![launch; count],
    };

    let minutes_per_task = window.num_seconds() as f64 / 60.0 / count as f64;
    (0..count)
        .map(|idx| {
            let offset = (minutes_per_task * idx as f64) as i64;
            launch + Duration::minutes(offset)
        })
        .collect()
}
