use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Start of the trailing `window` ending at `now`.
///
/// `None` when the window reaches before the representable range, in
/// which case nothing can be older than it.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(window).ok()?;
    now.checked_sub_signed(delta)
}
