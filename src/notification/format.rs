//! Text helpers for presenting notifications.

use chrono::{DateTime, Utc};

/// Render `at` relative to `now` the way the notification panel does:
/// "Just now", "N minutes ago", "N hours ago", "N days ago", then a date.
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - at).num_seconds().unsigned_abs();

    if diff < 60 {
        "Just now".to_string()
    } else if diff < 3_600 {
        plural(diff / 60, "minute")
    } else if diff < 86_400 {
        plural(diff / 3_600, "hour")
    } else if diff < 604_800 {
        plural(diff / 86_400, "day")
    } else {
        at.format("%Y-%m-%d").to_string()
    }
}

/// Toast text for a batch of unread notifications
pub fn unread_summary(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        1 => Some("You have 1 new notification".to_string()),
        n => Some(format!("You have {} new notifications", n)),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n > 1 {
        format!("{} {}s ago", n, unit)
    } else {
        format!("{} {} ago", n, unit)
    }
}
