//! Formatting helpers shared by notifications and log lines.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Format a timestamp as short local time (e.g., "14-08 17:05").
pub fn pretty_time(ts: DateTime<Utc>) -> String {
    pretty_time_in(ts, &Local)
}

/// [`pretty_time`] in an explicit timezone.
pub fn pretty_time_in<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    ts.with_timezone(tz).format("%d-%m %H:%M").to_string()
}

/// Format a duration compactly (e.g., "2h 05m", "45m", "30s").
pub fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;

    if hours >= 24 {
        format!("{}d {:02}h", hours / 24, hours % 24)
    } else if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    }
}

/// Join names for a sentence: "A", "A e B", "A, B e C".
pub fn area_label<S: AsRef<str>>(names: &[S]) -> String {
    match names {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(|s| s.as_ref()).collect();
            format!("{} e {}", head.join(", "), last.as_ref())
        }
    }
}

/// Truncate to at most `max` characters, appending "..." when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
