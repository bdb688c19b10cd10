use chrono::{DateTime, Duration, Local, Utc};

/// Function to format timestamp as readable date
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format an optional timestamp, with a placeholder for "never"
pub fn format_optional(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp.map(format_timestamp).unwrap_or_else(|| "never".to_string())
}

/// Format duration to human readable string
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    if seconds < 60 {
        format!("{} seconds", seconds)
    } else if seconds < 3600 {
        format!("{} minutes", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours", seconds / 3600)
    } else {
        format!("{} days", seconds / 86400)
    }
}

/// Convert UTC timestamp to local time string
pub fn utc_to_local(timestamp: DateTime<Utc>) -> String {
    let local_time: DateTime<Local> = DateTime::from(timestamp);
    local_time.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}
