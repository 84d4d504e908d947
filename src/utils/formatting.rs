use chrono::{DateTime, Days, TimeZone};

pub fn apply_pattern_string(pattern: &str, vars: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();
    for (key, value) in vars {
        let needle = format!(":{}", key);
        result = result.replace(&needle, value);
    }
    result
}

/// `DD.MM.` of the day `offset_days` after `now`, in `now`'s timezone.
pub fn date_label<Tz: TimeZone>(now: &DateTime<Tz>, offset_days: u64) -> String {
    let day = now.date_naive();
    let day = day.checked_add_days(Days::new(offset_days)).unwrap_or(day);
    day.format("%d.%m.").to_string()
}

pub fn join_names(names: &[String], empty_marker: &str) -> String {
    if names.is_empty() {
        empty_marker.to_string()
    } else {
        names.join(", ")
    }
}
