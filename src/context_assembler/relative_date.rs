//! Fixed relative-date ladder for commit digests (§4.4): just now / N
//! minutes|hours|days|weeks|months ago.

use chrono::{DateTime, Utc};

pub fn relative_date(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);

    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }

    let days = hours / 24;
    if days < 7 {
        return plural(days, "day");
    }

    let weeks = days / 7;
    if weeks < 5 {
        return plural(weeks, "week");
    }

    let months = days / 30;
    plural(months.max(1), "month")
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 { format!("1 {unit} ago") } else { format!("{count} {unit}s ago") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn under_a_minute_is_just_now() {
        let now = Utc::now();
        assert_eq!(relative_date(now - Duration::seconds(30), now), "just now");
    }

    #[test]
    fn minutes_hours_days_weeks_months_ladder() {
        let now = Utc::now();
        assert_eq!(relative_date(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(relative_date(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(relative_date(now - Duration::days(2), now), "2 days ago");
        assert_eq!(relative_date(now - Duration::weeks(2), now), "2 weeks ago");
        assert_eq!(relative_date(now - Duration::days(90), now), "3 months ago");
    }

    #[test]
    fn singular_units_drop_the_s() {
        let now = Utc::now();
        assert_eq!(relative_date(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(relative_date(now - Duration::hours(1), now), "1 hour ago");
    }
}
