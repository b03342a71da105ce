/// Format a minute count as a countdown string: "h:mm:ss" past the hour,
/// "m:ss" below it.
pub fn format_countdown(minutes: f64) -> String {
    let total_secs = (minutes.max(0.0) * 60.0).round() as u64;
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

/// Relative past-time phrase for history listings ("2 hours ago")
pub fn ago(seconds: u64) -> String {
    use time_humanize::{Accuracy, HumanTime, Tense};
    HumanTime::from(std::time::Duration::from_secs(seconds)).to_text_en(Accuracy::Rough, Tense::Past)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_below_an_hour() {
        assert_eq!(format_countdown(0.0), "0:00");
        assert_eq!(format_countdown(0.5), "0:30");
        assert_eq!(format_countdown(42.25), "42:15");
    }

    #[test]
    fn countdown_past_the_hour() {
        assert_eq!(format_countdown(88.0), "1:28:00");
        assert_eq!(format_countdown(125.5), "2:05:30");
    }

    #[test]
    fn countdown_clamps_negative_input() {
        assert_eq!(format_countdown(-3.0), "0:00");
    }

    #[test]
    fn ago_is_nonempty_prose() {
        let text = ago(2 * 60 * 60);
        assert!(text.contains("ago"), "got: {text}");
    }
}
