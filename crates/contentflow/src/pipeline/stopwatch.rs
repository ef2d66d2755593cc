use std::time::{Duration, Instant};

/// Measures one step execution.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time as `HH:MM:SS.mmm`.
    pub fn elapsed_string(&self) -> String {
        format_elapsed(self.elapsed())
    }
}

/// Formats a duration as `HH:MM:SS.mmm`. Hours are not wrapped at 24.
pub fn format_elapsed(duration: Duration) -> String {
    let total_millis = duration.as_millis();
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let seconds = (total_millis / 1_000) % 60;
    let millis = total_millis % 1_000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Parses an `HH:MM:SS[.fff]` string. Returns `None` for anything else.
pub fn parse_elapsed(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }

    let (secs, frac) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, f),
        None => (seconds_part, ""),
    };
    let seconds: u64 = secs.parse().ok()?;
    if seconds >= 60 {
        return None;
    }

    let millis = if frac.is_empty() {
        0
    } else {
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        // Only millisecond precision is kept.
        let padded: String = frac.chars().chain("000".chars()).take(3).collect();
        padded.parse::<u64>().ok()?
    };

    Some(Duration::from_millis(
        ((hours * 60 + minutes) * 60 + seconds) * 1_000 + millis,
    ))
}

/// Sums elapsed strings, skipping the ones that do not parse.
pub fn sum_elapsed<'a>(values: impl IntoIterator<Item = &'a str>) -> Duration {
    values.into_iter().filter_map(parse_elapsed).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00:00.000");
        assert_eq!(format_elapsed(Duration::from_millis(1_250)), "00:00:01.250");
        assert_eq!(
            format_elapsed(Duration::from_millis(3_723_004)),
            "01:02:03.004"
        );
        assert_eq!(format_elapsed(Duration::from_secs(26 * 3600)), "26:00:00.000");
    }

    #[test]
    fn test_parse_elapsed() {
        assert_eq!(parse_elapsed("01:02:03.004"), Some(Duration::from_millis(3_723_004)));
        assert_eq!(parse_elapsed("00:00:05"), Some(Duration::from_secs(5)));
        assert_eq!(parse_elapsed("00:00:01.5"), Some(Duration::from_millis(1_500)));
        assert_eq!(parse_elapsed("00:00:01.123456"), Some(Duration::from_millis(1_123)));
        assert!(parse_elapsed("garbage").is_none());
        assert!(parse_elapsed("00:61:00").is_none());
        assert!(parse_elapsed("00:00:00:00").is_none());
    }

    #[test]
    fn test_sum_elapsed_skips_invalid() {
        let total = sum_elapsed(["00:00:01.500", "bad", "00:01:00.000"]);
        assert_eq!(total, Duration::from_millis(61_500));
    }

    #[test]
    fn test_stopwatch_measures() {
        let watch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(watch.elapsed() >= Duration::from_millis(5));
        assert!(watch.elapsed_string().starts_with("00:00:"));
    }
}
