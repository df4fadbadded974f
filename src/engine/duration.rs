//! Delay duration parsing: `30s`, `5m`, `1h30m`, `1d`.

use std::time::Duration;

/// Parses a delay duration. A whole-string `<n>d` form means days; anything
/// else is a sequence of `<number><unit>` segments with units `ms`, `s`,
/// `m`, `h`. Returns `None` for invalid or non-positive input.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(days) = s.strip_suffix('d') {
        if let Ok(n) = days.trim().parse::<u64>() {
            return (n > 0).then(|| Duration::from_secs(n * 24 * 60 * 60));
        }
    }

    let mut total_secs = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit() && c != '.')?;
        if digits_end == 0 {
            return None;
        }
        let value: f64 = rest[..digits_end].parse().ok()?;
        let unit_rest = &rest[digits_end..];
        // "ms" must win over "m".
        let (factor, consumed) = if unit_rest.starts_with("ms") {
            (0.001, 2)
        } else if unit_rest.starts_with('s') {
            (1.0, 1)
        } else if unit_rest.starts_with('m') {
            (60.0, 1)
        } else if unit_rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return None;
        };
        total_secs += value * factor;
        rest = &unit_rest[consumed..];
    }

    (total_secs > 0.0).then(|| Duration::from_secs_f64(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
    }

    #[test]
    fn day_suffix_is_whole_string() {
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(7 * 86_400)));
    }

    #[test]
    fn compound_segments() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
    }

    #[test]
    fn invalid_or_non_positive_is_none() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("0s"), None);
        assert_eq!(parse_duration("m5"), None);
    }
}
