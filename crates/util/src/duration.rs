//! Duration-string parsing for workflow timeouts and polling intervals.
//!
//! Accepts the compact form used throughout workflow documents: one or more
//! `<number><unit>` segments, e.g. `10m`, `90s`, `1h30m`, `0.1s`. Units are
//! `ns`, `us`, `ms`, `s`, `m`, `h` and `d`. Numbers may carry a fractional
//! part.

use std::time::Duration;

use thiserror::Error;

/// Failure to interpret a duration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration {0:?}: missing unit")]
    MissingUnit(String),
    #[error("invalid duration {0:?}: unknown unit {1:?}")]
    UnknownUnit(String, String),
    #[error("invalid duration {0:?}: bad number {1:?}")]
    BadNumber(String, String),
}

/// Parse a duration string like `10m`, `1h30m` or `0.1s`.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .ok_or_else(|| DurationParseError::BadNumber(trimmed.to_string(), rest.to_string()))?;
        let (number_part, after_number) = rest.split_at(number_len);
        let value: f64 = number_part
            .parse()
            .map_err(|_| DurationParseError::BadNumber(trimmed.to_string(), number_part.to_string()))?;

        let unit_len = after_number
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .ok_or_else(|| DurationParseError::MissingUnit(trimmed.to_string()))?;
        let (unit, remainder) = after_number.split_at(unit_len);

        let unit_seconds = match unit {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86400.0,
            other => return Err(DurationParseError::UnknownUnit(trimmed.to_string(), other.to_string())),
        };
        total += Duration::from_secs_f64(value * unit_seconds);
        rest = remainder;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_unit_forms() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn parses_compound_and_fractional_forms() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("0.1s").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("4.5s").unwrap(), Duration::from_millis(4500));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!(parse_duration("").unwrap_err(), DurationParseError::Empty);
        assert_eq!(parse_duration("10").unwrap_err(), DurationParseError::MissingUnit("10".into()));
        assert!(matches!(parse_duration("10parsec"), Err(DurationParseError::UnknownUnit(_, _))));
        assert!(matches!(parse_duration("s"), Err(DurationParseError::BadNumber(_, _))));
    }
}
