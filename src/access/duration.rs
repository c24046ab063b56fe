//! Grant-duration parsing for premium subscriptions.
//!
//! Operators type durations in a compact form: an integer amount
//! followed by a unit, e.g. `2hr`, `7days`, `1month`, `3years`.

use chrono::Duration;

/// Errors from parsing a grant duration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration must start with a number, e.g. \"7days\": got \"{0}\"")]
    MissingAmount(String),

    #[error("duration amount is out of range: \"{0}\"")]
    AmountOutOfRange(String),

    #[error("unknown duration unit \"{0}\" (use hour, day, month or year)")]
    UnknownUnit(String),
}

/// Parses a compact human duration into a calendar span.
///
/// Units are case-insensitive with an optional trailing `s`, and the
/// common abbreviations are accepted: `h`/`hr`/`hour`, `d`/`day`,
/// `mo`/`month`, `y`/`yr`/`year`. A month is 30 days and a year is
/// 365 days.
pub fn parse_grant_duration(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();

    let digits_end = input
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(input.len(), |(i, _)| i);

    let (amount_str, unit_str) = input.split_at(digits_end);
    if amount_str.is_empty() {
        return Err(DurationError::MissingAmount(input.to_owned()));
    }

    let amount: i64 = amount_str
        .parse()
        .map_err(|_| DurationError::AmountOutOfRange(amount_str.to_owned()))?;
    if amount == 0 {
        return Err(DurationError::AmountOutOfRange(amount_str.to_owned()));
    }

    let mut unit = unit_str.trim().to_lowercase();
    if unit.len() > 1 && unit.ends_with('s') {
        unit.pop();
    }

    let hours = match unit.as_str() {
        "h" | "hr" | "hour" => 1,
        "d" | "day" => 24,
        "mo" | "month" => 24 * 30,
        "y" | "yr" | "year" => 24 * 365,
        _ => return Err(DurationError::UnknownUnit(unit_str.trim().to_owned())),
    };

    amount
        .checked_mul(hours)
        .map(Duration::hours)
        .ok_or_else(|| DurationError::AmountOutOfRange(amount_str.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours() {
        assert_eq!(parse_grant_duration("2hr").unwrap(), Duration::hours(2));
        assert_eq!(parse_grant_duration("1hour").unwrap(), Duration::hours(1));
        assert_eq!(parse_grant_duration("12hours").unwrap(), Duration::hours(12));
    }

    #[test]
    fn test_days() {
        assert_eq!(parse_grant_duration("7days").unwrap(), Duration::days(7));
        assert_eq!(parse_grant_duration("1d").unwrap(), Duration::days(1));
    }

    #[test]
    fn test_months_are_thirty_days() {
        assert_eq!(parse_grant_duration("1month").unwrap(), Duration::days(30));
        assert_eq!(parse_grant_duration("2months").unwrap(), Duration::days(60));
    }

    #[test]
    fn test_years_are_365_days() {
        assert_eq!(
            parse_grant_duration("3years").unwrap(),
            Duration::days(3 * 365)
        );
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(parse_grant_duration("1DAY").unwrap(), Duration::days(1));
        assert_eq!(parse_grant_duration("2Hr").unwrap(), Duration::hours(2));
    }

    #[test]
    fn test_rejects_missing_amount() {
        assert!(matches!(
            parse_grant_duration("abc"),
            Err(DurationError::MissingAmount(_))
        ));
        assert!(matches!(
            parse_grant_duration(""),
            Err(DurationError::MissingAmount(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_unit() {
        assert!(matches!(
            parse_grant_duration("5weeks"),
            Err(DurationError::UnknownUnit(_))
        ));
        assert!(matches!(
            parse_grant_duration("10minutes"),
            Err(DurationError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_rejects_zero_and_bare_number() {
        assert!(matches!(
            parse_grant_duration("0days"),
            Err(DurationError::AmountOutOfRange(_))
        ));
        assert!(matches!(
            parse_grant_duration("7"),
            Err(DurationError::UnknownUnit(_))
        ));
    }
}
