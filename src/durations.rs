//! Parsing for compact human-readable schedule strings ("10m", "2d", "1w").

use crate::error::ApiError;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Upper bound on accepted schedules (10 years).
pub const MAX_SCHEDULE_SECONDS: i64 = 60 * 60 * 24 * 365 * 10;

const ERR_SCHEDULE_REQUIRED: &str = "schedule is required";
const ERR_SCHEDULE_INVALID: &str = r#"Invalid schedule. Expected format like "10m", "1h", "2d", "1w"."#;
const ERR_SCHEDULE_NONPOSITIVE: &str = "Schedule must be greater than 0.";
const ERR_SCHEDULE_TOO_LARGE: &str = "Schedule is too large (max 10 years).";

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([1-9]\d*)([smhdw])$").expect("valid duration regex"))
}

/// Normalize a schedule string to lower-case compact unit form.
pub fn normalize_every(value: &str) -> Result<String, ApiError> {
    let normalized: String = value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if normalized.is_empty() {
        return Err(ApiError::invalid_value("every", ERR_SCHEDULE_REQUIRED));
    }
    Ok(normalized)
}

/// Parse compact schedule syntax into a number of seconds.
pub fn parse_every_to_seconds(value: &str) -> Result<i64, ApiError> {
    let normalized = normalize_every(value)?;
    let captures = duration_re()
        .captures(&normalized)
        .ok_or_else(|| ApiError::invalid_value("every", ERR_SCHEDULE_INVALID))?;

    let num: i64 = captures[1]
        .parse()
        .map_err(|_| ApiError::invalid_value("every", ERR_SCHEDULE_INVALID))?;
    let multiplier = match &captures[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        "w" => 60 * 60 * 24 * 7,
        _ => unreachable!("regex restricts units"),
    };

    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| ApiError::invalid_value("every", ERR_SCHEDULE_TOO_LARGE))?;
    if seconds <= 0 {
        return Err(ApiError::invalid_value("every", ERR_SCHEDULE_NONPOSITIVE));
    }
    if seconds > MAX_SCHEDULE_SECONDS {
        return Err(ApiError::invalid_value("every", ERR_SCHEDULE_TOO_LARGE));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_units() {
        assert_eq!(parse_every_to_seconds("10m").unwrap(), 600);
        assert_eq!(parse_every_to_seconds("1h").unwrap(), 3600);
        assert_eq!(parse_every_to_seconds("2d").unwrap(), 172_800);
        assert_eq!(parse_every_to_seconds("1w").unwrap(), 604_800);
        assert_eq!(parse_every_to_seconds("45s").unwrap(), 45);
    }

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(parse_every_to_seconds(" 1H ").unwrap(), 3600);
        assert_eq!(parse_every_to_seconds("10 m").unwrap(), 600);
    }

    #[test]
    fn rejects_nonpositive_and_malformed() {
        assert!(parse_every_to_seconds("0m").is_err());
        assert!(parse_every_to_seconds("-5h").is_err());
        assert!(parse_every_to_seconds("").is_err());
        assert!(parse_every_to_seconds("h").is_err());
        assert!(parse_every_to_seconds("10x").is_err());
        assert!(parse_every_to_seconds("1.5h").is_err());
    }

    #[test]
    fn rejects_absurd_schedules() {
        assert!(parse_every_to_seconds("999999999d").is_err());
        // Right at the boundary: 10 years of weeks is fine.
        assert!(parse_every_to_seconds("520w").is_ok());
    }
}
