//! Parsing of Go-style duration strings ("1h30m", "45s", "500ms")

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration '{0}'")]
    Invalid(String),
    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },
}

/// Parse a duration made of `<number><unit>` segments.
///
/// Units: `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| DurationError::Invalid(input.to_string()))?;
        if digits == 0 {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let overflow = || DurationError::Invalid(input.to_string());
        let segment = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(amount.checked_mul(3600).ok_or_else(overflow)?),
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                });
            }
        };
        total = total.checked_add(segment).ok_or_else(overflow)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn parses_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert!(matches!(parse_duration("10"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("m"), Err(DurationError::Invalid(_))));
        assert!(matches!(
            parse_duration("3d"),
            Err(DurationError::UnknownUnit { .. })
        ));
    }

    #[test]
    fn rejects_overflowing_amounts() {
        assert!(matches!(
            parse_duration("10000000000000000h"),
            Err(DurationError::Invalid(_))
        ));
        assert!(matches!(
            parse_duration("300000000000000000m"),
            Err(DurationError::Invalid(_))
        ));
        assert!(matches!(
            parse_duration("18446744073709551615s1s"),
            Err(DurationError::Invalid(_))
        ));
        // u64 overflow while parsing the digits
        assert!(matches!(
            parse_duration("99999999999999999999s"),
            Err(DurationError::Invalid(_))
        ));
    }
}
