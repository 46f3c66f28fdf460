use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::Error;

lazy_static! {
    static ref RESOLUTION_REGEX: Regex = Regex::new(r"^([0-9]+)([smhdwy])$").unwrap();
}

/// Bucket size for alert windows, written as e.g. `15m` or `1h`.
///
/// Used both as the query step and as the gap a window may bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    duration: Duration,
    text_value: u64,
    unit: char,
}

impl Resolution {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Step size in whole seconds, for range queries
    pub fn step_seconds(&self) -> i64 {
        self.duration.num_seconds()
    }

    /// Round `ts` to the nearest multiple of the resolution since the epoch,
    /// with halves rounded away from zero.
    pub fn round(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.duration.num_milliseconds();
        if step <= 0 {
            return ts;
        }
        let millis = ts.timestamp_millis();
        let rounded = (millis.abs() + step / 2) / step * step * millis.signum();
        DateTime::from_timestamp_millis(rounded).unwrap_or(ts)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = RESOLUTION_REGEX
            .captures(s.trim())
            .ok_or_else(|| Error::InvalidResolution(format!("'{}' is not of the form <number><s|m|h|d|w|y>", s)))?;

        let overflow = || Error::InvalidResolution(format!("'{}' is too large", s));
        let value: u64 = captures[1].parse().map_err(|_| overflow())?;
        let unit = captures[2].chars().next().unwrap_or('s');
        let multiplier: i64 = match unit {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            'w' => 7 * 24 * 60 * 60,
            _ => 365 * 24 * 60 * 60,
        };

        let seconds = i64::try_from(value)
            .ok()
            .and_then(|v| v.checked_mul(multiplier))
            .ok_or_else(overflow)?;
        let duration = Duration::try_seconds(seconds).ok_or_else(overflow)?;
        if duration == Duration::zero() {
            return Err(Error::InvalidResolution(format!("'{}' must be greater than zero", s)));
        }

        Ok(Self {
            duration,
            text_value: value,
            unit,
        })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.text_value, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_units() {
        let cases = vec![
            ("30s", Duration::seconds(30)),
            ("15m", Duration::minutes(15)),
            ("1h", Duration::hours(1)),
            ("2d", Duration::days(2)),
            ("1w", Duration::weeks(1)),
            ("1y", Duration::days(365)),
        ];

        for (input, expected) in cases {
            let resolution: Resolution = input.parse().unwrap();
            assert_eq!(resolution.duration(), expected, "parsing {}", input);
            assert_eq!(resolution.to_string(), input);
        }
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "15", "m", "15min", "1.5h", "-5m", "15 m", "5x", "0m"] {
            let err = input.parse::<Resolution>().unwrap_err();
            assert!(matches!(err, Error::InvalidResolution(_)), "parsing {:?}", input);
        }
    }

    #[test]
    fn test_parse_overflow() {
        let err = "99999999999999999999y".parse::<Resolution>().unwrap_err();
        assert!(matches!(err, Error::InvalidResolution(_)));
    }

    #[test]
    fn test_step_seconds() {
        let resolution: Resolution = "15m".parse().unwrap();
        assert_eq!(resolution.step_seconds(), 900);
    }

    #[test]
    fn test_round_to_nearest_step() {
        let resolution: Resolution = "10s".parse().unwrap();
        let at = |secs: i64, millis: u32| Utc.timestamp_opt(secs, millis * 1_000_000).unwrap();

        assert_eq!(resolution.round(at(1_700_000_004, 999)), at(1_700_000_000, 0));
        assert_eq!(resolution.round(at(1_700_000_005, 0)), at(1_700_000_010, 0));
        assert_eq!(resolution.round(at(1_700_000_016, 0)), at(1_700_000_020, 0));
        assert_eq!(resolution.round(at(1_700_000_020, 0)), at(1_700_000_020, 0));
    }
}
