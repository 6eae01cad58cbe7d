use std::{str::FromStr, time::Duration};

/// A timeout setting as written in routing objects.
///
/// Values use Go's `time.Duration` string format (e.g. `1m30s`). The values
/// `infinity` and `infinite` disable the timeout, as does a zero duration. An
/// empty string leaves the proxy's default in effect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Default,
    Disabled,
    Duration(Duration),
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("timeouts must not be negative")]
    Negative,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

// === impl Timeout ===

impl Timeout {
    /// Returns the duration to configure, if any. `Disabled` yields a zero
    /// duration, which proxies interpret as no timeout.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Default => None,
            Self::Disabled => Some(Duration::ZERO),
            Self::Duration(d) => Some(*d),
        }
    }
}

impl FromStr for Timeout {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(Self::Default),
            "infinity" | "infinite" => Ok(Self::Disabled),
            s => match parse_go_duration(s)? {
                Duration::ZERO => Ok(Self::Disabled),
                d => Ok(Self::Duration(d)),
            },
        }
    }
}

/// Parses a duration in the format accepted by Go's `time.ParseDuration`.
fn parse_go_duration(mut s: &str) -> Result<Duration, ParseError> {
    fn duration_from_units(val: f64, unit: &str) -> Result<Duration, ParseError> {
        const MINUTE: Duration = Duration::from_secs(60);
        let base = match unit {
            "ns" => Duration::from_nanos(1),
            // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
            "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => MINUTE,
            "h" => MINUTE * 60,
            _ => return Err(ParseError::InvalidUnit),
        };
        Ok(base.mul_f64(val))
    }

    if let Some(rest) = s.strip_prefix('-') {
        if rest.trim_start_matches(['0', '.']).is_empty() {
            return Ok(Duration::ZERO);
        }
        return Err(ParseError::Negative);
    }
    s = s.trim_start_matches('+');
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    while !s.is_empty() {
        let unit_start = s
            .find(|c: char| c.is_alphabetic())
            .ok_or(ParseError::NoUnit)?;
        let (val, rest) = s.split_at(unit_start);
        let val = val.parse::<f64>()?;
        let unit = match rest.find(|c: char| !c.is_alphabetic()) {
            Some(next_numeric_start) => {
                let (unit, rest) = rest.split_at(next_numeric_start);
                s = rest;
                unit
            }
            None => {
                s = "";
                rest
            }
        };
        total += duration_from_units(val, unit)?;
    }

    Ok(total)
}
