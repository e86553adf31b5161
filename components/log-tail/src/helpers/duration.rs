//! Parsing of duration flags such as `1h`, `1m30s`, `1.5h` or `300ms`.
//!
//! A duration is a sequence of decimal numbers, each with an optional
//! fraction and a mandatory unit suffix. Valid units are `ns`, `us` (or `µs`),
//! `ms`, `s`, `m` and `h`. A bare `0` needs no unit. The total must fit in a
//! signed 64-bit count of nanoseconds.

// External crates
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Fraction digits beyond this precision are ignored.
const MAX_FRACTION_DIGITS: usize = 18;

lazy_static! {
    /// One `<whole>[.<fraction>]<unit>` component.
    #[allow(clippy::expect_used)]
    static ref COMPONENT: Regex =
        Regex::new(r"^([0-9]*)(?:\.([0-9]*))?([^0-9.]*)").expect("duration component pattern");
}

/// Why a duration string was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationError {
    /// Empty input, or a component with no digits.
    #[error("invalid duration {0:?}")]
    Invalid(String),
    /// A number with no unit suffix, other than a bare `0`.
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    /// A suffix outside `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`.
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit {
        /// The unrecognised suffix.
        unit: String,
        /// The whole input.
        input: String,
    },
    /// The total exceeds `i64::MAX` nanoseconds.
    #[error("duration {0:?} is out of range")]
    Overflow(String),
    /// A nonzero duration with a leading `-`.
    #[error("negative duration {0:?}")]
    Negative(String),
}

fn unit_nanos(unit: &str) -> Option<u128> {
    let nanos = match unit {
        "ns" => 1,
        "us" | "\u{b5}s" | "\u{3bc}s" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        _ => return None,
    };
    Some(nanos)
}

/// Parse a duration expression. Negative values other than `-0` are
/// rejected since no caller has a use for them.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());
    let overflow = || DurationError::Overflow(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let caps = COMPONENT.captures(rest).ok_or_else(invalid)?;
        let consumed = caps.get(0).map_or(0, |m| m.end());
        let whole = caps.get(1).map_or("", |m| m.as_str());
        let fraction = caps.get(2).map(|m| m.as_str());
        let unit = caps.get(3).map_or("", |m| m.as_str());

        if whole.is_empty() && fraction.is_none_or(str::is_empty) {
            return Err(invalid());
        }
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let mut nanos: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .map_err(|_| overflow())?
                .checked_mul(scale)
                .ok_or_else(overflow)?
        };

        if let Some(fraction) = fraction.filter(|f| !f.is_empty()) {
            let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            let value: u128 = digits.parse().map_err(|_| invalid())?;
            nanos = nanos
                .checked_add(value * scale / 10u128.pow(digits.len() as u32))
                .ok_or_else(overflow)?;
        }

        total = total
            .checked_add(nanos)
            .filter(|t| *t <= i64::MAX as u128)
            .ok_or_else(overflow)?;

        if consumed == 0 {
            return Err(invalid());
        }
        rest = &rest[consumed..];
    }

    if negative && total > 0 {
        return Err(DurationError::Negative(input.to_string()));
    }

    Ok(Duration::from_nanos(total as u64))
}
