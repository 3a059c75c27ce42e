//! Minimum display size threshold
//!
//! Parses strings such as `100`, `1.5M`, `1KiB` or `32%` into either an
//! absolute byte count or a fraction of the root total.

use std::str::FromStr;
use thiserror::Error;

/// Threshold below which listed entries are hidden
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MinSize {
    /// Absolute size in bytes (always >= 1)
    Bytes(u64),
    /// Fraction of the root's total, in `0.0..=1.0`
    Fraction(f64),
}

/// Threshold parse failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizeParseError {
    #[error("empty size")]
    Empty,

    #[error("'{0}' is not a decimal number")]
    InvalidNumber(String),

    #[error("unknown unit suffix '{0}' (expected B, K, KB, Ki, KiB, ... T)")]
    UnknownSuffix(String),

    #[error("percentage {0} is outside 0-100")]
    PercentOutOfRange(f64),

    #[error("'{0}' is less than one byte")]
    TooSmall(String),

    #[error("'{0}' does not fit in 64 bits")]
    TooLarge(String),
}

impl MinSize {
    /// Parse a threshold string
    pub fn parse(input: &str) -> Result<Self, SizeParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SizeParseError::Empty);
        }

        if let Some(number) = input.strip_suffix('%') {
            let percent = parse_decimal(number)?;
            if !(0.0..=100.0).contains(&percent) {
                return Err(SizeParseError::PercentOutOfRange(percent));
            }
            return Ok(MinSize::Fraction(percent / 100.0));
        }

        let split = input
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(input.len());
        let (number, suffix) = input.split_at(split);
        let value = parse_decimal(number)?;
        let multiplier = unit_multiplier(suffix)?;

        let bytes = (value * multiplier).round();
        if !bytes.is_finite() {
            return Err(SizeParseError::TooLarge(input.to_string()));
        }
        if bytes < 1.0 {
            return Err(SizeParseError::TooSmall(input.to_string()));
        }
        // u64::MAX is not exactly representable; 2^64 is the first value that overflows
        if bytes >= u64::MAX as f64 {
            return Err(SizeParseError::TooLarge(input.to_string()));
        }

        Ok(MinSize::Bytes(bytes as u64))
    }

    /// Resolve to an absolute byte count against the root total
    pub fn to_bytes(self, root_total: u64) -> u64 {
        match self {
            MinSize::Bytes(bytes) => bytes,
            MinSize::Fraction(fraction) => (root_total as f64 * fraction).ceil() as u64,
        }
    }
}

impl FromStr for MinSize {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Digits with at most one decimal point. Signs, exponents and locale
/// separators are rejected before `f64::from_str` sees them.
fn parse_decimal(number: &str) -> Result<f64, SizeParseError> {
    let valid = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.chars().filter(|&c| c == '.').count() <= 1
        && number.chars().any(|c| c.is_ascii_digit());

    if !valid {
        return Err(SizeParseError::InvalidNumber(number.to_string()));
    }

    number
        .parse::<f64>()
        .map_err(|_| SizeParseError::InvalidNumber(number.to_string()))
}

fn unit_multiplier(suffix: &str) -> Result<f64, SizeParseError> {
    let upper = suffix.to_ascii_uppercase();
    let mut chars = upper.chars();

    let exponent = match chars.next() {
        None | Some('B') if upper.len() <= 1 => return Ok(1.0),
        Some('K') => 1,
        Some('M') => 2,
        Some('G') => 3,
        Some('T') => 4,
        _ => return Err(SizeParseError::UnknownSuffix(suffix.to_string())),
    };

    match chars.as_str() {
        "" | "B" => Ok(1000f64.powi(exponent)),
        "I" | "IB" => Ok(1024f64.powi(exponent)),
        _ => Err(SizeParseError::UnknownSuffix(suffix.to_string())),
    }
}
