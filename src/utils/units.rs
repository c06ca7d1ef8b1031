use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("expected a number, found {0:?}")]
    NotANumber(String),

    #[error("unknown unit suffix {suffix:?} in {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("value {0:?} is too large")]
    Overflow(String),
}

/// Splits `"  123kb "` into `("123", "kb")`; leading and trailing whitespace is ignored.
fn split_number(input: &str) -> Result<(u64, &str), UnitParseError> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());

    if digits_end == 0 {
        return Err(UnitParseError::NotANumber(input.to_string()));
    }

    let value = trimmed[..digits_end]
        .parse::<u64>()
        .map_err(|_| UnitParseError::Overflow(input.to_string()))?;

    Ok((value, trimmed[digits_end..].trim_start()))
}

/// Parses a byte size such as `512`, `32KB`, `1m` or `2T`.
/// Suffixes are case-insensitive binary multiples (k = 1024).
pub fn parse_size(input: &str) -> Result<u64, UnitParseError> {
    let (value, suffix) = split_number(input)?;

    let shift = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" => 10,
        "m" | "mb" => 20,
        "g" | "gb" => 30,
        "t" | "tb" => 40,
        _ => {
            return Err(UnitParseError::UnknownSuffix {
                input: input.to_string(),
                suffix: suffix.to_string(),
            })
        }
    };

    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| UnitParseError::Overflow(input.to_string()))
}

/// Parses a timespan in seconds; accepts an optional `s`, `m`, `h` or `d` suffix.
pub fn parse_timespan(input: &str) -> Result<u64, UnitParseError> {
    let (value, suffix) = split_number(input)?;

    let factor = match suffix {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => {
            return Err(UnitParseError::UnknownSuffix {
                input: input.to_string(),
                suffix: suffix.to_string(),
            })
        }
    };

    value
        .checked_mul(factor)
        .ok_or_else(|| UnitParseError::Overflow(input.to_string()))
}

/// A utilization range as given on the command line, e.g. `50` or `20-80`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PercentRange {
    pub low: u8,
    pub high: u8,
}

impl std::str::FromStr for PercentRange {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_percent_range(s)
    }
}

pub fn parse_percent_range(input: &str) -> Result<PercentRange, UnitParseError> {
    let to_percent = |v: u64| u8::try_from(v).map_err(|_| UnitParseError::Overflow(input.to_string()));

    let (low, rest) = split_number(input)?;
    if rest.is_empty() {
        let low = to_percent(low)?;
        return Ok(PercentRange { low, high: low });
    }

    let Some(upper) = rest.strip_prefix('-') else {
        return Err(UnitParseError::UnknownSuffix {
            input: input.to_string(),
            suffix: rest.to_string(),
        });
    };

    let (high, rest) = split_number(upper)?;
    if !rest.is_empty() {
        return Err(UnitParseError::UnknownSuffix {
            input: input.to_string(),
            suffix: rest.to_string(),
        });
    }

    Ok(PercentRange {
        low: to_percent(low)?,
        high: to_percent(high)?,
    })
}
