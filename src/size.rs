//! Human-readable size parsing and conversion to the ploop allocation unit.
//!
//! Every suffix is interpreted in binary units, so `10G`, `10Gi` and
//! `10GiB` all describe `10 * 1024^3` bytes. A bare number is a byte count.

use thiserror::Error;

/// Bytes per kibibyte, the native allocation unit of ploop images.
pub const BYTES_PER_KIB: u64 = 1024;

const MAX_FRACTION_DIGITS: u32 = 18;

/// Errors raised while parsing a size string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SizeError {
    /// Raised when the input is empty.
    #[error("size must not be empty")]
    Empty,
    /// Raised when the numeric part cannot be parsed.
    #[error("size {input:?} is not a number followed by an optional unit")]
    Malformed {
        /// Input as supplied by the caller.
        input: String,
    },
    /// Raised when the unit suffix is not recognised.
    #[error("size {input:?} uses unknown unit {unit:?}")]
    UnknownUnit {
        /// Input as supplied by the caller.
        input: String,
        /// Unit suffix that was not recognised.
        unit: String,
    },
    /// Raised when the value does not fit in 64 bits.
    #[error("size {input:?} is too large")]
    Overflow {
        /// Input as supplied by the caller.
        input: String,
    },
    /// Raised when the size rounds down to zero kibibytes.
    #[error("size {input:?} is smaller than 1KiB")]
    Zero {
        /// Input as supplied by the caller.
        input: String,
    },
}

/// Parses a human-readable size such as `10G`, `1.5Gi` or `4096`.
///
/// # Errors
///
/// Returns [`SizeError`] when the input is empty, malformed, uses an
/// unknown unit, or overflows.
///
/// # Examples
///
/// ```
/// # use vstorage_provisioner::size::parse_size;
/// assert_eq!(parse_size("10G"), Ok(10 * 1024 * 1024 * 1024));
/// assert_eq!(parse_size("512"), Ok(512));
/// assert!(parse_size("abc").is_err());
/// ```
pub fn parse_size(input: &str) -> Result<u64, SizeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Empty);
    }

    let split = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let multiplier = unit_multiplier(unit.trim()).ok_or_else(|| SizeError::UnknownUnit {
        input: input.to_owned(),
        unit: unit.trim().to_owned(),
    })?;

    let malformed = || SizeError::Malformed {
        input: input.to_owned(),
    };
    let overflow = || SizeError::Overflow {
        input: input.to_owned(),
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    if fraction.contains('.') {
        return Err(malformed());
    }

    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| overflow())?
    };
    let mut total = whole_value
        .checked_mul(u128::from(multiplier))
        .ok_or_else(overflow)?;

    if !fraction.is_empty() {
        let digits = u32::try_from(fraction.len()).map_err(|_| malformed())?;
        if digits > MAX_FRACTION_DIGITS {
            return Err(malformed());
        }
        let numerator = fraction.parse::<u128>().map_err(|_| malformed())?;
        let scaled = numerator
            .checked_mul(u128::from(multiplier))
            .ok_or_else(overflow)?
            .checked_div(10_u128.pow(digits))
            .ok_or_else(malformed)?;
        total = total.checked_add(scaled).ok_or_else(overflow)?;
    }

    u64::try_from(total).map_err(|_| overflow())
}

/// Parses `input` and converts it to whole kibibytes, rounding down.
///
/// # Errors
///
/// Returns [`SizeError::Zero`] when the result is zero, or any error from
/// [`parse_size`].
///
/// # Examples
///
/// ```
/// # use vstorage_provisioner::size::size_in_kib;
/// assert_eq!(size_in_kib("10G"), Ok(10_485_760));
/// assert_eq!(size_in_kib("1Gi"), Ok(1_048_576));
/// ```
pub fn size_in_kib(input: &str) -> Result<u64, SizeError> {
    let kib = parse_size(input)? >> BYTES_PER_KIB.trailing_zeros();
    if kib == 0 {
        return Err(SizeError::Zero {
            input: input.to_owned(),
        });
    }
    Ok(kib)
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let lower = unit.to_ascii_lowercase();
    let prefix = lower
        .strip_suffix("ib")
        .or_else(|| lower.strip_suffix('i'))
        .or_else(|| lower.strip_suffix('b'))
        .unwrap_or(&lower);

    let exponent = match prefix {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        "e" => 6,
        _ => return None,
    };
    BYTES_PER_KIB.checked_pow(exponent)
}
