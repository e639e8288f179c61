//! K8s resource quantity arithmetic.
//!
//! K8s reports resource amounts as opaque quantity strings such as `250m`, `4Gi` or `1e3`. The
//! `k8s-openapi` type is only a string wrapper, so parsing, summation and the canonical string
//! form are implemented here. Values are held as a signed count of nano units, which covers every
//! suffix accepted by the K8s API.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;

/// The number of nano units in one unit.
const NANO: i128 = 1_000_000_000;
/// The number of nano units in one milli unit.
const NANOS_PER_MILLI: i128 = 1_000_000;

/// The suffix family of a quantity, retained for formatting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Powers of two, `Ki` through `Ei`.
    BinarySI,
    /// Powers of ten, `n` through `E`.
    DecimalSI,
    /// Scientific notation, `e<N>`.
    DecimalExponent,
}

/// A parsed K8s quantity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quantity {
    nanos: i128,
    /// `None` only for the zero value, which adopts the format of the first quantity added to it.
    format: Option<Format>,
}

impl Quantity {
    /// Parse a quantity from its K8s string form.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let (negative, unsigned) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            Some(_) => (false, raw),
            None => bail!("empty quantity"),
        };
        let number_len = unsigned.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);
        let (mantissa, frac_digits) = parse_number(number).with_context(|| format!("invalid quantity {:?}", input))?;
        let (format, scale) = parse_suffix(suffix).with_context(|| format!("invalid quantity suffix in {:?}", input))?;

        let magnitude = match scale {
            Scale::Binary(shift) => {
                let numerator = mantissa
                    .checked_mul(1i128 << shift)
                    .and_then(|val| val.checked_mul(NANO))
                    .with_context(|| format!("quantity {:?} is out of range", input))?;
                ceil_div(numerator, 10i128.pow(frac_digits))
            }
            Scale::Decimal(exp) => {
                let shift = exp + 9 - frac_digits as i32;
                if shift >= 0 {
                    10i128
                        .checked_pow(shift as u32)
                        .and_then(|mult| mantissa.checked_mul(mult))
                        .with_context(|| format!("quantity {:?} is out of range", input))?
                } else {
                    match 10i128.checked_pow(shift.unsigned_abs()) {
                        Some(div) => ceil_div(mantissa, div),
                        // Anything smaller than a nano unit rounds up to one.
                        None => i128::from(mantissa > 0),
                    }
                }
            }
        };
        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            format: Some(format),
        })
    }

    /// Parse the given K8s API quantity.
    pub fn from_raw(raw: &RawQuantity) -> Result<Self> {
        Self::parse(&raw.0)
    }

    /// Add the given quantity to this one.
    pub fn add(&mut self, other: &Self) -> Result<()> {
        self.nanos = self.nanos.checked_add(other.nanos).context("quantity overflow during addition")?;
        if self.format.is_none() {
            self.format = other.format;
        }
        Ok(())
    }

    /// Check if this quantity is zero.
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// The value of this quantity in milli units, rounded away from zero.
    pub fn milli_value(&self) -> i128 {
        div_away_from_zero(self.nanos, NANOS_PER_MILLI)
    }

    /// The value of this quantity in whole units, rounded away from zero.
    pub fn value(&self) -> i128 {
        div_away_from_zero(self.nanos, NANO)
    }

    /// Split into the largest power-of-1000 exponent in `[-9, 18]` which leaves an integer mantissa.
    fn decimal_parts(&self) -> (i128, i32) {
        let (mut mantissa, mut exp) = (self.nanos, -9);
        while exp < 18 && mantissa % 1000 == 0 {
            mantissa /= 1000;
            exp += 3;
        }
        (mantissa, exp)
    }
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return write!(f, "0");
        }
        match self.format.unwrap_or(Format::DecimalSI) {
            // Fractional binary quantities are rendered in decimal form, as K8s does.
            Format::BinarySI if self.nanos % NANO == 0 => {
                const SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
                let (mut mantissa, mut idx) = (self.nanos / NANO, 0);
                while idx < SUFFIXES.len() - 1 && mantissa % 1024 == 0 {
                    mantissa /= 1024;
                    idx += 1;
                }
                write!(f, "{}{}", mantissa, SUFFIXES[idx])
            }
            Format::DecimalExponent => match self.decimal_parts() {
                (mantissa, 0) => write!(f, "{}", mantissa),
                (mantissa, exp) => write!(f, "{}e{}", mantissa, exp),
            },
            Format::BinarySI | Format::DecimalSI => {
                let (mantissa, exp) = self.decimal_parts();
                let suffix = match exp {
                    -9 => "n",
                    -6 => "u",
                    -3 => "m",
                    3 => "k",
                    6 => "M",
                    9 => "G",
                    12 => "T",
                    15 => "P",
                    18 => "E",
                    _ => "",
                };
                write!(f, "{}{}", mantissa, suffix)
            }
        }
    }
}

/// The multiplier denoted by a quantity suffix.
enum Scale {
    /// A power of two, given as the shift amount.
    Binary(u32),
    /// A power of ten, given as the exponent.
    Decimal(i32),
}

fn parse_suffix(suffix: &str) -> Result<(Format, Scale)> {
    Ok(match suffix {
        "" => (Format::DecimalSI, Scale::Decimal(0)),
        "n" => (Format::DecimalSI, Scale::Decimal(-9)),
        "u" => (Format::DecimalSI, Scale::Decimal(-6)),
        "m" => (Format::DecimalSI, Scale::Decimal(-3)),
        "k" => (Format::DecimalSI, Scale::Decimal(3)),
        "M" => (Format::DecimalSI, Scale::Decimal(6)),
        "G" => (Format::DecimalSI, Scale::Decimal(9)),
        "T" => (Format::DecimalSI, Scale::Decimal(12)),
        "P" => (Format::DecimalSI, Scale::Decimal(15)),
        "E" => (Format::DecimalSI, Scale::Decimal(18)),
        "Ki" => (Format::BinarySI, Scale::Binary(10)),
        "Mi" => (Format::BinarySI, Scale::Binary(20)),
        "Gi" => (Format::BinarySI, Scale::Binary(30)),
        "Ti" => (Format::BinarySI, Scale::Binary(40)),
        "Pi" => (Format::BinarySI, Scale::Binary(50)),
        "Ei" => (Format::BinarySI, Scale::Binary(60)),
        other if other.starts_with(['e', 'E']) => {
            let exp: i32 = other[1..].parse().with_context(|| format!("invalid exponent {:?}", other))?;
            if !(-30..=30).contains(&exp) {
                bail!("exponent {} is out of range", exp);
            }
            (Format::DecimalExponent, Scale::Decimal(exp))
        }
        other => bail!("unknown suffix {:?}", other),
    })
}

/// Parse an unsigned decimal number into its digits and the count of fractional digits.
fn parse_number(number: &str) -> Result<(i128, u32)> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        bail!("missing numeric value");
    }
    if frac.contains('.') {
        bail!("more than one decimal point");
    }
    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(frac.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|val| val.checked_add(i128::from(digit - b'0')))
            .context("too many digits")?;
    }
    let frac_digits = u32::try_from(frac.len()).context("too many digits")?;
    if frac_digits > 30 {
        bail!("too many fractional digits");
    }
    Ok((mantissa, frac_digits))
}

/// Ceiling division of a non-negative numerator.
fn ceil_div(numerator: i128, divisor: i128) -> i128 {
    (numerator + divisor - 1) / divisor
}

fn div_away_from_zero(value: i128, divisor: i128) -> i128 {
    if value >= 0 {
        ceil_div(value, divisor)
    } else {
        -ceil_div(-value, divisor)
    }
}
