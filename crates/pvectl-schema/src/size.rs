//! Disk sizes, stored in kibibytes.
//!
//! The wire format uses the `K/M/G/T` suffix convention with the largest unit
//! that divides the value exactly, so rendering never loses precision. The
//! bare fractional gibibyte form is only used by the `<storage>:<GiB>` volume
//! allocation syntax, which does not accept suffixes.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const KIB_PER_MIB: u64 = 1024;
const KIB_PER_GIB: u64 = 1024 * 1024;
const KIB_PER_TIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiskSize(u64);

impl DiskSize {
    pub const fn from_kibibytes(kib: u64) -> Self {
        Self(kib)
    }

    pub const fn from_gibibytes(gib: u64) -> Self {
        Self(gib * KIB_PER_GIB)
    }

    pub const fn kibibytes(self) -> u64 {
        self.0
    }

    /// Render as a bare gibibyte amount, truncated to three decimals with
    /// trailing zeros trimmed (`917504` KiB -> `0.875`).
    pub fn to_gibibyte_string(self) -> String {
        let millis = u128::from(self.0) * 1000 / u128::from(KIB_PER_GIB);
        let whole = millis / 1000;
        let frac = millis % 1000;
        if frac == 0 {
            return whole.to_string();
        }
        let rendered = format!("{whole}.{frac:03}");
        rendered.trim_end_matches('0').to_owned()
    }

    /// Render with the largest suffix that divides the size exactly
    /// (`1048576` KiB -> `1G`, `1049600` KiB -> `1025M`).
    pub fn to_wire(self) -> String {
        let kib = self.0;
        if kib == 0 {
            return "0".to_owned();
        }
        if kib % KIB_PER_TIB == 0 {
            return format!("{}T", kib / KIB_PER_TIB);
        }
        if kib % KIB_PER_GIB == 0 {
            return format!("{}G", kib / KIB_PER_GIB);
        }
        if kib % KIB_PER_MIB == 0 {
            return format!("{}M", kib / KIB_PER_MIB);
        }
        format!("{kib}K")
    }
}

impl FromStr for DiskSize {
    type Err = SchemaError;

    /// Parse `8G`, `512M`, `100K`, `1T` or a bare (possibly fractional) amount
    /// of gibibytes. Fractions are floored to whole kibibytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || SchemaError::InvalidSize(s.to_owned());
        if input.is_empty() {
            return Err(invalid());
        }

        let (number, unit) = match input.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&input[..idx], c.to_ascii_uppercase()),
            _ => (input, 'G'),
        };
        let multiplier = match unit {
            'K' => 1,
            'M' => KIB_PER_MIB,
            'G' => KIB_PER_GIB,
            'T' => KIB_PER_TIB,
            _ => return Err(invalid()),
        };

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut kib = whole.checked_mul(multiplier).ok_or_else(invalid)?;

        if !frac.is_empty() {
            // Keep enough precision for fractional tebibytes without overflow.
            let digits = &frac[..frac.len().min(9)];
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            let denominator = 10u128.pow(digits.len() as u32);
            let extra = numerator * u128::from(multiplier) / denominator;
            kib = kib
                .checked_add(u64::try_from(extra).map_err(|_| invalid())?)
                .ok_or_else(invalid)?;
        }

        Ok(Self(kib))
    }
}

impl TryFrom<String> for DiskSize {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DiskSize> for String {
    fn from(value: DiskSize) -> Self {
        value.to_wire()
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
