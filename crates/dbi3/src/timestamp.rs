//! Log name codec.
//!
//! The DBI3 names each log by two 7-character strings, the encoded start and
//! stop time. Each character is a base-26 digit (`A` = 0 .. `Z` = 25), most
//! significant first, and the resulting integer is a DOS FAT packed
//! date/time:
//!
//! ```text
//! bits 31-25  year - 1980     bits 15-11  hour
//! bits 24-21  month           bits 10-5   minute
//! bits 20-16  day             bits  4-0   second / 2
//! ```
//!
//! Decoding never range-checks the calendar fields. A corrupt name decodes to
//! an implausible date (month 0, day 31 of February, ...) and the caller
//! decides what to do with it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of characters in an encoded log name.
pub const ENCODED_LEN: usize = 7;

/// Base year of the FAT date layout.
const FAT_EPOCH_YEAR: u16 = 1980;

/// Errors from decoding a log name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A character outside `A`-`Z`.
    #[error("invalid character {ch:?} at position {position} in log name")]
    InvalidCharacter {
        /// The offending character.
        ch: char,
        /// Zero-based position within the name.
        position: usize,
    },

    /// The name is not exactly seven characters long.
    #[error("log name must be 7 characters, got {0}")]
    InvalidLength(usize),
}

/// Decode a 7-character radix-26 string into its packed 32-bit value.
///
/// Seven base-26 digits can exceed `u32::MAX`; the accumulation wraps, which
/// keeps exactly the 32 bits the FAT layout reads.
///
/// # Errors
///
/// Returns [`CodecError::InvalidCharacter`] for any character outside `A`-`Z`
/// and [`CodecError::InvalidLength`] when the input is not seven characters.
pub fn decode_radix26(s: &str) -> Result<u32, CodecError> {
    let len = s.chars().count();
    if len != ENCODED_LEN {
        return Err(CodecError::InvalidLength(len));
    }

    s.chars().enumerate().try_fold(0u32, |acc, (position, ch)| {
        if !ch.is_ascii_uppercase() {
            return Err(CodecError::InvalidCharacter { ch, position });
        }
        let digit = u32::from(ch) - u32::from('A');
        Ok(acc.wrapping_mul(26).wrapping_add(digit))
    })
}

/// Encode a packed value as seven radix-26 characters.
///
/// The inverse of [`decode_radix26`] for every `u32`.
#[must_use]
pub fn encode_radix26(mut value: u32) -> String {
    let mut digits = [b'A'; ENCODED_LEN];
    for slot in digits.iter_mut().rev() {
        // value % 26 always fits in a u8
        *slot = b'A' + u8::try_from(value % 26).unwrap_or(0);
        value /= 26;
    }
    String::from_utf8_lossy(&digits).into_owned()
}

/// The raw calendar fields of a FAT packed timestamp.
///
/// Fields are kept as decoded, without range checks, so ordering and file
/// naming work even for implausible values. Field order matters: the derived
/// `Ord` compares year first, then month, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FatTimestamp {
    /// Full year (1980..=2107).
    pub year: u16,
    /// Month, nominally 1-12.
    pub month: u8,
    /// Day of month, nominally 1-31.
    pub day: u8,
    /// Hour, nominally 0-23.
    pub hour: u8,
    /// Minute, nominally 0-59.
    pub minute: u8,
    /// Second, always even (2-second resolution).
    pub second: u8,
}

/// Unpack a FAT date/time, low bits first.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn fat_to_timestamp(packed: u32) -> FatTimestamp {
    // Every field is masked to at most 7 bits before the cast.
    let mut v = packed;
    let second = ((v & 0x1F) * 2) as u8;
    v >>= 5;
    let minute = (v & 0x3F) as u8;
    v >>= 6;
    let hour = (v & 0x1F) as u8;
    v >>= 5;
    let day = (v & 0x1F) as u8;
    v >>= 5;
    let month = (v & 0xF) as u8;
    v >>= 4;
    let year = (v & 0x7F) as u16 + FAT_EPOCH_YEAR;

    FatTimestamp {
        year,
        month,
        day,
        hour,
        minute,
        second,
    }
}

/// Pack calendar fields back into the FAT layout.
///
/// Fields wider than their slot are masked, so this only inverts
/// [`fat_to_timestamp`] for values that came out of it.
#[must_use]
pub fn timestamp_to_fat(ts: &FatTimestamp) -> u32 {
    let year = u32::from(ts.year.saturating_sub(FAT_EPOCH_YEAR)) & 0x7F;
    (year << 25)
        | ((u32::from(ts.month) & 0xF) << 21)
        | ((u32::from(ts.day) & 0x1F) << 16)
        | ((u32::from(ts.hour) & 0x1F) << 11)
        | ((u32::from(ts.minute) & 0x3F) << 5)
        | ((u32::from(ts.second) / 2) & 0x1F)
}

impl FatTimestamp {
    /// Convert to a UTC instant.
    ///
    /// Returns `None` when the fields do not form a real calendar date/time.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
        .map(|naive| naive.and_utc())
    }

    /// Calendar fields of a real date/time, for comparison with decoded names.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        // chrono keeps month/day/hour/minute/second well inside u8
        Self {
            year: u16::try_from(dt.year()).unwrap_or(if dt.year() < 0 { 0 } else { u16::MAX }),
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    /// Local file base name, `YYYY_MM_DD_HH_MM_SS`.
    #[must_use]
    pub fn log_basename(&self) -> String {
        format!(
            "{:04}_{:02}_{:02}_{:02}_{:02}_{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl fmt::Display for FatTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// A validated 7-character log name as used on the device.
///
/// Names order by their packed value. Names past `u32::MAX` wrap when
/// decoded, so this differs from string order for them; equal packed values
/// fall back to the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodedTimestamp(String);

impl EncodedTimestamp {
    /// Validate and wrap a device log name.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the name is not seven uppercase letters.
    pub fn new(name: impl Into<String>) -> Result<Self, CodecError> {
        let name = name.into();
        decode_radix26(&name)?;
        Ok(Self(name))
    }

    /// The name as sent to the device.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The packed FAT value.
    #[must_use]
    pub fn packed(&self) -> u32 {
        // Validated at construction.
        decode_radix26(&self.0).unwrap_or_default()
    }

    /// Decoded calendar fields.
    #[must_use]
    pub fn decode(&self) -> FatTimestamp {
        fat_to_timestamp(self.packed())
    }
}

impl Ord for EncodedTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.packed()
            .cmp(&other.packed())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for EncodedTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for EncodedTimestamp {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EncodedTimestamp {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EncodedTimestamp> for String {
    fn from(value: EncodedTimestamp) -> Self {
        value.0
    }
}

impl From<&FatTimestamp> for EncodedTimestamp {
    fn from(ts: &FatTimestamp) -> Self {
        Self(encode_radix26(timestamp_to_fat(ts)))
    }
}

impl fmt::Display for EncodedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
