//! Trace identifiers
//!
//! A trace id is 64 or 128 bits wide. Instrumentation that only understands
//! 64-bit ids truncates the high bits, so the low 64 bits are what physical
//! span partitions are keyed on, and the high bits are carried alongside.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 64- or 128-bit trace identifier.
///
/// `high == 0` means the id is 64-bit. A 128-bit id whose high bits are all
/// zero is indistinguishable from its 64-bit form and normalises to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceId {
    high: u64,
    low: u64,
}

impl TraceId {
    /// Create a trace id from its high and low halves
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Create a 64-bit trace id
    pub const fn from_low(low: u64) -> Self {
        Self { high: 0, low }
    }

    /// Parse a lower-hex trace id of 1 to 32 characters.
    ///
    /// Ids shorter than 16 characters are left-padded, as instrumentation
    /// sometimes drops leading zeros.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracestore_core::TraceId;
    ///
    /// let id = TraceId::parse("7180c278b62e8f6a216a2aea45d08fc9").unwrap();
    /// assert!(id.is_128_bit());
    /// assert_eq!(id.to_low_64().to_string(), "216a2aea45d08fc9");
    /// ```
    pub fn parse(hex: &str) -> Result<Self> {
        if hex.is_empty() || hex.len() > 32 {
            return Err(Error::InvalidTraceId(format!(
                "{:?} should be 1 to 32 lower-hex characters",
                hex
            )));
        }
        if hex.len() <= 16 {
            return Ok(Self::from_low(parse_hex_u64(hex)?));
        }
        let split = hex.len() - 16;
        let high = parse_hex_u64(&hex[..split])?;
        let low = parse_hex_u64(&hex[split..])?;
        Ok(Self { high, low })
    }

    /// High 64 bits, zero for 64-bit ids
    #[inline]
    pub const fn high(&self) -> u64 {
        self.high
    }

    /// Low 64 bits, the span partition key
    #[inline]
    pub const fn low(&self) -> u64 {
        self.low
    }

    /// True when the high bits are set
    #[inline]
    pub const fn is_128_bit(&self) -> bool {
        self.high != 0
    }

    /// The 64-bit truncation of this id
    #[inline]
    pub const fn to_low_64(&self) -> Self {
        Self::from_low(self.low)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high != 0 {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        } else {
            write!(f, "{:016x}", self.low)
        }
    }
}

impl FromStr for TraceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse a lower-hex span id of 1 to 16 characters
pub fn parse_span_id(hex: &str) -> Result<u64> {
    if hex.is_empty() || hex.len() > 16 {
        return Err(Error::InvalidTraceId(format!(
            "span id {:?} should be 1 to 16 lower-hex characters",
            hex
        )));
    }
    parse_hex_u64(hex)
}

fn parse_hex_u64(hex: &str) -> Result<u64> {
    if !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(Error::InvalidTraceId(format!(
            "{:?} is not lower-hex",
            hex
        )));
    }
    u64::from_str_radix(hex, 16).map_err(|e| Error::InvalidTraceId(e.to_string()))
}
