//! NTP timestamp codec.
//!
//! An NTP timestamp is a 64-bit fixed-point value: the upper 32 bits count
//! seconds since 1900-01-01 00:00:00 UTC, the lower 32 bits are a binary
//! fraction of a second. Only era 0 arithmetic is done here, so seconds wrap
//! modulo 2^32.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use std::fmt;

/// NTP epoch offset from Unix epoch (1900-01-01 to 1970-01-01 in seconds)
pub const NTP_EPOCH_OFFSET: i64 = 2_208_988_800;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A raw 64-bit NTP timestamp as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtpTimestamp(pub u64);

impl NtpTimestamp {
    pub fn from_parts(seconds: u32, fraction: u32) -> Self {
        NtpTimestamp(((seconds as u64) << 32) | fraction as u64)
    }

    pub fn seconds(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn fraction(&self) -> u32 {
        self.0 as u32
    }

    /// Read a timestamp from the first 8 bytes of `buf` (big-endian).
    ///
    /// Panics if `buf` is shorter than 8 bytes.
    pub fn read(buf: &[u8]) -> Self {
        NtpTimestamp(BigEndian::read_u64(buf))
    }

    /// Write the timestamp into the first 8 bytes of `buf` (big-endian).
    ///
    /// Panics if `buf` is shorter than 8 bytes.
    pub fn write(&self, buf: &mut [u8]) {
        BigEndian::write_u64(buf, self.0);
    }
}

impl From<DateTime<Utc>> for NtpTimestamp {
    fn from(time: DateTime<Utc>) -> Self {
        encode(time)
    }
}

impl From<NtpTimestamp> for DateTime<Utc> {
    fn from(ts: NtpTimestamp) -> Self {
        decode(ts)
    }
}

impl fmt::Display for NtpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DateTime::<Utc>::from(*self).to_rfc3339())
    }
}

/// Convert a UTC instant to an NTP timestamp.
///
/// The sub-second part is rounded to the nearest 2^-32 s.
pub fn encode(time: DateTime<Utc>) -> NtpTimestamp {
    let secs = time.timestamp().wrapping_add(NTP_EPOCH_OFFSET) as u32;

    // frac = round(nanos * 2^32 / 10^9); never reaches 2^32 for nanos < 10^9
    let nanos = time.timestamp_subsec_nanos() as u64 % NANOS_PER_SEC;
    let frac = (((nanos << 32) + NANOS_PER_SEC / 2) / NANOS_PER_SEC) as u32;

    NtpTimestamp::from_parts(secs, frac)
}

/// Convert an NTP timestamp back to a UTC instant.
pub fn decode(ts: NtpTimestamp) -> DateTime<Utc> {
    let unix_secs = ts.seconds() as i64 - NTP_EPOCH_OFFSET;
    // frac * 10^9 / 2^32
    let nanos = ((ts.fraction() as u64 * NANOS_PER_SEC) >> 32) as u32;
    DateTime::from_timestamp(unix_secs, nanos).unwrap_or(DateTime::UNIX_EPOCH)
}
