//! Payload size units and human-readable byte formatting.

use std::fmt;
use std::str::FromStr;

/// Upper bound on a single payload (10 GiB).
pub const MAX_PAYLOAD_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Power-of-1024 base unit for payload sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeUnit {
    B,
    KiB,
    MiB,
    GiB,
}

impl SizeUnit {
    /// Number of bytes in one unit.
    pub fn bytes(self) -> u64 {
        match self {
            SizeUnit::B => 1,
            SizeUnit::KiB => 1024,
            SizeUnit::MiB => 1024 * 1024,
            SizeUnit::GiB => 1024 * 1024 * 1024,
        }
    }

    /// Lowercase form used on the wire and in configuration.
    pub fn as_wire(self) -> &'static str {
        match self {
            SizeUnit::B => "b",
            SizeUnit::KiB => "kib",
            SizeUnit::MiB => "mib",
            SizeUnit::GiB => "gib",
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SizeUnit::B => "B",
            SizeUnit::KiB => "KiB",
            SizeUnit::MiB => "MiB",
            SizeUnit::GiB => "GiB",
        };
        f.write_str(s)
    }
}

/// Unrecognized unit string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit(pub String);

impl fmt::Display for UnknownUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown size unit '{}' (expected b, kib, mib or gib)", self.0)
    }
}

impl std::error::Error for UnknownUnit {}

impl FromStr for SizeUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "b" => Ok(SizeUnit::B),
            "kib" => Ok(SizeUnit::KiB),
            "mib" => Ok(SizeUnit::MiB),
            "gib" => Ok(SizeUnit::GiB),
            _ => Err(UnknownUnit(s.to_string())),
        }
    }
}

/// Bytes in one payload of `multiplier` units. `None` on overflow.
pub fn payload_size(unit: SizeUnit, multiplier: u64) -> Option<u64> {
    unit.bytes().checked_mul(multiplier)
}

/// Render a byte count as `B`, `KiB`, `MiB` or `GiB` with three decimals.
pub fn format_bytes(bytes: f64) -> String {
    let mut value = bytes;
    for unit in [SizeUnit::B, SizeUnit::KiB, SizeUnit::MiB] {
        if value < 1024.0 {
            return format!("{value:.3} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.3} {}", SizeUnit::GiB)
}

/// Render a throughput in bytes per second.
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}
