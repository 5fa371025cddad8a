//! Memory size parsing and formatting for the per-worker `memory-limit`.
//!
//! Accepts human-readable sizes ("512M", "2G") as well as the plain MiB
//! integers used by the settings file.

use std::fmt;
use std::str::FromStr;

/// Memory size in bytes with parsing and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemorySize(u64);

impl MemorySize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Size in MiB, truncated.
    pub const fn as_mib(&self) -> u64 {
        self.0 / (1024 * 1024)
    }

    /// Interpret a settings-file value: MiB, with zero or negative meaning "no limit".
    pub fn from_setting(mib: i64) -> Option<Self> {
        u64::try_from(mib)
            .ok()
            .filter(|mib| *mib > 0)
            .map(Self::from_mib)
    }
}

/// Error parsing a memory size string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid memory size: {0}")]
pub struct MemoryError(String);

impl FromStr for MemorySize {
    type Err = MemoryError;

    /// Parse a human-readable memory size string.
    ///
    /// Supported formats:
    /// - Plain number: treated as MiB (e.g., "512")
    /// - With suffix: "2G", "2GB", "2GiB", "512M", "512MB", "512MiB", "64K"
    /// - Case insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemoryError("empty string".into()));
        }
        if s.starts_with('-') {
            return Err(MemoryError("negative value".into()));
        }

        let num_end = s
            .chars()
            .position(|c| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());

        if num_end == 0 {
            return Err(MemoryError(format!("no numeric value in '{}'", s)));
        }

        let num_str = &s[..num_end];
        let suffix = s[num_end..].trim().to_lowercase();

        let value: f64 = num_str
            .parse()
            .map_err(|_| MemoryError(format!("invalid number: '{}'", num_str)))?;

        let multiplier: u64 = match suffix.as_str() {
            "" | "m" | "mb" | "mib" => 1024 * 1024,
            "b" => 1,
            "k" | "kb" | "kib" => 1024,
            "g" | "gb" | "gib" => 1024 * 1024 * 1024,
            _ => return Err(MemoryError(format!("unknown suffix: '{}'", suffix))),
        };

        Ok(MemorySize((value * multiplier as f64) as u64))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GIB: u64 = 1024 * 1024 * 1024;

        if self.0 >= GIB {
            let gib = self.0 as f64 / GIB as f64;
            if gib.fract() < 0.01 {
                write!(f, "{} GiB", self.0 / GIB)
            } else {
                write!(f, "{:.1} GiB", gib)
            }
        } else if self.as_mib() > 0 {
            write!(f, "{} MiB", self.as_mib())
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

/// Parse a `--memory-limit` argument into the MiB integer stored in settings.
///
/// `-1` (or any negative number) and `0` disable the limit.
pub fn parse_memory_limit(s: &str) -> Result<i64, MemoryError> {
    if let Ok(raw) = s.trim().parse::<i64>()
        && raw <= 0
    {
        return Ok(-1);
    }
    let size: MemorySize = s.parse()?;
    i64::try_from(size.as_mib()).map_err(|_| MemoryError(format!("'{}' is too large", s)))
}
