// Bandwidth limit model: validated Kbps rates, single/split limits and display formatting

use crate::error::ShapingError;
use anyhow::Result;
use std::fmt;

/// Named presets offered by the UI (label, Kbps)
pub const PRESETS: [(&str, u32); 6] = [
    ("512K", 512),
    ("1M", 1_000),
    ("10M", 10_000),
    ("100M", 100_000),
    ("500M", 500_000),
    ("1G", 1_000_000),
];

/// A bandwidth ceiling in kilobits per second, always within
/// `[Rate::MIN_KBPS, Rate::MAX_KBPS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u32);

impl Rate {
    pub const MIN_KBPS: u32 = 100;
    pub const MAX_KBPS: u32 = 1_000_000;

    /// Accept a rate, rejecting anything outside the valid range
    pub fn new(kbps: u64) -> Result<Self, ShapingError> {
        if kbps < Self::MIN_KBPS as u64 || kbps > Self::MAX_KBPS as u64 {
            return Err(ShapingError::InvalidLimit(kbps));
        }
        Ok(Rate(kbps as u32))
    }

    /// Clamp an arbitrary value into the valid range (presentation boundary)
    pub fn clamped(kbps: u64) -> Self {
        Rate(kbps.clamp(Self::MIN_KBPS as u64, Self::MAX_KBPS as u64) as u32)
    }

    pub fn kbps(self) -> u32 {
        self.0
    }

    /// Shift the rate by `delta` Kbps, staying inside the valid range
    pub fn adjusted(self, delta: i64) -> Self {
        Self::clamped(i64::from(self.0).saturating_add(delta).max(0) as u64)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_rate(self.0 as u64))
    }
}

/// One ceiling for both directions, or separate download/upload ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapingLimit {
    Single(Rate),
    Split { download: Rate, upload: Rate },
}

impl ShapingLimit {
    /// Build a limit from raw Kbps values; no upload value means single mode
    pub fn from_kbps(download: u64, upload: Option<u64>) -> Result<Self, ShapingError> {
        let download = Rate::new(download)?;
        match upload {
            Some(upload) => Ok(ShapingLimit::Split {
                download,
                upload: Rate::new(upload)?,
            }),
            None => Ok(ShapingLimit::Single(download)),
        }
    }

    pub fn download(&self) -> Rate {
        match *self {
            ShapingLimit::Single(rate) => rate,
            ShapingLimit::Split { download, .. } => download,
        }
    }

    pub fn upload(&self) -> Rate {
        match *self {
            ShapingLimit::Single(rate) => rate,
            ShapingLimit::Split { upload, .. } => upload,
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, ShapingLimit::Split { .. })
    }
}

impl fmt::Display for ShapingLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapingLimit::Single(rate) => write!(f, "Active: {}", rate),
            ShapingLimit::Split { download, upload } => {
                write!(f, "Down: {} | Up: {}", download, upload)
            }
        }
    }
}

/// Format Kbps for display (e.g., "999 Kbps", "1.5 Mbps", "1.00 Gbps")
pub fn format_rate(kbps: u64) -> String {
    if kbps >= 1_000_000 {
        format!("{:.2} Gbps", kbps as f64 / 1_000_000.0)
    } else if kbps >= 1_000 {
        format!("{:.1} Mbps", kbps as f64 / 1_000.0)
    } else {
        format!("{} Kbps", kbps)
    }
}

/// Parse a rate string (e.g., "512K", "10M", "1.5M", "1G", "2500") to Kbps.
/// Units are decimal kilobits; a bare number is already Kbps.
pub fn parse_rate(input: &str) -> Result<u64> {
    let normalized = input.trim().to_uppercase();
    let normalized = normalized
        .trim_end_matches("BPS")
        .trim_end_matches("BIT/S")
        .trim_end_matches("BIT")
        .trim_end_matches('B');

    let (num_str, multiplier) = if let Some(num) = normalized.strip_suffix('G') {
        (num, 1_000_000.0)
    } else if let Some(num) = normalized.strip_suffix('M') {
        (num, 1_000.0)
    } else if let Some(num) = normalized.strip_suffix('K') {
        (num, 1.0)
    } else {
        (normalized, 1.0)
    };

    let number: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bandwidth limit: {}", input))?;

    if !number.is_finite() || number <= 0.0 {
        return Err(anyhow::anyhow!("Invalid bandwidth limit: {}", input));
    }

    Ok((number * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rate_boundaries() {
        assert_eq!(format_rate(999), "999 Kbps");
        assert_eq!(format_rate(1000), "1.0 Mbps");
        assert_eq!(format_rate(1_000_000), "1.00 Gbps");
        assert_eq!(format_rate(100), "100 Kbps");
        assert_eq!(format_rate(2500), "2.5 Mbps");
        assert_eq!(format_rate(999_999), "1000.0 Mbps");
    }

    #[test]
    fn test_rate_range_is_inclusive() {
        assert!(Rate::new(100).is_ok());
        assert!(Rate::new(1_000_000).is_ok());
        assert_eq!(Rate::new(99), Err(ShapingError::InvalidLimit(99)));
        assert_eq!(
            Rate::new(1_000_001),
            Err(ShapingError::InvalidLimit(1_000_001))
        );
    }

    #[test]
    fn test_rate_clamping() {
        assert_eq!(Rate::clamped(0).kbps(), 100);
        assert_eq!(Rate::clamped(5_000_000).kbps(), 1_000_000);
        assert_eq!(Rate::clamped(4321).kbps(), 4321);
        assert_eq!(Rate::clamped(150).adjusted(-100).kbps(), 100);
        assert_eq!(Rate::clamped(999_950).adjusted(100).kbps(), 1_000_000);
    }

    #[test]
    fn test_adjusted_saturates_on_extreme_deltas() {
        assert_eq!(Rate::clamped(500).adjusted(i64::MAX).kbps(), Rate::MAX_KBPS);
        assert_eq!(Rate::clamped(500).adjusted(i64::MIN).kbps(), Rate::MIN_KBPS);
    }

    #[test]
    fn test_single_limit_keeps_directions_equal() {
        let limit = ShapingLimit::from_kbps(4000, None).unwrap();
        assert!(!limit.is_split());
        assert_eq!(limit.download(), limit.upload());
        assert_eq!(limit.to_string(), "Active: 4.0 Mbps");
    }

    #[test]
    fn test_split_limit() {
        let limit = ShapingLimit::from_kbps(10_000, Some(5_000)).unwrap();
        assert!(limit.is_split());
        assert_eq!(limit.download().kbps(), 10_000);
        assert_eq!(limit.upload().kbps(), 5_000);
        assert_eq!(limit.to_string(), "Down: 10.0 Mbps | Up: 5.0 Mbps");
        assert!(ShapingLimit::from_kbps(10_000, Some(50)).is_err());
    }

    #[test]
    fn test_parse_rate_units() {
        assert_eq!(parse_rate("512K").unwrap(), 512);
        assert_eq!(parse_rate("10M").unwrap(), 10_000);
        assert_eq!(parse_rate("1.5m").unwrap(), 1_500);
        assert_eq!(parse_rate("1G").unwrap(), 1_000_000);
        assert_eq!(parse_rate("2500").unwrap(), 2_500);
        assert_eq!(parse_rate("10Mbps").unwrap(), 10_000);
        assert_eq!(parse_rate("10Mbit/s").unwrap(), 10_000);
        assert!(parse_rate("fast").is_err());
        assert!(parse_rate("-5M").is_err());
    }

    #[test]
    fn test_presets_are_valid_rates() {
        for (label, kbps) in PRESETS {
            assert!(Rate::new(kbps as u64).is_ok(), "preset {} out of range", label);
        }
    }
}
