//! Network timetags (NTP format: seconds since 1900 + 32-bit fraction).

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

const FRAC_SCALE: f64 = 4_294_967_296.0; // 2^32

/// A network timestamp.
///
/// Ordering is chronological: `sec` first, then `frac`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timetag {
    pub sec: u32,
    pub frac: u32,
}

impl Timetag {
    /// The zero timetag, used as "immediately" by the wire layer.
    pub const ZERO: Timetag = Timetag { sec: 0, frac: 0 };

    pub fn new(sec: u32, frac: u32) -> Self {
        Self { sec, frac }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let sec = (dt.timestamp() + NTP_UNIX_OFFSET).clamp(0, u32::MAX as i64) as u32;
        let frac = ((dt.timestamp_subsec_nanos() as f64 / 1e9) * FRAC_SCALE) as u32;
        Self { sec, frac }
    }

    /// Convert to a UTC datetime. Returns `None` for timetags before the Unix epoch.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = self.sec as i64 - NTP_UNIX_OFFSET;
        if secs < 0 {
            return None;
        }
        let nanos = ((self.frac as f64 / FRAC_SCALE) * 1e9) as u32;
        Utc.timestamp_opt(secs, nanos.min(999_999_999)).single()
    }

    /// Build from fractional seconds since the NTP epoch. Negative input clamps to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !(secs > 0.0) {
            return Self::ZERO;
        }
        let whole = secs.floor();
        let sec = whole.min(u32::MAX as f64) as u32;
        let frac = ((secs - whole) * FRAC_SCALE) as u32;
        Self { sec, frac }
    }

    pub fn as_secs_f64(self) -> f64 {
        self.sec as f64 + self.frac as f64 / FRAC_SCALE
    }

    /// `self - other` in seconds (may be negative).
    pub fn diff_secs(self, other: Timetag) -> f64 {
        (self.sec as f64 - other.sec as f64) + (self.frac as f64 - other.frac as f64) / FRAC_SCALE
    }

    /// Offset by a (possibly negative) number of seconds, saturating at zero.
    pub fn add_secs(self, secs: f64) -> Self {
        Self::from_secs_f64(self.as_secs_f64() + secs)
    }

    /// `true` if at least `secs` seconds separate `earlier` from `self`.
    pub fn has_elapsed_since(self, earlier: Timetag, secs: f64) -> bool {
        self.diff_secs(earlier).partial_cmp(&secs) != Some(Ordering::Less)
    }
}

impl fmt::Display for Timetag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08x}", self.sec, self.frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_chronological() {
        let a = Timetag::new(10, 5);
        let b = Timetag::new(10, 6);
        let c = Timetag::new(11, 0);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_add_and_diff() {
        let t = Timetag::new(100, 0);
        let later = t.add_secs(2.5);
        assert_eq!(later.sec, 102);
        assert!((later.diff_secs(t) - 2.5).abs() < 1e-6);
        assert!(later.has_elapsed_since(t, 2.5));
        assert!(!later.has_elapsed_since(t, 3.0));
    }

    #[test]
    fn test_negative_offset_saturates() {
        assert_eq!(Timetag::new(1, 0).add_secs(-5.0), Timetag::ZERO);
    }

    #[test]
    fn test_datetime_roundtrip_second_precision() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t = Timetag::from_datetime(dt);
        assert_eq!(t.to_datetime(), Some(dt));
    }
}
