pub mod nmea;

pub use nmea::{NmeaDecoder, Sentence};

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Latitude reported while no valid position is known.
pub const INVALID_LATITUDE: f64 = 99.999;
/// Longitude reported while no valid position is known.
pub const INVALID_LONGITUDE: f64 = 999.999;
/// Dilution of precision reported before any GSA sentence.
pub const INVALID_DOP: f64 = 25.0;

pub const KMH_PER_KNOT: f64 = 1.852;

/// GSA reports at most twelve channels.
pub const MAX_SATELLITES_USED: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixQuality {
    None,
    TwoD,
    ThreeD,
}

impl FixQuality {
    /// Numeric code used on the wire (0, 2 or 3).
    pub fn code(self) -> u32 {
        match self {
            FixQuality::None => 0,
            FixQuality::TwoD => 2,
            FixQuality::ThreeD => 3,
        }
    }

    pub fn has_fix(self) -> bool {
        self != FixQuality::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdopGrade {
    Ideal,
    Excellent,
    Good,
    Moderate,
    Fair,
    Poor,
}

impl HdopGrade {
    /// Bands HDOP on its whole tenths: >210 Poor, >90 Fair, >70 Moderate,
    /// >40 Good, >20 Excellent, otherwise Ideal.
    pub fn from_hdop(hdop: f64) -> Self {
        let tenths = (hdop * 10.0).trunc();
        if tenths > 210.0 {
            HdopGrade::Poor
        } else if tenths > 90.0 {
            HdopGrade::Fair
        } else if tenths > 70.0 {
            HdopGrade::Moderate
        } else if tenths > 40.0 {
            HdopGrade::Good
        } else if tenths > 20.0 {
            HdopGrade::Excellent
        } else {
            HdopGrade::Ideal
        }
    }

    pub fn letter(self) -> char {
        match self {
            HdopGrade::Ideal => 'I',
            HdopGrade::Excellent => 'E',
            HdopGrade::Good => 'G',
            HdopGrade::Moderate => 'M',
            HdopGrade::Fair => 'F',
            HdopGrade::Poor => 'P',
        }
    }
}

/// NMEA `dddmm.mmmm` to decimal degrees. The sign of the input is kept.
pub fn minutes_to_degrees(nmea: f64) -> f64 {
    let magnitude = nmea.abs();
    let degrees = (magnitude / 100.0).floor();
    let minutes = magnitude - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    if nmea < 0.0 {
        -decimal
    } else {
        decimal
    }
}

/// Latest known GPS state, updated one sentence at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Signed NMEA `ddmm.mmmm`, south negative.
    pub latitude: f64,
    /// Signed NMEA `dddmm.mmmm`, west negative.
    pub longitude: f64,
    /// UTC time of the last position, `hhmmss`.
    pub utc: u32,
    pub valid: bool,
    pub quality: FixQuality,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
    /// PRNs of the satellites in the solution, from the last GSA.
    pub satellites_used: Vec<u8, MAX_SATELLITES_USED>,
    pub satellites_in_view: u32,
    pub speed_kmh: f64,
    pub speed_knots: f64,
    /// Track made good, degrees true.
    pub course: f64,
    /// `ddmmyy`
    pub date: u32,
    pub magnetic_variation: f64,
    pub variation_east: bool,
}

impl GpsFix {
    pub fn new() -> Self {
        Self {
            latitude: INVALID_LATITUDE,
            longitude: INVALID_LONGITUDE,
            utc: 0,
            valid: false,
            quality: FixQuality::None,
            pdop: INVALID_DOP,
            hdop: INVALID_DOP,
            vdop: INVALID_DOP,
            satellites_used: Vec::new(),
            satellites_in_view: 0,
            speed_kmh: 0.0,
            speed_knots: 0.0,
            course: 0.0,
            date: 0,
            magnetic_variation: 0.0,
            variation_east: true,
        }
    }

    /// Back to the invalid sentinels. Called whenever the receiver is
    /// powered down.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Latitude in decimal degrees, `None` while the position is invalid.
    pub fn latitude_degrees(&self) -> Option<f64> {
        self.valid.then(|| minutes_to_degrees(self.latitude))
    }

    pub fn longitude_degrees(&self) -> Option<f64> {
        self.valid.then(|| minutes_to_degrees(self.longitude))
    }

    pub fn hdop_grade(&self) -> HdopGrade {
        HdopGrade::from_hdop(self.hdop)
    }
}

impl Default for GpsFix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_to_degrees_keeps_sign() {
        let east = minutes_to_degrees(12311.12);
        let west = minutes_to_degrees(-12311.12);
        assert!((east - (123.0 + 11.12 / 60.0)).abs() < 1e-9);
        assert!((west + (123.0 + 11.12 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_reset_restores_sentinels() {
        let mut fix = GpsFix::new();
        fix.valid = true;
        fix.latitude = 4916.45;
        fix.quality = FixQuality::ThreeD;
        fix.hdop = 1.2;
        fix.reset();
        assert_eq!(fix, GpsFix::new());
        assert_eq!(fix.latitude_degrees(), None);
        assert_eq!(fix.hdop, INVALID_DOP);
    }
}
