use std::fmt;

/// PGN 130306 Wind Data.
#[derive(Debug, Clone, PartialEq)]
pub struct WindData {
    pub sid: u8,
    pub speed: Option<f64>, // m/s
    pub angle: Option<f64>, // radians
    pub reference: WindReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindReference {
    TrueGroundNorth,
    Magnetic,
    Apparent,
    TrueBoat,
    TrueWater,
    Unknown(u8),
}

impl WindReference {
    fn from_raw(raw: u8) -> Self {
        match raw & 0x07 {
            0 => WindReference::TrueGroundNorth,
            1 => WindReference::Magnetic,
            2 => WindReference::Apparent,
            3 => WindReference::TrueBoat,
            4 => WindReference::TrueWater,
            other => WindReference::Unknown(other),
        }
    }

    fn raw(self) -> u8 {
        match self {
            WindReference::TrueGroundNorth => 0,
            WindReference::Magnetic => 1,
            WindReference::Apparent => 2,
            WindReference::TrueBoat => 3,
            WindReference::TrueWater => 4,
            WindReference::Unknown(other) => other & 0x07,
        }
    }
}

impl WindData {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 6 {
            return None;
        }
        let speed_raw = u16::from_le_bytes([data[1], data[2]]);
        let angle_raw = u16::from_le_bytes([data[3], data[4]]);
        Some(Self {
            sid: data[0],
            speed: (speed_raw != 0xFFFF).then(|| speed_raw as f64 * 0.01),
            angle: (angle_raw != 0xFFFF).then(|| angle_raw as f64 * 0.0001),
            reference: WindReference::from_raw(data[5]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.sid];
        let speed_raw = match self.speed {
            Some(v) => (v / 0.01).round() as u16,
            None => 0xFFFF,
        };
        let angle_raw = match self.angle {
            Some(v) => (v / 0.0001).round() as u16,
            None => 0xFFFF,
        };
        data.extend_from_slice(&speed_raw.to_le_bytes());
        data.extend_from_slice(&angle_raw.to_le_bytes());
        data.push(self.reference.raw() | 0xF8);
        data.extend_from_slice(&[0xFF, 0xFF]);
        data
    }

    pub fn speed_knots(&self) -> Option<f64> {
        self.speed.map(|s| s * 1.94384)
    }
}

impl fmt::Display for WindData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.speed, self.angle) {
            (Some(speed), Some(angle)) => write!(
                f,
                "Wind: {:.2} m/s at {:.1}° ({:?})",
                speed,
                angle.to_degrees(),
                self.reference
            ),
            _ => write!(f, "Wind: not available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = WindData {
            sid: 1,
            speed: Some(7.5),
            angle: Some(0.7854),
            reference: WindReference::Apparent,
        };
        let decoded = WindData::from_bytes(&msg.to_bytes()).unwrap();
        assert!((decoded.speed.unwrap() - 7.5).abs() < 0.01);
        assert!((decoded.angle.unwrap() - 0.7854).abs() < 1e-4);
        assert_eq!(decoded.reference, WindReference::Apparent);
    }

    #[test]
    fn test_knots_conversion() {
        let msg = WindData {
            sid: 0,
            speed: Some(10.0),
            angle: None,
            reference: WindReference::TrueWater,
        };
        assert!((msg.speed_knots().unwrap() - 19.4384).abs() < 1e-4);
    }
}
