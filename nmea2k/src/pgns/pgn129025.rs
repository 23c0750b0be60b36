use std::fmt;

/// PGN 129025 Position Rapid Update.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRapidUpdate {
    pub latitude: Option<f64>,  // degrees
    pub longitude: Option<f64>, // degrees
}

const NO_POSITION: i32 = 0x7FFF_FFFF;

fn decode_coordinate(raw: i32) -> Option<f64> {
    if raw == NO_POSITION {
        None
    } else {
        Some(raw as f64 * 1e-7)
    }
}

fn encode_coordinate(value: Option<f64>) -> i32 {
    match value {
        Some(v) => (v * 1e7).round() as i32,
        None => NO_POSITION,
    }
}

impl PositionRapidUpdate {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        Some(Self {
            latitude: decode_coordinate(i32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            longitude: decode_coordinate(i32::from_le_bytes([data[4], data[5], data[6], data[7]])),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&encode_coordinate(self.latitude).to_le_bytes());
        data.extend_from_slice(&encode_coordinate(self.longitude).to_le_bytes());
        data
    }
}

impl fmt::Display for PositionRapidUpdate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => write!(f, "Position: {:.7}°, {:.7}°", lat, lon),
            _ => write!(f, "Position: no fix"),
        }
    }
}
