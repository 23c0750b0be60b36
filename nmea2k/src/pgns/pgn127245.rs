use std::fmt;

/// PGN 127245 Rudder.
#[derive(Debug, Clone, PartialEq)]
pub struct Rudder {
    pub instance: u8,
    pub direction_order: u8,
    pub angle_order: Option<f64>, // radians
    pub position: Option<f64>,    // radians
}

fn decode_angle(data: &[u8], index: usize) -> Option<f64> {
    let raw = i16::from_le_bytes([data[index], data[index + 1]]);
    if raw == 0x7FFF {
        None
    } else {
        Some(raw as f64 * 0.0001)
    }
}

fn encode_angle(value: Option<f64>) -> [u8; 2] {
    match value {
        Some(v) => ((v / 0.0001).round() as i16).to_le_bytes(),
        None => 0x7FFFi16.to_le_bytes(),
    }
}

impl Rudder {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 6 {
            return None;
        }
        Some(Self {
            instance: data[0],
            direction_order: data[1] & 0x07,
            angle_order: decode_angle(data, 2),
            position: decode_angle(data, 4),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.instance, self.direction_order | 0xF8];
        data.extend_from_slice(&encode_angle(self.angle_order));
        data.extend_from_slice(&encode_angle(self.position));
        data.extend_from_slice(&[0xFF, 0xFF]);
        data
    }
}

impl fmt::Display for Rudder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.position {
            Some(p) => write!(f, "Rudder {}: {:.1}°", self.instance, p.to_degrees()),
            None => write!(f, "Rudder {}: position unknown", self.instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = Rudder {
            instance: 0,
            direction_order: 0,
            angle_order: None,
            position: Some(-0.15),
        };
        let decoded = Rudder::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.angle_order, None);
        assert!((decoded.position.unwrap() + 0.15).abs() < 1e-4);
    }
}
