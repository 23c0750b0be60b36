use std::fmt;

/// PGN 129026 COG & SOG Rapid Update.
#[derive(Debug, Clone, PartialEq)]
pub struct CogSogRapidUpdate {
    pub sid: u8,
    pub cog_reference: CogReference,
    pub cog: Option<f64>, // radians
    pub sog: Option<f64>, // m/s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CogReference {
    True,
    Magnetic,
    Error,
}

impl CogReference {
    fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => CogReference::True,
            1 => CogReference::Magnetic,
            _ => CogReference::Error,
        }
    }

    fn raw(self) -> u8 {
        match self {
            CogReference::True => 0,
            CogReference::Magnetic => 1,
            CogReference::Error => 3,
        }
    }
}

impl CogSogRapidUpdate {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let cog_raw = u16::from_le_bytes([data[2], data[3]]);
        let sog_raw = u16::from_le_bytes([data[4], data[5]]);
        Some(Self {
            sid: data[0],
            cog_reference: CogReference::from_raw(data[1]),
            cog: (cog_raw != 0xFFFF).then(|| cog_raw as f64 * 0.0001),
            sog: (sog_raw != 0xFFFF).then(|| sog_raw as f64 * 0.01),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.sid, self.cog_reference.raw() | 0xFC];
        let cog_raw = match self.cog {
            Some(v) => (v / 0.0001).round() as u16,
            None => 0xFFFF,
        };
        let sog_raw = match self.sog {
            Some(v) => (v / 0.01).round() as u16,
            None => 0xFFFF,
        };
        data.extend_from_slice(&cog_raw.to_le_bytes());
        data.extend_from_slice(&sog_raw.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0xFF]);
        data
    }
}

impl fmt::Display for CogSogRapidUpdate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "COG: {} SOG: {}",
            self.cog
                .map(|c| format!("{:.1}°", c.to_degrees()))
                .unwrap_or_else(|| "-".to_string()),
            self.sog
                .map(|s| format!("{:.2} m/s", s))
                .unwrap_or_else(|| "-".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = CogSogRapidUpdate {
            sid: 5,
            cog_reference: CogReference::True,
            cog: Some(1.5708),
            sog: Some(3.6),
        };
        let decoded = CogSogRapidUpdate::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.sid, 5);
        assert_eq!(decoded.cog_reference, CogReference::True);
        assert!((decoded.cog.unwrap() - 1.5708).abs() < 1e-4);
        assert!((decoded.sog.unwrap() - 3.6).abs() < 1e-2);
    }

    #[test]
    fn test_missing_values() {
        let msg = CogSogRapidUpdate {
            sid: 0,
            cog_reference: CogReference::Magnetic,
            cog: None,
            sog: None,
        };
        let decoded = CogSogRapidUpdate::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.cog, None);
        assert_eq!(decoded.sog, None);
    }
}
