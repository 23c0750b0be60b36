use std::fmt;

/// PGN 129540 GNSS Satellites in View: a fast packet record with one
/// repeated block per satellite.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssSatsInView {
    pub sid: u8,
    pub range_residual_mode: u8,
    pub satellites: Vec<SatelliteInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteInfo {
    pub prn: u8,
    pub elevation: Option<f64>, // radians
    pub azimuth: Option<f64>,   // radians
    pub snr: Option<f64>,       // dB
    pub status: u8,
}

const SATELLITE_BLOCK: usize = 12;

fn decode_i16(data: &[u8], index: usize, scale: f64) -> Option<f64> {
    let raw = i16::from_le_bytes([data[index], data[index + 1]]);
    if raw == 0x7FFF {
        None
    } else {
        Some(raw as f64 * scale)
    }
}

fn encode_i16(value: Option<f64>, scale: f64) -> [u8; 2] {
    match value {
        Some(v) => ((v / scale).round() as i16).to_le_bytes(),
        None => 0x7FFFi16.to_le_bytes(),
    }
}

fn decode_u16(data: &[u8], index: usize, scale: f64) -> Option<f64> {
    let raw = u16::from_le_bytes([data[index], data[index + 1]]);
    if raw == 0xFFFF {
        None
    } else {
        Some(raw as f64 * scale)
    }
}

fn encode_u16(value: Option<f64>, scale: f64) -> [u8; 2] {
    match value {
        Some(v) => ((v / scale).round() as u16).to_le_bytes(),
        None => [0xFF, 0xFF],
    }
}

impl GnssSatsInView {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }
        let count = data[2] as usize;
        if count == 0xFF || data.len() < 3 + count * SATELLITE_BLOCK {
            return None;
        }
        let mut satellites = Vec::with_capacity(count);
        for i in 0..count {
            let base = 3 + i * SATELLITE_BLOCK;
            satellites.push(SatelliteInfo {
                prn: data[base],
                elevation: decode_i16(data, base + 1, 0.0001),
                azimuth: decode_u16(data, base + 3, 0.0001),
                snr: decode_u16(data, base + 5, 0.01),
                // four bytes of range residual precede the status nibble
                status: data[base + 11] & 0x0F,
            });
        }
        Some(Self {
            sid: data[0],
            range_residual_mode: data[1] & 0x03,
            satellites,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(3 + self.satellites.len() * SATELLITE_BLOCK);
        data.push(self.sid);
        data.push(self.range_residual_mode | 0xFC);
        data.push(self.satellites.len() as u8);
        for sat in &self.satellites {
            data.push(sat.prn);
            data.extend_from_slice(&encode_i16(sat.elevation, 0.0001));
            data.extend_from_slice(&encode_u16(sat.azimuth, 0.0001));
            data.extend_from_slice(&encode_u16(sat.snr, 0.01));
            data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x7F]); // range residual unknown
            data.push(sat.status | 0xF0);
        }
        data
    }
}

impl fmt::Display for GnssSatsInView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Satellites in view: {}", self.satellites.len())?;
        for sat in &self.satellites {
            write!(f, " PRN{}", sat.prn)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sat(prn: u8) -> SatelliteInfo {
        SatelliteInfo {
            prn,
            elevation: Some(0.7854),
            azimuth: Some(2.3561),
            snr: Some(42.0),
            status: 2,
        }
    }

    #[test]
    fn test_roundtrip() {
        let msg = GnssSatsInView {
            sid: 1,
            range_residual_mode: 0,
            satellites: vec![sat(5), sat(12), sat(25)],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 3 + 3 * SATELLITE_BLOCK);
        let decoded = GnssSatsInView::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.satellites.len(), 3);
        assert_eq!(decoded.satellites[1].prn, 12);
        assert!((decoded.satellites[0].elevation.unwrap() - 0.7854).abs() < 1e-4);
        assert!((decoded.satellites[2].snr.unwrap() - 42.0).abs() < 0.01);
        assert_eq!(decoded.satellites[0].status, 2);
    }

    #[test]
    fn test_truncated_block_rejected() {
        let msg = GnssSatsInView {
            sid: 0,
            range_residual_mode: 0,
            satellites: vec![sat(5)],
        };
        let mut bytes = msg.to_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(GnssSatsInView::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_empty_view() {
        let msg = GnssSatsInView {
            sid: 0,
            range_residual_mode: 3,
            satellites: Vec::new(),
        };
        let decoded = GnssSatsInView::from_bytes(&msg.to_bytes()).unwrap();
        assert!(decoded.satellites.is_empty());
    }
}
