use std::fmt;

/// PGN 129029 GNSS Position Data, a 43 byte fast packet record.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssPositionData {
    pub sid: u8,
    /// Days since 1970-01-01.
    pub date: Option<u16>,
    /// Seconds since midnight.
    pub time: Option<f64>,
    pub latitude: Option<f64>,  // degrees
    pub longitude: Option<f64>, // degrees
    pub altitude: Option<f64>,  // meters
    pub gnss_type: u8,
    pub method: GnssMethod,
    pub integrity: u8,
    pub num_svs: u8,
    pub hdop: Option<f64>,
    pub pdop: Option<f64>,
    pub geoidal_separation: Option<f64>, // meters
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnssMethod {
    NoFix,
    GnssFix,
    DGnss,
    PreciseGnss,
    RtkFixed,
    RtkFloat,
    Unknown(u8),
}

impl GnssMethod {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => GnssMethod::NoFix,
            1 => GnssMethod::GnssFix,
            2 => GnssMethod::DGnss,
            3 => GnssMethod::PreciseGnss,
            4 => GnssMethod::RtkFixed,
            5 => GnssMethod::RtkFloat,
            other => GnssMethod::Unknown(other),
        }
    }

    fn raw(self) -> u8 {
        match self {
            GnssMethod::NoFix => 0,
            GnssMethod::GnssFix => 1,
            GnssMethod::DGnss => 2,
            GnssMethod::PreciseGnss => 3,
            GnssMethod::RtkFixed => 4,
            GnssMethod::RtkFloat => 5,
            GnssMethod::Unknown(other) => other,
        }
    }
}

fn decode_i64_scaled(data: &[u8], index: usize, scale: f64) -> Option<f64> {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[index..index + 8]);
    let raw = i64::from_le_bytes(bytes);
    if raw == i64::MAX {
        None
    } else {
        Some(raw as f64 * scale)
    }
}

fn encode_i64_scaled(value: Option<f64>, scale: f64) -> [u8; 8] {
    match value {
        Some(v) => ((v / scale).round() as i64).to_le_bytes(),
        None => i64::MAX.to_le_bytes(),
    }
}

fn decode_i16_scaled(data: &[u8], index: usize, scale: f64) -> Option<f64> {
    let raw = i16::from_le_bytes([data[index], data[index + 1]]);
    if raw == 0x7FFF {
        None
    } else {
        Some(raw as f64 * scale)
    }
}

fn encode_i16_scaled(value: Option<f64>, scale: f64) -> [u8; 2] {
    match value {
        Some(v) => ((v / scale).round() as i16).to_le_bytes(),
        None => 0x7FFFi16.to_le_bytes(),
    }
}

impl GnssPositionData {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 43 {
            return None;
        }
        let date_raw = u16::from_le_bytes([data[1], data[2]]);
        let time_raw = u32::from_le_bytes([data[3], data[4], data[5], data[6]]);
        let geo_raw = i32::from_le_bytes([data[38], data[39], data[40], data[41]]);
        Some(Self {
            sid: data[0],
            date: (date_raw != 0xFFFF).then_some(date_raw),
            time: (time_raw != 0xFFFF_FFFF).then(|| time_raw as f64 * 0.0001),
            latitude: decode_i64_scaled(data, 7, 1e-16),
            longitude: decode_i64_scaled(data, 15, 1e-16),
            altitude: decode_i64_scaled(data, 23, 1e-6),
            gnss_type: data[31] & 0x0F,
            method: GnssMethod::from_raw((data[31] >> 4) & 0x0F),
            integrity: data[32] & 0x03,
            num_svs: data[33],
            hdop: decode_i16_scaled(data, 34, 0.01),
            pdop: decode_i16_scaled(data, 36, 0.01),
            geoidal_separation: (geo_raw != i32::MAX).then(|| geo_raw as f64 * 0.01),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(43);
        data.push(self.sid);
        data.extend_from_slice(&self.date.unwrap_or(0xFFFF).to_le_bytes());
        let time_raw = match self.time {
            Some(t) => (t / 0.0001).round() as u32,
            None => 0xFFFF_FFFF,
        };
        data.extend_from_slice(&time_raw.to_le_bytes());
        data.extend_from_slice(&encode_i64_scaled(self.latitude, 1e-16));
        data.extend_from_slice(&encode_i64_scaled(self.longitude, 1e-16));
        data.extend_from_slice(&encode_i64_scaled(self.altitude, 1e-6));
        data.push((self.gnss_type & 0x0F) | (self.method.raw() << 4));
        data.push((self.integrity & 0x03) | 0xFC);
        data.push(self.num_svs);
        data.extend_from_slice(&encode_i16_scaled(self.hdop, 0.01));
        data.extend_from_slice(&encode_i16_scaled(self.pdop, 0.01));
        let geo_raw = match self.geoidal_separation {
            Some(v) => (v / 0.01).round() as i32,
            None => i32::MAX,
        };
        data.extend_from_slice(&geo_raw.to_le_bytes());
        data.push(0); // no reference stations
        data
    }
}

impl fmt::Display for GnssPositionData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => write!(
                f,
                "GNSS Position: {:.7}°, {:.7}° sats: {} method: {:?}",
                lat, lon, self.num_svs, self.method
            ),
            _ => write!(f, "GNSS Position: no fix"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = GnssPositionData {
            sid: 7,
            date: Some(19723),
            time: Some(43200.0),
            latitude: Some(43.4521),
            longitude: Some(6.9531),
            altitude: Some(12.5),
            gnss_type: 0,
            method: GnssMethod::GnssFix,
            integrity: 0,
            num_svs: 9,
            hdop: Some(0.8),
            pdop: Some(1.5),
            geoidal_separation: Some(47.2),
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 43);
        let decoded = GnssPositionData::from_bytes(&bytes).unwrap();
        assert!((decoded.latitude.unwrap() - 43.4521).abs() < 1e-9);
        assert!((decoded.longitude.unwrap() - 6.9531).abs() < 1e-9);
        assert_eq!(decoded.method, GnssMethod::GnssFix);
        assert_eq!(decoded.num_svs, 9);
        assert!((decoded.hdop.unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_fix() {
        let msg = GnssPositionData {
            sid: 0,
            date: None,
            time: None,
            latitude: None,
            longitude: None,
            altitude: None,
            gnss_type: 0,
            method: GnssMethod::NoFix,
            integrity: 0,
            num_svs: 0,
            hdop: None,
            pdop: None,
            geoidal_separation: None,
        };
        let decoded = GnssPositionData::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.latitude, None);
        assert_eq!(decoded.method, GnssMethod::NoFix);
    }

    #[test]
    fn test_short_payload() {
        assert!(GnssPositionData::from_bytes(&[0; 42]).is_none());
    }
}
