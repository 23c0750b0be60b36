use std::fmt;

/// PGN 126992 System Time.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemTime {
    pub sid: u8,
    /// Time source, low nibble of byte 1.
    pub source: u8,
    /// Days since 1970-01-01.
    pub date: Option<u16>,
    /// Seconds since midnight, 0.0001 s resolution.
    pub time: Option<f64>,
}

impl SystemTime {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let date_raw = u16::from_le_bytes([data[2], data[3]]);
        let time_raw = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        Some(Self {
            sid: data[0],
            source: data[1] & 0x0F,
            date: (date_raw != 0xFFFF).then_some(date_raw),
            time: (time_raw != 0xFFFF_FFFF).then(|| time_raw as f64 * 0.0001),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.sid, self.source | 0xF0];
        data.extend_from_slice(&self.date.unwrap_or(0xFFFF).to_le_bytes());
        let time_raw = match self.time {
            Some(t) => (t / 0.0001).round() as u32,
            None => 0xFFFF_FFFF,
        };
        data.extend_from_slice(&time_raw.to_le_bytes());
        data
    }

    /// Seconds since the Unix epoch, when both date and time are known.
    pub fn unix_seconds(&self) -> Option<i64> {
        let date = self.date? as i64;
        let time = self.time? as i64;
        Some(date * 86400 + time)
    }
}

impl fmt::Display for SystemTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.unix_seconds() {
            Some(ts) => write!(f, "System Time: {} (unix)", ts),
            None => write!(f, "System Time: not available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = SystemTime {
            sid: 1,
            source: 0,
            date: Some(19723),
            time: Some(3600.0),
        };
        let decoded = SystemTime::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.unix_seconds(), Some(19723 * 86400 + 3600));
    }

    #[test]
    fn test_no_data() {
        let msg = SystemTime {
            sid: 0,
            source: 5,
            date: None,
            time: None,
        };
        let decoded = SystemTime::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.date, None);
        assert_eq!(decoded.unix_seconds(), None);
    }
}
