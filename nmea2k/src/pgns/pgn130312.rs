use std::fmt;

/// PGN 130312 Temperature. Raw values are Kelvin at 0.01 resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Temperature {
    pub sid: u8,
    pub instance: u8,
    pub source: u8,
    pub temperature: Option<f64>,     // Kelvin
    pub set_temperature: Option<f64>, // Kelvin
}

fn decode_temp(data: &[u8], index: usize) -> Option<f64> {
    let raw = u16::from_le_bytes([data[index], data[index + 1]]);
    if raw == 0xFFFF {
        None
    } else {
        Some(raw as f64 * 0.01)
    }
}

fn encode_temp(value: Option<f64>) -> [u8; 2] {
    match value {
        Some(v) => ((v / 0.01).round() as u16).to_le_bytes(),
        None => [0xFF, 0xFF],
    }
}

impl Temperature {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 7 {
            return None;
        }
        Some(Self {
            sid: data[0],
            instance: data[1],
            source: data[2],
            temperature: decode_temp(data, 3),
            set_temperature: decode_temp(data, 5),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.sid, self.instance, self.source];
        data.extend_from_slice(&encode_temp(self.temperature));
        data.extend_from_slice(&encode_temp(self.set_temperature));
        data.push(0xFF);
        data
    }

    pub fn celsius(&self) -> Option<f64> {
        self.temperature.map(|k| k - 273.15)
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.celsius() {
            Some(c) => write!(
                f,
                "Temperature: {:.2}°C (source {}, instance {})",
                c, self.source, self.instance
            ),
            None => write!(f, "Temperature: not available"),
        }
    }
}
