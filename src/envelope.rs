use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use nmea2k::{N2kData, Nmea2000Msg};

use crate::nmea0183::Nmea0183Msg;

/// The canonical in-process message every coupler produces and every
/// publisher consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// NMEA2000 message with reassembled but undecoded payload.
    Raw2000(Nmea2000Msg),
    /// NMEA2000 message with a typed per-PGN record attached.
    Decoded2000 {
        header: Nmea2000Msg,
        data: N2kData,
    },
    /// NMEA0183 sentence.
    Sentence0183(Nmea0183Msg),
    /// Opaque bytes from a coupler in transparent mode.
    Passthrough { source: String, data: Vec<u8> },
}

impl Envelope {
    /// Attach the typed record when the PGN has a native decoder,
    /// otherwise keep the message raw.
    pub fn from_n2k(msg: Nmea2000Msg) -> Envelope {
        match N2kData::from_pgn(msg.pgn, &msg.payload) {
            Some(data) => Envelope::Decoded2000 { header: msg, data },
            None => Envelope::Raw2000(msg),
        }
    }

    /// The NMEA2000 header when the envelope carries one.
    pub fn n2k(&self) -> Option<&Nmea2000Msg> {
        match self {
            Envelope::Raw2000(msg) => Some(msg),
            Envelope::Decoded2000 { header, .. } => Some(header),
            _ => None,
        }
    }

    pub fn sentence(&self) -> Option<&Nmea0183Msg> {
        match self {
            Envelope::Sentence0183(msg) => Some(msg),
            _ => None,
        }
    }

    /// Arrival timestamp, zero for passthrough data which carries none.
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            Envelope::Raw2000(msg) => msg.timestamp_ms,
            Envelope::Decoded2000 { header, .. } => header.timestamp_ms,
            Envelope::Sentence0183(msg) => msg.timestamp_ms,
            Envelope::Passthrough { .. } => 0,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Envelope::Raw2000(msg) => write!(f, "{}", msg),
            Envelope::Decoded2000 { header, data } => {
                write!(f, "PGN {} sa={} {}", header.pgn, header.sa, data)
            }
            Envelope::Sentence0183(msg) => write!(f, "{}", msg),
            Envelope::Passthrough { source, data } => {
                write!(f, "passthrough[{}] {} bytes", source, data.len())
            }
        }
    }
}

/// Milliseconds since the Unix epoch, for arrival timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_n2k_decodes_known_pgn() {
        let wind = nmea2k::pgns::WindData {
            sid: 0,
            speed: Some(5.0),
            angle: Some(1.0),
            reference: nmea2k::pgns::pgn130306::WindReference::Apparent,
        };
        let msg = Nmea2000Msg::new(130306, 2, 0x10, 255, wind.to_bytes());
        match Envelope::from_n2k(msg) {
            Envelope::Decoded2000 { header, data } => {
                assert_eq!(header.pgn, 130306);
                assert_eq!(data.pgn(), 130306);
            }
            other => panic!("expected decoded envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_from_n2k_keeps_unknown_raw() {
        let msg = Nmea2000Msg::new(65281, 2, 0x82, 255, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        match Envelope::from_n2k(msg.clone()) {
            Envelope::Raw2000(raw) => assert_eq!(raw, msg),
            other => panic!("expected raw envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_timestamp_follows_the_message() {
        let msg = Nmea2000Msg::new(65281, 2, 0x82, 255, vec![0; 8]).with_timestamp(1700000000123);
        assert_eq!(Envelope::from_n2k(msg).timestamp_ms(), 1700000000123);
        let passthrough = Envelope::Passthrough {
            source: "test".to_string(),
            data: vec![1, 2, 3],
        };
        assert_eq!(passthrough.timestamp_ms(), 0);
    }
}
