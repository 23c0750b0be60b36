//! NMEA0183 sentence framing: `$` or `!` delimiter, comma separated
//! fields, optional `*HH` checksum, CR LF terminator.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SentenceError {
    #[error("sentence does not start with $ or !")]
    BadDelimiter,
    #[error("checksum mismatch: computed {computed:02X}, sentence carries {carried:02X}")]
    BadChecksum { computed: u8, carried: u8 },
    #[error("sentence too short or malformed")]
    Malformed,
}

/// An NMEA0183 sentence kept in its undecoded form: address field split
/// into talker and formatter, data fields as strings, raw bytes retained
/// for transparent forwarding.
#[derive(Debug, Clone, PartialEq)]
pub struct Nmea0183Msg {
    pub delimiter: u8,
    /// Full address field, e.g. "GPRMC" or a proprietary "PDGY".
    pub address: String,
    pub fields: Vec<String>,
    pub timestamp_ms: u64,
    /// The sentence exactly as read, without CR LF.
    pub raw: Vec<u8>,
}

/// XOR of all bytes between the delimiter and `*`, both exclusive.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

impl Nmea0183Msg {
    /// Parse a sentence. `require_checksum` rejects sentences without a
    /// trailing `*HH`; when a checksum is present it is always verified.
    pub fn parse(frame: &[u8], require_checksum: bool) -> Result<Self, SentenceError> {
        let frame = trim_crlf(frame);
        if frame.len() < 7 {
            return Err(SentenceError::Malformed);
        }
        if frame[0] != b'$' && frame[0] != b'!' {
            return Err(SentenceError::BadDelimiter);
        }
        let body_end = if frame.len() >= 3 && frame[frame.len() - 3] == b'*' {
            let carried = parse_hex_byte(&frame[frame.len() - 2..]).ok_or(SentenceError::Malformed)?;
            let computed = checksum(&frame[1..frame.len() - 3]);
            if computed != carried {
                return Err(SentenceError::BadChecksum { computed, carried });
            }
            frame.len() - 3
        } else {
            if require_checksum {
                return Err(SentenceError::Malformed);
            }
            frame.len()
        };
        let body = &frame[1..body_end];
        let mut parts = body.split(|&b| b == b',');
        let address = parts
            .next()
            .filter(|a| !a.is_empty())
            .ok_or(SentenceError::Malformed)?;
        Ok(Self {
            delimiter: frame[0],
            address: String::from_utf8_lossy(address).to_string(),
            fields: parts
                .map(|f| String::from_utf8_lossy(f).to_string())
                .collect(),
            timestamp_ms: 0,
            raw: frame.to_vec(),
        })
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Build a sentence from its parts, computing the checksum.
    pub fn build(delimiter: u8, address: &str, fields: &[&str]) -> Self {
        let mut body = address.to_string();
        for field in fields {
            body.push(',');
            body.push_str(field);
        }
        let cs = checksum(body.as_bytes());
        let raw = format!("{}{}*{:02X}", delimiter as char, body, cs).into_bytes();
        Self {
            delimiter,
            address: address.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            timestamp_ms: 0,
            raw,
        }
    }

    /// Proprietary sentences have a `P` address instead of the
    /// talker + formatter split.
    pub fn is_proprietary(&self) -> bool {
        self.address.starts_with('P')
    }

    /// Two character talker id. Empty for proprietary sentences.
    pub fn talker(&self) -> &str {
        if self.is_proprietary() || self.address.len() < 5 {
            ""
        } else {
            &self.address[..2]
        }
    }

    /// Three character formatter. Empty for proprietary sentences.
    pub fn formatter(&self) -> &str {
        if self.is_proprietary() || self.address.len() < 5 {
            ""
        } else {
            &self.address[2..]
        }
    }

    /// The on-wire form including CR LF.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = self.raw.clone();
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl fmt::Display for Nmea0183Msg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.raw))
    }
}

fn trim_crlf(frame: &[u8]) -> &[u8] {
    let mut end = frame.len();
    while end > 0 && (frame[end - 1] == b'\r' || frame[end - 1] == b'\n') {
        end -= 1;
    }
    &frame[..end]
}

fn parse_hex_byte(digits: &[u8]) -> Option<u8> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
}

/// Splits a byte stream into CR LF framed sentences. Bytes before the
/// first delimiter and oversized garbage are discarded.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

/// Sentences longer than this cannot be valid NMEA0183 and are dropped.
const MAX_SENTENCE: usize = 512;

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes, returning every complete line.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                let line = trim_crlf(&self.buffer).to_vec();
                self.buffer.clear();
                if !line.is_empty() {
                    lines.push(line);
                }
            } else {
                if self.buffer.len() >= MAX_SENTENCE {
                    self.buffer.clear();
                }
                self.buffer.push(byte);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &[u8] =
        b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

    #[test]
    fn test_parse_rmc() {
        let msg = Nmea0183Msg::parse(RMC, true).unwrap();
        assert_eq!(msg.delimiter, b'$');
        assert_eq!(msg.talker(), "GP");
        assert_eq!(msg.formatter(), "RMC");
        assert_eq!(msg.fields.len(), 11);
        assert_eq!(msg.fields[0], "123519");
        assert_eq!(msg.fields[10], "W");
        assert!(!msg.is_proprietary());
    }

    #[test]
    fn test_reencode_is_identical() {
        let msg = Nmea0183Msg::parse(RMC, true).unwrap();
        assert_eq!(msg.to_wire(), RMC);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut bad = RMC.to_vec();
        bad[10] ^= 0x01; // corrupt one data byte
        assert!(matches!(
            Nmea0183Msg::parse(&bad, true),
            Err(SentenceError::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_missing_checksum() {
        let frame = b"$GPGLL,4807.038,N,01131.000,E\r\n";
        assert!(matches!(
            Nmea0183Msg::parse(frame, true),
            Err(SentenceError::Malformed)
        ));
        let msg = Nmea0183Msg::parse(frame, false).unwrap();
        assert_eq!(msg.formatter(), "GLL");
    }

    #[test]
    fn test_proprietary_address() {
        let msg = Nmea0183Msg::parse(b"!PDGY,129025,2,3,255,1000,AAAA\r\n", false).unwrap();
        assert!(msg.is_proprietary());
        assert_eq!(msg.talker(), "");
        assert_eq!(msg.address, "PDGY");
    }

    #[test]
    fn test_build_matches_parse() {
        let built = Nmea0183Msg::build(b'$', "GPGLL", &["4807.038", "N", "01131.000", "E"]);
        let parsed = Nmea0183Msg::parse(&built.to_wire(), true).unwrap();
        assert_eq!(parsed.address, "GPGLL");
        assert_eq!(parsed.fields, built.fields);
    }

    #[test]
    fn test_line_framer() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"$GPRMC,1").is_empty());
        let lines = framer.push(b"23*45\r\n$GP");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], b"$GPRMC,123*45");
        let lines = framer.push(b"GLL,x\r\n");
        assert_eq!(lines[0], b"$GPGLL,x");
    }

    #[test]
    fn test_bad_delimiter() {
        assert_eq!(
            Nmea0183Msg::parse(b"GPRMC,123519*00\r\n", false),
            Err(SentenceError::BadDelimiter)
        );
    }
}
