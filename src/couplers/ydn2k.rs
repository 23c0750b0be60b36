//! Yacht Devices ethernet gateway coupler (YDEN-02 and compatible),
//! speaking the YD RAW text protocol: one CAN frame per line,
//! `HH:MM:SS.mmm {R|T} <hex CAN id> <hex bytes...>`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use nmea2k::{Dictionary, FastPacketAssembler, FastPacketSplitter, Identifier, Nmea2000Msg};

use crate::config::CouplerConfig;
use crate::coupler::{Coupler, CouplerError, Direction};
use crate::envelope::{now_ms, Envelope};
use crate::nmea0183::LineFramer;
use crate::stats::CouplerStats;

pub struct Ydn2kCoupler {
    name: String,
    address: String,
    port: u16,
    timeout: Duration,
    direction: Direction,
    dictionary: Arc<Dictionary>,
    stats: Arc<CouplerStats>,
    fast_packet: FastPacketAssembler,
    splitter: FastPacketSplitter,
    framer: LineFramer,
    stream: Option<TcpStream>,
}

impl Ydn2kCoupler {
    pub fn new(
        config: &CouplerConfig,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            port: config.port,
            timeout: config.timeout(),
            direction: Direction::parse(&config.direction),
            dictionary,
            stats,
            fast_packet: FastPacketAssembler::new(),
            splitter: FastPacketSplitter::new(),
            framer: LineFramer::new(),
            stream: None,
        }
    }

    /// Parse one `HH:MM:SS.mmm R <id> <bytes>` line into a CAN frame.
    fn parse_line(line: &[u8]) -> Option<(Identifier, Vec<u8>)> {
        let text = std::str::from_utf8(line).ok()?;
        let mut parts = text.split_ascii_whitespace();
        let _time = parts.next()?;
        let direction = parts.next()?;
        if direction != "R" {
            // transmit echoes and errors are not bus traffic
            return None;
        }
        let id = u32::from_str_radix(parts.next()?, 16).ok()?;
        let mut payload = Vec::with_capacity(8);
        for part in parts {
            payload.push(u8::from_str_radix(part, 16).ok()?);
        }
        if payload.len() > 8 {
            return None;
        }
        Some((Identifier::from_can_id(id), payload))
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Envelope> {
        self.stats.count_raw();
        let Some((id, payload)) = Self::parse_line(line) else {
            debug!("coupler {}: unparsable line", self.name);
            self.stats.count_error();
            return None;
        };
        let pgn = id.pgn();
        let payload = if self.dictionary.is_fast_packet(pgn) && payload.len() == 8 {
            match self
                .fast_packet
                .process_frame(pgn, id.source(), &payload, Instant::now())
            {
                Ok(Some(complete)) => complete,
                Ok(None) => return None,
                Err(e) => {
                    debug!("coupler {}: fast packet: {}", self.name, e);
                    self.stats.count_error();
                    return None;
                }
            }
        } else {
            payload
        };
        self.stats.count_message();
        let msg = Nmea2000Msg::new(pgn, id.priority(), id.source(), id.destination(), payload)
            .with_timestamp(now_ms());
        Some(Envelope::from_n2k(msg))
    }

    fn write_raw_frame(&mut self, msg: &Nmea2000Msg) -> Result<(), CouplerError> {
        let id = Identifier::build(msg.pgn, msg.priority, msg.sa, msg.da)
            .map_err(|e| CouplerError::Unsendable(e.to_string()))?;
        let mut line = format!("{:08X}", id.as_raw());
        for byte in &msg.payload {
            line.push_str(&format!(" {:02X}", byte));
        }
        line.push_str("\r\n");
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CouplerError::Write("not connected".to_string()))?;
        stream
            .write_all(line.as_bytes())
            .map_err(|e| CouplerError::Write(e.to_string()))?;
        self.stats.count_sent();
        Ok(())
    }
}

impl Coupler for Ydn2kCoupler {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn open(&mut self) -> Result<(), CouplerError> {
        let target = format!("{}:{}", self.address, self.port);
        let stream = TcpStream::connect(&target)
            .map_err(|e| CouplerError::Open(format!("{}: {}", target, e)))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| CouplerError::Open(e.to_string()))?;
        info!("coupler {}: connected to {}", self.name, target);
        self.stream = Some(stream);
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Envelope>, CouplerError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CouplerError::Read("not connected".to_string()))?;
        let mut buffer = [0u8; 2048];
        let read = match stream.read(&mut buffer) {
            Ok(0) => {
                self.stream = None;
                return Err(CouplerError::Read("peer closed the connection".to_string()));
            }
            Ok(n) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(Vec::new())
            }
            Err(e) => {
                self.stream = None;
                return Err(CouplerError::Read(e.to_string()));
            }
        };
        let lines = self.framer.push(&buffer[..read]);
        let mut envelopes = Vec::new();
        for line in lines {
            if let Some(envelope) = self.decode_line(&line) {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    fn send(&mut self, envelope: &Envelope) -> Result<(), CouplerError> {
        if !self.direction.writable() {
            return Err(CouplerError::ReadOnly);
        }
        let msg = envelope
            .n2k()
            .ok_or_else(|| CouplerError::Unsendable("not an NMEA2000 envelope".to_string()))?;
        if self.dictionary.is_fast_packet(msg.pgn) || msg.is_fast_packet() {
            let frames = self
                .splitter
                .split(msg.pgn, msg.sa, &msg.payload)
                .map_err(|e| CouplerError::Unsendable(e.to_string()))?;
            for frame in frames {
                let mut frame_msg = msg.clone();
                frame_msg.payload = frame.to_vec();
                self.write_raw_frame(&frame_msg)?;
            }
            return Ok(());
        }
        self.write_raw_frame(msg)
    }

    fn tick(&mut self) -> Vec<Envelope> {
        let dropped = self.fast_packet.expire(Instant::now());
        if dropped > 0 {
            warn!("coupler {}: {} fast packet sequences expired", self.name, dropped);
        }
        Vec::new()
    }

    fn close(&mut self) {
        self.stream = None;
        info!("coupler {}: closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_receive_line() {
        let (id, payload) =
            Ydn2kCoupler::parse_line(b"17:33:21.107 R 09F80182 01 02 03 04 05 06 07 08").unwrap();
        assert_eq!(id.pgn(), 129025);
        assert_eq!(id.source(), 0x82);
        assert_eq!(payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_transmit_echo_ignored() {
        assert!(Ydn2kCoupler::parse_line(b"17:33:21.108 T 09F80182 01 02").is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Ydn2kCoupler::parse_line(b"not a frame").is_none());
        assert!(Ydn2kCoupler::parse_line(b"17:33:21.107 R ZZZZ 01").is_none());
    }
}
