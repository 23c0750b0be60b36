//! TCP client coupler: connects to an instrument gateway (NMEA0183
//! server, Digital Yacht iKonvert, Shipmodul Miniplex) and reconnects
//! through the supervisor on failure.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use nmea2k::{Dictionary, FastPacketSplitter};

use crate::config::CouplerConfig;
use crate::coupler::{
    encode_line, Coupler, CouplerError, Direction, ProtocolDecoder, ProtocolMode, WireCodec,
};
use crate::envelope::Envelope;
use crate::nmea0183::LineFramer;
use crate::pseudo0183::encode_mxpgn;
use crate::stats::CouplerStats;

pub struct TcpClientCoupler {
    name: String,
    address: String,
    port: u16,
    timeout: Duration,
    direction: Direction,
    codec: WireCodec,
    decoder: ProtocolDecoder,
    framer: LineFramer,
    splitter: FastPacketSplitter,
    stream: Option<TcpStream>,
    stats: Arc<CouplerStats>,
}

impl TcpClientCoupler {
    pub fn new(
        config: &CouplerConfig,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
        codec: WireCodec,
    ) -> Self {
        // adapter protocols imply an NMEA2000 capable stream
        let mode = match codec {
            WireCodec::Plain0183 => ProtocolMode::parse(&config.protocol),
            _ => ProtocolMode::NmeaMix,
        };
        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            port: config.port,
            timeout: config.timeout(),
            direction: Direction::parse(&config.direction),
            codec,
            decoder: ProtocolDecoder::new(&config.name, mode, dictionary, stats.clone()),
            framer: LineFramer::new(),
            splitter: FastPacketSplitter::new(),
            stream: None,
            stats,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, CouplerError> {
        self.stream
            .as_mut()
            .ok_or_else(|| CouplerError::Read("not connected".to_string()))
    }
}

impl Coupler for TcpClientCoupler {
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
        let stream = self.stream()?;
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
        let mut envelopes = Vec::new();
        for line in self.framer.push(&buffer[..read]) {
            if let Some(envelope) = self.decoder.decode_line(&line) {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    fn send(&mut self, envelope: &Envelope) -> Result<(), CouplerError> {
        if !self.direction.writable() {
            return Err(CouplerError::ReadOnly);
        }
        // the Miniplex takes single CAN frames: fast packet payloads
        // are split into one MXPGN sentence per frame
        let wire = match (self.codec, envelope.n2k()) {
            (WireCodec::Mxpgn, Some(msg)) if msg.is_fast_packet() => {
                let frames = self
                    .splitter
                    .split(msg.pgn, msg.sa, &msg.payload)
                    .map_err(|e| CouplerError::Unsendable(e.to_string()))?;
                let mut wire = Vec::new();
                for frame in frames {
                    let mut frame_msg = msg.clone();
                    frame_msg.payload = frame.to_vec();
                    wire.extend_from_slice(&encode_mxpgn(&frame_msg).to_wire());
                }
                wire
            }
            _ => encode_line(envelope, self.codec)?,
        };
        let stream = self.stream()?;
        stream
            .write_all(&wire)
            .map_err(|e| CouplerError::Write(e.to_string()))?;
        self.stats.count_sent();
        Ok(())
    }

    fn tick(&mut self) -> Vec<Envelope> {
        let dropped = self.decoder.expire();
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
