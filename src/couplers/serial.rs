//! Serial line coupler: NMEA0183 instruments on RS422/USB bridges.
//! Default 4800 Bd, 38400 for GNSS receivers and multiplexers.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{info, warn};

use nmea2k::Dictionary;

use crate::config::CouplerConfig;
use crate::coupler::{
    encode_line, Coupler, CouplerError, Direction, ProtocolDecoder, ProtocolMode, WireCodec,
};
use crate::envelope::Envelope;
use crate::nmea0183::LineFramer;
use crate::stats::CouplerStats;

pub struct SerialCoupler {
    name: String,
    device: String,
    baud_rate: u32,
    timeout: Duration,
    direction: Direction,
    decoder: ProtocolDecoder,
    framer: LineFramer,
    port: Option<Box<dyn SerialPort>>,
    stats: Arc<CouplerStats>,
}

impl SerialCoupler {
    pub fn new(
        config: &CouplerConfig,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            device: config.device.clone(),
            baud_rate: config.baud_rate,
            timeout: config.timeout(),
            direction: Direction::parse(&config.direction),
            decoder: ProtocolDecoder::new(
                &config.name,
                ProtocolMode::parse(&config.protocol),
                dictionary,
                stats.clone(),
            ),
            framer: LineFramer::new(),
            port: None,
            stats,
        }
    }
}

impl Coupler for SerialCoupler {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn open(&mut self) -> Result<(), CouplerError> {
        let port = serialport::new(&self.device, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| CouplerError::Open(format!("{}: {}", self.device, e)))?;
        info!(
            "coupler {}: opened {} at {} Bd",
            self.name, self.device, self.baud_rate
        );
        self.port = Some(port);
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Envelope>, CouplerError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| CouplerError::Read("port not open".to_string()))?;
        let mut buffer = [0u8; 512];
        let read = match port.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(Vec::new()),
            Err(e) => {
                self.port = None;
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
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| CouplerError::Write("port not open".to_string()))?;
        let wire = encode_line(envelope, WireCodec::Plain0183)?;
        port.write_all(&wire)
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
        self.port = None;
        info!("coupler {}: closed", self.name);
    }
}
