//! UDP receiver coupler: instruments broadcasting NMEA0183 sentences
//! over the local network, one or more sentences per datagram.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use nmea2k::Dictionary;

use crate::config::CouplerConfig;
use crate::coupler::{Coupler, CouplerError, Direction, ProtocolDecoder, ProtocolMode};
use crate::envelope::Envelope;
use crate::nmea0183::LineFramer;
use crate::stats::CouplerStats;

pub struct UdpCoupler {
    name: String,
    bind_address: String,
    port: u16,
    timeout: Duration,
    decoder: ProtocolDecoder,
    framer: LineFramer,
    socket: Option<UdpSocket>,
}

impl UdpCoupler {
    pub fn new(
        config: &CouplerConfig,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
    ) -> Self {
        let bind_address = if config.address.is_empty() {
            "0.0.0.0".to_string()
        } else {
            config.address.clone()
        };
        Self {
            name: config.name.clone(),
            bind_address,
            port: config.port,
            timeout: config.timeout(),
            decoder: ProtocolDecoder::new(
                &config.name,
                ProtocolMode::parse(&config.protocol),
                dictionary,
                stats,
            ),
            framer: LineFramer::new(),
            socket: None,
        }
    }
}

impl Coupler for UdpCoupler {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        Direction::ReadOnly
    }

    fn open(&mut self) -> Result<(), CouplerError> {
        let bind = format!("{}:{}", self.bind_address, self.port);
        let socket =
            UdpSocket::bind(&bind).map_err(|e| CouplerError::Open(format!("{}: {}", bind, e)))?;
        socket
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| CouplerError::Open(e.to_string()))?;
        info!("coupler {}: listening on udp {}", self.name, bind);
        self.socket = Some(socket);
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Envelope>, CouplerError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| CouplerError::Read("socket not open".to_string()))?;
        let mut buffer = [0u8; 2048];
        let read = match socket.recv_from(&mut buffer) {
            Ok((n, _)) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(Vec::new())
            }
            Err(e) => return Err(CouplerError::Read(e.to_string())),
        };
        let mut envelopes = Vec::new();
        // a datagram may end without CR LF: flush the framer with one
        let mut data = buffer[..read].to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        for line in self.framer.push(&data) {
            if let Some(envelope) = self.decoder.decode_line(&line) {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    fn send(&mut self, _envelope: &Envelope) -> Result<(), CouplerError> {
        Err(CouplerError::ReadOnly)
    }

    fn tick(&mut self) -> Vec<Envelope> {
        let dropped = self.decoder.expire();
        if dropped > 0 {
            warn!("coupler {}: {} fast packet sequences expired", self.name, dropped);
        }
        Vec::new()
    }

    fn close(&mut self) {
        self.socket = None;
        info!("coupler {}: closed", self.name);
    }
}
