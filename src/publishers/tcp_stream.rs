//! TCP stream publisher: navigation clients connect to the configured
//! port and receive the routed traffic serialized in the publisher's
//! format.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::envelope::Envelope;
use crate::publisher::PublisherSink;
use crate::pseudo0183::{encode_pdgy, encode_pgnst};

/// Client serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Raw bytes as read from the coupler; NMEA2000 envelopes are
    /// skipped.
    Transparent,
    /// NMEA2000 as `!PDGY`, NMEA0183 as-is.
    Dyfmt,
    /// NMEA2000 as `!PGNST`, NMEA0183 as-is.
    Stfmt,
}

impl StreamFormat {
    fn parse(s: &str) -> StreamFormat {
        match s {
            "transparent" => StreamFormat::Transparent,
            "stfmt" => StreamFormat::Stfmt,
            _ => StreamFormat::Dyfmt,
        }
    }
}

struct Client {
    stream: TcpStream,
    peer: String,
    last_active: Instant,
}

pub struct TcpStreamPublisher {
    name: String,
    format: StreamFormat,
    max_silent: Duration,
    clients: Arc<Mutex<Vec<Client>>>,
}

impl TcpStreamPublisher {
    pub fn new(config: &PublisherConfig, shutdown: Arc<AtomicBool>) -> Result<Self, String> {
        let bind = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&bind)
            .map_err(|e| format!("publisher {}: bind {}: {}", config.name, bind, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| format!("publisher {}: {}", config.name, e))?;
        info!("publisher {}: listening on {}", config.name, bind);
        let clients: Arc<Mutex<Vec<Client>>> = Arc::new(Mutex::new(Vec::new()));

        // accept loop on its own thread, stopped with the process
        let accept_clients = clients.clone();
        let accept_name = config.name.clone();
        std::thread::Builder::new()
            .name(format!("accept-{}", config.name))
            .spawn(move || loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, peer)) => {
                        info!("publisher {}: client {} connected", accept_name, peer);
                        let _ = stream.set_nodelay(true);
                        if let Ok(mut clients) = accept_clients.lock() {
                            clients.push(Client {
                                stream,
                                peer: peer.to_string(),
                                last_active: Instant::now(),
                            });
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(200));
                    }
                    Err(e) => {
                        warn!("publisher {}: accept failed: {}", accept_name, e);
                        std::thread::sleep(Duration::from_millis(500));
                    }
                }
            })
            .map_err(|e| format!("publisher {}: {}", config.name, e))?;

        Ok(Self {
            name: config.name.clone(),
            format: StreamFormat::parse(&config.format),
            max_silent: Duration::from_secs(config.max_silent_seconds),
            clients,
        })
    }

    /// Serialize an envelope for the wire, `None` when the format has
    /// no rendering for it.
    fn serialize(&self, envelope: &Envelope) -> Option<Vec<u8>> {
        let n2k = |msg: &nmea2k::Nmea2000Msg| match self.format {
            StreamFormat::Transparent => None,
            StreamFormat::Dyfmt => Some(encode_pdgy(msg).to_wire()),
            StreamFormat::Stfmt => Some(encode_pgnst(msg).to_wire()),
        };
        match envelope {
            Envelope::Sentence0183(sentence) => Some(sentence.to_wire()),
            Envelope::Passthrough { data, .. } => Some(data.clone()),
            Envelope::Raw2000(msg) => n2k(msg),
            Envelope::Decoded2000 { header, .. } => n2k(header),
        }
    }
}

impl PublisherSink for TcpStreamPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, envelope: &Envelope) -> bool {
        let Some(wire) = self.serialize(envelope) else {
            return true;
        };
        let max_silent = self.max_silent;
        let name = self.name.clone();
        if let Ok(mut clients) = self.clients.lock() {
            clients.retain_mut(|client| {
                match client.stream.write_all(&wire) {
                    Ok(()) => {
                        client.last_active = Instant::now();
                        true
                    }
                    Err(e) => {
                        // a saturated client past the silence window is dead
                        if client.last_active.elapsed() > max_silent {
                            info!("publisher {}: client {} silent, closing", name, client.peer);
                            false
                        } else {
                            debug!("publisher {}: write to {} failed: {}", name, client.peer, e);
                            !matches!(
                                e.kind(),
                                std::io::ErrorKind::BrokenPipe
                                    | std::io::ErrorKind::ConnectionReset
                                    | std::io::ErrorKind::ConnectionAborted
                            )
                        }
                    }
                }
            });
        }
        true
    }

    fn last_action(&mut self) {
        if let Ok(mut clients) = self.clients.lock() {
            for client in clients.iter_mut() {
                let _ = client.stream.flush();
            }
            clients.clear();
        }
    }
}
