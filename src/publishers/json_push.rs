//! Push publisher: maintains a persistent connection to a peer and
//! ships every routed envelope as one JSON line. The gRPC surface of
//! the peer is fronted by its own gateway; this sink speaks the
//! envelope schema only.

use std::io::Write;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::envelope::Envelope;
use crate::publisher::PublisherSink;

/// Wire schema of one pushed message.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum PushRecord<'a> {
    #[serde(rename = "nmea2000")]
    Nmea2000 {
        pgn: u32,
        priority: u8,
        sa: u8,
        da: u8,
        timestamp: u64,
        /// Payload bytes as lowercase hex.
        payload: String,
    },
    #[serde(rename = "nmea0183")]
    Nmea0183 {
        talker: &'a str,
        formatter: &'a str,
        timestamp: u64,
        values: &'a [String],
        raw: String,
    },
}

pub struct JsonPushPublisher {
    name: String,
    peer: String,
    retry_interval: Duration,
    stream: Option<TcpStream>,
    last_attempt: Option<Instant>,
    sent: u64,
    dropped: u64,
}

impl JsonPushPublisher {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            name: config.name.clone(),
            peer: format!("{}:{}", config.address, config.port),
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
            stream: None,
            last_attempt: None,
            sent: 0,
            dropped: 0,
        }
    }

    fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        // do not hammer a dead peer
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.retry_interval {
                return false;
            }
        }
        self.last_attempt = Some(Instant::now());
        match TcpStream::connect(&self.peer) {
            Ok(stream) => {
                info!("publisher {}: connected to {}", self.name, self.peer);
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                warn!("publisher {}: connect to {} failed: {}", self.name, self.peer, e);
                false
            }
        }
    }

    fn record(envelope: &Envelope) -> Option<PushRecord<'_>> {
        let timestamp = envelope.timestamp_ms();
        if let Some(msg) = envelope.n2k() {
            return Some(PushRecord::Nmea2000 {
                pgn: msg.pgn,
                priority: msg.priority,
                sa: msg.sa,
                da: msg.da,
                timestamp,
                payload: nmea2k::message::hex_string(&msg.payload),
            });
        }
        match envelope {
            Envelope::Sentence0183(sentence) => Some(PushRecord::Nmea0183 {
                talker: sentence.talker(),
                formatter: sentence.formatter(),
                timestamp,
                values: &sentence.fields,
                raw: String::from_utf8_lossy(&sentence.raw).to_string(),
            }),
            _ => None,
        }
    }
}

impl PublisherSink for JsonPushPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, envelope: &Envelope) -> bool {
        let Some(record) = Self::record(envelope) else {
            return true;
        };
        if !self.ensure_connected() {
            self.dropped += 1;
            return true;
        }
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                debug!("publisher {}: serialization failed: {}", self.name, e);
                self.dropped += 1;
                return true;
            }
        };
        line.push(b'\n');
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.write_all(&line) {
                warn!("publisher {}: push failed: {}, reconnecting", self.name, e);
                self.stream = None;
                self.dropped += 1;
                return true;
            }
        }
        self.sent += 1;
        true
    }

    fn last_action(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.flush();
        }
        info!(
            "publisher {}: {} pushed, {} dropped",
            self.name, self.sent, self.dropped
        );
    }
}
