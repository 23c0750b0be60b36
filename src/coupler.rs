//! The coupler contract every device adapter implements, plus the
//! shared line decoding machinery (NMEA0183, pseudo-0183 carriers and
//! fast packet reassembly) the text based drivers compose.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use nmea2k::{Dictionary, FastPacketAssembler};

use crate::envelope::{now_ms, Envelope};
use crate::nmea0183::Nmea0183Msg;
use crate::pseudo0183::{decode_mxpgn, decode_pdgy, decode_pgnst};
use crate::stats::CouplerStats;

#[derive(Debug, Error)]
pub enum CouplerError {
    #[error("open failed: {0}")]
    Open(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("coupler is read only")]
    ReadOnly,
    #[error("message cannot be sent on this coupler: {0}")]
    Unsendable(String),
}

/// Coupler I/O direction, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    ReadOnly,
    WriteOnly,
}

impl Direction {
    pub fn parse(s: &str) -> Direction {
        match s {
            "read_only" => Direction::ReadOnly,
            "write_only" => Direction::WriteOnly,
            _ => Direction::Bidirectional,
        }
    }

    pub fn readable(self) -> bool {
        self != Direction::WriteOnly
    }

    pub fn writable(self) -> bool {
        self != Direction::ReadOnly
    }
}

/// What the byte stream of a coupler carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Nmea0183,
    Nmea2000,
    /// 0183 sentences and pseudo-0183 PGN carriers on the same stream.
    NmeaMix,
    /// Opaque bytes, forwarded untouched.
    Transparent,
}

impl ProtocolMode {
    pub fn parse(s: &str) -> ProtocolMode {
        match s {
            "nmea2000" => ProtocolMode::Nmea2000,
            "nmea_mix" => ProtocolMode::NmeaMix,
            "transparent" | "non_nmea" => ProtocolMode::Transparent,
            _ => ProtocolMode::Nmea0183,
        }
    }
}

/// Lifecycle of a supervised coupler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplerState {
    NotReady,
    Opening,
    Open,
    Connected,
    Active,
    Stopped,
    Failed,
}

/// The contract between the router and a device adapter. All calls run
/// on the coupler's own worker thread; blocking inside them is fine.
pub trait Coupler: Send {
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// Open or reconnect the device. Retried by the supervisor.
    fn open(&mut self) -> Result<(), CouplerError>;

    /// Read from the device, up to the configured timeout. An empty
    /// vector means the timeout elapsed without traffic.
    fn poll(&mut self) -> Result<Vec<Envelope>, CouplerError>;

    /// Write an envelope to the device in its wire format.
    fn send(&mut self, envelope: &Envelope) -> Result<(), CouplerError>;

    /// Periodic housekeeping: session expiry, timers. May produce
    /// envelopes (completed transfers) of its own.
    fn tick(&mut self) -> Vec<Envelope> {
        Vec::new()
    }

    fn close(&mut self);
}

/// How NMEA2000 envelopes are rendered on a text based wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    /// Plain NMEA0183 only; NMEA2000 envelopes cannot be sent.
    Plain0183,
    /// Digital Yacht `!PDGY` (full payload, base64).
    Pdgy,
    /// `!PGNST` (full payload, hex).
    Pgnst,
    /// Shipmodul `$MXPGN` (single CAN frames, fast packet split by the
    /// caller).
    Mxpgn,
}

/// Render an envelope for a text based wire. NMEA2000 fast packet
/// splitting for MXPGN is handled by the Shipmodul driver, which sees
/// one line per frame.
pub fn encode_line(envelope: &Envelope, codec: WireCodec) -> Result<Vec<u8>, CouplerError> {
    use crate::pseudo0183::{encode_mxpgn, encode_pdgy, encode_pgnst};
    let encode_n2k = |msg: &nmea2k::Nmea2000Msg| match codec {
        WireCodec::Plain0183 => Err(CouplerError::Unsendable(format!(
            "PGN {} on an NMEA0183 only coupler",
            msg.pgn
        ))),
        WireCodec::Pdgy => Ok(encode_pdgy(msg).to_wire()),
        WireCodec::Pgnst => Ok(encode_pgnst(msg).to_wire()),
        WireCodec::Mxpgn => Ok(encode_mxpgn(msg).to_wire()),
    };
    match envelope {
        Envelope::Sentence0183(sentence) => Ok(sentence.to_wire()),
        Envelope::Passthrough { data, .. } => Ok(data.clone()),
        Envelope::Raw2000(msg) => encode_n2k(msg),
        Envelope::Decoded2000 { header, .. } => encode_n2k(header),
    }
}

/// Turns framed lines into envelopes according to the protocol mode.
/// Shared by the serial, TCP, UDP and replay drivers.
pub struct ProtocolDecoder {
    name: String,
    mode: ProtocolMode,
    dictionary: Arc<Dictionary>,
    fast_packet: FastPacketAssembler,
    stats: Arc<CouplerStats>,
}

impl ProtocolDecoder {
    pub fn new(
        name: &str,
        mode: ProtocolMode,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
    ) -> Self {
        Self {
            name: name.to_string(),
            mode,
            dictionary,
            fast_packet: FastPacketAssembler::new(),
            stats,
        }
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    /// Change the protocol mode. Partial fast packet sequences cannot
    /// survive the switch and are dropped.
    pub fn set_mode(&mut self, mode: ProtocolMode) {
        if mode != self.mode {
            self.fast_packet.reset();
            self.mode = mode;
        }
    }

    /// Decode one framed line. `None` when the line is incomplete
    /// input (open fast packet sequence) or was dropped and counted.
    pub fn decode_line(&mut self, line: &[u8]) -> Option<Envelope> {
        self.stats.count_raw();
        if self.mode == ProtocolMode::Transparent {
            self.stats.count_message();
            return Some(Envelope::Passthrough {
                source: self.name.clone(),
                data: line.to_vec(),
            });
        }
        let sentence = match Nmea0183Msg::parse(line, false) {
            Ok(s) => s.with_timestamp(now_ms()),
            Err(e) => {
                debug!("{}: dropped line: {}", self.name, e);
                self.stats.count_error();
                return None;
            }
        };
        match sentence.address.as_str() {
            "PDGY" => self.pseudo(decode_pdgy(&sentence), false),
            "PGNST" => self.pseudo(decode_pgnst(&sentence), false),
            "MXPGN" => self.pseudo(decode_mxpgn(&sentence), true),
            _ => {
                if self.mode == ProtocolMode::Nmea2000 {
                    // a pure NMEA2000 stream has no place for plain 0183
                    self.stats.count_error();
                    return None;
                }
                self.stats.count_message();
                Some(Envelope::Sentence0183(sentence))
            }
        }
    }

    fn pseudo(
        &mut self,
        decoded: Result<nmea2k::Nmea2000Msg, crate::pseudo0183::PseudoError>,
        frame_level: bool,
    ) -> Option<Envelope> {
        let mut msg = match decoded {
            Ok(m) => m,
            Err(e) => {
                warn!("{}: pseudo sentence dropped: {}", self.name, e);
                self.stats.count_error();
                return None;
            }
        };
        if msg.timestamp_ms == 0 {
            msg.timestamp_ms = now_ms();
        }
        // MXPGN delivers single CAN frames: fast packet PGNs need
        // reassembly before the payload is complete
        if frame_level && self.dictionary.is_fast_packet(msg.pgn) {
            match self
                .fast_packet
                .process_frame(msg.pgn, msg.sa, &msg.payload, Instant::now())
            {
                Ok(Some(payload)) => {
                    msg.payload = payload;
                }
                Ok(None) => return None,
                Err(e) => {
                    debug!("{}: fast packet drop: {}", self.name, e);
                    self.stats.count_error();
                    return None;
                }
            }
        }
        self.stats.count_message();
        Some(Envelope::from_n2k(msg))
    }

    /// Expire stale fast packet sequences. Returns the drop count of
    /// this pass.
    pub fn expire(&mut self) -> usize {
        self.fast_packet.expire(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudo0183::encode_pdgy;
    use nmea2k::{FastPacketSplitter, Nmea2000Msg};

    fn decoder(mode: ProtocolMode) -> ProtocolDecoder {
        ProtocolDecoder::new("test", mode, Arc::new(Dictionary::empty()), CouplerStats::new())
    }

    #[test]
    fn test_0183_line() {
        let mut dec = decoder(ProtocolMode::Nmea0183);
        let env = dec.decode_line(b"$GPGLL,4807.038,N,01131.000,E").unwrap();
        assert_eq!(env.sentence().unwrap().formatter(), "GLL");
    }

    #[test]
    fn test_checksum_failure_counted() {
        let stats = CouplerStats::new();
        let mut dec = ProtocolDecoder::new(
            "test",
            ProtocolMode::Nmea0183,
            Arc::new(Dictionary::empty()),
            stats.clone(),
        );
        assert!(dec.decode_line(b"$GPGLL,4807.038*00").is_none());
        assert_eq!(stats.snapshot().3, 1);
    }

    #[test]
    fn test_pdgy_in_mix_mode() {
        let mut dec = decoder(ProtocolMode::NmeaMix);
        let msg = Nmea2000Msg::new(129025, 2, 3, 255, vec![0xAA; 8]).with_timestamp(99);
        let line = encode_pdgy(&msg).to_wire();
        let env = dec.decode_line(&line).unwrap();
        assert_eq!(env.n2k().unwrap().pgn, 129025);
        // plain sentences still pass in mix mode
        let env = dec.decode_line(b"$GPGLL,1,2").unwrap();
        assert!(env.sentence().is_some());
    }

    #[test]
    fn test_plain_0183_rejected_in_2000_mode() {
        let mut dec = decoder(ProtocolMode::Nmea2000);
        assert!(dec.decode_line(b"$GPGLL,1,2").is_none());
    }

    #[test]
    fn test_mxpgn_fast_packet_reassembly() {
        // 129029 is in the fast packet range, so MXPGN frames of it
        // must be reassembled
        let mut dec = decoder(ProtocolMode::Nmea2000);
        let payload: Vec<u8> = (0..43).collect();
        let mut splitter = FastPacketSplitter::new();
        let frames = splitter.split(129029, 0x12, &payload).unwrap();
        let mut result = None;
        for frame in &frames {
            let attribute = 0x2800 | 0x12u16; // prio 2, dlc 8, sa 0x12
            let line = Nmea0183Msg::build(
                b'$',
                "MXPGN",
                &[
                    "01F805",
                    &format!("{:04X}", attribute),
                    &nmea2k::message::hex_string(frame).to_uppercase(),
                ],
            )
            .to_wire();
            result = dec.decode_line(&line);
        }
        let env = result.expect("fast packet did not complete");
        assert_eq!(env.n2k().unwrap().payload, payload);
    }

    #[test]
    fn test_mode_change_drops_open_sequences() {
        let mut dec = decoder(ProtocolMode::Nmea2000);
        let mut splitter = FastPacketSplitter::new();
        let frames = splitter.split(129029, 0x12, &(0..43).collect::<Vec<u8>>()).unwrap();
        let attribute = 0x2800 | 0x12u16;
        let line = Nmea0183Msg::build(
            b'$',
            "MXPGN",
            &[
                "01F805",
                &format!("{:04X}", attribute),
                &nmea2k::message::hex_string(&frames[0]).to_uppercase(),
            ],
        )
        .to_wire();
        assert!(dec.decode_line(&line).is_none());
        dec.set_mode(ProtocolMode::NmeaMix);
        dec.set_mode(ProtocolMode::Nmea2000);
        // the half-open sequence is gone: the continuation is an error
        let line2 = Nmea0183Msg::build(
            b'$',
            "MXPGN",
            &[
                "01F805",
                &format!("{:04X}", attribute),
                &nmea2k::message::hex_string(&frames[1]).to_uppercase(),
            ],
        )
        .to_wire();
        assert!(dec.decode_line(&line2).is_none());
    }

    #[test]
    fn test_transparent_mode() {
        let mut dec = decoder(ProtocolMode::Transparent);
        match dec.decode_line(b"anything at all").unwrap() {
            Envelope::Passthrough { source, data } => {
                assert_eq!(source, "test");
                assert_eq!(data, b"anything at all");
            }
            other => panic!("expected passthrough, got {other:?}"),
        }
    }
}
