//! ISO J1939/21 transport protocol: TP.CM (PGN 60416) and TP.DT
//! (PGN 60160) session handling for PDUs of up to 1785 bytes.
//!
//! Two modes are supported. BAM broadcasts the whole transfer without
//! acknowledgement, pacing data frames at 50 ms. RTS/CTS runs
//! peer-to-peer with a flow window granted by the receiver and an end
//! of message acknowledgement. Only one session may exist per
//! (source, destination, PGN) at any time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::identifier::{pgn_pdu1_adjust, ADDRESS_GLOBAL};
use crate::message::Nmea2000Msg;

pub const PGN_TP_CM: u32 = 60416;
pub const PGN_TP_DT: u32 = 60160;
/// Largest PDU the transport protocol can carry.
pub const MAX_TP_LENGTH: usize = 1785;

const CM_RTS: u8 = 16;
const CM_CTS: u8 = 17;
const CM_EOM_ACK: u8 = 19;
const CM_BAM: u8 = 32;
const CM_ABORT: u8 = 255;

/// Receiver gives up when no data frame arrived within this delay.
pub const T1_RX_PACKET: Duration = Duration::from_millis(750);
/// Sender gives up waiting for the first or next CTS.
pub const T2_TX_CTS: Duration = Duration::from_millis(1250);
/// Sender gives up waiting for the end of message acknowledgement.
pub const T3_TX_EOM: Duration = Duration::from_millis(1250);
/// Receiver hold time after granting a window.
pub const T4_RX_HOLD: Duration = Duration::from_millis(1050);
/// Pacing between BAM data frames.
pub const BAM_FRAME_PACING: Duration = Duration::from_millis(50);
/// Ceiling on the pacing between any two transport frames.
pub const MAX_FRAME_PACING: Duration = Duration::from_millis(200);

/// Packets granted per CTS.
const DEFAULT_WINDOW: u8 = 8;

/// Session abort reasons, as carried in the TP.Conn_Abort frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Busy,
    Resources,
    Timeout,
    RetransmitLimit,
}

impl AbortReason {
    fn code(self) -> u8 {
        match self {
            AbortReason::Busy => 1,
            AbortReason::Resources => 2,
            AbortReason::Timeout => 3,
            AbortReason::RetransmitLimit => 4,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => AbortReason::Busy,
            2 => AbortReason::Resources,
            4 => AbortReason::RetransmitLimit,
            _ => AbortReason::Timeout,
        }
    }
}

/// A frame to transmit, with the minimum delay to respect since the
/// previously emitted frame of the same session.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedFrame {
    pub msg: Nmea2000Msg,
    pub pacing: Duration,
}

/// What a transport event produced: frames to send and/or a completed
/// incoming PDU.
#[derive(Debug, Clone, PartialEq)]
pub enum TpOutput {
    Send(TimedFrame),
    Complete(Nmea2000Msg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    sa: u8,
    da: u8,
    pgn: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum RxMode {
    Bam,
    Cts,
}

#[derive(Debug)]
struct RxSession {
    mode: RxMode,
    priority: u8,
    total_size: usize,
    nb_packets: u8,
    next_seq: u8,
    window_left: u8,
    buffer: Vec<u8>,
    deadline: Instant,
    started: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum TxState {
    AwaitingCts,
    AwaitingEom,
}

#[derive(Debug)]
struct TxSession {
    state: TxState,
    priority: u8,
    payload: Vec<u8>,
    nb_packets: u8,
    deadline: Instant,
}

/// Transport session manager for one CAN interface.
#[derive(Debug, Default)]
pub struct IsoTransportHandler {
    rx: HashMap<SessionKey, RxSession>,
    tx: HashMap<SessionKey, TxSession>,
    timeouts: u64,
}

fn packets_for(len: usize) -> u8 {
    len.div_ceil(7) as u8
}

fn cm_payload(control: u8, b1: u8, b2: u8, b3: u8, b4: u8, pgn: u32) -> Vec<u8> {
    vec![
        control,
        b1,
        b2,
        b3,
        b4,
        (pgn & 0xFF) as u8,
        ((pgn >> 8) & 0xFF) as u8,
        ((pgn >> 16) & 0xFF) as u8,
    ]
}

fn embedded_pgn(payload: &[u8]) -> u32 {
    u32::from(payload[5]) | (u32::from(payload[6]) << 8) | (u32::from(payload[7]) << 16)
}

impl IsoTransportHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions aborted on timer expiry since startup.
    pub fn timeout_count(&self) -> u64 {
        self.timeouts
    }

    pub fn open_sessions(&self) -> usize {
        self.rx.len() + self.tx.len()
    }

    /// Start a broadcast (BAM) transfer. Returns the TP.CM announcement
    /// followed by every TP.DT frame, data frames paced at 50 ms.
    pub fn start_bam(&mut self, msg: &Nmea2000Msg) -> Result<Vec<TimedFrame>, TransportError> {
        let size = msg.payload.len();
        if !(9..=MAX_TP_LENGTH).contains(&size) {
            return Err(TransportError::BadSize(size));
        }
        let nb_packets = packets_for(size);
        let mut frames = Vec::with_capacity(nb_packets as usize + 1);
        let cm = cm_payload(
            CM_BAM,
            (size & 0xFF) as u8,
            (size >> 8) as u8,
            nb_packets,
            0xFF,
            msg.pgn,
        );
        frames.push(TimedFrame {
            msg: Nmea2000Msg::new(PGN_TP_CM, 7, msg.sa, ADDRESS_GLOBAL, cm),
            pacing: Duration::ZERO,
        });
        for seq in 1..=nb_packets {
            frames.push(TimedFrame {
                msg: Nmea2000Msg::new(
                    PGN_TP_DT,
                    7,
                    msg.sa,
                    ADDRESS_GLOBAL,
                    dt_payload(&msg.payload, seq),
                ),
                pacing: BAM_FRAME_PACING,
            });
        }
        Ok(frames)
    }

    /// Start a peer-to-peer (RTS/CTS) transfer. The data frames follow
    /// once the peer grants a window via [`Self::on_message`].
    pub fn start_rts(
        &mut self,
        msg: &Nmea2000Msg,
        now: Instant,
    ) -> Result<Vec<TpOutput>, TransportError> {
        let size = msg.payload.len();
        if !(9..=MAX_TP_LENGTH).contains(&size) {
            return Err(TransportError::BadSize(size));
        }
        let key = SessionKey {
            sa: msg.sa,
            da: msg.da,
            pgn: msg.pgn,
        };
        let mut out = Vec::new();
        if self.tx.remove(&key).is_some() {
            // only one session per (sa, da, pgn): abort the previous one
            out.push(self.abort_frame(key, AbortReason::Busy));
        }
        let nb_packets = packets_for(size);
        self.tx.insert(
            key,
            TxSession {
                state: TxState::AwaitingCts,
                priority: msg.priority,
                payload: msg.payload.clone(),
                nb_packets,
                deadline: now + T2_TX_CTS,
            },
        );
        let rts = cm_payload(
            CM_RTS,
            (size & 0xFF) as u8,
            (size >> 8) as u8,
            nb_packets,
            DEFAULT_WINDOW,
            msg.pgn,
        );
        out.push(TpOutput::Send(TimedFrame {
            msg: Nmea2000Msg::new(PGN_TP_CM, 7, msg.sa, msg.da, rts),
            pacing: Duration::ZERO,
        }));
        Ok(out)
    }

    /// Feed a TP.CM or TP.DT message. `local_addresses` lists the
    /// addresses this node answers for (CTS/EoMACK generation).
    pub fn on_message(
        &mut self,
        msg: &Nmea2000Msg,
        local_addresses: &[u8],
        now: Instant,
    ) -> Result<Vec<TpOutput>, TransportError> {
        match msg.pgn {
            PGN_TP_CM => self.on_tp_cm(msg, local_addresses, now),
            PGN_TP_DT => self.on_tp_dt(msg, local_addresses, now),
            _ => Ok(Vec::new()),
        }
    }

    fn on_tp_cm(
        &mut self,
        msg: &Nmea2000Msg,
        local_addresses: &[u8],
        now: Instant,
    ) -> Result<Vec<TpOutput>, TransportError> {
        if msg.payload.len() < 8 {
            return Err(TransportError::UnknownControl(0));
        }
        let control = msg.payload[0];
        let pgn = embedded_pgn(&msg.payload);
        let (pgn, _) = pgn_pdu1_adjust(pgn);
        match control {
            CM_BAM => {
                let total = usize::from(msg.payload[1]) | (usize::from(msg.payload[2]) << 8);
                if !(9..=MAX_TP_LENGTH).contains(&total) {
                    return Err(TransportError::BadSize(total));
                }
                let key = SessionKey {
                    sa: msg.sa,
                    da: ADDRESS_GLOBAL,
                    pgn,
                };
                debug!("transport: BAM from {} for PGN {} ({} bytes)", msg.sa, pgn, total);
                self.rx.insert(
                    key,
                    RxSession {
                        mode: RxMode::Bam,
                        priority: msg.priority,
                        total_size: total,
                        nb_packets: msg.payload[3],
                        next_seq: 1,
                        window_left: msg.payload[3],
                        buffer: vec![0; total],
                        deadline: now + T1_RX_PACKET,
                        started: now,
                    },
                );
                Ok(Vec::new())
            }
            CM_RTS => {
                if !local_addresses.contains(&msg.da) {
                    return Ok(Vec::new());
                }
                let total = usize::from(msg.payload[1]) | (usize::from(msg.payload[2]) << 8);
                if !(9..=MAX_TP_LENGTH).contains(&total) {
                    return Err(TransportError::BadSize(total));
                }
                let key = SessionKey {
                    sa: msg.sa,
                    da: msg.da,
                    pgn,
                };
                let mut out = Vec::new();
                if self.rx.remove(&key).is_some() {
                    warn!("transport: RTS while session active, aborting previous");
                    out.push(self.abort_frame_from(key.da, key.sa, pgn, AbortReason::Busy));
                }
                let nb_packets = msg.payload[3];
                let window = nb_packets.min(DEFAULT_WINDOW);
                self.rx.insert(
                    key,
                    RxSession {
                        mode: RxMode::Cts,
                        priority: msg.priority,
                        total_size: total,
                        nb_packets,
                        next_seq: 1,
                        window_left: window,
                        buffer: vec![0; total],
                        deadline: now + T4_RX_HOLD,
                        started: now,
                    },
                );
                let cts = cm_payload(CM_CTS, window, 1, 0xFF, 0xFF, pgn);
                out.push(TpOutput::Send(TimedFrame {
                    msg: Nmea2000Msg::new(PGN_TP_CM, 7, msg.da, msg.sa, cts),
                    pacing: Duration::ZERO,
                }));
                Ok(out)
            }
            CM_CTS => {
                let key = SessionKey {
                    sa: msg.da,
                    da: msg.sa,
                    pgn,
                };
                let session = match self.tx.get_mut(&key) {
                    Some(s) => s,
                    None => {
                        return Err(TransportError::NoSession {
                            sa: msg.sa,
                            da: msg.da,
                        })
                    }
                };
                let window = msg.payload[1];
                let next = msg.payload[2].max(1);
                if window == 0 {
                    // hold request: keep waiting for a real window
                    session.deadline = now + T2_TX_CTS;
                    return Ok(Vec::new());
                }
                let mut out = Vec::new();
                let last =
                    (u16::from(next) + u16::from(window) - 1).min(u16::from(session.nb_packets)) as u8;
                for seq in next..=last {
                    out.push(TpOutput::Send(TimedFrame {
                        msg: Nmea2000Msg::new(
                            PGN_TP_DT,
                            session.priority,
                            key.sa,
                            key.da,
                            dt_payload(&session.payload, seq),
                        ),
                        pacing: Duration::from_millis(10),
                    }));
                }
                session.state = if last >= session.nb_packets {
                    session.deadline = now + T3_TX_EOM;
                    TxState::AwaitingEom
                } else {
                    session.deadline = now + T2_TX_CTS;
                    TxState::AwaitingCts
                };
                Ok(out)
            }
            CM_EOM_ACK => {
                let key = SessionKey {
                    sa: msg.da,
                    da: msg.sa,
                    pgn,
                };
                if self.tx.remove(&key).is_none() {
                    return Err(TransportError::NoSession {
                        sa: msg.sa,
                        da: msg.da,
                    });
                }
                debug!("transport: transfer to {} for PGN {} acknowledged", msg.sa, pgn);
                Ok(Vec::new())
            }
            CM_ABORT => {
                let reason = AbortReason::from_code(msg.payload[1]);
                let rx_key = SessionKey {
                    sa: msg.sa,
                    da: msg.da,
                    pgn,
                };
                let tx_key = SessionKey {
                    sa: msg.da,
                    da: msg.sa,
                    pgn,
                };
                self.rx.remove(&rx_key);
                self.tx.remove(&tx_key);
                warn!("transport: abort from {} for PGN {} ({:?})", msg.sa, pgn, reason);
                Ok(Vec::new())
            }
            other => Err(TransportError::UnknownControl(other)),
        }
    }

    fn on_tp_dt(
        &mut self,
        msg: &Nmea2000Msg,
        _local_addresses: &[u8],
        now: Instant,
    ) -> Result<Vec<TpOutput>, TransportError> {
        if msg.payload.len() < 2 {
            return Err(TransportError::NoSession {
                sa: msg.sa,
                da: msg.da,
            });
        }
        // the session key depends on whether the transfer is broadcast
        let key = self
            .rx
            .keys()
            .find(|k| k.sa == msg.sa && (k.da == msg.da || k.da == ADDRESS_GLOBAL))
            .copied()
            .ok_or(TransportError::NoSession {
                sa: msg.sa,
                da: msg.da,
            })?;
        let session = match self.rx.get_mut(&key) {
            Some(session) => session,
            None => {
                return Err(TransportError::NoSession {
                    sa: msg.sa,
                    da: msg.da,
                })
            }
        };
        let seq = msg.payload[0];
        if seq != session.next_seq {
            // packet loss aborts the session
            let mode = session.mode == RxMode::Cts;
            self.rx.remove(&key);
            self.timeouts += 1;
            let mut out = Vec::new();
            if mode {
                out.push(self.abort_frame_from(key.da, key.sa, key.pgn, AbortReason::Timeout));
            }
            return Ok(out);
        }
        let offset = (usize::from(seq) - 1) * 7;
        let take = (session.total_size - offset).min(7);
        session.buffer[offset..offset + take].copy_from_slice(&msg.payload[1..1 + take]);
        session.next_seq += 1;
        session.window_left = session.window_left.saturating_sub(1);
        session.deadline = now + T1_RX_PACKET;

        let mut out = Vec::new();
        if usize::from(session.next_seq) > usize::from(session.nb_packets) {
            let Some(session) = self.rx.remove(&key) else {
                return Ok(out);
            };
            let complete = Nmea2000Msg::new(
                key.pgn,
                session.priority,
                key.sa,
                key.da,
                session.buffer,
            );
            debug!(
                "transport: completed PGN {} from {} ({} bytes)",
                key.pgn, key.sa, session.total_size
            );
            if session.mode == RxMode::Cts {
                let eom = cm_payload(
                    CM_EOM_ACK,
                    (session.total_size & 0xFF) as u8,
                    (session.total_size >> 8) as u8,
                    session.nb_packets,
                    0xFF,
                    key.pgn,
                );
                out.push(TpOutput::Send(TimedFrame {
                    msg: Nmea2000Msg::new(PGN_TP_CM, 7, key.da, key.sa, eom),
                    pacing: Duration::ZERO,
                }));
            }
            out.push(TpOutput::Complete(complete));
        } else if session.mode == RxMode::Cts && session.window_left == 0 {
            let window = (session.nb_packets - session.next_seq + 1).min(DEFAULT_WINDOW);
            session.window_left = window;
            session.deadline = now + T4_RX_HOLD;
            let cts = cm_payload(CM_CTS, window, session.next_seq, 0xFF, 0xFF, key.pgn);
            out.push(TpOutput::Send(TimedFrame {
                msg: Nmea2000Msg::new(PGN_TP_CM, 7, key.da, key.sa, cts),
                pacing: Duration::ZERO,
            }));
        }
        Ok(out)
    }

    /// Abort expired sessions. Returns the abort frames to transmit for
    /// peer-to-peer sessions; broadcast sessions expire silently.
    pub fn tick(&mut self, now: Instant) -> Vec<TpOutput> {
        let mut out = Vec::new();
        let expired_rx: Vec<SessionKey> = self
            .rx
            .iter()
            .filter(|(_, s)| s.deadline <= now)
            .map(|(k, _)| *k)
            .collect();
        for key in expired_rx {
            let Some(session) = self.rx.remove(&key) else {
                continue;
            };
            warn!(
                "transport: receive timeout for PGN {} from {} after {:?}",
                key.pgn,
                key.sa,
                now - session.started
            );
            self.timeouts += 1;
            if session.mode == RxMode::Cts {
                out.push(self.abort_frame_from(key.da, key.sa, key.pgn, AbortReason::Timeout));
            }
        }
        let expired_tx: Vec<SessionKey> = self
            .tx
            .iter()
            .filter(|(_, s)| s.deadline <= now)
            .map(|(k, _)| *k)
            .collect();
        for key in expired_tx {
            self.tx.remove(&key);
            warn!("transport: send timeout for PGN {} to {}", key.pgn, key.da);
            self.timeouts += 1;
            out.push(self.abort_frame(key, AbortReason::Timeout));
        }
        out
    }

    fn abort_frame(&self, key: SessionKey, reason: AbortReason) -> TpOutput {
        self.abort_frame_from(key.sa, key.da, key.pgn, reason)
    }

    fn abort_frame_from(&self, sa: u8, da: u8, pgn: u32, reason: AbortReason) -> TpOutput {
        let payload = cm_payload(CM_ABORT, reason.code(), 0xFF, 0xFF, 0xFF, pgn);
        TpOutput::Send(TimedFrame {
            msg: Nmea2000Msg::new(PGN_TP_CM, 7, sa, da, payload),
            pacing: Duration::ZERO,
        })
    }
}

fn dt_payload(payload: &[u8], seq: u8) -> Vec<u8> {
    let offset = (usize::from(seq) - 1) * 7;
    let take = (payload.len() - offset).min(7);
    let mut data = vec![0xFFu8; 8];
    data[0] = seq;
    data[1..1 + take].copy_from_slice(&payload[offset..offset + take]);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_bam(payload_len: usize) -> Nmea2000Msg {
        let payload: Vec<u8> = (0..payload_len).map(|i| (i % 251) as u8).collect();
        let msg = Nmea2000Msg::new(129540, 6, 0x20, ADDRESS_GLOBAL, payload);
        let mut sender = IsoTransportHandler::new();
        let mut receiver = IsoTransportHandler::new();
        let now = Instant::now();
        let frames = sender.start_bam(&msg).unwrap();
        let mut complete = None;
        for frame in frames {
            for output in receiver.on_message(&frame.msg, &[0x10], now).unwrap() {
                if let TpOutput::Complete(m) = output {
                    complete = Some(m);
                }
            }
        }
        complete.expect("BAM transfer did not complete")
    }

    #[test]
    fn test_bam_roundtrip_sizes() {
        for len in [9usize, 100, 223, 500, 1785] {
            let received = run_bam(len);
            assert_eq!(received.payload.len(), len, "size {len}");
            let expected: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(received.payload, expected);
            assert_eq!(received.pgn, 129540);
            assert_eq!(received.sa, 0x20);
        }
    }

    #[test]
    fn test_bam_frame_count_and_pacing() {
        let payload = vec![0x55u8; 100];
        let msg = Nmea2000Msg::new(129540, 6, 0x20, ADDRESS_GLOBAL, payload);
        let mut sender = IsoTransportHandler::new();
        let frames = sender.start_bam(&msg).unwrap();
        // 1 TP.CM + ceil(100 / 7) = 15 TP.DT
        assert_eq!(frames.len(), 16);
        assert_eq!(frames[0].msg.pgn, PGN_TP_CM);
        assert_eq!(frames[0].pacing, Duration::ZERO);
        assert!(frames[1..]
            .iter()
            .all(|f| f.msg.pgn == PGN_TP_DT && f.pacing == BAM_FRAME_PACING));
    }

    #[test]
    fn test_bam_dropped_packet_times_out() {
        let payload = vec![0x55u8; 100];
        let msg = Nmea2000Msg::new(129540, 6, 0x20, ADDRESS_GLOBAL, payload);
        let mut sender = IsoTransportHandler::new();
        let mut receiver = IsoTransportHandler::new();
        let now = Instant::now();
        let frames = sender.start_bam(&msg).unwrap();
        // drop packet 7 (frame index 7: TP.CM is index 0)
        for (i, frame) in frames.iter().enumerate() {
            if i == 7 {
                continue;
            }
            if i > 7 {
                break;
            }
            receiver.on_message(&frame.msg, &[0x10], now).unwrap();
        }
        assert_eq!(receiver.open_sessions(), 1);
        // 750 ms after the last received frame the session dies
        assert!(receiver.tick(now + Duration::from_millis(700)).is_empty());
        receiver.tick(now + Duration::from_millis(800));
        assert_eq!(receiver.open_sessions(), 0);
        assert_eq!(receiver.timeout_count(), 1);
    }

    #[test]
    fn test_rts_cts_roundtrip() {
        let payload: Vec<u8> = (0..500).map(|i| (i % 251) as u8).collect();
        let msg = Nmea2000Msg::new(126996, 6, 0x20, 0x10, payload.clone());
        let mut sender = IsoTransportHandler::new();
        let mut receiver = IsoTransportHandler::new();
        let now = Instant::now();

        // frames in flight in either direction
        let mut to_receiver: Vec<Nmea2000Msg> = sender
            .start_rts(&msg, now)
            .unwrap()
            .into_iter()
            .filter_map(|o| match o {
                TpOutput::Send(f) => Some(f.msg),
                _ => None,
            })
            .collect();
        let mut complete = None;
        let mut rounds = 0;
        while !to_receiver.is_empty() {
            rounds += 1;
            assert!(rounds < 100, "transfer did not converge");
            let mut to_sender = Vec::new();
            for m in to_receiver.drain(..) {
                for output in receiver.on_message(&m, &[0x10], now).unwrap() {
                    match output {
                        TpOutput::Send(f) => to_sender.push(f.msg),
                        TpOutput::Complete(m) => complete = Some(m),
                    }
                }
            }
            for m in to_sender {
                for output in sender.on_message(&m, &[0x20], now).unwrap() {
                    if let TpOutput::Send(f) = output {
                        to_receiver.push(f.msg);
                    }
                }
            }
        }
        let received = complete.expect("RTS/CTS transfer did not complete");
        assert_eq!(received.payload, payload);
        assert_eq!(received.da, 0x10);
        // both sides idle afterwards
        assert_eq!(sender.open_sessions(), 0);
        assert_eq!(receiver.open_sessions(), 0);
    }

    #[test]
    fn test_new_rts_aborts_active_session() {
        let payload = vec![0u8; 100];
        let msg = Nmea2000Msg::new(126996, 6, 0x20, 0x10, payload);
        let mut receiver = IsoTransportHandler::new();
        let now = Instant::now();
        let rts = cm_payload(CM_RTS, 100, 0, 15, DEFAULT_WINDOW, 126996);
        let rts_msg = Nmea2000Msg::new(PGN_TP_CM, 7, msg.sa, msg.da, rts);
        let first = receiver.on_message(&rts_msg, &[0x10], now).unwrap();
        assert_eq!(first.len(), 1); // the CTS
        let second = receiver.on_message(&rts_msg, &[0x10], now).unwrap();
        // abort (busy) for the old session plus a fresh CTS
        assert_eq!(second.len(), 2);
        match &second[0] {
            TpOutput::Send(f) => {
                assert_eq!(f.msg.payload[0], CM_ABORT);
                assert_eq!(f.msg.payload[1], AbortReason::Busy.code());
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn test_sender_cts_timeout() {
        let payload = vec![0u8; 100];
        let msg = Nmea2000Msg::new(126996, 6, 0x20, 0x10, payload);
        let mut sender = IsoTransportHandler::new();
        let now = Instant::now();
        sender.start_rts(&msg, now).unwrap();
        assert!(sender.tick(now + Duration::from_millis(1000)).is_empty());
        let out = sender.tick(now + Duration::from_millis(1300));
        assert_eq!(out.len(), 1);
        assert_eq!(sender.open_sessions(), 0);
        assert_eq!(sender.timeout_count(), 1);
    }

    #[test]
    fn test_size_limits() {
        let mut handler = IsoTransportHandler::new();
        let small = Nmea2000Msg::new(126996, 6, 0x20, 255, vec![0; 8]);
        assert!(handler.start_bam(&small).is_err());
        let huge = Nmea2000Msg::new(126996, 6, 0x20, 255, vec![0; 1786]);
        assert!(handler.start_bam(&huge).is_err());
    }
}
