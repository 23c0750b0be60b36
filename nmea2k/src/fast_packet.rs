//! Fast packet transport: reassembly of received multi-frame PGNs and
//! segmentation of outgoing payloads across the 8-byte CAN boundary.
//!
//! Frame layout: byte 0 carries the 3-bit sequence counter in the high
//! nibble and the 5-bit frame index in the low bits. Frame 0 additionally
//! carries the total payload length in byte 1 and 6 data bytes; frames
//! 1..31 carry 7 data bytes each.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::FastPacketError;
use crate::message::MAX_PDU_LENGTH;

/// A sequence is abandoned when no frame arrived for this long.
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(250);

/// Reassembly key: one sequence is identified by source, PGN and the
/// 3-bit sequence counter of the super frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    sa: u8,
    pgn: u32,
    seq: u8,
}

#[derive(Debug)]
struct Session {
    declared_len: usize,
    buffer: Vec<u8>,
    next_index: u8,
    deadline: Instant,
}

/// Reassembles fast packet sequences for one coupler.
///
/// Frames must be fed in bus order per source; an out-of-order or
/// duplicate frame discards the whole sequence, which is then counted
/// as a drop.
#[derive(Debug, Default)]
pub struct FastPacketAssembler {
    sessions: HashMap<SessionKey, Session>,
    drops: u64,
}

impl FastPacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequences dropped because of gaps, restarts or timeouts.
    pub fn drop_count(&self) -> u64 {
        self.drops
    }

    /// Number of sequences currently being reassembled.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Feed one 8-byte frame of a fast packet PGN.
    ///
    /// Returns the complete payload once the declared length has been
    /// accumulated, `None` while the sequence is still open.
    pub fn process_frame(
        &mut self,
        pgn: u32,
        sa: u8,
        frame: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, FastPacketError> {
        let seq = (frame[0] >> 5) & 0x07;
        let index = frame[0] & 0x1F;
        let key = SessionKey { sa, pgn, seq };

        if index == 0 {
            let declared_len = frame[1] as usize;
            if !(1..=MAX_PDU_LENGTH).contains(&declared_len) {
                return Err(FastPacketError::BadLength(declared_len));
            }
            if self.sessions.remove(&key).is_some() {
                // a restarted sequence abandons the one in progress
                debug!("fast packet: sequence restart for PGN {} sa {}", pgn, sa);
                self.drops += 1;
            }
            let mut buffer = Vec::with_capacity(declared_len);
            buffer.extend_from_slice(&frame[2..frame.len().min(8)]);
            if buffer.len() >= declared_len {
                buffer.truncate(declared_len);
                return Ok(Some(buffer));
            }
            self.sessions.insert(
                key,
                Session {
                    declared_len,
                    buffer,
                    next_index: 1,
                    deadline: now + SESSION_TIMEOUT,
                },
            );
            return Ok(None);
        }

        let session = match self.sessions.get_mut(&key) {
            Some(s) => s,
            None => return Err(FastPacketError::NoSession { pgn, sa }),
        };
        if index != session.next_index {
            self.sessions.remove(&key);
            self.drops += 1;
            return Err(FastPacketError::OutOfOrder { pgn, sa, index });
        }
        session.next_index += 1;
        session.deadline = now + SESSION_TIMEOUT;
        session
            .buffer
            .extend_from_slice(&frame[1..frame.len().min(8)]);
        if session.buffer.len() >= session.declared_len {
            let declared_len = session.declared_len;
            let mut buffer = std::mem::take(&mut session.buffer);
            self.sessions.remove(&key);
            buffer.truncate(declared_len);
            debug!(
                "fast packet: completed PGN {} sa {} ({} bytes)",
                pgn, sa, declared_len
            );
            return Ok(Some(buffer));
        }
        Ok(None)
    }

    /// Discard sequences whose deadline has passed. Returns the number
    /// of sequences dropped by this pass.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|key, session| {
            let keep = session.deadline > now;
            if !keep {
                warn!(
                    "fast packet: reassembly timeout for PGN {} sa {}",
                    key.pgn, key.sa
                );
            }
            keep
        });
        let dropped = before - self.sessions.len();
        self.drops += dropped as u64;
        dropped
    }

    /// Drop every open sequence, e.g. on a coupler protocol mode change.
    pub fn reset(&mut self) {
        self.drops += self.sessions.len() as u64;
        self.sessions.clear();
    }
}

/// Splits outgoing payloads into fast packet frames. The 3-bit sequence
/// counter rolls per (PGN, source address).
#[derive(Debug, Default)]
pub struct FastPacketSplitter {
    counters: HashMap<(u32, u8), u8>,
}

impl FastPacketSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the 8-byte frames carrying `payload`. Unused trailing
    /// bytes of the last frame are padded with 0xFF.
    pub fn split(
        &mut self,
        pgn: u32,
        sa: u8,
        payload: &[u8],
    ) -> Result<Vec<[u8; 8]>, FastPacketError> {
        if payload.len() > MAX_PDU_LENGTH {
            return Err(FastPacketError::SplitTooLong(payload.len()));
        }
        let counter = self.counters.entry((pgn, sa)).or_insert(0);
        let seq = *counter;
        *counter = (*counter + 1) & 0x07;

        let mut frames = Vec::new();
        let mut offset = 0usize;
        let mut index = 0u8;
        while offset < payload.len() || index == 0 {
            let mut frame = [0xFFu8; 8];
            frame[0] = (seq << 5) | index;
            let data_start = if index == 0 {
                frame[1] = payload.len() as u8;
                2
            } else {
                1
            };
            let take = (payload.len() - offset).min(8 - data_start);
            frame[data_start..data_start + take].copy_from_slice(&payload[offset..offset + take]);
            offset += take;
            frames.push(frame);
            index += 1;
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn test_segment_then_reassemble_is_identity() {
        let mut splitter = FastPacketSplitter::new();
        let mut assembler = FastPacketAssembler::new();
        for len in [1usize, 6, 7, 43, 100, 223] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frames = splitter.split(129029, 0x82, &payload).unwrap();
            let mut result = None;
            for frame in &frames {
                result = assembler.process_frame(129029, 0x82, frame, now()).unwrap();
            }
            assert_eq!(result.as_deref(), Some(payload.as_slice()), "len {len}");
        }
        assert_eq!(assembler.drop_count(), 0);
    }

    #[test]
    fn test_frame_count_and_layout() {
        let mut splitter = FastPacketSplitter::new();
        // 43 bytes: 6 in frame 0, then 37 / 7 -> 6 more frames
        let payload = vec![0xAB; 43];
        let frames = splitter.split(129029, 3, &payload).unwrap();
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0][0] & 0x1F, 0);
        assert_eq!(frames[0][1], 43);
        assert_eq!(frames[6][0] & 0x1F, 6);
        // last frame carries 37 - 5 * 7 = 2 bytes, rest padded
        assert_eq!(frames[6][1], 0xAB);
        assert_eq!(frames[6][2], 0xAB);
        assert!(frames[6][3..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_sequence_counter_rolls() {
        let mut splitter = FastPacketSplitter::new();
        let payload = vec![0u8; 20];
        for expected_seq in [0u8, 1, 2, 3, 4, 5, 6, 7, 0] {
            let frames = splitter.split(129029, 3, &payload).unwrap();
            assert_eq!((frames[0][0] >> 5) & 0x07, expected_seq);
        }
    }

    #[test]
    fn test_missing_frame_drops_sequence() {
        let mut splitter = FastPacketSplitter::new();
        let mut assembler = FastPacketAssembler::new();
        let payload: Vec<u8> = (0..43).collect();
        let frames = splitter.split(129029, 0x82, &payload).unwrap();
        assembler
            .process_frame(129029, 0x82, &frames[0], now())
            .unwrap();
        assembler
            .process_frame(129029, 0x82, &frames[1], now())
            .unwrap();
        // frame 2 lost, frame 3 arrives
        let result = assembler.process_frame(129029, 0x82, &frames[3], now());
        assert_eq!(
            result,
            Err(FastPacketError::OutOfOrder {
                pgn: 129029,
                sa: 0x82,
                index: 3
            })
        );
        assert_eq!(assembler.drop_count(), 1);
        assert_eq!(assembler.open_sessions(), 0);
    }

    #[test]
    fn test_restart_discards_previous_sequence() {
        let mut assembler = FastPacketAssembler::new();
        let mut frame0 = [0xFFu8; 8];
        frame0[0] = 0x20; // seq 1, index 0
        frame0[1] = 20;
        assembler.process_frame(129540, 9, &frame0, now()).unwrap();
        assert_eq!(assembler.open_sessions(), 1);
        // same key starts over
        assembler.process_frame(129540, 9, &frame0, now()).unwrap();
        assert_eq!(assembler.open_sessions(), 1);
        assert_eq!(assembler.drop_count(), 1);
    }

    #[test]
    fn test_session_expiry() {
        let mut assembler = FastPacketAssembler::new();
        let start = now();
        let mut frame0 = [0xFFu8; 8];
        frame0[0] = 0x00;
        frame0[1] = 50;
        assembler.process_frame(129029, 7, &frame0, start).unwrap();
        assert_eq!(assembler.expire(start + Duration::from_millis(100)), 0);
        assert_eq!(assembler.expire(start + Duration::from_millis(300)), 1);
        assert_eq!(assembler.open_sessions(), 0);
        assert_eq!(assembler.drop_count(), 1);
    }

    #[test]
    fn test_continuation_without_session() {
        let mut assembler = FastPacketAssembler::new();
        let mut frame = [0xFFu8; 8];
        frame[0] = 0x01;
        assert_eq!(
            assembler.process_frame(129029, 7, &frame, now()),
            Err(FastPacketError::NoSession { pgn: 129029, sa: 7 })
        );
    }

    #[test]
    fn test_parallel_sources_do_not_interfere() {
        let mut splitter = FastPacketSplitter::new();
        let mut assembler = FastPacketAssembler::new();
        let pa: Vec<u8> = (0..30).collect();
        let pb: Vec<u8> = (100..130).collect();
        let fa = splitter.split(129029, 1, &pa).unwrap();
        let fb = splitter.split(129029, 2, &pb).unwrap();
        // interleave the two sources
        let mut ra = None;
        let mut rb = None;
        for (a, b) in fa.iter().zip(fb.iter()) {
            ra = assembler.process_frame(129029, 1, a, now()).unwrap();
            rb = assembler.process_frame(129029, 2, b, now()).unwrap();
        }
        assert_eq!(ra.unwrap(), pa);
        assert_eq!(rb.unwrap(), pb);
    }
}
