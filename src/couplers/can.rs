//! Direct CAN bus coupler over SocketCAN. This driver owns the bus
//! side of the protocol stack: frame classification, fast packet
//! reassembly and segmentation, ISO transport sessions, the device
//! table and the local controller applications.

use std::sync::Arc;
use std::time::{Duration, Instant};

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Socket};
use tracing::{debug, info, warn};

use nmea2k::iso_transport::{PGN_TP_CM, PGN_TP_DT};
use nmea2k::{
    ControllerApplication, DeviceTable, Dictionary, FastPacketAssembler, FastPacketSplitter,
    Identifier, IsoTransportHandler, Nmea2000Msg, TimedFrame, TpOutput, MAX_PDU_LENGTH,
};

use crate::config::CouplerConfig;
use crate::coupler::{Coupler, CouplerError, Direction};
use crate::envelope::{now_ms, Envelope};
use crate::stats::CouplerStats;

/// Minimum spacing between two frames written to the bus.
const MIN_FRAME_SPACING: Duration = Duration::from_millis(5);

pub struct SocketCanCoupler {
    name: String,
    interface: String,
    timeout: Duration,
    direction: Direction,
    socket: Option<CanSocket>,
    dictionary: Arc<Dictionary>,
    stats: Arc<CouplerStats>,
    fast_packet: FastPacketAssembler,
    splitter: FastPacketSplitter,
    transport: IsoTransportHandler,
    devices: DeviceTable,
    applications: Vec<ControllerApplication>,
    last_write: Instant,
}

impl SocketCanCoupler {
    pub fn new(
        config: &CouplerConfig,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            interface: config.interface.clone(),
            timeout: config.timeout(),
            direction: Direction::parse(&config.direction),
            socket: None,
            dictionary,
            stats,
            fast_packet: FastPacketAssembler::new(),
            splitter: FastPacketSplitter::new(),
            transport: IsoTransportHandler::new(),
            devices: DeviceTable::default(),
            applications: Vec::new(),
            last_write: Instant::now(),
        }
    }

    /// Attach the local controller applications. They come online when
    /// the coupler opens.
    pub fn with_applications(mut self, applications: Vec<ControllerApplication>) -> Self {
        self.applications = applications;
        self
    }

    /// Device table view, for the console surface.
    #[allow(dead_code)]
    pub fn device_table(&self) -> &DeviceTable {
        &self.devices
    }

    fn local_addresses(&self) -> Vec<u8> {
        self.applications
            .iter()
            .filter(|a| a.is_claimed())
            .map(|a| a.address())
            .collect()
    }

    /// Write one frame, respecting the minimum inter-frame spacing and
    /// any extra pacing the transport layer asks for.
    fn write_frame(&mut self, msg: &Nmea2000Msg, pacing: Duration) -> Result<(), CouplerError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| CouplerError::Write("bus not open".to_string()))?;
        let spacing = MIN_FRAME_SPACING.max(pacing);
        let since_last = self.last_write.elapsed();
        if since_last < spacing {
            std::thread::sleep(spacing - since_last);
        }
        let id = Identifier::build(msg.pgn, msg.priority, msg.sa, msg.da)
            .map_err(|e| CouplerError::Unsendable(e.to_string()))?;
        if msg.payload.len() > 8 {
            return Err(CouplerError::Unsendable(format!(
                "frame payload of {} bytes",
                msg.payload.len()
            )));
        }
        let ext_id = ExtendedId::new(id.as_raw())
            .ok_or_else(|| CouplerError::Unsendable("CAN id out of range".to_string()))?;
        let frame = CanFrame::new(ext_id, &msg.payload)
            .ok_or_else(|| CouplerError::Unsendable("frame construction failed".to_string()))?;
        socket
            .write_frame(&frame)
            .map_err(|e| CouplerError::Write(e.to_string()))?;
        self.last_write = Instant::now();
        self.stats.count_sent();
        Ok(())
    }

    fn write_timed_frames(&mut self, frames: Vec<TimedFrame>) {
        for TimedFrame { msg, pacing } in frames {
            if let Err(e) = self.write_frame(&msg, pacing) {
                warn!("coupler {}: bus write failed: {}", self.name, e);
                return;
            }
        }
    }

    fn write_messages(&mut self, messages: Vec<Nmea2000Msg>) {
        for msg in messages {
            // responses over 8 bytes (product information) go through
            // the transport or fast packet layer like any other send
            if let Err(e) = self.send_n2k(&msg) {
                warn!("coupler {}: bus write failed: {}", self.name, e);
            }
        }
    }

    /// Segment and write one complete NMEA2000 message.
    fn send_n2k(&mut self, msg: &Nmea2000Msg) -> Result<(), CouplerError> {
        if msg.payload.len() > MAX_PDU_LENGTH {
            let frames = self
                .transport
                .start_bam(msg)
                .map_err(|e| CouplerError::Unsendable(e.to_string()))?;
            self.write_timed_frames(frames);
            return Ok(());
        }
        if self.dictionary.is_fast_packet(msg.pgn) || msg.is_fast_packet() {
            let frames = self
                .splitter
                .split(msg.pgn, msg.sa, &msg.payload)
                .map_err(|e| CouplerError::Unsendable(e.to_string()))?;
            for frame in frames {
                let mut frame_msg = msg.clone();
                frame_msg.payload = frame.to_vec();
                self.write_frame(&frame_msg, Duration::ZERO)?;
            }
            return Ok(());
        }
        self.write_frame(msg, Duration::ZERO)
    }

    /// Route one received message through the management layers and
    /// decide whether it becomes an envelope for the router.
    fn process_message(&mut self, msg: Nmea2000Msg, now: Instant) -> Option<Envelope> {
        // transport sessions first: TP.CM/TP.DT never reach the router
        // as frames
        if msg.pgn == PGN_TP_CM || msg.pgn == PGN_TP_DT {
            let local = self.local_addresses();
            match self.transport.on_message(&msg, &local, now) {
                Ok(outputs) => {
                    let mut complete = None;
                    for output in outputs {
                        match output {
                            TpOutput::Send(frame) => self.write_timed_frames(vec![frame]),
                            TpOutput::Complete(m) => complete = Some(m),
                        }
                    }
                    let complete = complete?.with_timestamp(now_ms());
                    return self.deliver(complete, now);
                }
                Err(e) => {
                    debug!("coupler {}: transport: {}", self.name, e);
                    self.stats.count_error();
                    return None;
                }
            }
        }

        // fast packet PGNs are reassembled before anything looks at them
        if self.dictionary.is_fast_packet(msg.pgn) && msg.payload.len() == 8 {
            match self.fast_packet.process_frame(msg.pgn, msg.sa, &msg.payload, now) {
                Ok(Some(payload)) => {
                    let mut complete = msg;
                    complete.payload = payload;
                    return self.deliver(complete, now);
                }
                Ok(None) => return None,
                Err(e) => {
                    debug!("coupler {}: fast packet: {}", self.name, e);
                    self.stats.count_error();
                    return None;
                }
            }
        }

        self.deliver(msg, now)
    }

    /// Hand a complete message to the device table and the local
    /// applications, then wrap it for the router.
    fn deliver(&mut self, msg: Nmea2000Msg, now: Instant) -> Option<Envelope> {
        self.devices.observe(&msg, now);
        if msg.is_service() {
            let mut responses = Vec::new();
            for app in &mut self.applications {
                responses.extend(app.on_message(&msg, now));
            }
            self.write_messages(responses);
        }
        self.stats.count_message();
        Some(Envelope::from_n2k(msg))
    }
}

impl Coupler for SocketCanCoupler {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn open(&mut self) -> Result<(), CouplerError> {
        let socket = CanSocket::open(&self.interface)
            .map_err(|e| CouplerError::Open(format!("{}: {}", self.interface, e)))?;
        socket
            .set_read_timeout(self.timeout.min(Duration::from_millis(500)))
            .map_err(|e| CouplerError::Open(e.to_string()))?;
        info!("coupler {}: opened CAN interface {}", self.name, self.interface);
        self.socket = Some(socket);
        // bring the local applications online
        let now = Instant::now();
        let mut claims = Vec::new();
        for app in &mut self.applications {
            claims.extend(app.start(now));
        }
        for claim in claims {
            self.write_frame(&claim, Duration::ZERO)?;
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Envelope>, CouplerError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| CouplerError::Read("bus not open".to_string()))?;
        let frame = match socket.read_frame() {
            Ok(frame) => frame,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(Vec::new())
            }
            Err(e) => {
                self.socket = None;
                return Err(CouplerError::Read(e.to_string()));
            }
        };
        self.stats.count_raw();
        let raw_id = match frame.id() {
            socketcan::Id::Extended(id) => id.as_raw(),
            socketcan::Id::Standard(_) => {
                // 11-bit frames are not NMEA2000 traffic
                return Ok(Vec::new());
            }
        };
        let id = Identifier::from_can_id(raw_id);
        let msg = Nmea2000Msg::new(
            id.pgn(),
            id.priority(),
            id.source(),
            id.destination(),
            frame.data().to_vec(),
        )
        .with_timestamp(now_ms());
        Ok(self.process_message(msg, Instant::now()).into_iter().collect())
    }

    fn send(&mut self, envelope: &Envelope) -> Result<(), CouplerError> {
        if !self.direction.writable() {
            return Err(CouplerError::ReadOnly);
        }
        let msg = envelope
            .n2k()
            .ok_or_else(|| CouplerError::Unsendable("not an NMEA2000 envelope".to_string()))?;
        // outgoing traffic uses the claimed address of the first
        // active application
        let mut out = msg.clone();
        if let Some(address) = self.local_addresses().first() {
            out.sa = *address;
        }
        self.send_n2k(&out)
    }

    fn tick(&mut self) -> Vec<Envelope> {
        let now = Instant::now();
        self.fast_packet.expire(now);
        let aborts = self.transport.tick(now);
        for output in aborts {
            if let TpOutput::Send(frame) = output {
                self.write_timed_frames(vec![frame]);
            }
        }
        let mut responses = Vec::new();
        for app in &mut self.applications {
            responses.extend(app.tick(now));
        }
        self.write_messages(responses);
        self.devices.expire(now);
        Vec::new()
    }

    fn close(&mut self) {
        self.socket = None;
        info!("coupler {}: closed", self.name);
    }
}
