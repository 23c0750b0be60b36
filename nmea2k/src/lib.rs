//! NMEA2000 / SAE J1939 protocol stack.
//!
//! This library implements the protocol layers of an NMEA2000 node,
//! free of any I/O so every state machine is driven by injected
//! timestamps and unit testable:
//! - 29-bit CAN identifier classification (PDU1/PDU2)
//! - fast packet reassembly and segmentation
//! - ISO J1939/21 transport (BAM and RTS/CTS) for PDUs up to 1785 bytes
//! - address claim state machine and the bus device table
//! - the XML driven PGN dictionary and its bit-level field codec
//! - typed records for a navigation subset of PGNs
//!
//! # Example
//!
//! ```no_run
//! use nmea2k::{FastPacketAssembler, Identifier};
//! use std::time::Instant;
//!
//! let mut assembler = FastPacketAssembler::new();
//! let id = Identifier::from_can_id(0x09F80503);
//! let frame = [0x00, 43, 1, 2, 3, 4, 5, 6];
//! if let Ok(Some(payload)) =
//!     assembler.process_frame(id.pgn(), id.source(), &frame, Instant::now())
//! {
//!     println!("PGN {} payload {} bytes", id.pgn(), payload.len());
//! }
//! ```

pub mod claim;
pub mod codec;
pub mod device;
pub mod dictionary;
pub mod error;
pub mod fast_packet;
pub mod identifier;
pub mod iso_messages;
pub mod iso_transport;
pub mod message;
pub mod name;
pub mod pgns;

pub use claim::{AddressPool, CaState, ControllerApplication};
pub use codec::{decode_pgn, encode_pgn, DecodedPgn, FieldValue};
pub use device::{DeviceEvent, DeviceRecord, DeviceTable};
pub use dictionary::{Dictionary, FieldKind, PgnDescriptor};
pub use error::{
    CodecError, DictionaryError, FastPacketError, FrameError, IsoMessageError, TransportError,
};
pub use fast_packet::{FastPacketAssembler, FastPacketSplitter};
pub use identifier::{Identifier, ADDRESS_GLOBAL, ADDRESS_NULL};
pub use iso_transport::{IsoTransportHandler, TimedFrame, TpOutput};
pub use message::{Nmea2000Msg, MAX_PDU_LENGTH};
pub use name::IsoName;
pub use pgns::N2kData;
