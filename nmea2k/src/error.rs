use thiserror::Error;

/// Errors raised while classifying or building CAN frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("PGN {0} is not valid for transmission")]
    InvalidPgn(u32),
    #[error("PGN {pgn} is broadcast (PDU2) and cannot be sent to address {da}")]
    InvalidDestination { pgn: u32, da: u8 },
    #[error("CAN frame payload exceeds 8 bytes: {0}")]
    PayloadTooLong(usize),
}

/// Fatal errors while loading the PGN dictionary. Raised at startup only.
#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("cannot read dictionary file: {0}")]
    Io(#[from] std::io::Error),
    #[error("dictionary XML parse error: {0}")]
    Xml(String),
    #[error("PGN {pgn} field '{field}': unknown field kind '{kind}'")]
    UnknownFieldKind { pgn: u32, field: String, kind: String },
    #[error("PGN {pgn} field '{field}' overlaps the preceding field")]
    FieldOverlap { pgn: u32, field: String },
    #[error("duplicate definition for PGN {0}")]
    DuplicatePgn(u32),
    #[error("PGN {pgn} repeated group references unknown count field '{key}'")]
    BadRepeatCount { pgn: u32, key: String },
}

/// Per-field codec errors. Decode errors are recovered by the caller and
/// counted; encode errors propagate.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("field '{field}' extends past end of payload ({end} > {len})")]
    PastEnd { field: String, end: usize, len: usize },
    #[error("field '{field}': value {value} does not fit in {bits} bits")]
    Overflow { field: String, value: i64, bits: u32 },
    #[error("field '{field}': scaled value {value} out of range")]
    OutOfRange { field: String, value: f64 },
    #[error("field '{field}': invalid string encoding byte {encoding:#04x}")]
    BadStringEncoding { field: String, encoding: u8 },
    #[error("payload too short for PGN {pgn}: {len} < {expected}")]
    ShortPayload { pgn: u32, len: usize, expected: usize },
}

/// Fast packet reassembly problems, counted per coupler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FastPacketError {
    #[error("frame {index} out of order for PGN {pgn} from {sa}, sequence discarded")]
    OutOfOrder { pgn: u32, sa: u8, index: u8 },
    #[error("continuation frame without an open sequence for PGN {pgn} from {sa}")]
    NoSession { pgn: u32, sa: u8 },
    #[error("declared length {0} outside 9..=223")]
    BadLength(usize),
    #[error("payload of {0} bytes cannot be carried by fast packet")]
    SplitTooLong(usize),
}

/// ISO transport (J1939/21) session failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("TP.CM with unknown control byte {0}")]
    UnknownControl(u8),
    #[error("TP.DT without an open session from {sa} to {da}")]
    NoSession { sa: u8, da: u8 },
    #[error("declared size {0} outside 9..=1785")]
    BadSize(usize),
    #[error("session from {sa} aborted, reason {reason:?}")]
    Aborted { sa: u8, reason: crate::iso_transport::AbortReason },
}

/// Typed ISO/product message decode failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IsoMessageError {
    #[error("PGN mismatch: expected {expected}, message carries {actual}")]
    WrongPgn { expected: u32, actual: u32 },
    #[error("payload too short: {0} bytes")]
    ShortPayload(usize),
    #[error("unsupported group function {0}")]
    UnsupportedFunction(u8),
}
