//! Typed records for the ISO and network management PGNs handled by the
//! controller: address claim, ISO request, commanded address, product
//! and configuration information, heartbeat, PGN list and the group
//! function subset.

use crate::error::IsoMessageError;
use crate::identifier::ADDRESS_GLOBAL;
use crate::message::Nmea2000Msg;
use crate::name::IsoName;

pub const PGN_ISO_ACK: u32 = 59392;
pub const PGN_ISO_REQUEST: u32 = 59904;
pub const PGN_ADDRESS_CLAIM: u32 = 60928;
pub const PGN_COMMANDED_ADDRESS: u32 = 65240;
pub const PGN_GROUP_FUNCTION: u32 = 126208;
pub const PGN_PGN_LIST: u32 = 126464;
pub const PGN_HEARTBEAT: u32 = 126993;
pub const PGN_PRODUCT_INFORMATION: u32 = 126996;
pub const PGN_CONFIGURATION_INFORMATION: u32 = 126998;

fn check_pgn(msg: &Nmea2000Msg, expected: u32) -> Result<(), IsoMessageError> {
    if msg.pgn != expected {
        return Err(IsoMessageError::WrongPgn {
            expected,
            actual: msg.pgn,
        });
    }
    Ok(())
}

fn check_len(msg: &Nmea2000Msg, min: usize) -> Result<(), IsoMessageError> {
    if msg.payload.len() < min {
        return Err(IsoMessageError::ShortPayload(msg.payload.len()));
    }
    Ok(())
}

/// PGN 60928 Address Claimed / Cannot Claim. A claim from source 254 is
/// the "cannot claim" form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressClaim {
    pub name: IsoName,
}

impl AddressClaim {
    pub fn new(name: IsoName) -> Self {
        Self { name }
    }

    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_ADDRESS_CLAIM)?;
        check_len(msg, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&msg.payload[..8]);
        Ok(Self {
            name: IsoName::from_bytes(&bytes),
        })
    }

    pub fn message(&self, sa: u8) -> Nmea2000Msg {
        Nmea2000Msg::new(
            PGN_ADDRESS_CLAIM,
            6,
            sa,
            ADDRESS_GLOBAL,
            self.name.to_bytes().to_vec(),
        )
    }
}

/// PGN 59904 ISO Request: ask a device (or everyone) to transmit a PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoRequest {
    pub request_pgn: u32,
}

impl IsoRequest {
    pub fn new(request_pgn: u32) -> Self {
        Self { request_pgn }
    }

    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_ISO_REQUEST)?;
        check_len(msg, 3)?;
        let pgn = u32::from(msg.payload[0])
            | (u32::from(msg.payload[1]) << 8)
            | (u32::from(msg.payload[2]) << 16);
        Ok(Self { request_pgn: pgn })
    }

    pub fn message(&self, sa: u8, da: u8) -> Nmea2000Msg {
        let payload = vec![
            (self.request_pgn & 0xFF) as u8,
            ((self.request_pgn >> 8) & 0xFF) as u8,
            ((self.request_pgn >> 16) & 0xFF) as u8,
        ];
        Nmea2000Msg::new(PGN_ISO_REQUEST, 6, sa, da, payload)
    }
}

/// PGN 65240 Commanded Address: orders the device owning `name` to move
/// to `address`. Nine bytes, carried by ISO transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandedAddress {
    pub name: IsoName,
    pub address: u8,
}

impl CommandedAddress {
    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_COMMANDED_ADDRESS)?;
        check_len(msg, 9)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&msg.payload[..8]);
        Ok(Self {
            name: IsoName::from_bytes(&bytes),
            address: msg.payload[8],
        })
    }

    pub fn message(&self, sa: u8) -> Nmea2000Msg {
        let mut payload = self.name.to_bytes().to_vec();
        payload.push(self.address);
        Nmea2000Msg::new(PGN_COMMANDED_ADDRESS, 6, sa, ADDRESS_GLOBAL, payload)
    }
}

/// PGN 126993 Heartbeat: interval in 10 ms units plus a rolling sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval_ms: u32,
    pub sequence: u8,
}

impl Heartbeat {
    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_HEARTBEAT)?;
        check_len(msg, 3)?;
        let raw = u16::from_le_bytes([msg.payload[0], msg.payload[1]]);
        Ok(Self {
            interval_ms: u32::from(raw) * 10,
            sequence: msg.payload[2],
        })
    }

    pub fn message(&self, sa: u8) -> Nmea2000Msg {
        let raw = (self.interval_ms / 10).min(u32::from(u16::MAX)) as u16;
        let mut payload = vec![0xFFu8; 8];
        payload[0..2].copy_from_slice(&raw.to_le_bytes());
        payload[2] = self.sequence;
        Nmea2000Msg::new(PGN_HEARTBEAT, 7, sa, ADDRESS_GLOBAL, payload)
    }
}

fn put_fixed_str(buf: &mut [u8], text: &str) {
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = if i < text.len() {
            text.as_bytes()[i]
        } else {
            0xFF
        };
    }
}

fn get_fixed_str(buf: &[u8]) -> String {
    let end = buf
        .iter()
        .position(|&b| b == 0xFF || b == 0x00)
        .unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim_end().to_string()
}

/// PGN 126996 Product Information: 134 byte fast packet record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductInformation {
    pub nmea2000_version: u16,
    pub product_code: u16,
    pub model_id: String,
    pub software_version: String,
    pub model_version: String,
    pub serial_code: String,
    pub certification_level: u8,
    pub load_equivalency: u8,
}

impl ProductInformation {
    pub fn set_product_information(
        &mut self,
        model_id: &str,
        software_version: &str,
        model_version: &str,
        serial_code: &str,
    ) {
        self.model_id = model_id.to_string();
        self.software_version = software_version.to_string();
        self.model_version = model_version.to_string();
        self.serial_code = serial_code.to_string();
    }

    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_PRODUCT_INFORMATION)?;
        check_len(msg, 134)?;
        let p = &msg.payload;
        Ok(Self {
            nmea2000_version: u16::from_le_bytes([p[0], p[1]]),
            product_code: u16::from_le_bytes([p[2], p[3]]),
            model_id: get_fixed_str(&p[4..36]),
            software_version: get_fixed_str(&p[36..68]),
            model_version: get_fixed_str(&p[68..100]),
            serial_code: get_fixed_str(&p[100..132]),
            certification_level: p[132],
            load_equivalency: p[133],
        })
    }

    pub fn message(&self, sa: u8) -> Nmea2000Msg {
        let mut payload = vec![0u8; 134];
        payload[0..2].copy_from_slice(&self.nmea2000_version.to_le_bytes());
        payload[2..4].copy_from_slice(&self.product_code.to_le_bytes());
        put_fixed_str(&mut payload[4..36], &self.model_id);
        put_fixed_str(&mut payload[36..68], &self.software_version);
        put_fixed_str(&mut payload[68..100], &self.model_version);
        put_fixed_str(&mut payload[100..132], &self.serial_code);
        payload[132] = self.certification_level;
        payload[133] = self.load_equivalency;
        Nmea2000Msg::new(PGN_PRODUCT_INFORMATION, 6, sa, ADDRESS_GLOBAL, payload)
    }
}

/// PGN 126998 Configuration Information: three variable length strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigurationInformation {
    pub installation_1: String,
    pub installation_2: String,
    pub manufacturer_info: String,
}

impl ConfigurationInformation {
    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_CONFIGURATION_INFORMATION)?;
        let mut strings = Vec::new();
        let mut index = 0usize;
        let p = &msg.payload;
        for _ in 0..3 {
            if index + 2 > p.len() {
                return Err(IsoMessageError::ShortPayload(p.len()));
            }
            let total = p[index] as usize;
            if total < 2 || index + total > p.len() {
                return Err(IsoMessageError::ShortPayload(p.len()));
            }
            strings.push(String::from_utf8_lossy(&p[index + 2..index + total]).to_string());
            index += total;
        }
        Ok(Self {
            installation_1: strings[0].clone(),
            installation_2: strings[1].clone(),
            manufacturer_info: strings[2].clone(),
        })
    }

    pub fn message(&self, sa: u8) -> Nmea2000Msg {
        let mut payload = Vec::new();
        for text in [
            &self.installation_1,
            &self.installation_2,
            &self.manufacturer_info,
        ] {
            payload.push((text.len() + 2) as u8);
            payload.push(0x01);
            payload.extend_from_slice(text.as_bytes());
        }
        Nmea2000Msg::new(PGN_CONFIGURATION_INFORMATION, 6, sa, ADDRESS_GLOBAL, payload)
    }
}

/// PGN 126464 PGN List: transmitted or received PGNs of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgnList {
    /// 0 = transmitted list, 1 = received list.
    pub function: u8,
    pub pgns: Vec<u32>,
}

impl PgnList {
    pub fn transmitted(pgns: Vec<u32>) -> Self {
        Self { function: 0, pgns }
    }

    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_PGN_LIST)?;
        check_len(msg, 1)?;
        let function = msg.payload[0];
        let mut pgns = Vec::new();
        let mut index = 1usize;
        while index + 3 <= msg.payload.len() {
            pgns.push(
                u32::from(msg.payload[index])
                    | (u32::from(msg.payload[index + 1]) << 8)
                    | (u32::from(msg.payload[index + 2]) << 16),
            );
            index += 3;
        }
        Ok(Self { function, pgns })
    }

    pub fn message(&self, sa: u8, da: u8) -> Nmea2000Msg {
        let mut payload = vec![self.function];
        for pgn in &self.pgns {
            payload.push((pgn & 0xFF) as u8);
            payload.push(((pgn >> 8) & 0xFF) as u8);
            payload.push(((pgn >> 16) & 0xFF) as u8);
        }
        Nmea2000Msg::new(PGN_PGN_LIST, 6, sa, da, payload)
    }
}

/// PGN 126208 group function subset: request, command and the
/// acknowledgement the controller answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupFunction {
    Request { pgn: u32 },
    Command { pgn: u32, parameters: Vec<u8> },
    Acknowledge { pgn: u32, error_code: u8 },
}

impl GroupFunction {
    pub fn decode(msg: &Nmea2000Msg) -> Result<Self, IsoMessageError> {
        check_pgn(msg, PGN_GROUP_FUNCTION)?;
        check_len(msg, 4)?;
        let function = msg.payload[0];
        let pgn = u32::from(msg.payload[1])
            | (u32::from(msg.payload[2]) << 8)
            | (u32::from(msg.payload[3]) << 16);
        match function {
            0 => Ok(GroupFunction::Request { pgn }),
            1 => Ok(GroupFunction::Command {
                pgn,
                parameters: msg.payload[4..].to_vec(),
            }),
            2 => {
                check_len(msg, 5)?;
                Ok(GroupFunction::Acknowledge {
                    pgn,
                    error_code: msg.payload[4],
                })
            }
            other => Err(IsoMessageError::UnsupportedFunction(other)),
        }
    }

    pub fn message(&self, sa: u8, da: u8) -> Nmea2000Msg {
        let (function, pgn, tail): (u8, u32, Vec<u8>) = match self {
            GroupFunction::Request { pgn } => (0, *pgn, Vec::new()),
            GroupFunction::Command { pgn, parameters } => (1, *pgn, parameters.clone()),
            GroupFunction::Acknowledge { pgn, error_code } => (2, *pgn, vec![*error_code]),
        };
        let mut payload = vec![
            function,
            (pgn & 0xFF) as u8,
            ((pgn >> 8) & 0xFF) as u8,
            ((pgn >> 16) & 0xFF) as u8,
        ];
        payload.extend_from_slice(&tail);
        Nmea2000Msg::new(PGN_GROUP_FUNCTION, 3, sa, da, payload)
    }
}
