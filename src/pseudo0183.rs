//! Pseudo NMEA0183 carriers for NMEA2000 messages: the Digital Yacht
//! `!PDGY` format (base64 payload), the `!PGNST` format (hex payload)
//! and the Shipmodul Miniplex `$MXPGN` format.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use nmea2k::message::{from_hex, hex_string};
use nmea2k::{Nmea2000Msg, ADDRESS_GLOBAL};

use crate::nmea0183::Nmea0183Msg;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PseudoError {
    #[error("not a {0} sentence")]
    WrongAddress(&'static str),
    #[error("wrong field count: {0}")]
    FieldCount(usize),
    #[error("numeric field '{0}' invalid")]
    BadNumber(String),
    #[error("payload encoding invalid")]
    BadPayload,
}

fn parse_u32(field: &str) -> Result<u32, PseudoError> {
    field
        .parse()
        .map_err(|_| PseudoError::BadNumber(field.to_string()))
}

fn parse_header(fields: &[String]) -> Result<(u32, u8, u8, u8, u64), PseudoError> {
    let pgn = parse_u32(&fields[0])?;
    let priority = parse_u32(&fields[1])? as u8;
    let sa = parse_u32(&fields[2])? as u8;
    let da = match parse_u32(&fields[3])? as u8 {
        // 0 is used by some devices to mean broadcast
        0 => ADDRESS_GLOBAL,
        other => other,
    };
    let timestamp_ms = fields[4]
        .parse()
        .map_err(|_| PseudoError::BadNumber(fields[4].clone()))?;
    Ok((pgn, priority, sa, da, timestamp_ms))
}

/// Decode a `!PDGY,<pgn>,<prio>,<sa>,<da>,<ts_ms>,<base64>` sentence.
pub fn decode_pdgy(msg: &Nmea0183Msg) -> Result<Nmea2000Msg, PseudoError> {
    if msg.address != "PDGY" {
        return Err(PseudoError::WrongAddress("PDGY"));
    }
    if msg.fields.len() != 6 {
        return Err(PseudoError::FieldCount(msg.fields.len()));
    }
    let (pgn, priority, sa, da, timestamp_ms) = parse_header(&msg.fields)?;
    let payload = BASE64
        .decode(msg.fields[5].as_bytes())
        .map_err(|_| PseudoError::BadPayload)?;
    Ok(Nmea2000Msg::new(pgn, priority, sa, da, payload).with_timestamp(timestamp_ms))
}

/// Encode to `!PDGY` form.
pub fn encode_pdgy(msg: &Nmea2000Msg) -> Nmea0183Msg {
    let payload = BASE64.encode(&msg.payload);
    Nmea0183Msg::build(
        b'!',
        "PDGY",
        &[
            &msg.pgn.to_string(),
            &msg.priority.to_string(),
            &msg.sa.to_string(),
            &msg.da.to_string(),
            &msg.timestamp_ms.to_string(),
            &payload,
        ],
    )
}

/// Decode a `!PGNST,<pgn>,<prio>,<sa>,<da>,<ts_ms>,<hex>` sentence.
pub fn decode_pgnst(msg: &Nmea0183Msg) -> Result<Nmea2000Msg, PseudoError> {
    if msg.address != "PGNST" {
        return Err(PseudoError::WrongAddress("PGNST"));
    }
    if msg.fields.len() != 6 {
        return Err(PseudoError::FieldCount(msg.fields.len()));
    }
    let (pgn, priority, sa, da, timestamp_ms) = parse_header(&msg.fields)?;
    let payload = from_hex(&msg.fields[5]).ok_or(PseudoError::BadPayload)?;
    Ok(Nmea2000Msg::new(pgn, priority, sa, da, payload).with_timestamp(timestamp_ms))
}

/// Encode to `!PGNST` form.
pub fn encode_pgnst(msg: &Nmea2000Msg) -> Nmea0183Msg {
    Nmea0183Msg::build(
        b'!',
        "PGNST",
        &[
            &msg.pgn.to_string(),
            &msg.priority.to_string(),
            &msg.sa.to_string(),
            &msg.da.to_string(),
            &msg.timestamp_ms.to_string(),
            &hex_string(&msg.payload),
        ],
    )
}

/// Decode a Shipmodul `$MXPGN,<pgn-hex>,<attr-hex>,<hex-payload>`
/// sentence. The attribute word carries the source address in bits 0-7,
/// the DLC in bits 8-11, the priority in bits 12-14 and the send flag
/// in bit 15.
pub fn decode_mxpgn(msg: &Nmea0183Msg) -> Result<Nmea2000Msg, PseudoError> {
    if msg.address != "MXPGN" {
        return Err(PseudoError::WrongAddress("MXPGN"));
    }
    if msg.fields.len() != 3 {
        return Err(PseudoError::FieldCount(msg.fields.len()));
    }
    let pgn = u32::from_str_radix(&msg.fields[0], 16)
        .map_err(|_| PseudoError::BadNumber(msg.fields[0].clone()))?;
    let attribute = u16::from_str_radix(&msg.fields[1], 16)
        .map_err(|_| PseudoError::BadNumber(msg.fields[1].clone()))?;
    let priority = ((attribute >> 12) & 0x07) as u8;
    let dlc = ((attribute >> 8) & 0x0F) as usize;
    let sa = (attribute & 0xFF) as u8;
    let payload = from_hex(&msg.fields[2]).ok_or(PseudoError::BadPayload)?;
    if payload.len() != dlc {
        return Err(PseudoError::BadPayload);
    }
    Ok(Nmea2000Msg::new(pgn, priority, sa, ADDRESS_GLOBAL, payload))
}

/// Encode to `$MXPGN` form, setting the send flag. For transmission the
/// address byte carries the destination.
pub fn encode_mxpgn(msg: &Nmea2000Msg) -> Nmea0183Msg {
    let attribute: u16 = 0x8000
        | (u16::from(msg.priority & 0x07) << 12)
        | ((msg.payload.len() as u16 & 0x0F) << 8)
        | u16::from(msg.da);
    Nmea0183Msg::build(
        b'$',
        "MXPGN",
        &[
            &format!("{:06X}", msg.pgn),
            &format!("{:04X}", attribute),
            &hex_string(&msg.payload).to_uppercase(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Nmea2000Msg {
        Nmea2000Msg::new(129025, 2, 3, 255, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
            .with_timestamp(1700000000123)
    }

    #[test]
    fn test_pdgy_roundtrip() {
        let msg = sample();
        let sentence = encode_pdgy(&msg);
        assert_eq!(sentence.address, "PDGY");
        let parsed = Nmea0183Msg::parse(&sentence.to_wire(), true).unwrap();
        let decoded = decode_pdgy(&parsed).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_pgnst_roundtrip() {
        let msg = sample();
        let sentence = encode_pgnst(&msg);
        let parsed = Nmea0183Msg::parse(&sentence.to_wire(), true).unwrap();
        let decoded = decode_pgnst(&parsed).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_pdgy_and_pgnst_agree() {
        // both carriers parse back to the same raw message
        let msg = sample();
        let from_pdgy = decode_pdgy(&encode_pdgy(&msg)).unwrap();
        let from_pgnst = decode_pgnst(&encode_pgnst(&msg)).unwrap();
        assert_eq!(from_pdgy, from_pgnst);
    }

    #[test]
    fn test_pdgy_zero_da_is_broadcast() {
        let sentence = Nmea0183Msg::build(
            b'!',
            "PDGY",
            &["129025", "2", "3", "0", "1000", &BASE64.encode([1u8, 2, 3])],
        );
        let decoded = decode_pdgy(&sentence).unwrap();
        assert_eq!(decoded.da, ADDRESS_GLOBAL);
    }

    #[test]
    fn test_mxpgn_decode() {
        // priority 2, DLC 8, source 0x12
        let sentence = Nmea0183Msg::build(b'$', "MXPGN", &["01F801", "2812", "0102030405060708"]);
        let decoded = decode_mxpgn(&sentence).unwrap();
        assert_eq!(decoded.pgn, 129025);
        assert_eq!(decoded.priority, 2);
        assert_eq!(decoded.sa, 0x12);
        assert_eq!(decoded.payload.len(), 8);
    }

    #[test]
    fn test_mxpgn_encode_sets_send_flag() {
        let msg = Nmea2000Msg::new(129025, 2, 3, 0x42, vec![0xAA; 8]);
        let sentence = encode_mxpgn(&msg);
        let attribute = u16::from_str_radix(&sentence.fields[1], 16).unwrap();
        assert_eq!(attribute & 0x8000, 0x8000);
        assert_eq!(attribute & 0xFF, 0x42);
        assert_eq!((attribute >> 8) & 0x0F, 8);
    }

    #[test]
    fn test_mxpgn_dlc_mismatch() {
        let sentence = Nmea0183Msg::build(b'$', "MXPGN", &["01F801", "2812", "0102"]);
        assert_eq!(decode_mxpgn(&sentence), Err(PseudoError::BadPayload));
    }

    #[test]
    fn test_wrong_address() {
        let sentence = Nmea0183Msg::build(b'!', "PDGY", &["1", "2", "3", "4", "5", "AA=="]);
        assert!(decode_pgnst(&sentence).is_err());
    }
}
