//! Field level encoding and decoding against NMEA2000 PDU buffers.
//!
//! All values are little endian, least significant bit first within the
//! byte. Scaled fields apply `raw * scale + offset`; the physical unit
//! conventions (m/s, radians, degrees Celsius through an offset of
//! -273.15, 1e-7 degrees for latitude/longitude, Pa, V, A, W, liters,
//! rpm, days since 1970-01-01) are carried by the dictionary scale and
//! offset attributes, not special cased here.

use crate::dictionary::{FieldDescriptor, FieldKind, PgnDescriptor};
use crate::error::CodecError;
use crate::name::IsoName;

/// A decoded field value. `Option<FieldValue>` is used throughout: `None`
/// is the "no data" sentinel (all ones for unsigned fields, maximum
/// positive for signed ones).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Name(IsoName),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Signed(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v),
            FieldValue::Signed(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }
}

/// Read `bit_length` bits starting at `bit_offset`, little endian.
/// Returns `None` when the range runs past the buffer.
pub fn read_bits(data: &[u8], bit_offset: usize, bit_length: usize) -> Option<u64> {
    if bit_length == 0 || bit_length > 64 || bit_offset + bit_length > data.len() * 8 {
        return None;
    }
    let mut value = 0u64;
    for i in 0..bit_length {
        let pos = bit_offset + i;
        let bit = (data[pos / 8] >> (pos % 8)) & 1;
        value |= u64::from(bit) << i;
    }
    Some(value)
}

/// Write `bit_length` bits of `value` at `bit_offset`, little endian.
/// The buffer must already be large enough.
pub fn write_bits(data: &mut [u8], bit_offset: usize, bit_length: usize, value: u64) {
    for i in 0..bit_length {
        let pos = bit_offset + i;
        let bit = ((value >> i) & 1) as u8;
        let mask = 1u8 << (pos % 8);
        if bit == 1 {
            data[pos / 8] |= mask;
        } else {
            data[pos / 8] &= !mask;
        }
    }
}

/// All-ones pattern for an unsigned field of the given width.
fn unsigned_sentinel(bit_length: u32) -> u64 {
    if bit_length >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_length) - 1
    }
}

/// Maximum positive value for a signed field, used as "no data".
fn signed_sentinel(bit_length: u32) -> i64 {
    ((1u64 << (bit_length - 1)) - 1) as i64
}

fn sign_extend(raw: u64, bit_length: u32) -> i64 {
    if bit_length >= 64 {
        return raw as i64;
    }
    let sign_bit = 1u64 << (bit_length - 1);
    if raw & sign_bit != 0 {
        (raw | !(sign_bit | (sign_bit - 1))) as i64
    } else {
        raw as i64
    }
}

/// Decode one field. `bit_shift` accounts for preceding variable length
/// fields; the returned value is the consumed size in bits for variable
/// fields, 0 otherwise.
pub fn decode_field(
    field: &FieldDescriptor,
    payload: &[u8],
    bit_shift: usize,
) -> Result<(Option<FieldValue>, usize), CodecError> {
    let start = field.bit_offset as usize + bit_shift;
    match field.kind {
        FieldKind::Unsigned | FieldKind::Enum | FieldKind::Instance => {
            let raw = require_bits(field, payload, start, field.bit_length as usize)?;
            if raw == unsigned_sentinel(field.bit_length) {
                Ok((None, 0))
            } else {
                Ok((Some(FieldValue::Unsigned(raw)), 0))
            }
        }
        FieldKind::Signed => {
            let raw = require_bits(field, payload, start, field.bit_length as usize)?;
            let value = sign_extend(raw, field.bit_length);
            if value == signed_sentinel(field.bit_length) {
                Ok((None, 0))
            } else {
                Ok((Some(FieldValue::Signed(value)), 0))
            }
        }
        FieldKind::ScaledUnsigned => {
            let raw = require_bits(field, payload, start, field.bit_length as usize)?;
            if raw == unsigned_sentinel(field.bit_length) {
                Ok((None, 0))
            } else {
                let v = raw as f64 * field.scale + field.offset;
                Ok((Some(FieldValue::Float(v)), 0))
            }
        }
        FieldKind::ScaledSigned => {
            let raw = require_bits(field, payload, start, field.bit_length as usize)?;
            let signed = sign_extend(raw, field.bit_length);
            if signed == signed_sentinel(field.bit_length) {
                Ok((None, 0))
            } else {
                let v = signed as f64 * field.scale + field.offset;
                Ok((Some(FieldValue::Float(v)), 0))
            }
        }
        FieldKind::FixedString => {
            let (first, len) = byte_span(field, payload, start)?;
            let bytes = &payload[first..first + len];
            let end = bytes
                .iter()
                .position(|&b| b == 0xFF || b == 0x00)
                .unwrap_or(len);
            let text = String::from_utf8_lossy(&bytes[..end]).trim_end().to_string();
            Ok((Some(FieldValue::Text(text)), 0))
        }
        FieldKind::VariableString => {
            let first = start / 8;
            if first + 2 > payload.len() {
                return Err(past_end(field, first + 2, payload.len()));
            }
            let total = payload[first] as usize;
            let encoding = payload[first + 1];
            if total < 2 || first + total > payload.len() {
                return Err(past_end(field, first + total.max(2), payload.len()));
            }
            if encoding != 0x01 {
                return Err(CodecError::BadStringEncoding {
                    field: field.name.clone(),
                    encoding,
                });
            }
            let text = String::from_utf8_lossy(&payload[first + 2..first + total]).to_string();
            Ok((Some(FieldValue::Text(text)), total * 8))
        }
        FieldKind::Bytes => {
            let (first, len) = byte_span(field, payload, start)?;
            Ok((Some(FieldValue::Bytes(payload[first..first + len].to_vec())), 0))
        }
        FieldKind::Name => {
            let first = start / 8;
            if first + 8 > payload.len() {
                return Err(past_end(field, first + 8, payload.len()));
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload[first..first + 8]);
            Ok((Some(FieldValue::Name(IsoName::from_bytes(&bytes))), 0))
        }
    }
}

fn require_bits(
    field: &FieldDescriptor,
    payload: &[u8],
    start: usize,
    len: usize,
) -> Result<u64, CodecError> {
    read_bits(payload, start, len).ok_or_else(|| past_end(field, (start + len + 7) / 8, payload.len()))
}

fn byte_span(
    field: &FieldDescriptor,
    payload: &[u8],
    start: usize,
) -> Result<(usize, usize), CodecError> {
    let first = start / 8;
    let len = (field.bit_length as usize) / 8;
    if first + len > payload.len() {
        return Err(past_end(field, first + len, payload.len()));
    }
    Ok((first, len))
}

fn past_end(field: &FieldDescriptor, end: usize, len: usize) -> CodecError {
    CodecError::PastEnd {
        field: field.name.clone(),
        end,
        len,
    }
}

/// Encode one field into `payload`. `None` writes the "no data"
/// sentinel. Returns the extra bits consumed by variable length content.
pub fn encode_field(
    field: &FieldDescriptor,
    value: Option<&FieldValue>,
    payload: &mut Vec<u8>,
    bit_shift: usize,
) -> Result<usize, CodecError> {
    let start = field.bit_offset as usize + bit_shift;
    match field.kind {
        FieldKind::Unsigned | FieldKind::Enum | FieldKind::Instance => {
            let raw = match value {
                None => unsigned_sentinel(field.bit_length),
                Some(v) => {
                    let raw = v.as_u64().ok_or_else(|| bad_range(field, v))?;
                    if raw >= unsigned_sentinel(field.bit_length) && field.bit_length < 64 {
                        return Err(CodecError::Overflow {
                            field: field.name.clone(),
                            value: raw as i64,
                            bits: field.bit_length,
                        });
                    }
                    raw
                }
            };
            grow_and_write(payload, start, field.bit_length as usize, raw);
            Ok(0)
        }
        FieldKind::Signed => {
            let raw = match value {
                None => signed_sentinel(field.bit_length) as u64,
                Some(FieldValue::Signed(v)) => {
                    check_signed_range(field, *v)?;
                    (*v as u64) & unsigned_sentinel(field.bit_length)
                }
                Some(FieldValue::Unsigned(v)) => {
                    check_signed_range(field, *v as i64)?;
                    *v
                }
                Some(other) => return Err(bad_range(field, other)),
            };
            grow_and_write(payload, start, field.bit_length as usize, raw);
            Ok(0)
        }
        FieldKind::ScaledUnsigned => {
            let raw = match value {
                None => unsigned_sentinel(field.bit_length),
                Some(v) => {
                    let phys = v.as_f64().ok_or_else(|| bad_range(field, v))?;
                    let raw = ((phys - field.offset) / field.scale).round();
                    if raw < 0.0 || raw >= unsigned_sentinel(field.bit_length) as f64 {
                        return Err(CodecError::OutOfRange {
                            field: field.name.clone(),
                            value: phys,
                        });
                    }
                    raw as u64
                }
            };
            grow_and_write(payload, start, field.bit_length as usize, raw);
            Ok(0)
        }
        FieldKind::ScaledSigned => {
            let raw = match value {
                None => signed_sentinel(field.bit_length) as u64 & unsigned_sentinel(field.bit_length),
                Some(v) => {
                    let phys = v.as_f64().ok_or_else(|| bad_range(field, v))?;
                    let raw = ((phys - field.offset) / field.scale).round();
                    let max = signed_sentinel(field.bit_length) as f64;
                    if raw >= max || raw < -max - 1.0 {
                        return Err(CodecError::OutOfRange {
                            field: field.name.clone(),
                            value: phys,
                        });
                    }
                    (raw as i64 as u64) & unsigned_sentinel(field.bit_length)
                }
            };
            grow_and_write(payload, start, field.bit_length as usize, raw);
            Ok(0)
        }
        FieldKind::FixedString => {
            let len = (field.bit_length as usize) / 8;
            let first = start / 8;
            ensure_len(payload, first + len);
            let text = match value {
                Some(FieldValue::Text(t)) => t.as_bytes(),
                None => &[],
                Some(other) => return Err(bad_range(field, other)),
            };
            for (i, slot) in payload[first..first + len].iter_mut().enumerate() {
                *slot = if i < text.len() { text[i] } else { 0xFF };
            }
            Ok(0)
        }
        FieldKind::VariableString => {
            let text = match value {
                Some(FieldValue::Text(t)) => t.as_bytes(),
                None => &[],
                Some(other) => return Err(bad_range(field, other)),
            };
            let first = start / 8;
            let total = text.len() + 2;
            ensure_len(payload, first + total);
            payload[first] = total as u8;
            payload[first + 1] = 0x01;
            payload[first + 2..first + total].copy_from_slice(text);
            Ok(total * 8)
        }
        FieldKind::Bytes => {
            let len = (field.bit_length as usize) / 8;
            let first = start / 8;
            ensure_len(payload, first + len);
            let bytes = match value {
                Some(FieldValue::Bytes(b)) => b.as_slice(),
                None => &[],
                Some(other) => return Err(bad_range(field, other)),
            };
            for (i, slot) in payload[first..first + len].iter_mut().enumerate() {
                *slot = if i < bytes.len() { bytes[i] } else { 0xFF };
            }
            Ok(0)
        }
        FieldKind::Name => {
            let name = match value {
                Some(FieldValue::Name(n)) => *n,
                Some(other) => return Err(bad_range(field, other)),
                None => IsoName(u64::MAX),
            };
            let first = start / 8;
            ensure_len(payload, first + 8);
            payload[first..first + 8].copy_from_slice(&name.to_bytes());
            Ok(0)
        }
    }
}

fn check_signed_range(field: &FieldDescriptor, v: i64) -> Result<(), CodecError> {
    let max = signed_sentinel(field.bit_length);
    if v >= max || v < -max - 1 {
        return Err(CodecError::Overflow {
            field: field.name.clone(),
            value: v,
            bits: field.bit_length,
        });
    }
    Ok(())
}

fn bad_range(field: &FieldDescriptor, value: &FieldValue) -> CodecError {
    CodecError::OutOfRange {
        field: field.name.clone(),
        value: value.as_f64().unwrap_or(f64::NAN),
    }
}

fn ensure_len(payload: &mut Vec<u8>, len: usize) {
    if payload.len() < len {
        payload.resize(len, 0);
    }
}

fn grow_and_write(payload: &mut Vec<u8>, bit_offset: usize, bit_length: usize, value: u64) {
    ensure_len(payload, (bit_offset + bit_length + 7) / 8);
    write_bits(payload, bit_offset, bit_length, value);
}

/// One decoded field, keyed for dictionary driven consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub key: String,
    pub value: Option<FieldValue>,
}

/// Full decode of a PDU against its descriptor: fixed fields plus the
/// repetitions of the repeated group when one is defined.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPgn {
    pub pgn: u32,
    pub fields: Vec<DecodedField>,
    pub repeated: Vec<Vec<DecodedField>>,
}

impl DecodedPgn {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .and_then(|f| f.value.as_ref())
    }
}

/// Decode every field of a PDU. Trailing fields past the end of a short
/// payload are reported as errors; the caller decides whether to keep
/// the message raw.
pub fn decode_pgn(descriptor: &PgnDescriptor, payload: &[u8]) -> Result<DecodedPgn, CodecError> {
    let mut fields = Vec::with_capacity(descriptor.fields.len());
    let mut shift = 0usize;
    for field in &descriptor.fields {
        let (value, consumed) = decode_field(field, payload, shift)?;
        shift += consumed;
        fields.push(DecodedField {
            key: field.key.clone(),
            value,
        });
    }
    let mut repeated = Vec::new();
    if let Some(group) = &descriptor.repeat {
        let count = fields
            .iter()
            .find(|f| f.key == group.count_key)
            .and_then(|f| f.value.as_ref())
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let base = descriptor
            .fields
            .iter()
            .map(|f| f.bit_offset + f.bit_length)
            .max()
            .unwrap_or(0) as usize
            + shift;
        for i in 0..count {
            let block_base = base + i * group.bit_size as usize;
            let mut block = Vec::with_capacity(group.fields.len());
            for field in &group.fields {
                let (value, _) = decode_field(field, payload, block_base)?;
                block.push(DecodedField {
                    key: field.key.clone(),
                    value,
                });
            }
            repeated.push(block);
        }
    }
    Ok(DecodedPgn {
        pgn: descriptor.pgn,
        fields,
        repeated,
    })
}

/// Encode a decoded record back into a PDU. The inverse of
/// [`decode_pgn`]; missing fields are filled with their sentinel.
pub fn encode_pgn(descriptor: &PgnDescriptor, record: &DecodedPgn) -> Result<Vec<u8>, CodecError> {
    let mut payload = Vec::with_capacity(descriptor.byte_length);
    let mut shift = 0usize;
    for field in &descriptor.fields {
        let value = record
            .fields
            .iter()
            .find(|f| f.key == field.key)
            .and_then(|f| f.value.as_ref());
        shift += encode_field(field, value, &mut payload, shift)?;
    }
    if let Some(group) = &descriptor.repeat {
        let base = descriptor
            .fields
            .iter()
            .map(|f| f.bit_offset + f.bit_length)
            .max()
            .unwrap_or(0) as usize
            + shift;
        for (i, block) in record.repeated.iter().enumerate() {
            let block_base = base + i * group.bit_size as usize;
            for field in &group.fields {
                let value = block
                    .iter()
                    .find(|f| f.key == field.key)
                    .and_then(|f| f.value.as_ref());
                encode_field(field, value, &mut payload, block_base)?;
            }
        }
    }
    if !descriptor.variable_length && payload.len() < descriptor.byte_length {
        payload.resize(descriptor.byte_length, 0xFF);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;

    fn field(kind: FieldKind, bit_offset: u32, bit_length: u32, scale: f64, offset: f64) -> FieldDescriptor {
        FieldDescriptor {
            name: "Test".to_string(),
            key: "test".to_string(),
            bit_offset,
            bit_length,
            kind,
            scale,
            offset,
            unit: None,
            enum_values: HashMap::new(),
        }
    }

    #[test]
    fn test_read_write_bits() {
        let mut buf = vec![0u8; 4];
        write_bits(&mut buf, 5, 11, 0x5A5);
        assert_eq!(read_bits(&buf, 5, 11), Some(0x5A5));
        // neighbours untouched
        assert_eq!(read_bits(&buf, 0, 5), Some(0));
        assert_eq!(read_bits(&buf, 16, 8), Some(0));
        assert_eq!(read_bits(&buf, 30, 4), None);
    }

    #[test]
    fn test_unsigned_sentinel_roundtrip() {
        let f = field(FieldKind::Unsigned, 0, 16, 1.0, 0.0);
        for input in [Some(0u64), Some(1), Some(0xFFFE), None] {
            let mut buf = Vec::new();
            let value = input.map(FieldValue::Unsigned);
            encode_field(&f, value.as_ref(), &mut buf, 0).unwrap();
            let (decoded, _) = decode_field(&f, &buf, 0).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_unsigned_overflow() {
        let f = field(FieldKind::Unsigned, 0, 8, 1.0, 0.0);
        let mut buf = Vec::new();
        assert!(matches!(
            encode_field(&f, Some(&FieldValue::Unsigned(255)), &mut buf, 0),
            Err(CodecError::Overflow { .. })
        ));
    }

    #[test]
    fn test_signed_sentinel_and_extremes() {
        let f = field(FieldKind::Signed, 0, 16, 1.0, 0.0);
        for input in [Some(-32768i64), Some(-1), Some(0), Some(32766), None] {
            let mut buf = Vec::new();
            let value = input.map(FieldValue::Signed);
            encode_field(&f, value.as_ref(), &mut buf, 0).unwrap();
            let (decoded, _) = decode_field(&f, &buf, 0).unwrap();
            assert_eq!(decoded, value, "roundtrip failed for {input:?}");
        }
        // 0x7FFF is the sentinel, not a value
        let (decoded, _) = decode_field(&f, &[0xFF, 0x7F], 0).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn test_temperature_convention() {
        // raw Kelvin with 0.01 scale, offset -273.15 yields degrees Celsius
        let f = field(FieldKind::ScaledUnsigned, 0, 16, 0.01, -273.15);
        let (decoded, _) = decode_field(&f, &(29315u16).to_le_bytes(), 0).unwrap();
        assert_abs_diff_eq!(decoded.unwrap().as_f64().unwrap(), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_position_scale() {
        let f = field(FieldKind::ScaledSigned, 0, 32, 1e-7, 0.0);
        let raw = (434521000i32).to_le_bytes();
        let (decoded, _) = decode_field(&f, &raw, 0).unwrap();
        assert_abs_diff_eq!(decoded.unwrap().as_f64().unwrap(), 43.4521, epsilon = 1e-7);
        // encode back
        let mut buf = Vec::new();
        encode_field(&f, Some(&FieldValue::Float(43.4521)), &mut buf, 0).unwrap();
        assert_eq!(buf, raw);
    }

    #[test]
    fn test_scaled_out_of_range() {
        let f = field(FieldKind::ScaledUnsigned, 0, 8, 0.1, 0.0);
        let mut buf = Vec::new();
        assert!(matches!(
            encode_field(&f, Some(&FieldValue::Float(100.0)), &mut buf, 0),
            Err(CodecError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_fixed_string_padding() {
        let f = field(FieldKind::FixedString, 0, 64, 1.0, 0.0);
        let mut buf = Vec::new();
        encode_field(&f, Some(&FieldValue::Text("GPS".to_string())), &mut buf, 0).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[..3], b"GPS");
        assert!(buf[3..].iter().all(|&b| b == 0xFF));
        let (decoded, _) = decode_field(&f, &buf, 0).unwrap();
        assert_eq!(decoded, Some(FieldValue::Text("GPS".to_string())));
    }

    #[test]
    fn test_variable_string() {
        let f = field(FieldKind::VariableString, 0, 0, 1.0, 0.0);
        let mut buf = Vec::new();
        let consumed = encode_field(&f, Some(&FieldValue::Text("HELLO".to_string())), &mut buf, 0).unwrap();
        assert_eq!(consumed, 7 * 8);
        assert_eq!(buf[0], 7);
        assert_eq!(buf[1], 0x01);
        let (decoded, consumed) = decode_field(&f, &buf, 0).unwrap();
        assert_eq!(decoded, Some(FieldValue::Text("HELLO".to_string())));
        assert_eq!(consumed, 7 * 8);
    }

    #[test]
    fn test_name_field() {
        let f = field(FieldKind::Name, 0, 64, 1.0, 0.0);
        let name = IsoName(0x8123_4567_89AB_CDEF);
        let mut buf = Vec::new();
        encode_field(&f, Some(&FieldValue::Name(name)), &mut buf, 0).unwrap();
        let (decoded, _) = decode_field(&f, &buf, 0).unwrap();
        assert_eq!(decoded, Some(FieldValue::Name(name)));
    }

    #[test]
    fn test_pgn_decode_encode_roundtrip() {
        let dict = Dictionary::from_xml_str(crate::dictionary::TEST_DICTIONARY).unwrap();
        let wind = dict.lookup(130306).unwrap();
        // SID 1, speed 5.00 m/s, angle 1.5708 rad, reference apparent
        let mut payload = vec![0u8; 8];
        payload[0] = 1;
        payload[1..3].copy_from_slice(&500u16.to_le_bytes());
        payload[3..5].copy_from_slice(&15708u16.to_le_bytes());
        payload[5] = 0x02;
        payload[6] = 0xFF;
        payload[7] = 0xFF;
        let decoded = decode_pgn(wind, &payload).unwrap();
        assert_abs_diff_eq!(
            decoded.get("wind_speed").unwrap().as_f64().unwrap(),
            5.0,
            epsilon = 1e-9
        );
        assert_eq!(decoded.get("reference").unwrap().as_u64(), Some(2));
        let reencoded = encode_pgn(wind, &decoded).unwrap();
        // everything declared by the descriptor survives the roundtrip
        let again = decode_pgn(wind, &reencoded).unwrap();
        assert_eq!(again, decoded);
    }

    #[test]
    fn test_repeated_group_decode() {
        let dict = Dictionary::from_xml_str(crate::dictionary::TEST_DICTIONARY).unwrap();
        let sats = dict.lookup(129540).unwrap();
        // SID 0, 2 satellites, PRN/elevation pairs
        let mut payload = vec![0u8; 3];
        payload[2] = 2;
        for prn in [5u8, 12] {
            payload.push(prn);
            payload.extend_from_slice(&(7854i16).to_le_bytes());
        }
        let decoded = decode_pgn(sats, &payload).unwrap();
        assert_eq!(decoded.repeated.len(), 2);
        assert_eq!(decoded.repeated[1][0].value, Some(FieldValue::Unsigned(12)));
    }

    #[test]
    fn test_short_payload_rejected() {
        let dict = Dictionary::from_xml_str(crate::dictionary::TEST_DICTIONARY).unwrap();
        let wind = dict.lookup(130306).unwrap();
        assert!(matches!(
            decode_pgn(wind, &[0x01, 0x02]),
            Err(CodecError::PastEnd { .. })
        ));
    }
}
