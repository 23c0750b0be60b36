use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DictionaryError;
use crate::message::pgn_is_fast_packet_default;

/// How the bits of a field are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Unsigned,
    Signed,
    Enum,
    /// Fixed length ASCII, right padded with 0xFF.
    FixedString,
    /// Length byte + encoding byte (0x01 = ASCII) + content.
    VariableString,
    Bytes,
    ScaledUnsigned,
    ScaledSigned,
    Instance,
    /// 64-bit ISO NAME.
    Name,
}

impl FieldKind {
    fn parse(s: &str) -> Option<FieldKind> {
        match s {
            "Unsigned" => Some(FieldKind::Unsigned),
            "Signed" => Some(FieldKind::Signed),
            "Enum" => Some(FieldKind::Enum),
            "FixedString" => Some(FieldKind::FixedString),
            "VariableString" => Some(FieldKind::VariableString),
            "Bytes" => Some(FieldKind::Bytes),
            "ScaledUnsigned" => Some(FieldKind::ScaledUnsigned),
            "ScaledSigned" => Some(FieldKind::ScaledSigned),
            "Instance" => Some(FieldKind::Instance),
            "Name" => Some(FieldKind::Name),
            _ => None,
        }
    }
}

/// One field of a PGN, immutable after load.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub key: String,
    /// Offset in bits from the start of the PDU, or from the start of the
    /// repeat block for fields inside a repeated group.
    pub bit_offset: u32,
    pub bit_length: u32,
    pub kind: FieldKind,
    pub scale: f64,
    pub offset: f64,
    pub unit: Option<String>,
    pub enum_values: HashMap<u32, String>,
}

impl FieldDescriptor {
    /// Unit and scale, for display formatting.
    pub fn format_hint(&self) -> (Option<&str>, f64) {
        (self.unit.as_deref(), self.scale)
    }

    pub fn enum_label(&self, value: u32) -> Option<&str> {
        self.enum_values.get(&value).map(String::as_str)
    }
}

/// Group of fields repeated N times, N given by a count field of the
/// fixed part.
#[derive(Debug, Clone)]
pub struct RepeatedGroup {
    pub count_key: String,
    pub fields: Vec<FieldDescriptor>,
    /// Size in bits of one repetition.
    pub bit_size: u32,
}

/// Field-level description of one PGN.
#[derive(Debug, Clone)]
pub struct PgnDescriptor {
    pub pgn: u32,
    pub name: String,
    pub byte_length: usize,
    pub variable_length: bool,
    pub priority: u8,
    pub read_only: bool,
    pub fast_packet: bool,
    pub fields: Vec<FieldDescriptor>,
    pub repeat: Option<RepeatedGroup>,
}

impl PgnDescriptor {
    pub fn field(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// The process-wide PGN dictionary, read only after startup.
#[derive(Debug, Default)]
pub struct Dictionary {
    pgns: HashMap<u32, Arc<PgnDescriptor>>,
}

impl Dictionary {
    /// An empty dictionary. Every message is then forwarded raw.
    pub fn empty() -> Self {
        Dictionary::default()
    }

    /// Load and index the XML dictionary file. Fatal on any structural
    /// problem; this runs at startup only.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DictionaryError> {
        let content = std::fs::read_to_string(path)?;
        let dict = Self::from_xml_str(&content)?;
        info!("PGN dictionary loaded: {} PGN definitions", dict.len());
        Ok(dict)
    }

    pub fn from_xml_str(content: &str) -> Result<Self, DictionaryError> {
        let file: XmlPgnDefns =
            serde_xml_rs::from_str(content).map_err(|e| DictionaryError::Xml(e.to_string()))?;
        let mut pgns = HashMap::new();
        for defn in file.defns {
            let descriptor = defn.into_descriptor()?;
            debug!("dictionary: PGN {} '{}'", descriptor.pgn, descriptor.name);
            let pgn = descriptor.pgn;
            if pgns.insert(pgn, Arc::new(descriptor)).is_some() {
                return Err(DictionaryError::DuplicatePgn(pgn));
            }
        }
        Ok(Dictionary { pgns })
    }

    pub fn len(&self) -> usize {
        self.pgns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pgns.is_empty()
    }

    /// Descriptor lookup. `None` means the message stays raw.
    pub fn lookup(&self, pgn: u32) -> Option<&Arc<PgnDescriptor>> {
        self.pgns.get(&pgn)
    }

    /// Translate an enum raw value into its label.
    pub fn lookup_enum(&self, pgn: u32, key: &str, value: u32) -> Option<&str> {
        self.lookup(pgn)?.field(key)?.enum_label(value)
    }

    /// Whether a PGN must use the fast packet protocol: the descriptor
    /// says so, or its defined length exceeds a single frame. Unknown
    /// PGNs fall back to the reserved ranges.
    pub fn is_fast_packet(&self, pgn: u32) -> bool {
        match self.lookup(pgn) {
            Some(d) => d.fast_packet || d.byte_length > 8,
            None => pgn_is_fast_packet_default(pgn),
        }
    }
}

// ---- XML file model -------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename = "PGNDefns")]
struct XmlPgnDefns {
    #[serde(rename = "PGNDefn", default)]
    defns: Vec<XmlPgnDefn>,
}

#[derive(Debug, Deserialize)]
struct XmlPgnDefn {
    #[serde(rename = "PGN")]
    pgn: u32,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ByteLength", default)]
    byte_length: usize,
    #[serde(rename = "VariableLength", default)]
    variable_length: bool,
    #[serde(rename = "Priority", default = "default_priority")]
    priority: u8,
    #[serde(rename = "ReadOnly", default)]
    read_only: bool,
    #[serde(rename = "FastPacket", default)]
    fast_packet: bool,
    #[serde(rename = "Fields", default)]
    fields: XmlFields,
    #[serde(rename = "RepeatedFieldSet")]
    repeated: Option<XmlRepeatedFieldSet>,
}

fn default_priority() -> u8 {
    7
}

#[derive(Debug, Deserialize, Default)]
struct XmlFields {
    #[serde(rename = "Field", default)]
    fields: Vec<XmlField>,
}

#[derive(Debug, Deserialize)]
struct XmlField {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Key", default)]
    key: String,
    #[serde(rename = "Kind")]
    kind: String,
    #[serde(rename = "BitOffset")]
    bit_offset: u32,
    #[serde(rename = "BitLength", default)]
    bit_length: u32,
    #[serde(rename = "Scale", default = "default_scale")]
    scale: f64,
    #[serde(rename = "Offset", default)]
    offset: f64,
    #[serde(rename = "Unit")]
    unit: Option<String>,
    #[serde(rename = "EnumValues", default)]
    enum_values: XmlEnumValues,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Default)]
struct XmlEnumValues {
    #[serde(rename = "EnumPair", default)]
    pairs: Vec<XmlEnumPair>,
}

#[derive(Debug, Deserialize)]
struct XmlEnumPair {
    #[serde(rename = "Value")]
    value: u32,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct XmlRepeatedFieldSet {
    #[serde(rename = "CountKey")]
    count_key: String,
    #[serde(rename = "Field", default)]
    fields: Vec<XmlField>,
}

impl XmlPgnDefn {
    fn into_descriptor(self) -> Result<PgnDescriptor, DictionaryError> {
        let pgn = self.pgn;
        let fields = convert_fields(pgn, self.fields.fields, true)?;
        let repeat = match self.repeated {
            Some(set) => {
                let group_fields = convert_fields(pgn, set.fields, true)?;
                if !fields.iter().any(|f| f.key == set.count_key) {
                    return Err(DictionaryError::BadRepeatCount {
                        pgn,
                        key: set.count_key,
                    });
                }
                let bit_size = group_fields
                    .last()
                    .map(|f| f.bit_offset + f.bit_length)
                    .unwrap_or(0);
                Some(RepeatedGroup {
                    count_key: set.count_key,
                    fields: group_fields,
                    bit_size,
                })
            }
            None => None,
        };
        Ok(PgnDescriptor {
            pgn,
            name: self.name,
            byte_length: self.byte_length,
            variable_length: self.variable_length,
            priority: self.priority,
            read_only: self.read_only,
            fast_packet: self.fast_packet,
            fields,
            repeat,
        })
    }
}

fn convert_fields(
    pgn: u32,
    xml_fields: Vec<XmlField>,
    check_overlap: bool,
) -> Result<Vec<FieldDescriptor>, DictionaryError> {
    let mut fields = Vec::with_capacity(xml_fields.len());
    let mut next_free_bit = 0u32;
    for xf in xml_fields {
        let kind = FieldKind::parse(&xf.kind).ok_or_else(|| DictionaryError::UnknownFieldKind {
            pgn,
            field: xf.name.clone(),
            kind: xf.kind.clone(),
        })?;
        if check_overlap && xf.bit_offset < next_free_bit {
            return Err(DictionaryError::FieldOverlap {
                pgn,
                field: xf.name,
            });
        }
        // variable length fields have no declared bit length
        if xf.bit_length > 0 {
            next_free_bit = xf.bit_offset + xf.bit_length;
        }
        let key = if xf.key.is_empty() {
            snake_key(&xf.name)
        } else {
            xf.key
        };
        fields.push(FieldDescriptor {
            name: xf.name,
            key,
            bit_offset: xf.bit_offset,
            bit_length: xf.bit_length,
            kind,
            scale: xf.scale,
            offset: xf.offset,
            unit: xf.unit,
            enum_values: xf
                .enum_values
                .pairs
                .into_iter()
                .map(|p| (p.value, p.name))
                .collect(),
        });
    }
    Ok(fields)
}

fn snake_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) const TEST_DICTIONARY: &str = r#"
<PGNDefns>
  <PGNDefn>
    <PGN>130306</PGN>
    <Name>Wind Data</Name>
    <ByteLength>8</ByteLength>
    <Priority>2</Priority>
    <Fields>
      <Field>
        <Name>SID</Name>
        <Kind>Unsigned</Kind>
        <BitOffset>0</BitOffset>
        <BitLength>8</BitLength>
      </Field>
      <Field>
        <Name>Wind Speed</Name>
        <Key>wind_speed</Key>
        <Kind>ScaledUnsigned</Kind>
        <BitOffset>8</BitOffset>
        <BitLength>16</BitLength>
        <Scale>0.01</Scale>
        <Unit>m/s</Unit>
      </Field>
      <Field>
        <Name>Wind Angle</Name>
        <Key>wind_angle</Key>
        <Kind>ScaledUnsigned</Kind>
        <BitOffset>24</BitOffset>
        <BitLength>16</BitLength>
        <Scale>0.0001</Scale>
        <Unit>rad</Unit>
      </Field>
      <Field>
        <Name>Reference</Name>
        <Key>reference</Key>
        <Kind>Enum</Kind>
        <BitOffset>40</BitOffset>
        <BitLength>3</BitLength>
        <EnumValues>
          <EnumPair Value="0" Name="True (ground referenced to North)"/>
          <EnumPair Value="2" Name="Apparent"/>
        </EnumValues>
      </Field>
    </Fields>
  </PGNDefn>
  <PGNDefn>
    <PGN>129540</PGN>
    <Name>GNSS Sats in View</Name>
    <ByteLength>233</ByteLength>
    <VariableLength>true</VariableLength>
    <Priority>6</Priority>
    <FastPacket>true</FastPacket>
    <Fields>
      <Field>
        <Name>SID</Name>
        <Kind>Unsigned</Kind>
        <BitOffset>0</BitOffset>
        <BitLength>8</BitLength>
      </Field>
      <Field>
        <Name>Sats in View</Name>
        <Key>sats_in_view</Key>
        <Kind>Unsigned</Kind>
        <BitOffset>16</BitOffset>
        <BitLength>8</BitLength>
      </Field>
    </Fields>
    <RepeatedFieldSet>
      <CountKey>sats_in_view</CountKey>
      <Field>
        <Name>PRN</Name>
        <Kind>Unsigned</Kind>
        <BitOffset>0</BitOffset>
        <BitLength>8</BitLength>
      </Field>
      <Field>
        <Name>Elevation</Name>
        <Kind>ScaledSigned</Kind>
        <BitOffset>8</BitOffset>
        <BitLength>16</BitLength>
        <Scale>0.0001</Scale>
        <Unit>rad</Unit>
      </Field>
    </RepeatedFieldSet>
  </PGNDefn>
</PGNDefns>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_lookup() {
        let dict = Dictionary::from_xml_str(TEST_DICTIONARY).unwrap();
        assert_eq!(dict.len(), 2);
        let wind = dict.lookup(130306).unwrap();
        assert_eq!(wind.name, "Wind Data");
        assert_eq!(wind.byte_length, 8);
        assert_eq!(wind.priority, 2);
        assert_eq!(wind.fields.len(), 4);
        let speed = wind.field("wind_speed").unwrap();
        assert_eq!(speed.kind, FieldKind::ScaledUnsigned);
        assert_eq!(speed.bit_offset, 8);
        assert_eq!(speed.format_hint(), (Some("m/s"), 0.01));
    }

    #[test]
    fn test_key_defaults_to_snake_name() {
        let dict = Dictionary::from_xml_str(TEST_DICTIONARY).unwrap();
        assert!(dict.lookup(130306).unwrap().field("sid").is_some());
    }

    #[test]
    fn test_enum_lookup() {
        let dict = Dictionary::from_xml_str(TEST_DICTIONARY).unwrap();
        assert_eq!(
            dict.lookup_enum(130306, "reference", 2),
            Some("Apparent")
        );
        assert_eq!(dict.lookup_enum(130306, "reference", 5), None);
    }

    #[test]
    fn test_repeated_group() {
        let dict = Dictionary::from_xml_str(TEST_DICTIONARY).unwrap();
        let sats = dict.lookup(129540).unwrap();
        let repeat = sats.repeat.as_ref().unwrap();
        assert_eq!(repeat.count_key, "sats_in_view");
        assert_eq!(repeat.fields.len(), 2);
        assert_eq!(repeat.bit_size, 24);
    }

    #[test]
    fn test_fast_packet_resolution() {
        let dict = Dictionary::from_xml_str(TEST_DICTIONARY).unwrap();
        assert!(dict.is_fast_packet(129540));
        assert!(!dict.is_fast_packet(130306));
        // unknown PGN in the fast packet range
        assert!(dict.is_fast_packet(129029));
        assert!(!dict.is_fast_packet(127245));
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let xml = r#"
<PGNDefns>
  <PGNDefn>
    <PGN>1</PGN><Name>Bad</Name><ByteLength>8</ByteLength>
    <Fields>
      <Field><Name>X</Name><Kind>Complex</Kind><BitOffset>0</BitOffset><BitLength>8</BitLength></Field>
    </Fields>
  </PGNDefn>
</PGNDefns>"#;
        assert!(matches!(
            Dictionary::from_xml_str(xml),
            Err(DictionaryError::UnknownFieldKind { .. })
        ));
    }

    #[test]
    fn test_overlap_is_fatal() {
        let xml = r#"
<PGNDefns>
  <PGNDefn>
    <PGN>2</PGN><Name>Bad</Name><ByteLength>8</ByteLength>
    <Fields>
      <Field><Name>A</Name><Kind>Unsigned</Kind><BitOffset>0</BitOffset><BitLength>8</BitLength></Field>
      <Field><Name>B</Name><Kind>Unsigned</Kind><BitOffset>4</BitOffset><BitLength>8</BitLength></Field>
    </Fields>
  </PGNDefn>
</PGNDefns>"#;
        assert!(matches!(
            Dictionary::from_xml_str(xml),
            Err(DictionaryError::FieldOverlap { .. })
        ));
    }
}
