//! Decoder for the self-describing bucket format (`dwf_v1`).
//!
//! Layout, all little-endian:
//!
//! ```text
//! u32 magic | u32 name_table_len | u32 version | u32 element_count
//! custom data: u8 count, then (u8 id, u8 len, len bytes) per entry
//! name table: name_table_len x (u16 len, bytes)
//! struct definition (recursive)
//! element_count records
//! 5 x u32 trailer
//! ```
//!
//! Every field of a record starts with a flag byte. Bit 7 marks null. The
//! remaining bits are interpreted per field type: bit 0 carries booleans or
//! selects a 2-byte length, bit 1 marks arrays whose elements may be null,
//! bit 2 marks arrays whose elements are all null, and bit 4 selects 2-byte
//! element lengths for string arrays.

use std::collections::BTreeMap;

use crate::record::{Record, Value};

use super::{error::FormatError, reader::WireReader};

/// File magic.
pub const SCHEMA_MAGIC: u32 = 1_481_463_620;
/// Supported version.
pub const SCHEMA_VERSION: u32 = 1;
/// Trailing sentinel words, checked in order.
pub const SCHEMA_TRAILER: [u32; 5] = [
    1_886_680_168,
    791_624_307,
    1_953_260_900,
    1_885_433_185,
    1_952_804_398,
];
/// Deepest struct-definition nesting accepted from the wire.
pub const MAX_DEFINITION_DEPTH: usize = 32;

const FLAG_NULL: u8 = 7;
const FLAG_BOOL: u8 = 0;
const FLAG_WIDE_LEN: u8 = 0;
const FLAG_ANY_NULL: u8 = 1;
const FLAG_ALL_NULL: u8 = 2;
const FLAG_WIDE_STRINGS: u8 = 4;

/// Field kind; composite kinds own their child definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// 0: u16 index into the name table.
    NameRef,
    /// 1: nested record.
    Object(StructDefinition),
    /// 2: boolean carried in flag bit 0, no payload.
    Bool,
    /// 3: string with a flag-selected 1- or 2-byte length.
    Str,
    /// 4: array of nested records.
    ObjectArray(StructDefinition),
    /// 5: array of booleans, one byte each.
    BoolArray,
    /// 6: array of int32.
    IntArray,
    /// 7: array of float32.
    FloatArray,
    /// 8: int32.
    Int,
    /// 9: float32.
    Float,
    /// 10: epoch seconds as int32.
    Timestamp,
    /// 11: array of strings; flag bit 4 selects 2-byte element lengths.
    StrArray,
    /// 12: double precision on the server, float32 on the wire.
    Double,
    /// 13: uint16.
    UShort,
}

impl FieldType {
    /// Wire tag for this kind.
    pub fn tag(&self) -> u8 {
        match self {
            Self::NameRef => 0,
            Self::Object(_) => 1,
            Self::Bool => 2,
            Self::Str => 3,
            Self::ObjectArray(_) => 4,
            Self::BoolArray => 5,
            Self::IntArray => 6,
            Self::FloatArray => 7,
            Self::Int => 8,
            Self::Float => 9,
            Self::Timestamp => 10,
            Self::StrArray => 11,
            Self::Double => 12,
            Self::UShort => 13,
        }
    }

    /// Child definition for composite kinds.
    pub fn child(&self) -> Option<&StructDefinition> {
        match self {
            Self::Object(def) | Self::ObjectArray(def) => Some(def),
            _ => None,
        }
    }
}

/// One named field of a struct definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name as written in the output record.
    pub name: String,
    /// Field kind.
    pub ty: FieldType,
}

/// Ordered field list read from the stream itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructDefinition {
    /// Fields in wire order.
    pub fields: Vec<FieldDef>,
}

/// Fully decoded buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    /// Custom header entries that carried a 4-byte value.
    pub custom_data: BTreeMap<u8, i32>,
    /// Shared string pool.
    pub name_table: Vec<String>,
    /// Top-level record definition.
    pub definition: StructDefinition,
    /// Decoded records in wire order.
    pub records: Vec<Record>,
}

/// Decodes a complete buffer or fails without partial output.
pub fn decode_schema(bytes: &[u8]) -> Result<SchemaDocument, FormatError> {
    SchemaDecoder::new(bytes).decode()
}

/// Single-pass decoder state.
pub struct SchemaDecoder<'a> {
    reader: WireReader<'a>,
    name_table: Vec<String>,
}

impl<'a> SchemaDecoder<'a> {
    /// Wraps a buffer.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: WireReader::new(bytes),
            name_table: Vec::new(),
        }
    }

    /// Runs header validation, table reads, record decode, and trailer check.
    pub fn decode(mut self) -> Result<SchemaDocument, FormatError> {
        let magic = self.reader.read_u32()?;
        if magic != SCHEMA_MAGIC {
            return Err(FormatError::BadMagic {
                expected: SCHEMA_MAGIC,
                found: magic,
            });
        }
        let name_table_len = self.reader.read_u32()?;
        let version = self.reader.read_u32()?;
        if version != SCHEMA_VERSION {
            return Err(FormatError::UnsupportedVersion {
                expected: SCHEMA_VERSION,
                found: version,
            });
        }
        let element_count = self.reader.read_u32()?;

        let custom_data = self.read_custom_data()?;

        for _ in 0..name_table_len {
            let name = self.reader.read_long_string()?;
            self.name_table.push(name);
        }

        let definition = self.read_definition(0)?;
        self.check_element_count(element_count, &definition)?;

        let mut records = Vec::new();
        for _ in 0..element_count {
            records.push(self.read_record(&definition)?);
        }

        for (index, expected) in SCHEMA_TRAILER.iter().copied().enumerate() {
            let found = self.reader.read_u32()?;
            if found != expected {
                return Err(FormatError::TrailerMismatch {
                    index,
                    expected,
                    found,
                });
            }
        }

        Ok(SchemaDocument {
            custom_data,
            name_table: self.name_table,
            definition,
            records,
        })
    }

    /// Every field costs at least its flag byte, so the count is bounded by
    /// what is left before the trailer.
    fn check_element_count(&self, element_count: u32, definition: &StructDefinition) -> Result<(), FormatError> {
        if element_count == 0 {
            return Ok(());
        }
        if definition.fields.is_empty() {
            return Err(FormatError::EmptyDefinition { count: element_count });
        }
        let trailer = SCHEMA_TRAILER.len() * 4;
        let wanted = (element_count as usize)
            .saturating_mul(definition.fields.len())
            .saturating_add(trailer);
        let remaining = self.reader.remaining();
        if wanted > remaining {
            let offset = self.reader.position();
            return Err(FormatError::Truncated {
                offset,
                wanted,
                len: offset + remaining,
            });
        }
        Ok(())
    }

    fn read_custom_data(&mut self) -> Result<BTreeMap<u8, i32>, FormatError> {
        let count = self.reader.read_u8()?;
        let mut out = BTreeMap::new();
        for _ in 0..count {
            let id = self.reader.read_u8()?;
            let len = self.reader.read_u8()?;
            if len == 4 {
                out.insert(id, self.reader.read_i32()?);
            } else {
                self.reader.skip(usize::from(len))?;
            }
        }
        Ok(out)
    }

    fn read_definition(&mut self, depth: usize) -> Result<StructDefinition, FormatError> {
        if depth >= MAX_DEFINITION_DEPTH {
            return Err(FormatError::NestingTooDeep {
                depth: MAX_DEFINITION_DEPTH,
            });
        }

        let count = self.reader.read_u8()?;
        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let tag = self.reader.read_u8()?;
            let name = self.reader.read_short_string()?;
            let ty = match tag {
                0 => FieldType::NameRef,
                1 => FieldType::Object(self.read_definition(depth + 1)?),
                2 => FieldType::Bool,
                3 => FieldType::Str,
                4 => FieldType::ObjectArray(self.read_definition(depth + 1)?),
                5 => FieldType::BoolArray,
                6 => FieldType::IntArray,
                7 => FieldType::FloatArray,
                8 => FieldType::Int,
                9 => FieldType::Float,
                10 => FieldType::Timestamp,
                11 => FieldType::StrArray,
                12 => FieldType::Double,
                13 => FieldType::UShort,
                other => {
                    return Err(FormatError::UnknownFieldType { tag: other, field: name });
                }
            };
            fields.push(FieldDef { name, ty });
        }
        Ok(StructDefinition { fields })
    }

    fn read_record(&mut self, definition: &StructDefinition) -> Result<Record, FormatError> {
        let mut out = Record::new();
        for field in &definition.fields {
            let flags = self.reader.read_u8()?;
            if WireReader::flag(flags, FLAG_NULL) {
                out.insert(field.name.clone(), Value::Null);
                continue;
            }

            let value = match &field.ty {
                FieldType::NameRef => {
                    let index = usize::from(self.reader.read_u16()?);
                    Value::Str(self.name(index)?)
                }
                FieldType::Object(child) => Value::Object(self.read_record(child)?),
                FieldType::Bool => Value::Bool(WireReader::flag(flags, FLAG_BOOL)),
                FieldType::Str => {
                    let len = self.read_flagged_len(flags)?;
                    Value::Str(self.reader.read_fixed_string(len)?)
                }
                FieldType::ObjectArray(child) => {
                    self.read_array(flags, |d| Ok(Value::Object(d.read_record(child)?)))?
                }
                FieldType::BoolArray => {
                    self.read_array(flags, |d| Ok(Value::Bool(d.reader.read_u8()? == 1)))?
                }
                FieldType::IntArray => self.read_array(flags, |d| Ok(d.reader.read_i32()?.into()))?,
                FieldType::FloatArray => self.read_array(flags, |d| Ok(d.reader.read_f32()?.into()))?,
                FieldType::Int | FieldType::Timestamp => self.reader.read_i32()?.into(),
                FieldType::Float | FieldType::Double => self.reader.read_f32()?.into(),
                FieldType::StrArray => {
                    let wide = WireReader::flag(flags, FLAG_WIDE_STRINGS);
                    self.read_array(flags, |d| {
                        let s = if wide {
                            d.reader.read_long_string()?
                        } else {
                            d.reader.read_short_string()?
                        };
                        Ok(Value::Str(s))
                    })?
                }
                FieldType::UShort => self.reader.read_u16()?.into(),
            };
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }

    fn read_array<F>(&mut self, flags: u8, mut element: F) -> Result<Value, FormatError>
    where
        F: FnMut(&mut Self) -> Result<Value, FormatError>,
    {
        let count = self.read_flagged_len(flags)?;

        if WireReader::flag(flags, FLAG_ALL_NULL) {
            return Ok(Value::Array(vec![Value::Null; count]));
        }

        let any_null = WireReader::flag(flags, FLAG_ANY_NULL);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            if any_null {
                let element_flags = self.reader.read_u8()?;
                if WireReader::flag(element_flags, 0) {
                    out.push(Value::Null);
                    continue;
                }
            }
            out.push(element(self)?);
        }
        Ok(Value::Array(out))
    }

    fn read_flagged_len(&mut self, flags: u8) -> Result<usize, FormatError> {
        if WireReader::flag(flags, FLAG_WIDE_LEN) {
            Ok(usize::from(self.reader.read_u16()?))
        } else {
            Ok(usize::from(self.reader.read_u8()?))
        }
    }

    fn name(&self, index: usize) -> Result<String, FormatError> {
        self.name_table
            .get(index)
            .cloned()
            .ok_or(FormatError::NameIndexOutOfRange {
                index,
                len: self.name_table.len(),
            })
    }
}
