//! Decoder for the fixed-layout structures format (`structures_bin`).
//!
//! ```text
//! u32 magic | u16 version | u16 name_count | names (NUL-terminated)
//! u16 commit_count | commit ids (NUL-terminated)
//! u16 record_count | records
//! ```
//!
//! Each record is 25 bytes: u16 name index, u8 flags, u8 scaled yaw,
//! u8 commit index, u8 commit type, i32 structure id, i32 tribe id,
//! f32 x, f32 y, f32 z.

use serde::{Deserialize, Serialize};

use crate::{
    record::{Record, Value},
    types::CommitType,
};

use super::{error::FormatError, reader::WireReader};

/// File magic.
pub const STRUCTURES_MAGIC: u32 = 1_397_577_540;
/// Supported version.
pub const STRUCTURES_VERSION: u16 = 2;
/// Degrees per unit of the packed yaw byte.
pub const ROTATION_SCALE: f32 = 1.411_764_7;

const FLAG_HAS_INVENTORY: u8 = 0;

/// World placement of a structure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// World X.
    pub x: f32,
    /// World Y.
    pub y: f32,
    /// World Z.
    pub z: f32,
    /// Recovered from the packed byte; resolution is `ROTATION_SCALE`.
    pub yaw: f32,
    /// Not carried on the wire; always zero.
    pub pitch: f32,
    /// Not carried on the wire; always zero.
    pub roll: f32,
}

/// One decoded structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecord {
    /// Class name resolved through the name table.
    pub classname: String,
    /// Placement.
    pub location: Location,
    /// Owner-scoped structure id; the bucket key.
    pub structure_id: i32,
    /// Owning tribe.
    pub tribe_id: i32,
    /// Flag bit 0.
    pub has_inventory: bool,
    /// Commit id resolved through the commit table.
    pub commit_id: String,
    /// Commit type the structure was last written under.
    pub commit_type: CommitType,
}

impl StructureRecord {
    /// Converts into the generic record shape used by the mirror.
    pub fn into_record(self) -> Record {
        let mut location = Record::new();
        location.insert("x", self.location.x);
        location.insert("y", self.location.y);
        location.insert("z", self.location.z);
        location.insert("yaw", self.location.yaw);
        location.insert("pitch", self.location.pitch);
        location.insert("roll", self.location.roll);

        let mut out = Record::new();
        out.insert("classname", self.classname);
        out.insert("location", location);
        out.insert("structure_id", self.structure_id);
        out.insert("tribe_id", self.tribe_id);
        out.insert("has_inventory", self.has_inventory);
        out.insert("commit_id", self.commit_id);
        out.insert("commit_type", Value::Int(i64::from(self.commit_type)));
        out
    }
}

/// Fully decoded buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuresDocument {
    /// Class names referenced by records.
    pub name_table: Vec<String>,
    /// Commit ids referenced by records.
    pub commit_table: Vec<String>,
    /// Decoded records in wire order.
    pub records: Vec<StructureRecord>,
}

/// Decodes a complete buffer or fails without partial output.
pub fn decode_structures(bytes: &[u8]) -> Result<StructuresDocument, FormatError> {
    let mut reader = WireReader::new(bytes);

    let magic = reader.read_u32()?;
    if magic != STRUCTURES_MAGIC {
        return Err(FormatError::BadMagic {
            expected: STRUCTURES_MAGIC,
            found: magic,
        });
    }
    let version = reader.read_u16()?;
    if version != STRUCTURES_VERSION {
        return Err(FormatError::UnsupportedVersion {
            expected: u32::from(STRUCTURES_VERSION),
            found: u32::from(version),
        });
    }

    let name_count = reader.read_u16()?;
    let mut name_table = Vec::with_capacity(usize::from(name_count));
    for _ in 0..name_count {
        name_table.push(reader.read_null_terminated_string()?);
    }

    let commit_count = reader.read_u16()?;
    let mut commit_table = Vec::with_capacity(usize::from(commit_count));
    for _ in 0..commit_count {
        commit_table.push(reader.read_null_terminated_string()?);
    }

    let record_count = reader.read_u16()?;
    let mut records = Vec::with_capacity(usize::from(record_count));
    for _ in 0..record_count {
        records.push(read_structure(&mut reader, &name_table, &commit_table)?);
    }

    Ok(StructuresDocument {
        name_table,
        commit_table,
        records,
    })
}

fn read_structure(
    reader: &mut WireReader<'_>,
    name_table: &[String],
    commit_table: &[String],
) -> Result<StructureRecord, FormatError> {
    let name_index = usize::from(reader.read_u16()?);
    let flags = reader.read_u8()?;
    let yaw = f32::from(reader.read_u8()?) * ROTATION_SCALE;
    let commit_index = usize::from(reader.read_u8()?);
    let commit_type = reader.read_u8()?;
    let structure_id = reader.read_i32()?;
    let tribe_id = reader.read_i32()?;
    let x = reader.read_f32()?;
    let y = reader.read_f32()?;
    let z = reader.read_f32()?;

    let classname = name_table
        .get(name_index)
        .cloned()
        .ok_or(FormatError::NameIndexOutOfRange {
            index: name_index,
            len: name_table.len(),
        })?;
    let commit_id = commit_table
        .get(commit_index)
        .cloned()
        .ok_or(FormatError::CommitIndexOutOfRange {
            index: commit_index,
            len: commit_table.len(),
        })?;

    Ok(StructureRecord {
        classname,
        location: Location {
            x,
            y,
            z,
            yaw,
            pitch: 0.0,
            roll: 0.0,
        },
        structure_id,
        tribe_id,
        has_inventory: WireReader::flag(flags, FLAG_HAS_INVENTORY),
        commit_id,
        commit_type,
    })
}
