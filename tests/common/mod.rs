#![allow(dead_code)]

//! Test-only encoders for both page formats.

use bucketsync::{
    record::{Record, Value},
    wire::{
        schema::{FieldDef, FieldType, SCHEMA_MAGIC, SCHEMA_TRAILER, SCHEMA_VERSION, StructDefinition},
        structures::{STRUCTURES_MAGIC, STRUCTURES_VERSION},
    },
};

#[derive(Debug, Default)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn short_str(&mut self, s: &str) -> &mut Self {
        self.u8(s.len() as u8).raw(s.as_bytes())
    }

    pub fn long_str(&mut self, s: &str) -> &mut Self {
        self.u16(s.len() as u16).raw(s.as_bytes())
    }

    pub fn cstr(&mut self, s: &str) -> &mut Self {
        self.raw(s.as_bytes()).u8(0)
    }
}

pub fn field(name: &str, ty: FieldType) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        ty,
    }
}

pub fn def(fields: Vec<FieldDef>) -> StructDefinition {
    StructDefinition { fields }
}

/// Builds a schema-format page. Name references are resolved against `names`.
pub struct SchemaPage {
    pub custom: Vec<(u8, Vec<u8>)>,
    pub names: Vec<String>,
    pub definition: StructDefinition,
    pub records: Vec<Record>,
}

impl SchemaPage {
    pub fn new(definition: StructDefinition) -> Self {
        Self {
            custom: Vec::new(),
            names: Vec::new(),
            definition,
            records: Vec::new(),
        }
    }

    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn custom(mut self, id: u8, payload: &[u8]) -> Self {
        self.custom.push((id, payload.to_vec()));
        self
    }

    pub fn record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(SCHEMA_MAGIC, SCHEMA_VERSION, SCHEMA_TRAILER)
    }

    pub fn encode_with(&self, magic: u32, version: u32, trailer: [u32; 5]) -> Vec<u8> {
        let mut out = Bytes::default();
        out.u32(magic)
            .u32(self.names.len() as u32)
            .u32(version)
            .u32(self.records.len() as u32);

        out.u8(self.custom.len() as u8);
        for (id, payload) in &self.custom {
            out.u8(*id).u8(payload.len() as u8).raw(payload);
        }

        for name in &self.names {
            out.long_str(name);
        }

        write_definition(&mut out, &self.definition);
        for record in &self.records {
            self.write_record(&mut out, &self.definition, record);
        }
        for word in trailer {
            out.u32(word);
        }
        out.0
    }

    fn write_record(&self, out: &mut Bytes, definition: &StructDefinition, record: &Record) {
        for f in &definition.fields {
            let value = record.get(&f.name).cloned().unwrap_or(Value::Null);
            self.write_field(out, &f.ty, &value);
        }
    }

    fn write_field(&self, out: &mut Bytes, ty: &FieldType, value: &Value) {
        if value.is_null() {
            out.u8(0x80);
            return;
        }
        match (ty, value) {
            (FieldType::NameRef, Value::Str(s)) => {
                let index = self
                    .names
                    .iter()
                    .position(|n| n == s)
                    .expect("name in table");
                out.u8(0).u16(index as u16);
            }
            (FieldType::Object(child), Value::Object(r)) => {
                out.u8(0);
                self.write_record(out, child, r);
            }
            (FieldType::Bool, Value::Bool(b)) => {
                out.u8(u8::from(*b));
            }
            (FieldType::Str, Value::Str(s)) => {
                if s.len() > 255 {
                    out.u8(1).long_str(s);
                } else {
                    out.u8(0).short_str(s);
                }
            }
            (FieldType::Int | FieldType::Timestamp, Value::Int(v)) => {
                out.u8(0).i32(*v as i32);
            }
            (FieldType::Float | FieldType::Double, Value::Float(v)) => {
                out.u8(0).f32(*v as f32);
            }
            (FieldType::UShort, Value::Int(v)) => {
                out.u8(0).u16(*v as u16);
            }
            (
                FieldType::ObjectArray(_)
                | FieldType::BoolArray
                | FieldType::IntArray
                | FieldType::FloatArray
                | FieldType::StrArray,
                Value::Array(items),
            ) => self.write_array(out, ty, items),
            (ty, value) => panic!("encoder cannot write {value:?} as {ty:?}"),
        }
    }

    fn write_array(&self, out: &mut Bytes, ty: &FieldType, items: &[Value]) {
        let wide_len = items.len() > 255;
        let all_null = !items.is_empty() && items.iter().all(Value::is_null);
        let any_null = !all_null && items.iter().any(Value::is_null);
        let wide_strings = matches!(ty, FieldType::StrArray)
            && items
                .iter()
                .any(|v| v.as_str().is_some_and(|s| s.len() > 255));

        let mut flags = 0u8;
        if wide_len {
            flags |= 1;
        }
        if any_null {
            flags |= 1 << 1;
        }
        if all_null {
            flags |= 1 << 2;
        }
        if wide_strings {
            flags |= 1 << 4;
        }
        out.u8(flags);
        if wide_len {
            out.u16(items.len() as u16);
        } else {
            out.u8(items.len() as u8);
        }
        if all_null {
            return;
        }

        for item in items {
            if any_null {
                out.u8(u8::from(item.is_null()));
                if item.is_null() {
                    continue;
                }
            }
            match (ty, item) {
                (FieldType::ObjectArray(child), Value::Object(r)) => self.write_record(out, child, r),
                (FieldType::BoolArray, Value::Bool(b)) => {
                    out.u8(u8::from(*b));
                }
                (FieldType::IntArray, Value::Int(v)) => {
                    out.i32(*v as i32);
                }
                (FieldType::FloatArray, Value::Float(v)) => {
                    out.f32(*v as f32);
                }
                (FieldType::StrArray, Value::Str(s)) => {
                    if wide_strings {
                        out.long_str(s);
                    } else {
                        out.short_str(s);
                    }
                }
                (ty, item) => panic!("encoder cannot write element {item:?} of {ty:?}"),
            }
        }
    }
}

pub fn write_definition(out: &mut Bytes, definition: &StructDefinition) {
    out.u8(definition.fields.len() as u8);
    for f in &definition.fields {
        out.u8(f.ty.tag()).short_str(&f.name);
        if let Some(child) = f.ty.child() {
            write_definition(out, child);
        }
    }
}

/// One fixed-layout row, with table indices instead of resolved strings.
#[derive(Debug, Clone)]
pub struct StructureRow {
    pub name_index: u16,
    pub has_inventory: bool,
    pub yaw_byte: u8,
    pub commit_index: u8,
    pub commit_type: u8,
    pub structure_id: i32,
    pub tribe_id: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl StructureRow {
    pub fn new(structure_id: i32) -> Self {
        Self {
            name_index: 0,
            has_inventory: false,
            yaw_byte: 0,
            commit_index: 0,
            commit_type: 1,
            structure_id,
            tribe_id: 7,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

pub fn structures_page(names: &[&str], commits: &[&str], rows: &[StructureRow]) -> Vec<u8> {
    structures_page_with(STRUCTURES_MAGIC, STRUCTURES_VERSION, names, commits, rows)
}

pub fn structures_page_with(
    magic: u32,
    version: u16,
    names: &[&str],
    commits: &[&str],
    rows: &[StructureRow],
) -> Vec<u8> {
    let mut out = Bytes::default();
    out.u32(magic).u16(version);
    out.u16(names.len() as u16);
    for name in names {
        out.cstr(name);
    }
    out.u16(commits.len() as u16);
    for commit in commits {
        out.cstr(commit);
    }
    out.u16(rows.len() as u16);
    for row in rows {
        out.u16(row.name_index)
            .u8(u8::from(row.has_inventory))
            .u8(row.yaw_byte)
            .u8(row.commit_index)
            .u8(row.commit_type)
            .i32(row.structure_id)
            .i32(row.tribe_id)
            .f32(row.x)
            .f32(row.y)
            .f32(row.z);
    }
    out.0
}

/// Record with only a key field plus extra `(name, value)` pairs.
pub fn keyed(key_field: &str, key: &str, extra: &[(&str, Value)]) -> Record {
    let mut record = Record::new();
    record.insert(key_field, key);
    for (name, value) in extra {
        record.insert(*name, value.clone());
    }
    record
}
