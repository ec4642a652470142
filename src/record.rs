//! Decoded record values, commit tags, and the mirrored record wrapper.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{CommitType, EntityId};

/// A single decoded field value.
///
/// Binary decoders widen every integer kind to `Int` and every float kind to
/// `Float`; JSON entities deserialize straight into the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit null (flag bit 7, or JSON `null`).
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer kind (int32, uint16, epoch seconds, JSON integer).
    Int(i64),
    /// Any float kind (float32 on the wire, JSON number with a fraction).
    Float(f64),
    /// String, either inline or resolved from a name table.
    Str(String),
    /// Homogeneous array; elements may be null.
    Array(Vec<Value>),
    /// Nested record.
    Object(Record),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Nested record, if any.
    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Array elements, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Text form used as an entity key. Only strings and integers qualify.
    pub fn key_text(&self) -> Option<String> {
        match self {
            Self::Str(v) => Some(v.clone()),
            Self::Int(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Object(value)
    }
}

/// Mapping from field name to decoded value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    /// Looks up a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Field count.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overwrites every field present in `incoming`; fields it lacks are kept.
    pub fn merge_from(&mut self, incoming: Record) {
        for (name, value) in incoming.0 {
            self.0.insert(name, value);
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Commit metadata attached to a record at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTag {
    /// Commit that last delivered this record; `None` for untagged bootstrap data.
    pub commit_id: Option<String>,
    /// Commit type the record belongs to; drives FINALIZE pruning.
    pub commit_type: CommitType,
}

/// Authoritative mirrored entity: key, commit tag, and current fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredRecord {
    /// Stable entity key.
    pub id: EntityId,
    /// Commit tag from the latest ingestion.
    pub commit: CommitTag,
    /// Current field values.
    pub fields: Record,
}

impl MirroredRecord {
    /// Re-ingests a newer copy of the same entity in place.
    pub fn merge(&mut self, incoming: Record, commit: CommitTag) {
        self.fields.merge_from(incoming);
        self.commit = commit;
    }
}
