use crate::record::{MirroredRecord, Value};

/// Accepts or rejects one record. Views combine predicates conjunctively.
pub trait Predicate: Send + Sync {
    /// True when `record` passes.
    fn accepts(&self, record: &MirroredRecord) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&MirroredRecord) -> bool + Send + Sync,
{
    fn accepts(&self, record: &MirroredRecord) -> bool {
        self(record)
    }
}

/// Passes records whose top-level `field` equals `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEquals {
    /// Top-level field name.
    pub field: String,
    /// Required value.
    pub value: Value,
}

impl FieldEquals {
    /// Filter on `field == value`.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl Predicate for FieldEquals {
    fn accepts(&self, record: &MirroredRecord) -> bool {
        record.fields.get(&self.field) == Some(&self.value)
    }
}
