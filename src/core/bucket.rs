use serde::{Deserialize, Serialize};

use crate::{
    record::Record,
    types::CommitType,
    wire::{error::FormatError, schema::decode_schema, structures::decode_structures},
};

/// Page encoding requested from the bulk endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentFormat {
    /// Self-describing schema format.
    #[serde(rename = "dwf_v1")]
    Schema,
    /// Fixed-layout structures format.
    #[serde(rename = "structures_bin")]
    Structures,
}

impl ContentFormat {
    /// Query-string tag understood by the server.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Schema => "dwf_v1",
            Self::Structures => "structures_bin",
        }
    }

    /// Decodes one page into generic records. Fails as a whole.
    pub fn decode(self, bytes: &[u8]) -> Result<Vec<Record>, FormatError> {
        match self {
            Self::Schema => Ok(decode_schema(bytes)?.records),
            Self::Structures => Ok(decode_structures(bytes)?
                .records
                .into_iter()
                .map(|s| s.into_record())
                .collect()),
        }
    }
}

/// Static description of one bucket kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketSpec {
    /// Bucket name used in URLs.
    pub name: String,
    /// Commit type this bucket answers to.
    pub commit_type: CommitType,
    /// Record field holding the entity key.
    pub uuid_field: String,
    /// Page encoding.
    pub format: ContentFormat,
}

impl BucketSpec {
    /// Builds a descriptor.
    pub fn new(
        name: impl Into<String>,
        commit_type: CommitType,
        uuid_field: impl Into<String>,
        format: ContentFormat,
    ) -> Self {
        Self {
            name: name.into(),
            commit_type,
            uuid_field: uuid_field.into(),
            format,
        }
    }

    /// Tamed creatures keyed by `dino_id`.
    pub fn dinos() -> Self {
        Self::new("dinos", 0, "dino_id", ContentFormat::Schema)
    }

    /// Placed structures keyed by `structure_id`.
    pub fn structures() -> Self {
        Self::new("structures", 1, "structure_id", ContentFormat::Structures)
    }

    /// Inventories keyed by `holder_id`.
    pub fn inventories() -> Self {
        Self::new("inventories", 2, "holder_id", ContentFormat::Schema)
    }
}
