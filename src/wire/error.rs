use thiserror::Error;

/// Fatal decode failure; the whole buffer must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Read past the end of the buffer.
    #[error("truncated input: wanted {wanted} bytes at offset {offset}, buffer is {len} bytes")]
    Truncated {
        /// Cursor position when the read started.
        offset: usize,
        /// Bytes requested.
        wanted: usize,
        /// Total buffer length.
        len: usize,
    },

    /// Leading magic did not match; this is not the expected format.
    #[error("not a recognized file: magic {found:#010x}, expected {expected:#010x}")]
    BadMagic {
        /// Magic the format requires.
        expected: u32,
        /// Magic actually read.
        found: u32,
    },

    /// Format version is not supported by this client.
    #[error("unsupported format version {found} (expected {expected}); outdated client?")]
    UnsupportedVersion {
        /// Supported version.
        expected: u32,
        /// Version actually read.
        found: u32,
    },

    /// Struct definition used a type tag outside 0..=13.
    #[error("unknown field type tag {tag} for field {field:?}")]
    UnknownFieldType {
        /// Offending tag.
        tag: u8,
        /// Field name the tag was attached to.
        field: String,
    },

    /// One of the trailing sentinel words was wrong; the stream desynchronized.
    #[error("file not read correctly: trailer word {index} was {found:#010x}, expected {expected:#010x}")]
    TrailerMismatch {
        /// Zero-based trailer word index.
        index: usize,
        /// Expected sentinel.
        expected: u32,
        /// Word actually read.
        found: u32,
    },

    /// A name-table reference pointed outside the table.
    #[error("name table index {index} out of range (table has {len} entries)")]
    NameIndexOutOfRange {
        /// Index read from the record.
        index: usize,
        /// Name table length.
        len: usize,
    },

    /// A commit-table reference pointed outside the table.
    #[error("commit table index {index} out of range (table has {len} entries)")]
    CommitIndexOutOfRange {
        /// Index read from the record.
        index: usize,
        /// Commit table length.
        len: usize,
    },

    /// Records were announced for a definition with no fields.
    #[error("{count} records announced for an empty struct definition")]
    EmptyDefinition {
        /// Element count from the header.
        count: u32,
    },

    /// Struct definitions nested deeper than the decoder allows.
    #[error("struct definition nested deeper than {depth} levels")]
    NestingTooDeep {
        /// Depth limit that was exceeded.
        depth: usize,
    },
}
