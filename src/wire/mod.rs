//! Binary wire-format decoders for bulk bootstrap pages.

/// Decode failures shared by both formats.
pub mod error;
/// Forward-only little-endian cursor.
pub mod reader;
/// Self-describing schema-driven format.
pub mod schema;
/// Fixed-layout structures format.
pub mod structures;
