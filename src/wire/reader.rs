//! Forward-only cursor over a byte buffer.
//!
//! All multi-byte reads are little-endian. Strings are one byte per
//! character; there is no backward seek.

use super::error::FormatError;

/// Sequential reader over an immutable buffer.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Starts reading at offset zero.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns bit `index` of a previously read flag byte.
    pub fn flag(flags: u8, index: u8) -> bool {
        (flags >> index) & 1 == 1
    }

    /// Advances past `len` bytes without interpreting them.
    pub fn skip(&mut self, len: usize) -> Result<(), FormatError> {
        self.take(len).map(|_| ())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a signed byte.
    pub fn read_i8(&mut self) -> Result<i8, FormatError> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16, FormatError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Reads exactly `len` bytes as a string.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String, FormatError> {
        let bytes = self.take(len)?;
        Ok(latin1(bytes))
    }

    /// Reads a string prefixed by a 1-byte length.
    pub fn read_short_string(&mut self) -> Result<String, FormatError> {
        let len = self.read_u8()?;
        self.read_fixed_string(usize::from(len))
    }

    /// Reads a string prefixed by a 2-byte length.
    pub fn read_long_string(&mut self) -> Result<String, FormatError> {
        let len = self.read_u16()?;
        self.read_fixed_string(usize::from(len))
    }

    /// Reads bytes up to and including a `0` terminator.
    pub fn read_null_terminated_string(&mut self) -> Result<String, FormatError> {
        let rest = &self.buf[self.pos..];
        let Some(end) = rest.iter().position(|b| *b == 0) else {
            return Err(FormatError::Truncated {
                offset: self.pos,
                wanted: rest.len() + 1,
                len: self.buf.len(),
            });
        };
        let out = latin1(&rest[..end]);
        self.pos += end + 1;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < len {
            return Err(FormatError::Truncated {
                offset: self.pos,
                wanted: len,
                len: self.buf.len(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}
