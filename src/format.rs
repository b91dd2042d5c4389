// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Low-level byte readers, writers, and the size-class varint.
//!
//! Integers on the wire are prefixed with a four-bit size-class tag:
//!
//! | tag     | meaning                                      |
//! |---------|----------------------------------------------|
//! | 0..=7   | the value itself, no payload                 |
//! | 8..=11  | unsigned payload of 1, 2, 4, or 8 LE bytes   |
//! | 12..=15 | negated payload of 1, 2, 4, or 8 LE bytes    |
//!
//! A solo varint stores its tag in the low nibble of one byte with the high
//! nibble zero. Two adjacent varints can share a single tag byte in a pair
//! form, with the first value's tag in the high nibble. Negated classes let
//! small-magnitude negative two's-complement values stay short: `-1` as a
//! `u64` costs two bytes instead of nine.

use thiserror::Error;

/// Errors produced while reading raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The input ended before the expected data.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Offset at which more bytes were required.
        offset: usize,
    },
    /// A varint tag nibble that is not assigned.
    #[error("invalid varint tag {tag:#x} at offset {offset}")]
    InvalidVarintTag {
        /// The offending tag nibble.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },
}

/// A cursor over an input byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader at the start of `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Current offset from the start of the input.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the whole input has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    /// Takes the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(ReadError::UnexpectedEof { offset: self.offset })?;
        let out = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    /// Reads bytes up to and excluding the next NUL, consuming the NUL.
    pub fn take_until_nul(&mut self) -> Result<&'a [u8], ReadError> {
        let rest = &self.bytes[self.offset..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ReadError::UnexpectedEof { offset: self.bytes.len() })?;
        let out = &rest[..len];
        self.offset += len + 1;
        Ok(out)
    }

    fn read_payload(&mut self, class: u8) -> Result<u64, ReadError> {
        let n = 1usize << (class & 3);
        let bytes = self.take(n)?;
        let mut buf = [0u8; 8];
        buf[..n].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn finish_varint(&mut self, tag: u8, tag_offset: usize) -> Result<u64, ReadError> {
        match tag {
            0..=7 => Ok(u64::from(tag)),
            8..=11 => self.read_payload(tag - 8),
            12..=15 => Ok(self.read_payload(tag - 12)?.wrapping_neg()),
            _ => Err(ReadError::InvalidVarintTag { tag, offset: tag_offset }),
        }
    }

    /// Reads a solo-form varint.
    ///
    /// The high nibble of the tag byte must be zero.
    pub fn read_varint(&mut self) -> Result<u64, ReadError> {
        let tag_offset = self.offset;
        let byte = self.read_u8()?;
        if byte >> 4 != 0 {
            return Err(ReadError::InvalidVarintTag { tag: byte, offset: tag_offset });
        }
        self.finish_varint(byte & 0xf, tag_offset)
    }

    /// Reads a pair-form varint: two values sharing one tag byte.
    pub fn read_varint_pair(&mut self) -> Result<(u64, u64), ReadError> {
        let tag_offset = self.offset;
        let byte = self.read_u8()?;
        let first = self.finish_varint(byte >> 4, tag_offset)?;
        let second = self.finish_varint(byte & 0xf, tag_offset)?;
        Ok((first, second))
    }
}

/// An append-only byte sink.
#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

/// Size class of a varint value: its tag nibble and payload byte count.
fn size_class(value: u64) -> (u8, usize) {
    if value < 8 {
        return (value as u8, 0);
    }
    // Top bit set reads as a small negative two's-complement value; store
    // the negated magnitude under a sign class.
    let (base, magnitude) =
        if value >> 63 != 0 { (12u8, value.wrapping_neg()) } else { (8u8, value) };
    match magnitude {
        0..=0xff => (base, 1),
        0x100..=0xffff => (base + 1, 2),
        0x1_0000..=0xffff_ffff => (base + 2, 4),
        _ => (base + 3, 8),
    }
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer, returning the accumulated bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Appends one byte.
    pub fn write_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn write_payload(&mut self, tag: u8, n: usize, value: u64) {
        let magnitude = if tag >= 12 { value.wrapping_neg() } else { value };
        self.bytes.extend_from_slice(&magnitude.to_le_bytes()[..n]);
    }

    /// Appends a solo-form varint.
    pub fn write_varint(&mut self, value: u64) {
        let (tag, n) = size_class(value);
        self.write_u8(tag);
        self.write_payload(tag, n, value);
    }

    /// Appends two varints in pair form, sharing one tag byte.
    pub fn write_varint_pair(&mut self, first: u64, second: u64) {
        let (tag_a, n_a) = size_class(first);
        let (tag_b, n_b) = size_class(second);
        self.write_u8((tag_a << 4) | tag_b);
        self.write_payload(tag_a, n_a, first);
        self.write_payload(tag_b, n_b, second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u64) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_varint(value);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varint(), Ok(value));
        assert!(r.is_empty());
        bytes
    }

    #[test]
    fn varint_inline() {
        for v in 0..8u64 {
            assert_eq!(roundtrip(v), vec![v as u8]);
        }
    }

    #[test]
    fn varint_size_classes() {
        assert_eq!(roundtrip(8).len(), 2);
        assert_eq!(roundtrip(0xff).len(), 2);
        assert_eq!(roundtrip(0x100).len(), 3);
        assert_eq!(roundtrip(0xffff).len(), 3);
        assert_eq!(roundtrip(0x1_0000).len(), 5);
        assert_eq!(roundtrip(0xffff_ffff).len(), 5);
        assert_eq!(roundtrip(0x1_0000_0000).len(), 9);
    }

    #[test]
    fn varint_negated() {
        // -1 uses a sign class with a one-byte magnitude.
        assert_eq!(roundtrip(u64::MAX), vec![12, 1]);
        assert_eq!(roundtrip((-300i64) as u64).len(), 3);
        assert_eq!(roundtrip(i64::MIN as u64).len(), 9);
    }

    #[test]
    fn varint_pair_packing() {
        let mut w = Writer::new();
        w.write_varint_pair(3, 0x1234);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0x39, 0x34, 0x12]);
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varint_pair(), Ok((3, 0x1234)));
        assert!(r.is_empty());
    }

    #[test]
    fn varint_pair_both_inline() {
        let mut w = Writer::new();
        w.write_varint_pair(5, 2);
        assert_eq!(w.into_bytes(), vec![0x52]);
    }

    #[test]
    fn solo_rejects_nonzero_high_nibble() {
        let mut r = Reader::new(&[0x52]);
        assert_eq!(
            r.read_varint(),
            Err(ReadError::InvalidVarintTag { tag: 0x52, offset: 0 })
        );
    }

    #[test]
    fn truncated_payload() {
        let mut r = Reader::new(&[9, 0xaa]);
        assert_eq!(r.read_varint(), Err(ReadError::UnexpectedEof { offset: 1 }));
    }

    #[test]
    fn nul_terminated_runs() {
        let mut r = Reader::new(b"abc\0\0de\0");
        assert_eq!(r.take_until_nul(), Ok(&b"abc"[..]));
        assert_eq!(r.take_until_nul(), Ok(&b""[..]));
        assert_eq!(r.take_until_nul(), Ok(&b"de"[..]));
        assert!(r.is_empty());
    }

    #[test]
    fn unterminated_run() {
        let mut r = Reader::new(b"abc");
        assert_eq!(r.take_until_nul(), Err(ReadError::UnexpectedEof { offset: 3 }));
    }
}
