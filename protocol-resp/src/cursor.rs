//! Byte cursor over the current chunk, plus the carry-over buffers that let a
//! line or a fixed-length span straddle chunk boundaries.

use std::ops::Deref;

use bytes::{Bytes, BytesMut};

use crate::error::ParseError;

/// Read position within a single chunk.
pub(crate) struct Cursor<'a> {
    chunk: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[inline]
    pub(crate) fn new(chunk: &'a [u8]) -> Self {
        Self { chunk, pos: 0 }
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.chunk.len() - self.pos
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.chunk.len()
    }

    #[inline]
    pub(crate) fn take_byte(&mut self) -> Option<u8> {
        let byte = *self.chunk.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    #[inline]
    fn rest(&self) -> &'a [u8] {
        &self.chunk[self.pos..]
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.pos += n;
    }
}

/// A completed line, without its `\r\n`.
///
/// Borrowed straight from the chunk when the whole line arrived at once,
/// owned when it had to be stitched together from several chunks.
pub(crate) enum Line<'a> {
    Borrowed(&'a [u8]),
    Owned(BytesMut),
}

impl Deref for Line<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Line::Borrowed(line) => line,
            Line::Owned(line) => &line[..],
        }
    }
}

impl Line<'_> {
    pub(crate) fn into_bytes(self) -> Bytes {
        match self {
            Line::Borrowed(line) => Bytes::copy_from_slice(line),
            Line::Owned(line) => line.freeze(),
        }
    }
}

/// Carry-over state for a CRLF-terminated line.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    partial: BytesMut,
}

impl LineBuffer {
    /// Read up to and including the next `\n`.
    ///
    /// Returns `Ok(None)` after buffering the rest of the chunk when no
    /// terminator is present. The `\r` may have arrived in an earlier chunk.
    /// At most `max` bytes plus the `\r` are carried between chunks.
    pub(crate) fn read_line<'a>(
        &mut self,
        cursor: &mut Cursor<'a>,
        max: usize,
    ) -> Result<Option<Line<'a>>, ParseError> {
        let rest = cursor.rest();
        let Some(pos) = memchr::memchr(b'\n', rest) else {
            if self.partial.len() + rest.len() > max.saturating_add(1) {
                return Err(line_too_long(max));
            }
            self.partial.extend_from_slice(rest);
            cursor.advance(rest.len());
            return Ok(None);
        };
        cursor.advance(pos + 1);

        if self.partial.is_empty() {
            return match rest[..pos].split_last() {
                Some((b'\r', line)) => Ok(Some(Line::Borrowed(line))),
                _ => Err(missing_cr()),
            };
        }

        self.partial.extend_from_slice(&rest[..pos]);
        let mut line = self.partial.split();
        if line.last() != Some(&b'\r') {
            return Err(missing_cr());
        }
        line.truncate(line.len() - 1);
        Ok(Some(Line::Owned(line)))
    }

    /// Whether part of a line is buffered.
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.partial.clear();
    }
}

/// Carry-over state for a fixed-length binary span.
#[derive(Debug, Default)]
pub(crate) struct BlobBuffer {
    partial: BytesMut,
}

impl BlobBuffer {
    /// Read exactly `len` bytes, accumulating across calls.
    ///
    /// Returns `None` once the chunk is exhausted before `len` bytes have
    /// been collected; the fragments are kept for the next call.
    pub(crate) fn read_exact(&mut self, cursor: &mut Cursor<'_>, len: usize) -> Option<Bytes> {
        let rest = cursor.rest();
        if self.partial.is_empty() && rest.len() >= len {
            cursor.advance(len);
            return Some(Bytes::copy_from_slice(&rest[..len]));
        }

        let needed = len - self.partial.len();
        let take = needed.min(rest.len());
        if self.partial.is_empty() {
            self.partial.reserve(len.min(MAX_PREALLOCATION));
        }
        self.partial.extend_from_slice(&rest[..take]);
        cursor.advance(take);

        if self.partial.len() == len {
            Some(self.partial.split().freeze())
        } else {
            None
        }
    }

    /// Number of bytes collected so far for the current span.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.partial.len()
    }

    pub(crate) fn clear(&mut self) {
        self.partial.clear();
    }
}

/// Upper bound on the up-front reservation for a split span; larger spans
/// grow as their fragments arrive.
const MAX_PREALLOCATION: usize = 1024 * 1024;

fn line_too_long(max: usize) -> ParseError {
    ParseError::Protocol(format!("unterminated line exceeds {max} bytes"))
}

fn missing_cr() -> ParseError {
    ParseError::Protocol("line not terminated by CRLF".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_in_one_chunk_is_borrowed() {
        let mut buffer = LineBuffer::default();
        let mut cursor = Cursor::new(b"OK\r\nrest");
        let line = buffer.read_line(&mut cursor, 64).unwrap().unwrap();
        assert!(matches!(line, Line::Borrowed(_)));
        assert_eq!(&*line, b"OK");
        assert_eq!(cursor.remaining(), 4);
    }

    #[test]
    fn line_split_between_cr_and_lf() {
        let mut buffer = LineBuffer::default();
        let mut first = Cursor::new(b"hello\r");
        assert!(buffer.read_line(&mut first, 64).unwrap().is_none());
        assert!(first.is_empty());
        assert!(!buffer.is_empty());

        let mut second = Cursor::new(b"\n+next");
        let line = buffer.read_line(&mut second, 64).unwrap().unwrap();
        assert_eq!(&*line, b"hello");
        assert_eq!(second.remaining(), 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn line_without_cr_is_rejected() {
        let mut buffer = LineBuffer::default();
        let mut cursor = Cursor::new(b"bad\n");
        assert!(matches!(
            buffer.read_line(&mut cursor, 64),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn carried_line_is_bounded() {
        let mut buffer = LineBuffer::default();
        let mut first = Cursor::new(b"abcd");
        assert!(buffer.read_line(&mut first, 4).unwrap().is_none());
        let mut second = Cursor::new(b"\r");
        assert!(buffer.read_line(&mut second, 4).unwrap().is_none());
        let mut third = Cursor::new(b"e");
        assert!(matches!(
            buffer.read_line(&mut third, 4),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn blob_across_three_chunks() {
        let mut buffer = BlobBuffer::default();
        let mut a = Cursor::new(b"abc");
        assert!(buffer.read_exact(&mut a, 8).is_none());
        assert_eq!(buffer.buffered(), 3);
        let mut b = Cursor::new(b"de");
        assert!(buffer.read_exact(&mut b, 8).is_none());
        let mut c = Cursor::new(b"fghXYZ");
        let span = buffer.read_exact(&mut c, 8).unwrap();
        assert_eq!(&span[..], b"abcdefgh");
        assert_eq!(c.remaining(), 3);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn blob_in_one_chunk() {
        let mut buffer = BlobBuffer::default();
        let mut cursor = Cursor::new(b"foobar");
        let span = buffer.read_exact(&mut cursor, 3).unwrap();
        assert_eq!(&span[..], b"foo");
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn take_byte_until_empty() {
        let mut cursor = Cursor::new(b"+-");
        assert_eq!(cursor.take_byte(), Some(b'+'));
        assert_eq!(cursor.take_byte(), Some(b'-'));
        assert_eq!(cursor.take_byte(), None);
        assert!(cursor.is_empty());
    }
}
