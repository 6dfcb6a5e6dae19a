//! Resumable streaming decoder for RESP2/RESP3 replies.
//!
//! The decoder is an explicit state machine: a phase saying what kind of
//! token it is in the middle of, plus a stack of open aggregates. Feeding it a
//! chunk consumes every byte of that chunk; whatever value is still incomplete
//! stays in the decoder until the next chunk arrives. Chunk boundaries may fall
//! anywhere, including between the `\r` and `\n` of a terminator.
//!
//! ```
//! use resp_proto::{Decoder, TypeMapping, Value};
//!
//! let mut decoder = Decoder::default();
//! assert!(decoder.decode(b"$5\r\nhel", TypeMapping::new()).unwrap().is_empty());
//! let values = decoder.decode(b"lo\r\n:1\r\n", TypeMapping::new()).unwrap();
//! assert_eq!(values, vec![Value::bulk_string(b"hello"), Value::Integer(1)]);
//! ```

use bytes::Bytes;

use crate::cursor::{BlobBuffer, Cursor, Line, LineBuffer};
use crate::error::ParseError;
use crate::mapping::{
    BigNumberRepr, MapRepr, NumberRepr, SetRepr, StringRepr, TypeMapping, VerbatimRepr,
};
use crate::value::Value;

/// Default maximum size of a bulk string in bytes (512 MiB, the server's own
/// ceiling for a single string).
pub const DEFAULT_MAX_BULK_STRING_LEN: usize = 512 * 1024 * 1024;

/// Default maximum number of elements in a single aggregate.
pub const DEFAULT_MAX_COLLECTION_ELEMENTS: usize = u32::MAX as usize;

/// Default maximum aggregate nesting depth.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Upper bound on the capacity reserved up front for an aggregate; larger
/// aggregates grow as their elements arrive.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Limits applied while decoding.
///
/// Replies come from a trusted server, so the defaults are generous. They
/// still keep a corrupt length prefix from turning into a huge allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Maximum number of elements in a single aggregate.
    pub max_collection_elements: usize,
    /// Maximum size of a bulk string, bulk error or verbatim string in bytes.
    pub max_bulk_string_len: usize,
    /// Maximum nesting depth of aggregates.
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseOptions {
    /// Create new parse options with default values.
    pub const fn new() -> Self {
        Self {
            max_collection_elements: DEFAULT_MAX_COLLECTION_ELEMENTS,
            max_bulk_string_len: DEFAULT_MAX_BULK_STRING_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Set the maximum collection element count.
    pub const fn max_collection_elements(mut self, count: usize) -> Self {
        self.max_collection_elements = count;
        self
    }

    /// Set the maximum bulk string length.
    pub const fn max_bulk_string_len(mut self, len: usize) -> Self {
        self.max_bulk_string_len = len;
        self
    }

    /// Set the maximum nesting depth.
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Receiver for fully decoded top-level values.
///
/// The decoder never hands out partial aggregates: each callback receives a
/// complete value.
pub trait DecodeSink {
    /// Mapping for the top-level value that is about to be decoded.
    ///
    /// Called once, at the type byte of each top-level value that is not a
    /// push frame. Push frames always use [`TypeMapping::push`].
    fn type_mapping(&mut self) -> TypeMapping;

    /// An ordinary reply.
    fn on_reply(&mut self, value: Value);

    /// A simple or bulk error reply.
    fn on_error_reply(&mut self, value: Value);

    /// A RESP3 push frame.
    fn on_push(&mut self, value: Value);
}

// ============================================================================
// Resume state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Expecting a type byte.
    Type,
    /// Reading a CRLF-terminated line.
    Line(LineKind),
    /// Reading `len` payload bytes plus their trailing CRLF.
    Blob { kind: BlobKind, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    SimpleString,
    Error,
    Integer,
    Double,
    BigNumber,
    Boolean,
    Null,
    BlobLength(BlobKind),
    AggregateLength(AggregateKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlobKind {
    String,
    Error,
    Verbatim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateKind {
    Array,
    Set,
    Map,
    Push,
    Attribute,
}

/// An aggregate whose children are still arriving.
#[derive(Debug)]
struct Frame {
    kind: AggregateKind,
    /// Children still to be read. Maps count keys and values separately;
    /// attributes add one for the value they annotate.
    remaining: usize,
    items: Vec<Value>,
}

impl Frame {
    fn finish(self, mapping: TypeMapping) -> Value {
        let Frame { kind, mut items, .. } = self;
        match kind {
            AggregateKind::Array => Value::Array(items),
            AggregateKind::Push => Value::Push(items),
            AggregateKind::Set => match mapping.set {
                SetRepr::Set => Value::Set(items),
                SetRepr::Array => Value::Array(items),
            },
            AggregateKind::Map => match mapping.map {
                MapRepr::Pairs => Value::Map(into_pairs(items)),
                MapRepr::Flat => Value::Array(items),
            },
            AggregateKind::Attribute => {
                // Attribute frames always hold 2n + 1 children.
                let value = items.pop().unwrap_or(Value::Null);
                Value::Attribute {
                    attrs: into_pairs(items),
                    value: Box::new(value),
                }
            }
        }
    }
}

fn into_pairs(items: Vec<Value>) -> Vec<(Value, Value)> {
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        pairs.push((key, value));
    }
    pairs
}

// ============================================================================
// Decoder
// ============================================================================

/// Incremental RESP decoder.
///
/// One decoder serves one connection. After any error the decoder has
/// already reset itself, but the byte stream it was reading is unusable.
#[derive(Debug)]
pub struct Decoder {
    options: ParseOptions,
    phase: Phase,
    stack: Vec<Frame>,
    line: LineBuffer,
    blob: BlobBuffer,
    /// Mapping of the top-level value in progress.
    mapping: TypeMapping,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

impl Decoder {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            phase: Phase::Type,
            stack: Vec::new(),
            line: LineBuffer::default(),
            blob: BlobBuffer::default(),
            mapping: TypeMapping::new(),
        }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Consume `chunk`, emitting each completed top-level value to `sink`.
    ///
    /// Values are emitted in stream order. On error the decoder is reset and
    /// values completed earlier in the same chunk have already been emitted.
    pub fn write<S: DecodeSink + ?Sized>(
        &mut self,
        chunk: &[u8],
        sink: &mut S,
    ) -> Result<(), ParseError> {
        let mut cursor = Cursor::new(chunk);
        loop {
            match self.next_value(&mut cursor, sink) {
                Ok(Some(value)) => dispatch(value, sink),
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    /// Consume `chunk` and collect every completed top-level value, using
    /// `mapping` for all of them except push frames.
    pub fn decode(&mut self, chunk: &[u8], mapping: TypeMapping) -> Result<Vec<Value>, ParseError> {
        let mut sink = Collect {
            mapping,
            values: Vec::new(),
        };
        self.write(chunk, &mut sink)?;
        Ok(sink.values)
    }

    /// Discard the partially decoded value and all carry-over bytes.
    pub fn reset(&mut self) {
        self.phase = Phase::Type;
        self.stack.clear();
        self.line.clear();
        self.blob.clear();
        self.mapping = TypeMapping::new();
    }

    /// Returns true if no value is partially decoded.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Type && self.stack.is_empty()
    }

    /// Run until one top-level value completes or the cursor is exhausted.
    pub(crate) fn next_value<S: DecodeSink + ?Sized>(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut S,
    ) -> Result<Option<Value>, ParseError> {
        while !cursor.is_empty() {
            let completed = match self.phase {
                Phase::Type => {
                    let Some(tag) = cursor.take_byte() else {
                        break;
                    };
                    self.start(tag, sink)?;
                    None
                }
                Phase::Line(kind) => {
                    match self.line.read_line(cursor, self.options.max_bulk_string_len)? {
                        Some(line) => self.finish_line(kind, line)?,
                        None => break,
                    }
                }
                Phase::Blob { kind, len } => {
                    let span_len = len
                        .checked_add(2)
                        .ok_or_else(|| ParseError::InvalidLength(len.to_string()))?;
                    match self.blob.read_exact(cursor, span_len) {
                        Some(span) => Some(self.finish_blob(kind, len, span)?),
                        None => break,
                    }
                }
            };

            if let Some(value) = completed {
                if let Some(top) = self.complete(value) {
                    return Ok(Some(top));
                }
            }
        }
        Ok(None)
    }

    fn start<S: DecodeSink + ?Sized>(&mut self, tag: u8, sink: &mut S) -> Result<(), ParseError> {
        let kind = match tag {
            b'+' => LineKind::SimpleString,
            b'-' => LineKind::Error,
            b':' => LineKind::Integer,
            b'$' => LineKind::BlobLength(BlobKind::String),
            b'*' => LineKind::AggregateLength(AggregateKind::Array),
            b'_' => LineKind::Null,
            b'#' => LineKind::Boolean,
            b',' => LineKind::Double,
            b'(' => LineKind::BigNumber,
            b'!' => LineKind::BlobLength(BlobKind::Error),
            b'=' => LineKind::BlobLength(BlobKind::Verbatim),
            b'%' => LineKind::AggregateLength(AggregateKind::Map),
            b'~' => LineKind::AggregateLength(AggregateKind::Set),
            b'>' => LineKind::AggregateLength(AggregateKind::Push),
            b'|' => LineKind::AggregateLength(AggregateKind::Attribute),
            other => return Err(ParseError::InvalidPrefix(other)),
        };

        if self.stack.is_empty() {
            self.mapping = if tag == b'>' {
                TypeMapping::push()
            } else {
                sink.type_mapping()
            };
        }
        self.phase = Phase::Line(kind);
        Ok(())
    }

    /// Fold a completed value into the open aggregates. Returns the
    /// top-level value once the outermost aggregate closes.
    fn complete(&mut self, mut value: Value) -> Option<Value> {
        self.phase = Phase::Type;
        loop {
            let Some(mut frame) = self.stack.pop() else {
                return Some(value);
            };
            frame.items.push(value);
            frame.remaining -= 1;
            if frame.remaining > 0 {
                self.stack.push(frame);
                return None;
            }
            value = frame.finish(self.mapping);
        }
    }

    fn finish_line(&mut self, kind: LineKind, line: Line<'_>) -> Result<Option<Value>, ParseError> {
        let mapping = self.mapping;
        let value = match kind {
            LineKind::SimpleString => match mapping.simple_string {
                StringRepr::Bytes => Value::SimpleString(line.into_bytes()),
                StringRepr::Text => text(&line),
            },
            LineKind::Error => Value::Error(line.into_bytes()),
            LineKind::Integer => {
                let n = parse_integer(&line)?;
                match mapping.integer {
                    NumberRepr::Native => Value::Integer(n),
                    NumberRepr::Text => text(&line),
                }
            }
            LineKind::Double => {
                let d = parse_double(&line)?;
                match mapping.double {
                    NumberRepr::Native => Value::Double(d),
                    NumberRepr::Text => text(&line),
                }
            }
            LineKind::BigNumber => {
                check_big_number(&line)?;
                match mapping.big_number {
                    BigNumberRepr::Raw => Value::BigNumber(line.into_bytes()),
                    BigNumberRepr::Text => text(&line),
                    BigNumberRepr::Double => Value::Double(parse_double(&line)?),
                }
            }
            LineKind::Boolean => match &*line {
                b"t" => Value::Boolean(true),
                b"f" => Value::Boolean(false),
                _ => return Err(ParseError::InvalidBoolean),
            },
            LineKind::Null => {
                if !line.is_empty() {
                    return Err(ParseError::Protocol("expected CRLF after null".to_string()));
                }
                Value::Null
            }
            LineKind::BlobLength(kind) => return self.open_blob(kind, &line),
            LineKind::AggregateLength(kind) => return self.open_aggregate(kind, &line),
        };
        Ok(Some(value))
    }

    fn open_blob(&mut self, kind: BlobKind, line: &[u8]) -> Result<Option<Value>, ParseError> {
        let len = parse_length(line)?;
        if len < 0 {
            // `$-1` is the RESP2 null bulk string.
            if len == -1 && kind == BlobKind::String {
                return Ok(Some(Value::Null));
            }
            return Err(ParseError::InvalidLength(len.to_string()));
        }
        let len = usize::try_from(len).map_err(|_| ParseError::InvalidLength(len.to_string()))?;
        if len > self.options.max_bulk_string_len {
            return Err(ParseError::BulkStringTooLong {
                len,
                max: self.options.max_bulk_string_len,
            });
        }
        self.phase = Phase::Blob { kind, len };
        Ok(None)
    }

    fn open_aggregate(
        &mut self,
        kind: AggregateKind,
        line: &[u8],
    ) -> Result<Option<Value>, ParseError> {
        let count = parse_length(line)?;
        if count < 0 {
            // `*-1` is the RESP2 null array.
            if count == -1 && kind == AggregateKind::Array {
                return Ok(Some(Value::Null));
            }
            return Err(ParseError::InvalidLength(count.to_string()));
        }
        let count =
            usize::try_from(count).map_err(|_| ParseError::InvalidLength(count.to_string()))?;
        if count > self.options.max_collection_elements {
            return Err(ParseError::CollectionTooLarge(count));
        }
        if self.stack.len() >= self.options.max_depth {
            return Err(ParseError::NestingTooDeep(self.stack.len() + 1));
        }

        let remaining = match kind {
            AggregateKind::Map => count.checked_mul(2),
            AggregateKind::Attribute => count.checked_mul(2).and_then(|n| n.checked_add(1)),
            _ => Some(count),
        }
        .ok_or(ParseError::CollectionTooLarge(count))?;

        let frame = Frame {
            kind,
            remaining,
            items: Vec::with_capacity(remaining.min(MAX_PREALLOCATED_ITEMS)),
        };
        if remaining == 0 {
            return Ok(Some(frame.finish(self.mapping)));
        }
        self.stack.push(frame);
        self.phase = Phase::Type;
        Ok(None)
    }

    fn finish_blob(&self, kind: BlobKind, len: usize, span: Bytes) -> Result<Value, ParseError> {
        if &span[len..] != b"\r\n" {
            return Err(ParseError::Protocol(
                "bulk payload not terminated by CRLF".to_string(),
            ));
        }
        let data = span.slice(..len);
        let mapping = self.mapping;
        let value = match kind {
            BlobKind::String => match mapping.blob_string {
                StringRepr::Bytes => Value::BulkString(data),
                StringRepr::Text => text(&data),
            },
            BlobKind::Error => Value::BulkError(data),
            BlobKind::Verbatim => {
                if data.len() < 4 || data[3] != b':' {
                    return Err(ParseError::InvalidVerbatimFormat);
                }
                let format = [data[0], data[1], data[2]];
                let payload = data.slice(4..);
                match mapping.verbatim_string {
                    VerbatimRepr::Tagged => Value::VerbatimString {
                        format,
                        data: payload,
                    },
                    VerbatimRepr::Text => text(&payload),
                    VerbatimRepr::Bytes => Value::BulkString(payload),
                }
            }
        };
        Ok(value)
    }
}

/// Hand a completed top-level value to the sink, routed by the value under
/// any attribute wrappers.
fn dispatch<S: DecodeSink + ?Sized>(value: Value, sink: &mut S) {
    match value.strip_attributes() {
        Value::Push(_) => sink.on_push(value),
        Value::Error(_) | Value::BulkError(_) => sink.on_error_reply(value),
        _ => sink.on_reply(value),
    }
}

/// Sink that records values with one fixed mapping.
struct Collect {
    mapping: TypeMapping,
    values: Vec<Value>,
}

impl DecodeSink for Collect {
    fn type_mapping(&mut self) -> TypeMapping {
        self.mapping
    }

    fn on_reply(&mut self, value: Value) {
        self.values.push(value);
    }

    fn on_error_reply(&mut self, value: Value) {
        self.values.push(value);
    }

    fn on_push(&mut self, value: Value) {
        self.values.push(value);
    }
}

/// Decode exactly one value from the front of `data`.
pub(crate) fn parse_one(
    data: &[u8],
    options: ParseOptions,
    mapping: TypeMapping,
) -> Result<(Value, usize), ParseError> {
    let mut decoder = Decoder::new(options);
    let mut cursor = Cursor::new(data);
    let mut sink = Collect {
        mapping,
        values: Vec::new(),
    };
    match decoder.next_value(&mut cursor, &mut sink)? {
        Some(value) => Ok((value, data.len() - cursor.remaining())),
        None => Err(ParseError::Incomplete),
    }
}

// ============================================================================
// Token parsing
// ============================================================================

fn text(bytes: &[u8]) -> Value {
    Value::Text(String::from_utf8_lossy(bytes).into_owned())
}

fn parse_integer(line: &[u8]) -> Result<i64, ParseError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

fn parse_length(line: &[u8]) -> Result<i64, ParseError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidLength(String::from_utf8_lossy(line).into_owned()))
}

/// Parse a RESP3 double token.
///
/// `inf`, `nan` and their signed forms are matched without regard to case.
/// Finite values that overflow saturate to infinity. The sign of NaN is not
/// preserved.
fn parse_double(token: &[u8]) -> Result<f64, ParseError> {
    let s = std::str::from_utf8(token).map_err(|e| ParseError::InvalidDouble(e.to_string()))?;
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.eq_ignore_ascii_case("inf") {
        return Ok(if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    if unsigned.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    s.parse()
        .map_err(|e: std::num::ParseFloatError| ParseError::InvalidDouble(format!("{s}: {e}")))
}

fn check_big_number(line: &[u8]) -> Result<(), ParseError> {
    let digits = match line.first() {
        Some(b'+' | b'-') => &line[1..],
        _ => line,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidInteger(
            String::from_utf8_lossy(line).into_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        mapping: TypeMapping,
        mapping_calls: usize,
        events: Vec<(&'static str, Value)>,
    }

    impl DecodeSink for Recorder {
        fn type_mapping(&mut self) -> TypeMapping {
            self.mapping_calls += 1;
            self.mapping
        }

        fn on_reply(&mut self, value: Value) {
            self.events.push(("reply", value));
        }

        fn on_error_reply(&mut self, value: Value) {
            self.events.push(("error", value));
        }

        fn on_push(&mut self, value: Value) {
            self.events.push(("push", value));
        }
    }

    fn decode_whole(input: &[u8], mapping: TypeMapping) -> Vec<Value> {
        Decoder::default().decode(input, mapping).unwrap()
    }

    fn decode_one(input: &[u8]) -> Value {
        let mut values = decode_whole(input, TypeMapping::new());
        assert_eq!(values.len(), 1, "expected one value from {input:?}");
        values.remove(0)
    }

    /// Decode whole, split at every offset, and one byte at a time.
    fn assert_chunk_invariant(input: &[u8], mapping: TypeMapping) {
        let whole = decode_whole(input, mapping);
        assert!(!whole.is_empty());

        for split in 0..=input.len() {
            let mut decoder = Decoder::default();
            let mut values = decoder.decode(&input[..split], mapping).unwrap();
            values.extend(decoder.decode(&input[split..], mapping).unwrap());
            assert_eq!(values, whole, "split at {split}");
            assert!(decoder.is_idle());
        }

        let mut decoder = Decoder::default();
        let mut values = Vec::new();
        for byte in input {
            values.extend(decoder.decode(std::slice::from_ref(byte), mapping).unwrap());
        }
        assert_eq!(values, whole, "byte at a time");
    }

    const VECTORS: &[&[u8]] = &[
        b"+OK\r\n",
        b"-ERR unknown command 'foo'\r\n",
        b":-9223372036854775808\r\n",
        b"$12\r\nhello\r\nworld\r\n",
        b"$0\r\n\r\n",
        b"$-1\r\n",
        b"*-1\r\n",
        b"_\r\n",
        b"#t\r\n",
        b",-1.5e-3\r\n",
        b",inf\r\n",
        b"(3492890328409238509324850943850943825024385\r\n",
        b"!21\r\nSYNTAX invalid syntax\r\n",
        b"=15\r\ntxt:Some string\r\n",
        b"*3\r\n:1\r\n*2\r\n+a\r\n$1\r\nb\r\n*0\r\n",
        b"%2\r\n+first\r\n:1\r\n+second\r\n~2\r\n#f\r\n,2.5\r\n",
        b">3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$5\r\nhello\r\n",
        b"|1\r\n+key-popularity\r\n%1\r\n$1\r\na\r\n,0.1923\r\n*2\r\n:2039123\r\n:9543892\r\n",
        b"+first\r\n:2\r\n$5\r\nthird\r\n",
    ];

    #[test]
    fn test_every_split_offset() {
        for input in VECTORS {
            assert_chunk_invariant(input, TypeMapping::new());
            assert_chunk_invariant(input, TypeMapping::text());
            assert_chunk_invariant(input, TypeMapping::resp2_shapes());
        }
    }

    #[test]
    fn test_scalars() {
        assert_eq!(decode_one(b"+OK\r\n"), Value::simple_string(b"OK"));
        assert_eq!(decode_one(b":1000\r\n"), Value::Integer(1000));
        assert_eq!(decode_one(b":+7\r\n"), Value::Integer(7));
        assert_eq!(decode_one(b"$6\r\nfoobar\r\n"), Value::bulk_string(b"foobar"));
        assert_eq!(decode_one(b"#t\r\n"), Value::Boolean(true));
        assert_eq!(decode_one(b"#f\r\n"), Value::Boolean(false));
        assert_eq!(decode_one(b",3.25\r\n"), Value::Double(3.25));
        assert_eq!(decode_one(b",10\r\n"), Value::Double(10.0));
        assert_eq!(decode_one(b",1E3\r\n"), Value::Double(1000.0));
        assert_eq!(decode_one(b"(-12\r\n"), Value::big_number(b"-12"));
        assert_eq!(
            decode_one(b"=8\r\nmkd:# hi\r\n"),
            Value::verbatim_string(*b"mkd", b"# hi")
        );
    }

    #[test]
    fn test_nulls() {
        assert_eq!(decode_one(b"_\r\n"), Value::Null);
        assert_eq!(decode_one(b"$-1\r\n"), Value::Null);
        assert_eq!(decode_one(b"*-1\r\n"), Value::Null);
    }

    #[test]
    fn test_double_special_tokens() {
        for token in ["inf", "+inf", "INF", "Inf"] {
            let input = format!(",{token}\r\n");
            assert_eq!(decode_one(input.as_bytes()), Value::Double(f64::INFINITY));
        }
        for token in ["-inf", "-INF"] {
            let input = format!(",{token}\r\n");
            assert_eq!(decode_one(input.as_bytes()), Value::Double(f64::NEG_INFINITY));
        }
        for token in ["nan", "+nan", "-nan", "NaN"] {
            let input = format!(",{token}\r\n");
            let value = decode_one(input.as_bytes());
            assert!(value.as_double().unwrap().is_nan(), "{token}");
        }
    }

    #[test]
    fn test_double_overflow_saturates() {
        assert_eq!(decode_one(b",1e400\r\n"), Value::Double(f64::INFINITY));
        assert_eq!(decode_one(b",-1e400\r\n"), Value::Double(f64::NEG_INFINITY));
    }

    #[test]
    fn test_double_invalid() {
        let mut decoder = Decoder::default();
        assert!(matches!(
            decoder.decode(b",1.2.3\r\n", TypeMapping::new()),
            Err(ParseError::InvalidDouble(_))
        ));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_nested_aggregates() {
        let value = decode_one(b"*2\r\n%1\r\n+k\r\n~1\r\n:1\r\n*1\r\n*1\r\n_\r\n");
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Map(vec![(
                    Value::simple_string(b"k"),
                    Value::Set(vec![Value::Integer(1)])
                )]),
                Value::Array(vec![Value::Array(vec![Value::Null])]),
            ])
        );
    }

    #[test]
    fn test_attribute_wraps_following_value() {
        let value = decode_one(b"|1\r\n+ttl\r\n:3600\r\n$3\r\nfoo\r\n");
        assert_eq!(
            value,
            Value::attribute(
                vec![(Value::simple_string(b"ttl"), Value::Integer(3600))],
                Value::bulk_string(b"foo"),
            )
        );
    }

    #[test]
    fn test_mapping_applies_per_field() {
        let input = b"*3\r\n$3\r\nfoo\r\n%1\r\n+k\r\n:5\r\n=8\r\ntxt:text\r\n";
        let mapping = TypeMapping::new()
            .blob_string(StringRepr::Text)
            .integer(NumberRepr::Text)
            .map(MapRepr::Flat)
            .verbatim_string(VerbatimRepr::Bytes);
        let values = decode_whole(input, mapping);
        assert_eq!(
            values,
            vec![Value::Array(vec![
                Value::Text("foo".to_string()),
                Value::Array(vec![
                    Value::simple_string(b"k"),
                    Value::Text("5".to_string()),
                ]),
                Value::bulk_string(b"text"),
            ])]
        );
    }

    #[test]
    fn test_text_mapping_keeps_number_tokens() {
        let mapping = TypeMapping::new()
            .double(NumberRepr::Text)
            .big_number(BigNumberRepr::Text);
        let values = decode_whole(b",1.50\r\n(123456789012345678901234567890\r\n", mapping);
        assert_eq!(
            values,
            vec![
                Value::Text("1.50".to_string()),
                Value::Text("123456789012345678901234567890".to_string()),
            ]
        );
    }

    #[test]
    fn test_big_number_as_double() {
        let mapping = TypeMapping::new().big_number(BigNumberRepr::Double);
        let values = decode_whole(b"(100000000000000000000\r\n", mapping);
        assert_eq!(values, vec![Value::Double(1e20)]);
    }

    #[test]
    fn test_errors_are_never_remapped() {
        let values = decode_whole(b"-ERR x\r\n!3\r\nbad\r\n", TypeMapping::text());
        assert_eq!(values, vec![Value::error(b"ERR x"), Value::bulk_error(b"bad")]);
    }

    #[test]
    fn test_routing_to_sink() {
        let mut decoder = Decoder::default();
        let mut sink = Recorder {
            mapping: TypeMapping::text(),
            ..Default::default()
        };
        decoder
            .write(
                b"+OK\r\n>2\r\n$10\r\ninvalidate\r\n*1\r\n$3\r\nkey\r\n-ERR no\r\n",
                &mut sink,
            )
            .unwrap();

        assert_eq!(
            sink.events,
            vec![
                ("reply", Value::Text("OK".to_string())),
                (
                    "push",
                    Value::Push(vec![
                        Value::bulk_string(b"invalidate"),
                        Value::Array(vec![Value::bulk_string(b"key")]),
                    ])
                ),
                ("error", Value::error(b"ERR no")),
            ]
        );
        // Push frames do not consult the sink.
        assert_eq!(sink.mapping_calls, 2);
    }

    #[test]
    fn test_mapping_requested_once_per_top_level_value() {
        let mut decoder = Decoder::default();
        let mut sink = Recorder::default();
        decoder.write(b"*2\r\n$1\r\na\r\n", &mut sink).unwrap();
        decoder.write(b"$1\r\nb\r\n:1\r\n", &mut sink).unwrap();
        assert_eq!(sink.mapping_calls, 2);
        assert_eq!(sink.events.len(), 2);
    }

    #[test]
    fn test_attribute_routed_by_inner_value() {
        let mut decoder = Decoder::default();
        let mut sink = Recorder::default();
        decoder.write(b"|0\r\n-ERR wrapped\r\n", &mut sink).unwrap();
        assert_eq!(sink.events.len(), 1);
        assert_eq!(sink.events[0].0, "error");
    }

    #[test]
    fn test_unknown_tag_resets() {
        let mut decoder = Decoder::default();
        let mut sink = Recorder::default();
        decoder.write(b"+OK\r\n*2\r\n:1\r\n", &mut sink).unwrap();
        assert!(!decoder.is_idle());

        let err = decoder.write(b"?", &mut sink).unwrap_err();
        assert_eq!(err, ParseError::InvalidPrefix(b'?'));
        assert!(decoder.is_idle());

        decoder.write(b":2\r\n", &mut sink).unwrap();
        assert_eq!(sink.events.last(), Some(&("reply", Value::Integer(2))));
    }

    #[test]
    fn test_missing_cr_is_fatal() {
        let mut decoder = Decoder::default();
        assert!(matches!(
            decoder.decode(b"+OK\n", TypeMapping::new()),
            Err(ParseError::Protocol(_))
        ));
        assert!(matches!(
            decoder.decode(b"$2\r\nokXY", TypeMapping::new()),
            Err(ParseError::Protocol(_))
        ));
    }

    fn decode_err(input: &[u8]) -> ParseError {
        Decoder::default()
            .decode(input, TypeMapping::new())
            .unwrap_err()
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(matches!(decode_err(b":12a\r\n"), ParseError::InvalidInteger(_)));
        assert!(matches!(decode_err(b"$x\r\n"), ParseError::InvalidLength(_)));
        assert!(matches!(decode_err(b"$-2\r\n"), ParseError::InvalidLength(_)));
        assert!(matches!(decode_err(b"%-1\r\n"), ParseError::InvalidLength(_)));
        assert!(matches!(decode_err(b"#x\r\n"), ParseError::InvalidBoolean));
        assert!(matches!(decode_err(b"_x\r\n"), ParseError::Protocol(_)));
        assert!(matches!(decode_err(b"(12x\r\n"), ParseError::InvalidInteger(_)));
        assert!(matches!(
            decode_err(b"=3\r\ntxt\r\n"),
            ParseError::InvalidVerbatimFormat
        ));
    }

    #[test]
    fn test_limits() {
        let options = ParseOptions::new()
            .max_bulk_string_len(4)
            .max_collection_elements(2)
            .max_depth(2);

        let mut decoder = Decoder::new(options);
        assert_eq!(
            decoder.decode(b"$5\r\n", TypeMapping::new()),
            Err(ParseError::BulkStringTooLong { len: 5, max: 4 })
        );
        assert_eq!(
            decoder.decode(b"*3\r\n", TypeMapping::new()),
            Err(ParseError::CollectionTooLarge(3))
        );
        assert_eq!(
            decoder.decode(b"*1\r\n*1\r\n*1\r\n", TypeMapping::new()),
            Err(ParseError::NestingTooDeep(3))
        );
        assert_eq!(
            decoder.decode(b"*1\r\n*1\r\n:1\r\n", TypeMapping::new()),
            Ok(vec![Value::Array(vec![Value::Array(vec![Value::Integer(1)])])])
        );
    }

    #[test]
    fn test_unterminated_line_is_bounded() {
        let mut decoder = Decoder::new(ParseOptions::new().max_bulk_string_len(8));
        assert_eq!(decoder.decode(b"+abcd", TypeMapping::new()), Ok(vec![]));
        assert!(matches!(
            decoder.decode(b"efghijk", TypeMapping::new()),
            Err(ParseError::Protocol(_))
        ));
        // The decoder is reset and accepts a fresh stream.
        assert_eq!(
            decoder.decode(b"+ok\r\n", TypeMapping::new()),
            Ok(vec![Value::SimpleString(Bytes::from_static(b"ok"))])
        );
    }

    #[test]
    fn test_is_idle_tracks_partial_values() {
        let mut decoder = Decoder::default();
        assert!(decoder.is_idle());
        decoder.decode(b"$10\r\nabc", TypeMapping::new()).unwrap();
        assert!(!decoder.is_idle());
        decoder.reset();
        assert!(decoder.is_idle());
        assert_eq!(
            decoder.decode(b"+fresh\r\n", TypeMapping::new()).unwrap(),
            vec![Value::simple_string(b"fresh")]
        );
    }

    #[test]
    fn test_large_blob_across_many_chunks() {
        let payload = vec![b'x'; 64 * 1024];
        let mut input = format!("${}\r\n", payload.len()).into_bytes();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"\r\n");

        let mut decoder = Decoder::default();
        let mut values = Vec::new();
        for chunk in input.chunks(1500) {
            values.extend(decoder.decode(chunk, TypeMapping::new()).unwrap());
        }
        assert_eq!(values, vec![Value::BulkString(Bytes::from(payload))]);
    }

    #[test]
    fn test_deep_nesting_does_not_recurse() {
        let depth = DEFAULT_MAX_DEPTH;
        let mut input = Vec::new();
        for _ in 0..depth {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        let mut value = decode_one(&input);
        for _ in 0..depth {
            value = match value {
                Value::Array(mut items) => items.remove(0),
                other => panic!("unexpected {other:?}"),
            };
        }
        assert_eq!(value, Value::Integer(1));
    }

    #[test]
    fn test_parse_one_reports_consumed() {
        let (value, consumed) =
            parse_one(b":1\r\n:2\r\n", ParseOptions::new(), TypeMapping::new()).unwrap();
        assert_eq!(value, Value::Integer(1));
        assert_eq!(consumed, 4);
        assert_eq!(
            parse_one(b"*2\r\n:1\r\n", ParseOptions::new(), TypeMapping::new()),
            Err(ParseError::Incomplete)
        );
    }
}
