//! RESP value types and encoding.
//!
//! RESP2 defines the following value types:
//! - Simple String: `+OK\r\n`
//! - Error: `-ERR message\r\n`
//! - Integer: `:1000\r\n`
//! - Bulk String: `$6\r\nfoobar\r\n`
//! - Null Bulk String: `$-1\r\n`
//! - Array: `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`
//!
//! RESP3 adds the following types:
//! - Null: `_\r\n`
//! - Boolean: `#t\r\n` or `#f\r\n`
//! - Double: `,3.14159\r\n`
//! - Big Number: `(12345678901234567890\r\n`
//! - Bulk Error: `!<len>\r\n<error>\r\n`
//! - Verbatim String: `=<len>\r\ntxt:<data>\r\n`
//! - Map: `%<len>\r\n<key><val>...`
//! - Set: `~<len>\r\n<elem>...`
//! - Push: `><len>\r\n<elem>...`
//! - Attribute: `|<len>\r\n<attrs>...<value>`
//!
//! Decoding lives in [`Decoder`](crate::Decoder); [`Value::parse`] is a
//! one-shot convenience over it.

use bytes::Bytes;

use crate::decoder::{self, ParseOptions};
use crate::error::ParseError;
use crate::mapping::TypeMapping;

/// A decoded RESP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    /// RESP2: `$-1\r\n` or `*-1\r\n`
    /// RESP3: `_\r\n`
    Null,
    /// Boolean: `#t\r\n` or `#f\r\n`
    Boolean(bool),
    /// Integer: `:1000\r\n`
    Integer(i64),
    /// Big number (arbitrary precision): `(12345678901234567890\r\n`
    /// Stored as the raw decimal string representation.
    BigNumber(Bytes),
    /// Double-precision floating point: `,3.14159\r\n`
    Double(f64),
    /// Simple string: `+OK\r\n`
    SimpleString(Bytes),
    /// Bulk string: `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// Any string or number kind that the [`TypeMapping`] asked to receive
    /// as text. Invalid UTF-8 is replaced.
    Text(String),
    /// Verbatim string: `=<len>\r\ntxt:<data>\r\n`
    VerbatimString {
        /// 3-byte format identifier (e.g., b"txt", b"mkd")
        format: [u8; 3],
        /// The payload, without the format prefix
        data: Bytes,
    },
    /// Error: `-ERR message\r\n`
    Error(Bytes),
    /// Bulk error: `!<len>\r\n<error>\r\n`
    BulkError(Bytes),
    /// Array: `*2\r\n...`
    Array(Vec<Value>),
    /// Set: `~<len>\r\n<elem>...`
    Set(Vec<Value>),
    /// Map: `%<len>\r\n<key><val>...`
    Map(Vec<(Value, Value)>),
    /// Push message (server-initiated): `><len>\r\n<elem>...`
    Push(Vec<Value>),
    /// Attribute (metadata attached to next value): `|<len>\r\n<attrs>...<value>`
    Attribute {
        /// Metadata key-value pairs
        attrs: Vec<(Value, Value)>,
        /// The value this metadata is attached to
        value: Box<Value>,
    },
}

impl Value {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// Create a simple string value.
    #[inline]
    pub fn simple_string(s: &[u8]) -> Self {
        Value::SimpleString(Bytes::copy_from_slice(s))
    }

    /// Create an error value.
    #[inline]
    pub fn error(msg: &[u8]) -> Self {
        Value::Error(Bytes::copy_from_slice(msg))
    }

    /// Create an integer value.
    #[inline]
    pub fn integer(n: i64) -> Self {
        Value::Integer(n)
    }

    /// Create a bulk string value.
    #[inline]
    pub fn bulk_string(data: &[u8]) -> Self {
        Value::BulkString(Bytes::copy_from_slice(data))
    }

    /// Create a text value.
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Create a null value.
    #[inline]
    pub fn null() -> Self {
        Value::Null
    }

    /// Create an array value.
    #[inline]
    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(elements)
    }

    #[inline]
    pub fn boolean(b: bool) -> Self {
        Value::Boolean(b)
    }

    #[inline]
    pub fn double(d: f64) -> Self {
        Value::Double(d)
    }

    /// Create a big number value from a decimal string.
    #[inline]
    pub fn big_number(num: &[u8]) -> Self {
        Value::BigNumber(Bytes::copy_from_slice(num))
    }

    #[inline]
    pub fn bulk_error(msg: &[u8]) -> Self {
        Value::BulkError(Bytes::copy_from_slice(msg))
    }

    #[inline]
    pub fn verbatim_string(format: [u8; 3], data: &[u8]) -> Self {
        Value::VerbatimString {
            format,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[inline]
    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(entries)
    }

    #[inline]
    pub fn set(elements: Vec<Value>) -> Self {
        Value::Set(elements)
    }

    #[inline]
    pub fn push(elements: Vec<Value>) -> Self {
        Value::Push(elements)
    }

    #[inline]
    pub fn attribute(attrs: Vec<(Value, Value)>, value: Value) -> Self {
        Value::Attribute {
            attrs,
            value: Box::new(value),
        }
    }

    // ========================================================================
    // Type checks
    // ========================================================================

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for both simple and bulk errors.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_) | Value::BulkError(_))
    }

    #[inline]
    pub fn is_simple_string(&self) -> bool {
        matches!(self, Value::SimpleString(_))
    }

    #[inline]
    pub fn is_bulk_string(&self) -> bool {
        matches!(self, Value::BulkString(_))
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    #[inline]
    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    #[inline]
    pub fn is_big_number(&self) -> bool {
        matches!(self, Value::BigNumber(_))
    }

    #[inline]
    pub fn is_bulk_error(&self) -> bool {
        matches!(self, Value::BulkError(_))
    }

    #[inline]
    pub fn is_verbatim_string(&self) -> bool {
        matches!(self, Value::VerbatimString { .. })
    }

    #[inline]
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        matches!(self, Value::Set(_))
    }

    #[inline]
    pub fn is_push(&self) -> bool {
        matches!(self, Value::Push(_))
    }

    #[inline]
    pub fn is_attribute(&self) -> bool {
        matches!(self, Value::Attribute { .. })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the raw bytes of any string-like value, errors included.
    ///
    /// Verbatim strings yield their payload without the format tag.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::SimpleString(s)
            | Value::BulkString(s)
            | Value::Error(s)
            | Value::BulkError(s)
            | Value::BigNumber(s)
            | Value::VerbatimString { data: s, .. } => Some(s),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Returns the value as `&str` if it is text or a valid UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            other => other.as_bytes().and_then(|b| std::str::from_utf8(b).ok()),
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the elements of an array, set or push frame.
    #[inline]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) | Value::Set(arr) | Value::Push(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    #[inline]
    pub fn as_big_number(&self) -> Option<&[u8]> {
        match self {
            Value::BigNumber(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    #[inline]
    pub fn as_set(&self) -> Option<&[Value]> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_push(&self) -> Option<&[Value]> {
        match self {
            Value::Push(p) => Some(p),
            _ => None,
        }
    }

    #[inline]
    pub fn as_verbatim_string(&self) -> Option<(&[u8; 3], &[u8])> {
        match self {
            Value::VerbatimString { format, data } => Some((format, data)),
            _ => None,
        }
    }

    /// The value beneath any attribute wrappers.
    pub fn strip_attributes(&self) -> &Value {
        let mut value = self;
        while let Value::Attribute { value: inner, .. } = value {
            value = inner;
        }
        value
    }

    /// Owned counterpart of [`Value::strip_attributes`].
    pub fn into_stripped(self) -> Value {
        let mut value = self;
        while let Value::Attribute { value: inner, .. } = value {
            value = *inner;
        }
        value
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse one RESP value from the front of `data`.
    ///
    /// Returns the parsed value and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Incomplete` if `data` ends before the value does.
    /// Returns other errors for malformed data.
    #[inline]
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        Self::parse_with_options(data, &ParseOptions::default())
    }

    /// Parse one RESP value with custom limits.
    pub fn parse_with_options(
        data: &[u8],
        options: &ParseOptions,
    ) -> Result<(Self, usize), ParseError> {
        decoder::parse_one(data, *options, TypeMapping::new())
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode this value into a byte buffer in RESP3 form.
    ///
    /// `Text` is written as a bulk string. Returns the number of bytes
    /// written.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too small. Use `encoded_len()` to check the required size.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        match self {
            Value::Null => put(buf, 0, b"_\r\n"),
            Value::Boolean(b) => put(buf, 0, if *b { b"#t\r\n" } else { b"#f\r\n" }),
            Value::Integer(n) => {
                let mut fmt = itoa::Buffer::new();
                encode_line(buf, b':', fmt.format(*n).as_bytes())
            }
            Value::BigNumber(n) => encode_line(buf, b'(', n),
            Value::Double(d) => encode_line(buf, b',', format_double(*d).as_bytes()),
            Value::SimpleString(s) => encode_line(buf, b'+', s),
            Value::Error(msg) => encode_line(buf, b'-', msg),
            Value::BulkString(data) => encode_blob(buf, b'$', &[&data[..]]),
            Value::Text(s) => encode_blob(buf, b'$', &[s.as_bytes()]),
            Value::BulkError(msg) => encode_blob(buf, b'!', &[&msg[..]]),
            Value::VerbatimString { format, data } => {
                encode_blob(buf, b'=', &[&format[..], b":", &data[..]])
            }
            Value::Array(elements) => encode_elements(buf, b'*', elements),
            Value::Set(elements) => encode_elements(buf, b'~', elements),
            Value::Push(elements) => encode_elements(buf, b'>', elements),
            Value::Map(entries) => encode_pairs(buf, b'%', entries),
            Value::Attribute { attrs, value } => {
                let pos = encode_pairs(buf, b'|', attrs);
                pos + value.encode(&mut buf[pos..])
            }
        }
    }

    /// Calculate the encoded length of this value.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Null => 3,
            Value::Boolean(_) => 4,
            Value::Integer(n) => {
                let mut buf = itoa::Buffer::new();
                1 + buf.format(*n).len() + 2 // :<int>\r\n
            }
            Value::BigNumber(n) => 1 + n.len() + 2,
            Value::Double(d) => 1 + format_double(*d).len() + 2,
            Value::SimpleString(s) => 1 + s.len() + 2,
            Value::Error(msg) => 1 + msg.len() + 2,
            Value::BulkString(data) | Value::BulkError(data) => blob_len(data.len()),
            Value::Text(s) => blob_len(s.len()),
            // <fmt>:<data>
            Value::VerbatimString { data, .. } => blob_len(4 + data.len()),
            Value::Array(elements) | Value::Set(elements) | Value::Push(elements) => {
                header_len(elements.len()) + elements.iter().map(Value::encoded_len).sum::<usize>()
            }
            Value::Map(entries) => pairs_len(entries),
            Value::Attribute { attrs, value } => pairs_len(attrs) + value.encoded_len(),
        }
    }
}

// ============================================================================
// Encoding helpers
// ============================================================================

#[inline]
fn put(buf: &mut [u8], pos: usize, bytes: &[u8]) -> usize {
    buf[pos..pos + bytes.len()].copy_from_slice(bytes);
    pos + bytes.len()
}

/// Encode `<prefix><body>\r\n`.
fn encode_line(buf: &mut [u8], prefix: u8, body: &[u8]) -> usize {
    buf[0] = prefix;
    let pos = put(buf, 1, body);
    put(buf, pos, b"\r\n")
}

/// Encode `<prefix><n>\r\n`.
fn encode_header(buf: &mut [u8], prefix: u8, n: usize) -> usize {
    let mut fmt = itoa::Buffer::new();
    encode_line(buf, prefix, fmt.format(n).as_bytes())
}

/// Encode `<prefix><len>\r\n<parts...>\r\n`.
fn encode_blob(buf: &mut [u8], prefix: u8, parts: &[&[u8]]) -> usize {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut pos = encode_header(buf, prefix, len);
    for part in parts {
        pos = put(buf, pos, part);
    }
    put(buf, pos, b"\r\n")
}

fn encode_elements(buf: &mut [u8], prefix: u8, elements: &[Value]) -> usize {
    let mut pos = encode_header(buf, prefix, elements.len());
    for element in elements {
        pos += element.encode(&mut buf[pos..]);
    }
    pos
}

fn encode_pairs(buf: &mut [u8], prefix: u8, entries: &[(Value, Value)]) -> usize {
    let mut pos = encode_header(buf, prefix, entries.len());
    for (key, value) in entries {
        pos += key.encode(&mut buf[pos..]);
        pos += value.encode(&mut buf[pos..]);
    }
    pos
}

fn header_len(n: usize) -> usize {
    let mut buf = itoa::Buffer::new();
    1 + buf.format(n).len() + 2
}

fn blob_len(len: usize) -> usize {
    header_len(len) + len + 2
}

fn pairs_len(entries: &[(Value, Value)]) -> usize {
    header_len(entries.len())
        + entries
            .iter()
            .map(|(k, v)| k.encoded_len() + v.encoded_len())
            .sum::<usize>()
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "nan".to_string()
    } else if d.is_infinite() {
        (if d.is_sign_positive() { "inf" } else { "-inf" }).to_string()
    } else {
        ryu::Buffer::new().format_finite(d).to_string()
    }
}
