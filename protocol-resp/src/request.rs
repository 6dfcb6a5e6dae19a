//! Client-side request encoding.
//!
//! Commands are encoded as RESP arrays of bulk strings:
//! `*<n>\r\n` followed by `$<len>\r\n<bytes>\r\n` per argument.

use bytes::{BufMut, Bytes, BytesMut};

/// A request builder for encoding commands.
///
/// # Example
///
/// ```
/// use resp_proto::Request;
///
/// let req = Request::cmd(b"SET").arg(b"mykey").arg(b"myvalue");
/// let mut buf = vec![0u8; req.encoded_len()];
/// let len = req.encode(&mut buf);
/// assert_eq!(&buf[..len], b"*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$7\r\nmyvalue\r\n");
/// ```
#[derive(Debug, Clone)]
pub struct Request<'a> {
    args: Vec<&'a [u8]>,
}

impl<'a> Request<'a> {
    /// Create a new request with the given arguments.
    #[inline]
    pub fn new(args: Vec<&'a [u8]>) -> Self {
        Self { args }
    }

    /// Start a command with its name.
    #[inline]
    pub fn cmd(name: &'a [u8]) -> Self {
        Self { args: vec![name] }
    }

    /// Add an argument to the command.
    #[inline]
    pub fn arg(mut self, arg: &'a [u8]) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(&self) -> &[&'a [u8]] {
        &self.args
    }

    /// Encode this request into a buffer.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too small.
    #[inline]
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        encode_command(buf, &self.args)
    }

    /// Calculate the encoded length of this request.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        command_len(&self.args)
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Bytes {
        command_to_bytes(&self.args)
    }
}

/// Encode a command (array of bulk strings) into a buffer.
///
/// Returns the number of bytes written.
///
/// # Panics
///
/// Panics if the buffer is shorter than [`command_len`].
pub fn encode_command<A: AsRef<[u8]>>(buf: &mut [u8], args: &[A]) -> usize {
    let mut pos = put_header(buf, 0, b'*', args.len());
    for arg in args {
        let arg = arg.as_ref();
        pos = put_header(buf, pos, b'$', arg.len());
        buf[pos..pos + arg.len()].copy_from_slice(arg);
        pos += arg.len();
        buf[pos..pos + 2].copy_from_slice(b"\r\n");
        pos += 2;
    }
    pos
}

/// Number of bytes [`encode_command`] writes for `args`.
pub fn command_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    let mut fmt = itoa::Buffer::new();
    let mut len = 1 + fmt.format(args.len()).len() + 2;
    for arg in args {
        let arg = arg.as_ref();
        len += 1 + fmt.format(arg.len()).len() + 2 + arg.len() + 2;
    }
    len
}

/// Encode a command into a `Bytes` of exactly the right size.
pub fn command_to_bytes<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    let mut buf = BytesMut::with_capacity(command_len(args));
    let mut fmt = itoa::Buffer::new();
    buf.put_u8(b'*');
    buf.put_slice(fmt.format(args.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.put_u8(b'$');
        buf.put_slice(fmt.format(arg.len()).as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}

#[inline]
fn put_header(buf: &mut [u8], pos: usize, prefix: u8, n: usize) -> usize {
    let mut fmt = itoa::Buffer::new();
    let digits = fmt.format(n).as_bytes();
    buf[pos] = prefix;
    buf[pos + 1..pos + 1 + digits.len()].copy_from_slice(digits);
    let end = pos + 1 + digits.len();
    buf[end..end + 2].copy_from_slice(b"\r\n");
    end + 2
}
