//! RESP2/RESP3 protocol support for pipelined clients.
//!
//! - **Decoding**: [`Decoder`] turns an unbounded sequence of byte chunks
//!   into complete [`Value`]s, resuming at any byte boundary.
//! - **Reply shapes**: [`TypeMapping`] chooses, per top-level reply, which
//!   `Value` variant each RESP kind materializes as.
//! - **Requests**: [`Request`] and [`encode_command`] frame commands as
//!   arrays of bulk strings.
//!
//! RESP2 and RESP3 replies are decoded by the same state machine; the
//! protocol generation only changes how a client routes what it decodes.
//!
//! # Example
//!
//! ```
//! use resp_proto::{Decoder, MapRepr, Request, TypeMapping, Value};
//!
//! let bytes = Request::cmd(b"HGETALL").arg(b"h").to_bytes();
//! assert!(bytes.starts_with(b"*2\r\n"));
//!
//! let mut decoder = Decoder::default();
//! let flat = TypeMapping::new().map(MapRepr::Flat);
//! let values = decoder.decode(b"%1\r\n+f\r\n:1\r\n", flat).unwrap();
//! assert_eq!(
//!     values,
//!     vec![Value::array(vec![Value::simple_string(b"f"), Value::integer(1)])]
//! );
//! ```

mod cursor;
mod decoder;
mod error;
mod mapping;
mod request;
mod value;

pub use decoder::{
    DEFAULT_MAX_BULK_STRING_LEN, DEFAULT_MAX_COLLECTION_ELEMENTS, DEFAULT_MAX_DEPTH, DecodeSink,
    Decoder, ParseOptions,
};
pub use error::ParseError;
pub use mapping::{BigNumberRepr, MapRepr, NumberRepr, SetRepr, StringRepr, TypeMapping, VerbatimRepr};
pub use request::{Request, command_len, command_to_bytes, encode_command};
pub use value::Value;
