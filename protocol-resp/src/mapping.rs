//! Reply-shape selection.
//!
//! A [`TypeMapping`] decides which [`Value`](crate::Value) variant each RESP
//! kind materializes as. It is a small `Copy` value handed to the decoder at
//! the start of every top-level reply, so concurrent callers can ask for
//! different shapes without any shared state between them.

/// Representation for integers and doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberRepr {
    /// `Value::Integer` / `Value::Double`.
    #[default]
    Native,
    /// `Value::Text` holding the token exactly as sent.
    Text,
}

/// Representation for RESP3 big numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BigNumberRepr {
    /// `Value::BigNumber` holding the raw decimal digits.
    #[default]
    Raw,
    /// `Value::Text` holding the decimal digits.
    Text,
    /// `Value::Double`, losing precision beyond 53 bits.
    Double,
}

/// Representation for simple and bulk strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringRepr {
    /// `Value::SimpleString` / `Value::BulkString`.
    #[default]
    Bytes,
    /// `Value::Text`, replacing invalid UTF-8 sequences.
    Text,
}

/// Representation for RESP3 verbatim strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerbatimRepr {
    /// `Value::VerbatimString` keeping the three byte format tag.
    #[default]
    Tagged,
    /// `Value::Text` of the payload, tag dropped.
    Text,
    /// `Value::BulkString` of the payload, tag dropped.
    Bytes,
}

/// Representation for RESP3 maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapRepr {
    /// `Value::Map` of key/value pairs, in wire order.
    #[default]
    Pairs,
    /// `Value::Array` alternating keys and values, the RESP2 shape.
    Flat,
}

/// Representation for RESP3 sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetRepr {
    /// `Value::Set`.
    #[default]
    Set,
    /// `Value::Array`, the RESP2 shape.
    Array,
}

/// Per-kind representation selectors.
///
/// The mapping is consulted per field: every nested element of an aggregate
/// is shaped by the same mapping as the top-level reply it belongs to. Error
/// replies are never remapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeMapping {
    pub integer: NumberRepr,
    pub double: NumberRepr,
    pub big_number: BigNumberRepr,
    pub simple_string: StringRepr,
    pub blob_string: StringRepr,
    pub verbatim_string: VerbatimRepr,
    pub map: MapRepr,
    pub set: SetRepr,
}

impl TypeMapping {
    /// The native mapping: every kind decodes to its own variant.
    pub const fn new() -> Self {
        Self {
            integer: NumberRepr::Native,
            double: NumberRepr::Native,
            big_number: BigNumberRepr::Raw,
            simple_string: StringRepr::Bytes,
            blob_string: StringRepr::Bytes,
            verbatim_string: VerbatimRepr::Tagged,
            map: MapRepr::Pairs,
            set: SetRepr::Set,
        }
    }

    /// Mapping used for push frames and pub/sub traffic.
    ///
    /// Strings stay binary so listeners can choose their own delivery.
    pub const fn push() -> Self {
        Self::new()
    }

    /// Mapping that turns every string-like kind into `Value::Text`.
    pub const fn text() -> Self {
        Self {
            integer: NumberRepr::Native,
            double: NumberRepr::Native,
            big_number: BigNumberRepr::Text,
            simple_string: StringRepr::Text,
            blob_string: StringRepr::Text,
            verbatim_string: VerbatimRepr::Text,
            map: MapRepr::Pairs,
            set: SetRepr::Set,
        }
    }

    /// Mapping that flattens RESP3 aggregates into RESP2 shapes.
    pub const fn resp2_shapes() -> Self {
        Self {
            map: MapRepr::Flat,
            set: SetRepr::Array,
            ..Self::new()
        }
    }

    /// Set the integer representation.
    pub const fn integer(mut self, repr: NumberRepr) -> Self {
        self.integer = repr;
        self
    }

    /// Set the double representation.
    pub const fn double(mut self, repr: NumberRepr) -> Self {
        self.double = repr;
        self
    }

    /// Set the big number representation.
    pub const fn big_number(mut self, repr: BigNumberRepr) -> Self {
        self.big_number = repr;
        self
    }

    /// Set the simple string representation.
    pub const fn simple_string(mut self, repr: StringRepr) -> Self {
        self.simple_string = repr;
        self
    }

    /// Set the bulk string representation.
    pub const fn blob_string(mut self, repr: StringRepr) -> Self {
        self.blob_string = repr;
        self
    }

    /// Set the verbatim string representation.
    pub const fn verbatim_string(mut self, repr: VerbatimRepr) -> Self {
        self.verbatim_string = repr;
        self
    }

    /// Set the map representation.
    pub const fn map(mut self, repr: MapRepr) -> Self {
        self.map = repr;
        self
    }

    /// Set the set representation.
    pub const fn set(mut self, repr: SetRepr) -> Self {
        self.set = repr;
        self
    }
}
