use std::time::Duration;

use resp_proto::{ParseOptions, TypeMapping};

/// Protocol generation negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// RESP2: no push frames; pub/sub traffic arrives as plain arrays.
    Resp2,
    /// RESP3: out-of-band data arrives as push frames.
    #[default]
    Resp3,
}

impl ProtocolVersion {
    /// The number passed to `HELLO`.
    pub const fn number(self) -> u8 {
        match self {
            ProtocolVersion::Resp2 => 2,
            ProtocolVersion::Resp3 => 3,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, u8> {
        match n {
            2 => Ok(ProtocolVersion::Resp2),
            3 => Ok(ProtocolVersion::Resp3),
            other => Err(other),
        }
    }
}

/// Configuration for a [`CommandQueue`](crate::CommandQueue).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    /// Protocol generation of the connection.
    pub protocol: ProtocolVersion,
    /// Bound on commands awaiting write plus commands awaiting reply.
    /// `None` means unbounded.
    pub max_length: Option<usize>,
    /// Mapping for commands that do not set their own.
    pub type_mapping: TypeMapping,
    /// Deadline applied to commands that do not set their own.
    pub default_timeout: Option<Duration>,
    /// Decoder limits.
    pub parse_options: ParseOptions,
}

impl QueueConfig {
    pub const fn new() -> Self {
        Self {
            protocol: ProtocolVersion::Resp3,
            max_length: None,
            type_mapping: TypeMapping::new(),
            default_timeout: None,
            parse_options: ParseOptions::new(),
        }
    }

    pub const fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub const fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub const fn type_mapping(mut self, mapping: TypeMapping) -> Self {
        self.type_mapping = mapping;
        self
    }

    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub const fn parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}
