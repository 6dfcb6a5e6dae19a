//! Transport-agnostic RESP client core.
//!
//! [`CommandQueue`] holds the per-connection state of a pipelined Redis
//! client: the commands awaiting write, the commands awaiting reply, the
//! incremental reply decoder and the pub/sub subscription table. It never
//! touches a socket. The embedding connection loop:
//!
//! 1. writes the bytes yielded by [`CommandQueue::drain_for_write`],
//! 2. feeds every chunk it reads to [`CommandQueue::receive`],
//! 3. calls [`CommandQueue::sweep`] when [`CommandQueue::next_deadline`]
//!    passes or a cancellation token fires,
//! 4. on disconnect calls [`CommandQueue::flush_waiting_for_reply`] (to
//!    keep unwritten commands for the next connection) or
//!    [`CommandQueue::flush_all`].
//!
//! Each command gets a [`ReplyHandle`], a future resolved when its reply is
//! decoded. Replies are matched to commands purely by order; out-of-band
//! pushes and pub/sub messages are routed separately and never complete a
//! command.
//!
//! The queue is single-threaded: listeners and push handlers are plain
//! closures run inline while a chunk is decoded.
//!
//! # Example
//!
//! ```
//! use resp_client::{CommandOptions, CommandQueue, Value};
//!
//! let mut queue = CommandQueue::default();
//! let mut get = queue.enqueue(["GET", "greeting"], CommandOptions::new()).unwrap();
//!
//! let wire: Vec<u8> = queue.drain_for_write().flat_map(|b| b.to_vec()).collect();
//! assert_eq!(wire, b"*2\r\n$3\r\nGET\r\n$8\r\ngreeting\r\n");
//!
//! // The reply may arrive split at any byte.
//! queue.receive(b"$5\r\nhel").unwrap();
//! queue.receive(b"lo\r\n").unwrap();
//! assert_eq!(get.try_take().unwrap().unwrap(), Value::bulk_string(b"hello"));
//! ```

mod batch;
mod command;
mod config;
mod error;
pub mod metrics;
mod pubsub;
mod queue;
mod router;

pub use batch::{Batch, BatchHandle, BatchMode};
pub use command::{
    AckCount, ChainId, CommandId, CommandOptions, ReplyHandle, ReplyTransform, Settlement,
};
pub use config::{ProtocolVersion, QueueConfig};
pub use error::{BatchError, Error, ErrorKind, ServerError};
pub use pubsub::{
    BinaryListener, Listener, Message, PendingChange, PubSub, PubSubCommand, PubSubFamily,
    Subscription, TextListener, TextMessage, TextPayload,
};
pub use queue::{CommandQueue, DrainForWrite, PushHandler, ShardMovedHook};
pub use router::{PushKind, Route, classify};

pub use resp_proto::{ParseError, ParseOptions, TypeMapping, Value};
pub use tokio_util::sync::CancellationToken;
