//! Per-command options, reply handles and queue entries.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use resp_proto::{TypeMapping, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind};
use crate::metrics;
use crate::pubsub::PendingChange;

/// Shared identifier of commands submitted as one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u64);

/// How many acknowledgement frames a pub/sub command waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCount {
    /// One acknowledgement per named channel.
    Exactly(usize),
    /// Until an acknowledgement reports that only subscriptions of other
    /// families remain. Used by argument-less unsubscribe, which gets one
    /// acknowledgement per channel dropped.
    Drained,
}

/// Post-processing applied to a successful reply before it is delivered.
pub type ReplyTransform = Box<dyn FnOnce(Value) -> Result<Value, Error>>;

/// Options for a single command.
#[derive(Default)]
pub struct CommandOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) transform: Option<ReplyTransform>,
    pub(crate) type_mapping: Option<TypeMapping>,
    pub(crate) acks: Option<AckCount>,
    pub(crate) asap: bool,
    pub(crate) chain: Option<ChainId>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the command with [`Error::Timeout`] if no reply arrives
    /// within `timeout`. Overrides the queue default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reject the command with [`Error::Cancelled`] once `token` fires.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value, Error> + 'static,
    {
        self.transform = Some(Box::new(f));
        self
    }

    pub fn type_mapping(mut self, mapping: TypeMapping) -> Self {
        self.type_mapping = Some(mapping);
        self
    }

    /// Complete on acknowledgement frames instead of on the next reply.
    pub fn acks(mut self, acks: AckCount) -> Self {
        self.acks = match acks {
            AckCount::Exactly(0) => None,
            other => Some(other),
        };
        self
    }

    /// Place the command ahead of everything awaiting write.
    pub fn asap(mut self) -> Self {
        self.asap = true;
        self
    }

    pub fn chain(mut self, chain: ChainId) -> Self {
        self.chain = Some(chain);
        self
    }
}

impl fmt::Debug for CommandOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandOptions")
            .field("timeout", &self.timeout)
            .field("cancel", &self.cancel.is_some())
            .field("transform", &self.transform.is_some())
            .field("type_mapping", &self.type_mapping)
            .field("acks", &self.acks)
            .field("asap", &self.asap)
            .field("chain", &self.chain)
            .finish()
    }
}

// ── Reply handle ────────────────────────────────────────────────────────

/// Identifies an enqueued command for [`CommandQueue::cancel`].
///
/// [`CommandQueue::cancel`]: crate::CommandQueue::cancel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId {
    pub(crate) key: usize,
    pub(crate) seq: u64,
}

/// Completion handle for one command.
///
/// Resolves exactly once. If the queue is dropped first the handle yields
/// [`Error::ConnectionClosed`].
#[derive(Debug)]
pub struct ReplyHandle {
    id: CommandId,
    rx: oneshot::Receiver<Result<Value, Error>>,
}

impl ReplyHandle {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Take the outcome without waiting, if it has been settled.
    pub fn try_take(&mut self) -> Option<Result<Value, Error>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::ConnectionClosed)),
        }
    }
}

impl Future for ReplyHandle {
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(Error::ConnectionClosed)))
    }
}

// ── Entry ───────────────────────────────────────────────────────────────

/// Lifecycle of a command's completion handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Pending,
    Resolved,
    Rejected(ErrorKind),
}

/// A command held by the queue.
pub(crate) struct Entry {
    pub(crate) seq: u64,
    /// Taken when the command is serialized.
    pub(crate) args: Option<Vec<Bytes>>,
    pub(crate) written: bool,
    pub(crate) mapping: Option<TypeMapping>,
    pub(crate) acks: Option<AckCount>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) chain: Option<ChainId>,
    /// Subscription table change applied when the acknowledgements land.
    pub(crate) pubsub: Option<PendingChange>,
    transform: Option<ReplyTransform>,
    state: Settlement,
    tx: Option<oneshot::Sender<Result<Value, Error>>>,
}

impl Entry {
    pub(crate) fn new(
        key: usize,
        seq: u64,
        args: Vec<Bytes>,
        options: CommandOptions,
        deadline: Option<Instant>,
    ) -> (Self, ReplyHandle) {
        let (tx, rx) = oneshot::channel();
        let entry = Self {
            seq,
            args: Some(args),
            written: false,
            mapping: options.type_mapping,
            acks: options.acks,
            deadline,
            cancel: options.cancel,
            chain: options.chain,
            pubsub: None,
            transform: options.transform,
            state: Settlement::Pending,
            tx: Some(tx),
        };
        let handle = ReplyHandle {
            id: CommandId { key, seq },
            rx,
        };
        metrics::COMMANDS_IN_FLIGHT.increment();
        (entry, handle)
    }

    pub(crate) fn state(&self) -> Settlement {
        self.state
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state == Settlement::Pending
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Settle the handle. Only the first call has any effect.
    pub(crate) fn settle(&mut self, outcome: Result<Value, Error>) -> bool {
        if !self.is_pending() {
            return false;
        }
        let outcome = match (outcome, self.transform.take()) {
            (Ok(value), Some(transform)) => transform(value),
            (outcome, _) => outcome,
        };
        match &outcome {
            Ok(_) => {
                self.state = Settlement::Resolved;
                metrics::REPLIES_RESOLVED.increment();
            }
            Err(e) => {
                self.state = Settlement::Rejected(e.kind());
                metrics::REPLIES_REJECTED.increment();
                match e {
                    Error::Timeout => {
                        metrics::REPLIES_TIMED_OUT.increment();
                    }
                    Error::Cancelled => {
                        metrics::REPLIES_CANCELLED.increment();
                    }
                    _ => {}
                }
            }
        }
        metrics::COMMANDS_IN_FLIGHT.decrement();
        if let Some(tx) = self.tx.take() {
            // The caller may have dropped the handle.
            let _ = tx.send(outcome);
        }
        true
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if self.is_pending() {
            metrics::COMMANDS_IN_FLIGHT.decrement();
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("seq", &self.seq)
            .field("written", &self.written)
            .field("acks", &self.acks)
            .field("chain", &self.chain)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(options: CommandOptions) -> (Entry, ReplyHandle) {
        Entry::new(0, 1, vec![Bytes::from_static(b"PING")], options, None)
    }

    #[test]
    fn test_settle_once() {
        let (mut entry, mut handle) = entry(CommandOptions::new());
        assert!(handle.try_take().is_none());
        assert!(entry.settle(Ok(Value::simple_string(b"PONG"))));
        assert!(!entry.settle(Err(Error::Timeout)));
        assert_eq!(entry.state(), Settlement::Resolved);
        assert_eq!(
            handle.try_take().unwrap().unwrap(),
            Value::simple_string(b"PONG")
        );
    }

    #[test]
    fn test_rejected_state_records_kind() {
        let (mut entry, mut handle) = entry(CommandOptions::new());
        entry.settle(Err(Error::Cancelled));
        assert_eq!(entry.state(), Settlement::Rejected(ErrorKind::Cancelled));
        assert!(matches!(handle.try_take(), Some(Err(Error::Cancelled))));
    }

    #[test]
    fn test_transform_applies_to_success_only() {
        let options = CommandOptions::new().transform(|v| {
            v.as_integer()
                .map(|n| Value::integer(n * 2))
                .ok_or(Error::UnexpectedReply)
        });
        let (mut ok, mut ok_handle) = entry(options);
        ok.settle(Ok(Value::integer(21)));
        assert_eq!(ok_handle.try_take().unwrap().unwrap(), Value::integer(42));

        let options = CommandOptions::new().transform(|_| Ok(Value::Null));
        let (mut err, mut err_handle) = entry(options);
        err.settle(Err(Error::Timeout));
        assert!(matches!(err_handle.try_take(), Some(Err(Error::Timeout))));
    }

    #[test]
    fn test_failing_transform_rejects() {
        let options = CommandOptions::new().transform(|_| Err(Error::UnexpectedReply));
        let (mut entry, mut handle) = entry(options);
        entry.settle(Ok(Value::Null));
        assert_eq!(entry.state(), Settlement::Rejected(ErrorKind::UnexpectedReply));
        assert!(matches!(handle.try_take(), Some(Err(Error::UnexpectedReply))));
    }

    #[test]
    fn test_dropped_entry_closes_handle() {
        let (entry, mut handle) = entry(CommandOptions::new());
        drop(entry);
        assert!(matches!(handle.try_take(), Some(Err(Error::ConnectionClosed))));
    }

    #[test]
    fn test_zero_acks_is_plain_command() {
        let options = CommandOptions::new().acks(AckCount::Exactly(0));
        assert_eq!(options.acks, None);
        let options = CommandOptions::new().acks(AckCount::Drained);
        assert_eq!(options.acks, Some(AckCount::Drained));
    }

    #[test]
    fn test_cancel_requested() {
        let token = CancellationToken::new();
        let (entry, _handle) = entry(CommandOptions::new().cancel_token(token.clone()));
        assert!(!entry.cancel_requested());
        token.cancel();
        assert!(entry.cancel_requested());
    }
}
