//! Ordered command/reply queue for one connection.
//!
//! Commands move through two FIFO stages: awaiting write, then awaiting
//! reply. Replies carry no correlation identifier, so the Nth reply read
//! from the connection completes the Nth command written to it. A command
//! that is cancelled or times out after it was written therefore stays in
//! the awaiting-reply stage as a settled placeholder, and its reply is
//! discarded when it arrives.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use resp_proto::{Decoder, Value, command_to_bytes};
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::command::{ChainId, CommandId, CommandOptions, Entry, ReplyHandle, Settlement};
use crate::config::{ProtocolVersion, QueueConfig};
use crate::error::Error;
use crate::metrics;
use crate::pubsub::{Listener, PendingChange, PubSub, PubSubCommand, PubSubFamily, Subscription};

/// Handler offered out-of-band pushes. Returns `true` if it consumed the
/// push, which stops it being offered to later handlers.
pub type PushHandler = Box<dyn FnMut(&Value) -> bool>;

/// Called when the server drops a shard channel subscription on its own,
/// typically because the slot moved to another node.
pub type ShardMovedHook = Box<dyn FnMut(&Bytes, Subscription)>;

/// Per-connection command queue.
///
/// The queue is transport-agnostic: the caller writes the bytes yielded by
/// [`drain_for_write`](Self::drain_for_write) to the connection and feeds
/// every chunk read from it to [`receive`](Self::receive).
pub struct CommandQueue {
    decoder: Decoder,
    state: QueueState,
}

/// Everything but the decoder, so the decoder can write into it.
pub(crate) struct QueueState {
    pub(crate) config: QueueConfig,
    pub(crate) entries: Slab<Entry>,
    pub(crate) to_write: VecDeque<usize>,
    pub(crate) waiting: VecDeque<usize>,
    pub(crate) pubsub: PubSub,
    pub(crate) push_handlers: Vec<PushHandler>,
    pub(crate) on_shard_moved: Option<ShardMovedHook>,
    chain_in_execution: Option<ChainId>,
    next_seq: u64,
    next_chain: u64,
    closed: bool,
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            decoder: Decoder::new(config.parse_options),
            state: QueueState {
                config,
                entries: Slab::new(),
                to_write: VecDeque::new(),
                waiting: VecDeque::new(),
                pubsub: PubSub::new(),
                push_handlers: Vec::new(),
                on_shard_moved: None,
                chain_in_execution: None,
                next_seq: 0,
                next_chain: 0,
                closed: false,
            },
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.state.config
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.state.config.protocol
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Queue a command for writing.
    ///
    /// Fails without queueing if the queue is closed, full, or the
    /// command's cancellation token has already fired.
    pub fn enqueue<I, A>(&mut self, args: I, options: CommandOptions) -> Result<ReplyHandle, Error>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.state.admit(1)?;
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        let args = args
            .into_iter()
            .map(|a| Bytes::copy_from_slice(a.as_ref()))
            .collect();
        Ok(self.state.insert(args, options, None))
    }

    /// Attach `listener` to `channels`, sending a subscribe command for
    /// channels not yet subscribed.
    ///
    /// Returns `None` when no command was needed. Fails without touching
    /// the subscription table if the queue cannot take a command.
    pub fn subscribe<C: AsRef<[u8]>>(
        &mut self,
        family: PubSubFamily,
        channels: &[C],
        listener: Listener,
    ) -> Result<Option<ReplyHandle>, Error> {
        self.state.admit(1)?;
        let command = self.state.pubsub.subscribe(family, channels, listener);
        Ok(self.enqueue_pubsub(command))
    }

    /// Detach from channels. See [`PubSub::unsubscribe`] for how
    /// `channels` and `listener` select what is removed.
    pub fn unsubscribe<C: AsRef<[u8]>>(
        &mut self,
        family: PubSubFamily,
        channels: Option<&[C]>,
        listener: Option<&Listener>,
    ) -> Result<Option<ReplyHandle>, Error> {
        self.state.admit(1)?;
        let command = self.state.pubsub.unsubscribe(family, channels, listener);
        Ok(self.enqueue_pubsub(command))
    }

    fn enqueue_pubsub(&mut self, command: Option<PubSubCommand>) -> Option<ReplyHandle> {
        let command = command?;
        let options = CommandOptions::new().acks(command.acks);
        Some(self.state.insert(command.args, options, Some(command.change)))
    }

    /// Queue, ahead of everything else awaiting write, the commands that
    /// restore every known subscription. Used after reconnecting.
    pub fn resubscribe(&mut self) -> Result<Vec<ReplyHandle>, Error> {
        let commands = self.state.pubsub.resubscribe();
        if let Err(e) = self.state.admit(commands.len()) {
            for command in commands {
                self.state.pubsub.abort(command.change);
            }
            return Err(e);
        }
        // Inserted back to front so they keep their order at the head.
        let mut handles: Vec<ReplyHandle> = commands
            .into_iter()
            .rev()
            .map(|command| {
                let options = CommandOptions::new().acks(command.acks).asap();
                self.state.insert(command.args, options, Some(command.change))
            })
            .collect();
        handles.reverse();
        Ok(handles)
    }

    /// A fresh identifier for a chain of commands.
    pub fn next_chain_id(&mut self) -> ChainId {
        self.state.next_chain += 1;
        ChainId(self.state.next_chain)
    }

    // ── Transport side ───────────────────────────────────────────────

    /// Serialize commands awaiting write, oldest first.
    ///
    /// Each yielded command moves to the awaiting-reply stage. Commands that
    /// cannot be serialized are rejected and skipped.
    pub fn drain_for_write(&mut self) -> DrainForWrite<'_> {
        DrainForWrite {
            state: &mut self.state,
        }
    }

    /// Feed bytes read from the connection.
    ///
    /// A decode error is fatal to the connection: every outstanding command
    /// is rejected with the protocol error, which is also returned.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if let Err(e) = self.decoder.write(chunk, &mut self.state) {
            metrics::DECODE_ERRORS.increment();
            warn!(error = %e, "reply stream corrupt, rejecting outstanding commands");
            let cause = Error::Protocol(e);
            self.flush_all(cause.clone());
            return Err(cause);
        }
        Ok(())
    }

    /// Discard any partially decoded reply.
    pub fn reset_decoder(&mut self) {
        self.decoder.reset();
    }

    // ── Failure handling ─────────────────────────────────────────────

    /// Reject every command awaiting reply, plus the unwritten remainder of
    /// the chain being written. Used when the connection is lost; the rest
    /// of the commands awaiting write survive for the next connection.
    pub fn flush_waiting_for_reply(&mut self, cause: Error) {
        self.decoder.reset();
        self.state.flush_waiting(&cause);
    }

    /// Reject every command in the queue.
    pub fn flush_all(&mut self, cause: Error) {
        self.decoder.reset();
        self.state.flush_all(&cause);
    }

    /// Stop accepting commands and reject everything queued.
    pub fn close(&mut self, cause: Error) {
        self.state.closed = true;
        self.flush_all(cause);
        debug!("command queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    /// Cancel one command. Returns `false` if it was already settled.
    pub fn cancel(&mut self, id: CommandId) -> bool {
        match self.state.entries.get(id.key) {
            Some(entry) if entry.seq == id.seq => self.state.abandon(id.key, Error::Cancelled),
            _ => false,
        }
    }

    /// Reject commands whose deadline is at or before `now` and commands
    /// whose cancellation token fired. Returns how many were rejected.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<(usize, Error)> = self
            .state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_pending())
            .filter_map(|(key, entry)| {
                if entry.cancel_requested() {
                    Some((key, Error::Cancelled))
                } else if entry.deadline.is_some_and(|d| d <= now) {
                    Some((key, Error::Timeout))
                } else {
                    None
                }
            })
            .collect();
        let swept = expired.len();
        for (key, cause) in expired {
            self.state.abandon(key, cause);
        }
        if swept > 0 {
            debug!(swept, "rejected expired commands");
        }
        swept
    }

    /// Earliest deadline among unsettled commands.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_pending())
            .filter_map(|(_, entry)| entry.deadline)
            .min()
    }

    // ── Push handling ────────────────────────────────────────────────

    /// Register a handler for out-of-band pushes. Handlers are offered each
    /// push in registration order.
    pub fn add_push_handler(&mut self, handler: impl FnMut(&Value) -> bool + 'static) {
        self.state.push_handlers.push(Box::new(handler));
    }

    pub fn on_shard_channel_moved(&mut self, hook: impl FnMut(&Bytes, Subscription) + 'static) {
        self.state.on_shard_moved = Some(Box::new(hook));
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.state.pubsub
    }

    pub fn is_pubsub_active(&self) -> bool {
        self.state.pubsub.is_active()
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Commands awaiting write plus commands awaiting reply.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn waiting_to_write(&self) -> usize {
        self.state.to_write.len()
    }

    pub fn waiting_for_reply(&self) -> usize {
        self.state.waiting.len()
    }

    pub fn is_waiting_to_write(&self) -> bool {
        !self.state.to_write.is_empty()
    }

    /// How many more commands fit, or `None` if the queue is unbounded.
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.state
            .config
            .max_length
            .map(|max| max.saturating_sub(self.len()))
    }

    /// Settlement of a command the queue still holds.
    pub fn settlement(&self, id: CommandId) -> Option<Settlement> {
        self.state
            .entries
            .get(id.key)
            .filter(|entry| entry.seq == id.seq)
            .map(Entry::state)
    }

    pub(crate) fn admit(&self, count: usize) -> Result<(), Error> {
        self.state.admit(count)
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("protocol", &self.state.config.protocol)
            .field("waiting_to_write", &self.state.to_write.len())
            .field("waiting_for_reply", &self.state.waiting.len())
            .field("pubsub", &self.state.pubsub)
            .field("closed", &self.state.closed)
            .finish_non_exhaustive()
    }
}

/// Iterator returned by [`CommandQueue::drain_for_write`].
pub struct DrainForWrite<'a> {
    state: &'a mut QueueState,
}

impl Iterator for DrainForWrite<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.state.next_write()
    }
}

// ── QueueState ───────────────────────────────────────────────────────────

impl QueueState {
    fn len(&self) -> usize {
        self.to_write.len() + self.waiting.len()
    }

    fn admit(&self, count: usize) -> Result<(), Error> {
        if self.closed {
            return Err(Error::QueueClosed);
        }
        if let Some(max) = self.config.max_length {
            if self.len() + count > max {
                return Err(Error::QueueFull);
            }
        }
        Ok(())
    }

    fn insert(
        &mut self,
        args: Vec<Bytes>,
        options: CommandOptions,
        change: Option<PendingChange>,
    ) -> ReplyHandle {
        let deadline = options
            .timeout
            .or(self.config.default_timeout)
            .map(|timeout| Instant::now() + timeout);
        let asap = options.asap;
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = self.entries.vacant_entry();
        let key = slot.key();
        let (mut entry, handle) = Entry::new(key, seq, args, options, deadline);
        entry.pubsub = change;
        slot.insert(entry);

        if asap {
            self.to_write.push_front(key);
        } else {
            self.to_write.push_back(key);
        }
        metrics::COMMANDS_ENQUEUED.increment();
        trace!(seq, asap, "command enqueued");
        handle
    }

    fn next_write(&mut self) -> Option<Bytes> {
        while let Some(key) = self.to_write.pop_front() {
            let Some(entry) = self.entries.get_mut(key) else {
                continue;
            };
            if entry.cancel_requested() {
                self.reject_unwritten(key, Error::Cancelled);
                continue;
            }
            let args = entry.args.take().unwrap_or_default();
            if args.is_empty() {
                self.reject_unwritten(key, Error::Encode("empty command".into()));
                continue;
            }
            entry.written = true;
            self.chain_in_execution = entry.chain;
            self.waiting.push_back(key);
            metrics::COMMANDS_WRITTEN.increment();
            return Some(command_to_bytes(&args));
        }
        None
    }

    pub(crate) fn head(&self) -> Option<&Entry> {
        self.waiting.front().and_then(|key| self.entries.get(*key))
    }

    /// Remove a command that never reached the wire.
    fn reject_unwritten(&mut self, key: usize, cause: Error) {
        if let Some(mut entry) = self.entries.try_remove(key) {
            if let Some(change) = entry.pubsub.take() {
                self.pubsub.abort(change);
            }
            entry.settle(Err(cause));
        }
    }

    /// Remove a command whose reply (or final acknowledgement) arrived, or
    /// that is being flushed. Returns `false` if the command had already
    /// been settled.
    pub(crate) fn finish(&mut self, key: usize, outcome: Result<Value, Error>) -> bool {
        let Some(mut entry) = self.entries.try_remove(key) else {
            return false;
        };
        if let Some(change) = entry.pubsub.take() {
            if outcome.is_ok() {
                self.pubsub.commit(change);
            } else {
                self.pubsub.abort(change);
            }
        }
        entry.settle(outcome)
    }

    /// Settle a command early on timeout or cancellation.
    fn abandon(&mut self, key: usize, cause: Error) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if !entry.is_pending() {
            return false;
        }
        if entry.written {
            // Keeps its place so the reply lines up; discarded on arrival.
            trace!(seq = entry.seq, "settled command left awaiting its reply");
            entry.settle(Err(cause))
        } else {
            self.to_write.retain(|k| *k != key);
            self.reject_unwritten(key, cause);
            true
        }
    }

    fn flush_waiting(&mut self, cause: &Error) {
        let flushed = self.waiting.len();
        while let Some(key) = self.waiting.pop_front() {
            self.finish(key, Err(cause.clone()));
        }
        if let Some(chain) = self.chain_in_execution.take() {
            let members: Vec<usize> = self
                .to_write
                .iter()
                .copied()
                .filter(|key| self.entries.get(*key).is_some_and(|e| e.chain == Some(chain)))
                .collect();
            self.to_write.retain(|key| !members.contains(key));
            for key in members {
                self.reject_unwritten(key, cause.clone());
            }
        }
        if flushed > 0 {
            debug!(flushed, error = %cause, "rejected commands awaiting reply");
        }
    }

    fn flush_all(&mut self, cause: &Error) {
        self.flush_waiting(cause);
        while let Some(key) = self.to_write.pop_front() {
            self.reject_unwritten(key, cause.clone());
        }
        self.pubsub.reset();
    }
}
