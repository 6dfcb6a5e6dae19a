//! Routing of decoded values.
//!
//! Every top-level value the decoder completes is either the reply to the
//! command at the head of the awaiting-reply stage or server-initiated
//! traffic. [`classify`] makes that call; the [`DecodeSink`] implementation
//! on the queue state acts on it.

use bytes::Bytes;
use resp_proto::{DecodeSink, StringRepr, TypeMapping, Value};
use tracing::{debug, trace, warn};

use crate::command::AckCount;
use crate::config::ProtocolVersion;
use crate::error::{Error, ServerError};
use crate::metrics;
use crate::pubsub::PubSubFamily;
use crate::queue::QueueState;

/// Where a decoded value goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Completes the command at the head of the queue.
    Reply,
    /// A published message for the subscription table.
    Message(PubSubFamily),
    /// A (un)subscribe acknowledgement.
    Ack,
    /// `sunsubscribe`: an acknowledgement, or the server dropping a shard
    /// channel on its own.
    ShardUnsubscribe,
    /// RESP2 `PING` reply while subscribed.
    Pong,
    /// Any other push, offered to the push handlers.
    OutOfBand(PushKind),
}

/// Out-of-band push kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Invalidate,
    Moving,
    Migrating,
    Migrated,
    FailingOver,
    FailedOver,
    Other,
}

impl PushKind {
    fn from_marker(marker: &[u8]) -> Self {
        const KINDS: [(&[u8], PushKind); 6] = [
            (b"invalidate", PushKind::Invalidate),
            (b"MOVING", PushKind::Moving),
            (b"MIGRATING", PushKind::Migrating),
            (b"MIGRATED", PushKind::Migrated),
            (b"FAILING_OVER", PushKind::FailingOver),
            (b"FAILED_OVER", PushKind::FailedOver),
        ];
        KINDS
            .iter()
            .find(|(name, _)| marker.eq_ignore_ascii_case(name))
            .map_or(PushKind::Other, |(_, kind)| *kind)
    }
}

const ACK_MARKERS: [&[u8]; 5] = [
    b"subscribe",
    b"psubscribe",
    b"ssubscribe",
    b"unsubscribe",
    b"punsubscribe",
];

/// Decide where a decoded value goes.
///
/// Under RESP3 only push frames are server-initiated. Under RESP2 there are
/// no push frames, so while pub/sub is active arrays are inspected for
/// pub/sub markers instead.
pub fn classify(value: &Value, pubsub_active: bool, protocol: ProtocolVersion) -> Route {
    let (items, is_push) = match value.strip_attributes() {
        Value::Push(items) => (items.as_slice(), true),
        Value::Array(items) if protocol == ProtocolVersion::Resp2 && pubsub_active => {
            (items.as_slice(), false)
        }
        _ => return Route::Reply,
    };
    let unrecognized = if is_push {
        Route::OutOfBand(PushKind::Other)
    } else {
        Route::Reply
    };
    let Some(marker) = items.first().and_then(Value::as_bytes) else {
        return unrecognized;
    };

    if let Some(family) = PubSubFamily::ALL
        .into_iter()
        .find(|f| marker.eq_ignore_ascii_case(f.message_kind()))
    {
        return Route::Message(family);
    }
    if ACK_MARKERS.iter().any(|m| marker.eq_ignore_ascii_case(m)) {
        return Route::Ack;
    }
    if marker.eq_ignore_ascii_case(b"sunsubscribe") {
        return Route::ShardUnsubscribe;
    }
    if !is_push {
        if marker.eq_ignore_ascii_case(b"pong") {
            return Route::Pong;
        }
        return unrecognized;
    }
    Route::OutOfBand(PushKind::from_marker(marker))
}

// ── Sink ─────────────────────────────────────────────────────────────────

impl DecodeSink for QueueState {
    fn type_mapping(&mut self) -> TypeMapping {
        if self.config.protocol == ProtocolVersion::Resp2 && self.pubsub.is_active() {
            return TypeMapping::push();
        }
        self.head_mapping()
    }

    fn on_reply(&mut self, value: Value) {
        let route = classify(&value, self.pubsub.is_active(), self.config.protocol);
        self.route(route, value);
    }

    fn on_error_reply(&mut self, value: Value) {
        self.resolve_head(Err(Error::Server(ServerError::from_reply(value))));
    }

    fn on_push(&mut self, value: Value) {
        let route = classify(&value, self.pubsub.is_active(), self.config.protocol);
        self.route(route, value);
    }
}

impl QueueState {
    fn head_mapping(&self) -> TypeMapping {
        self.head()
            .and_then(|entry| entry.mapping)
            .unwrap_or(self.config.type_mapping)
    }

    fn route(&mut self, route: Route, value: Value) {
        match route {
            Route::Reply => self.resolve_head(Ok(value)),
            Route::Pong => self.resolve_pong(&value),
            Route::Message(family) => {
                metrics::PUSH_MESSAGES.increment();
                let delivered = value
                    .strip_attributes()
                    .as_array()
                    .is_some_and(|items| self.pubsub.handle_message(family, items));
                if !delivered {
                    trace!(?family, "message with no listener");
                }
            }
            Route::Ack => self.acknowledge(value),
            Route::ShardUnsubscribe => {
                if self.awaits_shard_unsubscribe(&value) {
                    self.acknowledge(value);
                } else {
                    self.shard_channel_moved(&value);
                }
            }
            Route::OutOfBand(kind) => {
                metrics::PUSH_OUT_OF_BAND.increment();
                for handler in self.push_handlers.iter_mut() {
                    if handler(&value) {
                        return;
                    }
                }
                debug!(?kind, "unhandled push");
            }
        }
    }

    fn resolve_head(&mut self, outcome: Result<Value, Error>) {
        let Some(key) = self.waiting.pop_front() else {
            warn!(error = outcome.is_err(), "reply with no command awaiting it, dropping");
            return;
        };
        if !self.finish(key, outcome) {
            metrics::REPLIES_DISCARDED.increment();
            trace!("discarded reply for settled command");
        }
    }

    /// RESP2 answers `PING` with `["pong", payload]` while subscribed.
    fn resolve_pong(&mut self, value: &Value) {
        let items = value.strip_attributes().as_array().unwrap_or_default();
        let payload = match items.get(1).and_then(Value::as_bytes) {
            Some(payload) if !payload.is_empty() => payload,
            _ => items.first().and_then(Value::as_bytes).unwrap_or_default(),
        };
        let reply = match self.head_mapping().simple_string {
            StringRepr::Text => Value::Text(String::from_utf8_lossy(payload).into_owned()),
            StringRepr::Bytes => Value::SimpleString(Bytes::copy_from_slice(payload)),
        };
        self.resolve_head(Ok(reply));
    }

    fn acknowledge(&mut self, value: Value) {
        let Some(&key) = self.waiting.front() else {
            warn!("subscription acknowledgement with no command awaiting it");
            return;
        };
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let done = match entry.acks.as_mut() {
            None => {
                warn!(seq = entry.seq, "acknowledgement for a command awaiting a reply, dropping");
                return;
            }
            Some(AckCount::Exactly(n)) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            Some(AckCount::Drained) => {
                let target = entry
                    .pubsub
                    .as_ref()
                    .map_or(0, |change| self.pubsub.remaining_outside(change.family()));
                remaining_subscriptions(&value).is_some_and(|n| n <= target as i64)
            }
        };
        if done {
            self.waiting.pop_front();
            if !self.finish(key, Ok(value)) {
                metrics::REPLIES_DISCARDED.increment();
            }
        }
    }

    /// A `sunsubscribe` frame acknowledges the head command only if that
    /// command is unsubscribing from the frame's shard channel.
    fn awaits_shard_unsubscribe(&self, value: &Value) -> bool {
        let channel = value
            .strip_attributes()
            .as_array()
            .and_then(|items| items.get(1))
            .and_then(Value::as_bytes);
        self.head()
            .filter(|entry| entry.acks.is_some())
            .and_then(|entry| entry.pubsub.as_ref())
            .is_some_and(|change| change.acknowledges_unsubscribe(PubSubFamily::Shard, channel))
    }

    fn shard_channel_moved(&mut self, value: &Value) {
        let channel = value
            .strip_attributes()
            .as_array()
            .and_then(|items| items.get(1))
            .and_then(Value::as_bytes)
            .map(Bytes::copy_from_slice);
        let Some(channel) = channel else {
            warn!("malformed sunsubscribe push");
            return;
        };
        let Some(listeners) = self.pubsub.remove_shard_listeners(&channel) else {
            debug!(channel = %String::from_utf8_lossy(&channel), "server dropped unknown shard channel");
            return;
        };
        debug!(channel = %String::from_utf8_lossy(&channel), "shard channel moved");
        if let Some(hook) = self.on_shard_moved.as_mut() {
            hook(&channel, listeners);
        }
    }
}

/// The subscription count carried by an acknowledgement.
fn remaining_subscriptions(value: &Value) -> Option<i64> {
    value.strip_attributes().as_array()?.get(2)?.as_integer()
}
