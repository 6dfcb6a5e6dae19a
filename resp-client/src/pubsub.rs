//! Pub/sub subscription table.
//!
//! Tracks the channels, patterns and shard channels a connection listens on
//! and the listeners attached to each. The table never talks to the wire:
//! [`PubSub::subscribe`] and [`PubSub::unsubscribe`] describe the command to
//! send and hand back a [`PendingChange`] that the queue commits once the
//! server acknowledges it, or aborts if the command fails.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use resp_proto::Value;

use crate::command::AckCount;

/// Channel used by client-side caching invalidation in RESP2.
const INVALIDATE_CHANNEL: &[u8] = b"__redis__:invalidate";

/// Kind of subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PubSubFamily {
    /// `SUBSCRIBE` / `message`.
    Channel,
    /// `PSUBSCRIBE` / `pmessage`.
    Pattern,
    /// `SSUBSCRIBE` / `smessage`.
    Shard,
}

impl PubSubFamily {
    pub const ALL: [PubSubFamily; 3] = [
        PubSubFamily::Channel,
        PubSubFamily::Pattern,
        PubSubFamily::Shard,
    ];

    pub const fn subscribe_command(self) -> &'static [u8] {
        match self {
            PubSubFamily::Channel => b"SUBSCRIBE",
            PubSubFamily::Pattern => b"PSUBSCRIBE",
            PubSubFamily::Shard => b"SSUBSCRIBE",
        }
    }

    pub const fn unsubscribe_command(self) -> &'static [u8] {
        match self {
            PubSubFamily::Channel => b"UNSUBSCRIBE",
            PubSubFamily::Pattern => b"PUNSUBSCRIBE",
            PubSubFamily::Shard => b"SUNSUBSCRIBE",
        }
    }

    /// Marker of a delivered message.
    pub const fn message_kind(self) -> &'static [u8] {
        match self {
            PubSubFamily::Channel => b"message",
            PubSubFamily::Pattern => b"pmessage",
            PubSubFamily::Shard => b"smessage",
        }
    }

    const fn index(self) -> usize {
        match self {
            PubSubFamily::Channel => 0,
            PubSubFamily::Pattern => 1,
            PubSubFamily::Shard => 2,
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────────────

/// A message as delivered to binary listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: Bytes,
    /// The matching pattern, for pattern subscriptions.
    pub pattern: Option<Bytes>,
    pub payload: Value,
}

/// Payload of a message delivered to text listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPayload {
    Text(String),
    /// Invalidated keys, for the client-side caching channel.
    Keys(Vec<String>),
    /// Full invalidation (a null payload).
    Null,
}

/// A message as delivered to text listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub channel: String,
    pub pattern: Option<String>,
    pub payload: TextPayload,
}

pub type BinaryListener = Rc<dyn Fn(&Message)>;
pub type TextListener = Rc<dyn Fn(&TextMessage)>;

/// A message callback.
///
/// Listeners are compared by identity: cloning a `Listener` yields one that
/// [`PubSub::unsubscribe`] treats as the same listener.
#[derive(Clone)]
pub enum Listener {
    Binary(BinaryListener),
    Text(TextListener),
}

impl Listener {
    pub fn binary(f: impl Fn(&Message) + 'static) -> Self {
        Listener::Binary(Rc::new(f))
    }

    pub fn text(f: impl Fn(&TextMessage) + 'static) -> Self {
        Listener::Text(Rc::new(f))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Listener::Binary(_))
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Listener) -> bool {
        match (self, other) {
            (Listener::Binary(a), Listener::Binary(b)) => Rc::ptr_eq(a, b),
            (Listener::Text(a), Listener::Text(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Binary(l) => write!(f, "Listener::Binary({:p})", Rc::as_ptr(l)),
            Listener::Text(l) => write!(f, "Listener::Text({:p})", Rc::as_ptr(l)),
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────────

/// Listeners attached to one channel or pattern.
#[derive(Default)]
pub struct Subscription {
    binary: Vec<BinaryListener>,
    text: Vec<TextListener>,
    unsubscribing: bool,
}

impl Subscription {
    pub fn len(&self) -> usize {
        self.binary.len() + self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binary.is_empty() && self.text.is_empty()
    }

    /// An unsubscribe for this channel is awaiting acknowledgement.
    pub fn is_unsubscribing(&self) -> bool {
        self.unsubscribing
    }

    pub fn contains(&self, listener: &Listener) -> bool {
        match listener {
            Listener::Binary(l) => self.binary.iter().any(|x| Rc::ptr_eq(x, l)),
            Listener::Text(l) => self.text.iter().any(|x| Rc::ptr_eq(x, l)),
        }
    }

    fn add(&mut self, listener: &Listener) {
        if self.contains(listener) {
            return;
        }
        match listener {
            Listener::Binary(l) => self.binary.push(Rc::clone(l)),
            Listener::Text(l) => self.text.push(Rc::clone(l)),
        }
    }

    fn remove(&mut self, listener: &Listener) {
        match listener {
            Listener::Binary(l) => self.binary.retain(|x| !Rc::ptr_eq(x, l)),
            Listener::Text(l) => self.text.retain(|x| !Rc::ptr_eq(x, l)),
        }
    }

    /// Whether removing `listener` leaves the subscription empty.
    fn only_holds(&self, listener: &Listener) -> bool {
        let (same, other) = match listener {
            Listener::Binary(_) => (self.binary.len(), self.text.len()),
            Listener::Text(_) => (self.text.len(), self.binary.len()),
        };
        let same_after = if self.contains(listener) { same - 1 } else { same };
        same_after == 0 && other == 0
    }

    /// Every listener, in a form that can be reattached elsewhere.
    pub fn listeners(&self) -> impl Iterator<Item = Listener> + '_ {
        self.binary
            .iter()
            .cloned()
            .map(Listener::Binary)
            .chain(self.text.iter().cloned().map(Listener::Text))
    }

    fn deliver(&self, message: &Message) {
        for listener in &self.binary {
            listener(message);
        }
        if self.text.is_empty() {
            return;
        }
        let text = TextMessage::from_message(message);
        for listener in &self.text {
            listener(&text);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("binary", &self.binary.len())
            .field("text", &self.text.len())
            .field("unsubscribing", &self.unsubscribing)
            .finish()
    }
}

impl TextMessage {
    fn from_message(message: &Message) -> Self {
        let payload = if message.channel[..] == *INVALIDATE_CHANNEL {
            match message.payload.strip_attributes() {
                Value::Null => TextPayload::Null,
                value => match value.as_array() {
                    Some(keys) => TextPayload::Keys(keys.iter().map(to_text).collect()),
                    None => TextPayload::Text(to_text(value)),
                },
            }
        } else {
            TextPayload::Text(to_text(&message.payload))
        };
        TextMessage {
            channel: lossy(&message.channel),
            pattern: message.pattern.as_deref().map(lossy),
            payload,
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn to_text(value: &Value) -> String {
    let value = value.strip_attributes();
    if let Some(bytes) = value.as_bytes() {
        return lossy(bytes);
    }
    match value {
        Value::Integer(n) => n.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Boolean(b) => b.to_string(),
        _ => String::new(),
    }
}

// ── Pending changes ──────────────────────────────────────────────────────

/// A (un)subscribe command to send, with its table change.
#[derive(Debug)]
pub struct PubSubCommand {
    pub args: Vec<Bytes>,
    pub acks: AckCount,
    pub change: PendingChange,
}

/// Table change that takes effect once the server acknowledges a command.
#[derive(Debug)]
pub struct PendingChange {
    family: PubSubFamily,
    kind: ChangeKind,
}

#[derive(Debug)]
enum ChangeKind {
    Subscribe {
        channels: Vec<Bytes>,
        listener: Listener,
    },
    UnsubscribeAll,
    UnsubscribeChannels {
        channels: Vec<Bytes>,
    },
    RemoveListener {
        channels: Vec<Bytes>,
        listener: Listener,
    },
    Resubscribe,
}

impl PendingChange {
    pub fn family(&self) -> PubSubFamily {
        self.family
    }

    /// Whether an unsubscribe acknowledgement for `channel` in `family`
    /// belongs to this change.
    pub fn acknowledges_unsubscribe(&self, family: PubSubFamily, channel: Option<&[u8]>) -> bool {
        if family != self.family {
            return false;
        }
        match &self.kind {
            ChangeKind::UnsubscribeAll => true,
            ChangeKind::UnsubscribeChannels { channels }
            | ChangeKind::RemoveListener { channels, .. } => {
                channel.is_some_and(|c| channels.iter().any(|x| x[..] == *c))
            }
            ChangeKind::Subscribe { .. } | ChangeKind::Resubscribe => false,
        }
    }
}

// ── Table ────────────────────────────────────────────────────────────────

/// Subscription state for one connection.
#[derive(Debug, Default)]
pub struct PubSub {
    subscriptions: [HashMap<Bytes, Subscription>; 3],
    /// (Un)subscribe commands whose acknowledgements are outstanding.
    pending: usize,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pub/sub is active while anything is subscribed or an (un)subscribe
    /// is awaiting acknowledgement.
    pub fn is_active(&self) -> bool {
        self.pending > 0 || self.subscriptions.iter().any(|m| !m.is_empty())
    }

    pub fn pending_acks(&self) -> usize {
        self.pending
    }

    /// The subscription count the server reports once every subscription
    /// of `family` is dropped.
    ///
    /// Channels and patterns share one count; shard channels are counted
    /// on their own.
    pub fn remaining_outside(&self, family: PubSubFamily) -> usize {
        match family {
            PubSubFamily::Channel => self.subscriptions[PubSubFamily::Pattern.index()].len(),
            PubSubFamily::Pattern => self.subscriptions[PubSubFamily::Channel.index()].len(),
            PubSubFamily::Shard => 0,
        }
    }

    pub fn listeners(&self, family: PubSubFamily, channel: &[u8]) -> Option<&Subscription> {
        self.subscriptions[family.index()].get(channel)
    }

    pub fn channels(&self, family: PubSubFamily) -> impl Iterator<Item = &Bytes> {
        self.subscriptions[family.index()].keys()
    }

    /// Attach `listener` to `channels`.
    ///
    /// Returns the command to send for channels not yet subscribed. When
    /// every channel is already subscribed the listener is attached at once
    /// and no command is needed.
    pub fn subscribe<C: AsRef<[u8]>>(
        &mut self,
        family: PubSubFamily,
        channels: &[C],
        listener: Listener,
    ) -> Option<PubSubCommand> {
        let channels = to_bytes(channels);
        let map = &mut self.subscriptions[family.index()];
        let to_subscribe: Vec<Bytes> = channels
            .iter()
            .filter(|c| map.get(*c).is_none_or(Subscription::is_unsubscribing))
            .cloned()
            .collect();

        if to_subscribe.is_empty() {
            for channel in &channels {
                if let Some(sub) = map.get_mut(channel) {
                    sub.add(&listener);
                }
            }
            return None;
        }

        self.pending += 1;
        let acks = AckCount::Exactly(to_subscribe.len());
        Some(PubSubCommand {
            args: command(family.subscribe_command(), to_subscribe),
            acks,
            change: PendingChange {
                family,
                kind: ChangeKind::Subscribe { channels, listener },
            },
        })
    }

    /// Detach from channels.
    ///
    /// - No channels: unsubscribe from everything in the family.
    /// - Channels without a listener: unsubscribe from those channels.
    /// - Channels with a listener: detach the listener, unsubscribing only
    ///   from channels it leaves without listeners.
    pub fn unsubscribe<C: AsRef<[u8]>>(
        &mut self,
        family: PubSubFamily,
        channels: Option<&[C]>,
        listener: Option<&Listener>,
    ) -> Option<PubSubCommand> {
        let Some(channels) = channels else {
            return Some(self.unsubscribe_command(
                family,
                Vec::new(),
                AckCount::Drained,
                ChangeKind::UnsubscribeAll,
            ));
        };
        let channels = to_bytes(channels);
        if channels.is_empty() {
            return None;
        }

        let Some(listener) = listener else {
            let acks = AckCount::Exactly(channels.len());
            return Some(self.unsubscribe_command(
                family,
                channels.clone(),
                acks,
                ChangeKind::UnsubscribeChannels { channels },
            ));
        };

        let map = &mut self.subscriptions[family.index()];
        let mut to_unsubscribe = Vec::new();
        for channel in &channels {
            let Some(sub) = map.get_mut(channel) else {
                continue;
            };
            if sub.only_holds(listener) {
                sub.unsubscribing = true;
                to_unsubscribe.push(channel.clone());
            } else {
                sub.remove(listener);
            }
        }
        if to_unsubscribe.is_empty() {
            return None;
        }

        let acks = AckCount::Exactly(to_unsubscribe.len());
        Some(self.unsubscribe_command(
            family,
            to_unsubscribe.clone(),
            acks,
            ChangeKind::RemoveListener {
                channels: to_unsubscribe,
                listener: listener.clone(),
            },
        ))
    }

    fn unsubscribe_command(
        &mut self,
        family: PubSubFamily,
        channels: Vec<Bytes>,
        acks: AckCount,
        kind: ChangeKind,
    ) -> PubSubCommand {
        self.pending += 1;
        PubSubCommand {
            args: command(family.unsubscribe_command(), channels),
            acks,
            change: PendingChange { family, kind },
        }
    }

    /// Apply a change whose command was acknowledged.
    pub fn commit(&mut self, change: PendingChange) {
        self.pending = self.pending.saturating_sub(1);
        let map = &mut self.subscriptions[change.family.index()];
        match change.kind {
            ChangeKind::Subscribe { channels, listener } => {
                for channel in channels {
                    let sub = map.entry(channel).or_default();
                    sub.unsubscribing = false;
                    sub.add(&listener);
                }
            }
            ChangeKind::UnsubscribeAll => map.clear(),
            ChangeKind::UnsubscribeChannels { channels } => {
                for channel in &channels {
                    map.remove(channel);
                }
            }
            ChangeKind::RemoveListener { channels, listener } => {
                for channel in &channels {
                    if let Some(sub) = map.get_mut(channel) {
                        sub.remove(&listener);
                        if sub.is_empty() {
                            map.remove(channel);
                        }
                    }
                }
            }
            ChangeKind::Resubscribe => {}
        }
    }

    /// Drop a change whose command failed.
    pub fn abort(&mut self, change: PendingChange) {
        self.pending = self.pending.saturating_sub(1);
        if let ChangeKind::RemoveListener { channels, .. } = change.kind {
            let map = &mut self.subscriptions[change.family.index()];
            for channel in &channels {
                if let Some(sub) = map.get_mut(channel) {
                    sub.unsubscribing = false;
                }
            }
        }
    }

    /// Commands that restore every subscription on a fresh connection.
    ///
    /// Shard channels are resubscribed one per command since they may live
    /// on different slots.
    pub fn resubscribe(&mut self) -> Vec<PubSubCommand> {
        let mut commands = Vec::new();
        for family in PubSubFamily::ALL {
            let map = &self.subscriptions[family.index()];
            if map.is_empty() {
                continue;
            }
            let channels: Vec<Bytes> = map.keys().cloned().collect();
            let groups: Vec<Vec<Bytes>> = match family {
                PubSubFamily::Shard => channels.into_iter().map(|c| vec![c]).collect(),
                _ => vec![channels],
            };
            for group in groups {
                commands.push(PubSubCommand {
                    acks: AckCount::Exactly(group.len()),
                    args: command(family.subscribe_command(), group),
                    change: PendingChange {
                        family,
                        kind: ChangeKind::Resubscribe,
                    },
                });
            }
        }
        self.pending += commands.len();
        commands
    }

    /// Forget outstanding acknowledgements. Subscriptions are kept so they
    /// can be restored with [`PubSub::resubscribe`].
    pub fn reset(&mut self) {
        self.pending = 0;
    }

    /// Deliver a `message`, `pmessage` or `smessage` frame.
    ///
    /// Returns `false` if nothing listens on the channel or the frame is
    /// malformed.
    pub fn handle_message(&self, family: PubSubFamily, items: &[Value]) -> bool {
        let (pattern, channel, payload) = match family {
            PubSubFamily::Pattern => (items.get(1), items.get(2), items.get(3)),
            _ => (None, items.get(1), items.get(2)),
        };
        let (Some(channel), Some(payload)) = (channel.and_then(Value::as_bytes), payload) else {
            return false;
        };
        let pattern = pattern.and_then(Value::as_bytes);
        let key = pattern.unwrap_or(channel);
        let Some(sub) = self.subscriptions[family.index()].get(key) else {
            return false;
        };
        sub.deliver(&Message {
            channel: Bytes::copy_from_slice(channel),
            pattern: pattern.map(Bytes::copy_from_slice),
            payload: payload.clone(),
        });
        true
    }

    /// Drop a shard channel the server unsubscribed on its own, returning
    /// its listeners so they can be moved to another node.
    pub fn remove_shard_listeners(&mut self, channel: &[u8]) -> Option<Subscription> {
        self.subscriptions[PubSubFamily::Shard.index()].remove(channel)
    }
}

fn to_bytes<C: AsRef<[u8]>>(channels: &[C]) -> Vec<Bytes> {
    channels
        .iter()
        .map(|c| Bytes::copy_from_slice(c.as_ref()))
        .collect()
}

fn command(name: &'static [u8], channels: Vec<Bytes>) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(channels.len() + 1);
    args.push(Bytes::from_static(name));
    args.extend(channels);
    args
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn recorder() -> (Listener, Rc<RefCell<Vec<Message>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (
            Listener::binary(move |m: &Message| sink.borrow_mut().push(m.clone())),
            seen,
        )
    }

    fn text_recorder() -> (Listener, Rc<RefCell<Vec<TextMessage>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (
            Listener::text(move |m: &TextMessage| sink.borrow_mut().push(m.clone())),
            seen,
        )
    }

    fn message(kind: &[u8], channel: &[u8], payload: &[u8]) -> Vec<Value> {
        vec![
            Value::bulk_string(kind),
            Value::bulk_string(channel),
            Value::bulk_string(payload),
        ]
    }

    fn args(cmd: &PubSubCommand) -> Vec<&[u8]> {
        cmd.args.iter().map(|a| &a[..]).collect()
    }

    #[test]
    fn test_subscribe_commit() {
        let mut table = PubSub::new();
        let (listener, seen) = recorder();
        let cmd = table
            .subscribe(PubSubFamily::Channel, &["a", "b"], listener)
            .unwrap();
        assert_eq!(args(&cmd), vec![&b"SUBSCRIBE"[..], b"a", b"b"]);
        assert_eq!(cmd.acks, AckCount::Exactly(2));
        assert!(table.is_active());
        assert!(table.listeners(PubSubFamily::Channel, b"a").is_none());

        table.commit(cmd.change);
        assert_eq!(table.pending_acks(), 0);
        assert!(table.is_active());
        assert_eq!(table.channels(PubSubFamily::Channel).count(), 2);

        assert!(table.handle_message(PubSubFamily::Channel, &message(b"message", b"a", b"hi")));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].payload, Value::bulk_string(b"hi"));
    }

    #[test]
    fn test_subscribe_existing_attaches_without_command() {
        let mut table = PubSub::new();
        let (first, _) = recorder();
        let cmd = table.subscribe(PubSubFamily::Channel, &["a"], first).unwrap();
        table.commit(cmd.change);

        let (second, seen) = text_recorder();
        assert!(table.subscribe(PubSubFamily::Channel, &["a"], second).is_none());
        assert_eq!(table.listeners(PubSubFamily::Channel, b"a").unwrap().len(), 2);

        table.handle_message(PubSubFamily::Channel, &message(b"message", b"a", b"hi"));
        assert_eq!(
            seen.borrow()[0],
            TextMessage {
                channel: "a".into(),
                pattern: None,
                payload: TextPayload::Text("hi".into()),
            }
        );
    }

    #[test]
    fn test_subscribe_only_new_channels() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        let cmd = table
            .subscribe(PubSubFamily::Channel, &["a"], listener.clone())
            .unwrap();
        table.commit(cmd.change);
        let cmd = table
            .subscribe(PubSubFamily::Channel, &["a", "b"], listener)
            .unwrap();
        assert_eq!(args(&cmd), vec![&b"SUBSCRIBE"[..], b"b"]);
        assert_eq!(cmd.acks, AckCount::Exactly(1));
    }

    #[test]
    fn test_abort_subscribe() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        let cmd = table.subscribe(PubSubFamily::Pattern, &["n*"], listener).unwrap();
        assert!(table.is_active());
        table.abort(cmd.change);
        assert!(!table.is_active());
        assert_eq!(table.channels(PubSubFamily::Pattern).count(), 0);
    }

    #[test]
    fn test_unsubscribe_all() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        let cmd = table
            .subscribe(PubSubFamily::Channel, &["a", "b"], listener)
            .unwrap();
        table.commit(cmd.change);

        let cmd = table
            .unsubscribe::<&str>(PubSubFamily::Channel, None, None)
            .unwrap();
        assert_eq!(args(&cmd), vec![&b"UNSUBSCRIBE"[..]]);
        assert_eq!(cmd.acks, AckCount::Drained);
        table.commit(cmd.change);
        assert!(!table.is_active());
    }

    #[test]
    fn test_remaining_outside_family() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        for (family, channels) in [
            (PubSubFamily::Channel, &["a", "b"][..]),
            (PubSubFamily::Pattern, &["p*"][..]),
            (PubSubFamily::Shard, &["s"][..]),
        ] {
            let cmd = table.subscribe(family, channels, listener.clone()).unwrap();
            table.commit(cmd.change);
        }
        assert_eq!(table.remaining_outside(PubSubFamily::Channel), 1);
        assert_eq!(table.remaining_outside(PubSubFamily::Pattern), 2);
        assert_eq!(table.remaining_outside(PubSubFamily::Shard), 0);
    }

    #[test]
    fn test_which_changes_take_unsubscribe_acks() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        let subscribe = table
            .subscribe(PubSubFamily::Shard, &["s"], listener)
            .unwrap();
        assert!(!subscribe.change.acknowledges_unsubscribe(PubSubFamily::Shard, Some(&b"s"[..])));

        let some = table
            .unsubscribe(PubSubFamily::Shard, Some(&["s"][..]), None)
            .unwrap();
        assert!(some.change.acknowledges_unsubscribe(PubSubFamily::Shard, Some(&b"s"[..])));
        assert!(!some.change.acknowledges_unsubscribe(PubSubFamily::Shard, Some(&b"t"[..])));
        assert!(!some.change.acknowledges_unsubscribe(PubSubFamily::Channel, Some(&b"s"[..])));

        let all = table
            .unsubscribe::<&str>(PubSubFamily::Shard, None, None)
            .unwrap();
        assert!(all.change.acknowledges_unsubscribe(PubSubFamily::Shard, None));
    }

    #[test]
    fn test_unsubscribe_channels() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        let cmd = table
            .subscribe(PubSubFamily::Shard, &["a", "b"], listener)
            .unwrap();
        table.commit(cmd.change);

        let cmd = table
            .unsubscribe(PubSubFamily::Shard, Some(&["a"][..]), None)
            .unwrap();
        assert_eq!(args(&cmd), vec![&b"SUNSUBSCRIBE"[..], b"a"]);
        table.commit(cmd.change);
        let left: Vec<_> = table.channels(PubSubFamily::Shard).cloned().collect();
        assert_eq!(left, vec![Bytes::from_static(b"b")]);
        assert!(
            table
                .unsubscribe::<&str>(PubSubFamily::Shard, Some(&[][..]), None)
                .is_none()
        );
    }

    #[test]
    fn test_unsubscribe_listener_keeps_shared_channel() {
        let mut table = PubSub::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        let cmd = table
            .subscribe(PubSubFamily::Channel, &["shared", "solo"], a.clone())
            .unwrap();
        table.commit(cmd.change);
        assert!(table.subscribe(PubSubFamily::Channel, &["shared"], b).is_none());

        let cmd = table
            .unsubscribe(PubSubFamily::Channel, Some(&["shared", "solo"][..]), Some(&a))
            .unwrap();
        // `shared` still has `b`, so only `solo` goes to the server.
        assert_eq!(args(&cmd), vec![&b"UNSUBSCRIBE"[..], b"solo"]);
        assert!(
            table
                .listeners(PubSubFamily::Channel, b"solo")
                .unwrap()
                .is_unsubscribing()
        );
        table.commit(cmd.change);
        assert!(table.listeners(PubSubFamily::Channel, b"solo").is_none());

        table.handle_message(PubSubFamily::Channel, &message(b"message", b"shared", b"x"));
        assert!(seen_a.borrow().is_empty());
        assert_eq!(seen_b.borrow().len(), 1);
    }

    #[test]
    fn test_unsubscribe_listener_not_last_needs_no_command() {
        let mut table = PubSub::new();
        let (a, _) = recorder();
        let (b, _) = text_recorder();
        let cmd = table.subscribe(PubSubFamily::Channel, &["c"], a.clone()).unwrap();
        table.commit(cmd.change);
        table.subscribe(PubSubFamily::Channel, &["c"], b);
        assert!(
            table
                .unsubscribe(PubSubFamily::Channel, Some(&["c"][..]), Some(&a))
                .is_none()
        );
        assert_eq!(table.listeners(PubSubFamily::Channel, b"c").unwrap().len(), 1);
    }

    #[test]
    fn test_abort_unsubscribe_clears_flag() {
        let mut table = PubSub::new();
        let (a, _) = recorder();
        let cmd = table.subscribe(PubSubFamily::Channel, &["c"], a.clone()).unwrap();
        table.commit(cmd.change);
        let cmd = table
            .unsubscribe(PubSubFamily::Channel, Some(&["c"][..]), Some(&a))
            .unwrap();
        table.abort(cmd.change);
        let sub = table.listeners(PubSubFamily::Channel, b"c").unwrap();
        assert!(!sub.is_unsubscribing());
        assert!(sub.contains(&a));
    }

    #[test]
    fn test_resubscribe() {
        let mut table = PubSub::new();
        let (l, _) = recorder();
        for (family, channels) in [
            (PubSubFamily::Channel, vec!["a", "b"]),
            (PubSubFamily::Pattern, vec!["p*"]),
            (PubSubFamily::Shard, vec!["s1", "s2"]),
        ] {
            let cmd = table.subscribe(family, &channels, l.clone()).unwrap();
            table.commit(cmd.change);
        }
        table.reset();

        let commands = table.resubscribe();
        // One for channels, one for patterns, one per shard channel.
        assert_eq!(commands.len(), 4);
        assert_eq!(table.pending_acks(), 4);
        assert_eq!(commands[0].acks, AckCount::Exactly(2));
        assert_eq!(&commands[1].args[0][..], b"PSUBSCRIBE");
        for cmd in &commands[2..] {
            assert_eq!(&cmd.args[0][..], b"SSUBSCRIBE");
            assert_eq!(cmd.args.len(), 2);
        }
        for cmd in commands {
            table.commit(cmd.change);
        }
        assert_eq!(table.pending_acks(), 0);
        assert_eq!(table.channels(PubSubFamily::Channel).count(), 2);
    }

    #[test]
    fn test_pattern_message() {
        let mut table = PubSub::new();
        let (listener, seen) = text_recorder();
        let cmd = table.subscribe(PubSubFamily::Pattern, &["news.*"], listener).unwrap();
        table.commit(cmd.change);

        let frame = vec![
            Value::bulk_string(b"pmessage"),
            Value::bulk_string(b"news.*"),
            Value::bulk_string(b"news.tech"),
            Value::bulk_string(b"hello"),
        ];
        assert!(table.handle_message(PubSubFamily::Pattern, &frame));
        let msg = &seen.borrow()[0];
        assert_eq!(msg.channel, "news.tech");
        assert_eq!(msg.pattern.as_deref(), Some("news.*"));
    }

    #[test]
    fn test_invalidation_payloads() {
        let mut table = PubSub::new();
        let (listener, seen) = text_recorder();
        let cmd = table
            .subscribe(PubSubFamily::Channel, &["__redis__:invalidate"], listener)
            .unwrap();
        table.commit(cmd.change);

        let keys = vec![
            Value::bulk_string(b"message"),
            Value::bulk_string(b"__redis__:invalidate"),
            Value::array(vec![Value::bulk_string(b"k1"), Value::bulk_string(b"k2")]),
        ];
        table.handle_message(PubSubFamily::Channel, &keys);
        let flush = vec![
            Value::bulk_string(b"message"),
            Value::bulk_string(b"__redis__:invalidate"),
            Value::Null,
        ];
        table.handle_message(PubSubFamily::Channel, &flush);

        let seen = seen.borrow();
        assert_eq!(
            seen[0].payload,
            TextPayload::Keys(vec!["k1".into(), "k2".into()])
        );
        assert_eq!(seen[1].payload, TextPayload::Null);
    }

    #[test]
    fn test_message_without_listener() {
        let table = PubSub::new();
        assert!(!table.handle_message(PubSubFamily::Channel, &message(b"message", b"x", b"y")));
        assert!(!table.handle_message(PubSubFamily::Channel, &[Value::bulk_string(b"message")]));
    }

    #[test]
    fn test_remove_shard_listeners() {
        let mut table = PubSub::new();
        let (listener, _) = recorder();
        let cmd = table
            .subscribe(PubSubFamily::Shard, &["s"], listener.clone())
            .unwrap();
        table.commit(cmd.change);

        let moved = table.remove_shard_listeners(b"s").unwrap();
        let listeners: Vec<_> = moved.listeners().collect();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0], listener);
        assert!(!table.is_active());
    }
}
