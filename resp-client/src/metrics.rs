//! Command queue metrics.
//!
//! Process-wide counters for command lifecycle outcomes and routed pushes.
//! Exposed through whatever exporter the embedding application registers
//! with `metriken`.

use metriken::{Counter, Gauge, metric};

// ── Command lifecycle ────────────────────────────────────────────

#[metric(
    name = "resp/commands/enqueued",
    description = "Total commands accepted by a queue"
)]
pub static COMMANDS_ENQUEUED: Counter = Counter::new();

#[metric(
    name = "resp/commands/written",
    description = "Total commands serialized for the transport"
)]
pub static COMMANDS_WRITTEN: Counter = Counter::new();

#[metric(
    name = "resp/commands/in_flight",
    description = "Commands whose reply handle is not yet settled"
)]
pub static COMMANDS_IN_FLIGHT: Gauge = Gauge::new();

// ── Outcomes ─────────────────────────────────────────────────────

#[metric(
    name = "resp/replies/resolved",
    description = "Total commands resolved with a reply"
)]
pub static REPLIES_RESOLVED: Counter = Counter::new();

#[metric(
    name = "resp/replies/rejected",
    description = "Total commands rejected for any reason"
)]
pub static REPLIES_REJECTED: Counter = Counter::new();

#[metric(
    name = "resp/replies/timed_out",
    description = "Total commands rejected because their deadline passed"
)]
pub static REPLIES_TIMED_OUT: Counter = Counter::new();

#[metric(
    name = "resp/replies/cancelled",
    description = "Total commands rejected by caller cancellation"
)]
pub static REPLIES_CANCELLED: Counter = Counter::new();

#[metric(
    name = "resp/replies/discarded",
    description = "Replies dropped because their command was already settled"
)]
pub static REPLIES_DISCARDED: Counter = Counter::new();

// ── Push traffic ─────────────────────────────────────────────────

#[metric(
    name = "resp/push/messages",
    description = "Total pub/sub messages routed to listeners"
)]
pub static PUSH_MESSAGES: Counter = Counter::new();

#[metric(
    name = "resp/push/out_of_band",
    description = "Total out-of-band pushes offered to push handlers"
)]
pub static PUSH_OUT_OF_BAND: Counter = Counter::new();

#[metric(
    name = "resp/decode/errors",
    description = "Total fatal decode errors"
)]
pub static DECODE_ERRORS: Counter = Counter::new();
