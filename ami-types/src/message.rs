//! Wire envelopes: [`Message`], [`Transition`], and the collector-tier
//! extension [`CollectorMessage`].
//!
//! Grounded in `ami/data.py`'s `MsgTypes`/`Message`/`CollectorMessage`/
//! `Transition`, with the payload shapes the distilled spec named but did
//! not fully carry over (in particular `Transition::body`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::Value;

/// The four lifecycle transitions a source or worker can carry.
///
/// Matches `ami/data.py::Transitions`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionType {
    /// A new source has attached; `body` carries its name→type partition.
    Allocate,
    /// Runtime configuration (e.g. calibration constants) has changed.
    Configure,
    /// Data taking has started.
    Enable,
    /// Data taking has paused.
    Disable,
}

/// A transition event, carrying a type-specific body.
///
/// `body` uses a `BTreeMap` (rather than an arbitrary blob) for the common
/// `Allocate` case of a name→type partition, matching `StaticSource`'s and
/// `RandomSource`'s `partition()` in `ami/data.py`; other transition types
/// leave it empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub ttype: TransitionType,
    pub partition: BTreeMap<String, crate::value::ElementType>,
}

impl Transition {
    /// Builds an `Allocate` transition carrying a source's advertised names.
    pub fn allocate(partition: BTreeMap<String, crate::value::ElementType>) -> Self {
        Transition { ttype: TransitionType::Allocate, partition }
    }

    /// Builds a transition with no payload (`Configure`/`Enable`/`Disable`).
    pub fn bare(ttype: TransitionType) -> Self {
        Transition { ttype, partition: BTreeMap::new() }
    }
}

/// The kind of payload a [`Message`] carries, and the payload itself.
///
/// `Heartbeat` carries the just-completed heartbeat sequence number, per
/// §3's "Heartbeat sequence" rule: a worker emits it the first time it
/// observes `seq(current) > seq(previous)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MsgKind {
    Transition(Transition),
    Heartbeat(u64),
    /// A mapping name→value, the payload of an ordinary event.
    Datagram(BTreeMap<String, Value>),
}

/// One wire envelope as described in spec.md §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Integer id of the producing process (worker index, node index).
    pub identity: u64,
    /// Producer-local timestamp, in the same units as the heartbeat period.
    pub timestamp: u64,
    pub kind: MsgKind,
}

impl Message {
    pub fn datagram(identity: u64, timestamp: u64, payload: BTreeMap<String, Value>) -> Self {
        Message { identity, timestamp, kind: MsgKind::Datagram(payload) }
    }

    pub fn heartbeat(identity: u64, timestamp: u64, seq: u64) -> Self {
        Message { identity, timestamp, kind: MsgKind::Heartbeat(seq) }
    }

    pub fn transition(identity: u64, timestamp: u64, transition: Transition) -> Self {
        Message { identity, timestamp, kind: MsgKind::Transition(transition) }
    }
}

/// A [`Message`] as it travels between collector tiers, stamped with the
/// heartbeat and graph version the sender was running and the graph it
/// belongs to.
///
/// Matches `ami/data.py::CollectorMessage`, extended with `version` and
/// `graph_name` per spec.md §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectorMessage {
    pub message: Message,
    pub heartbeat: u64,
    pub version: u64,
    pub graph_name: String,
}

impl CollectorMessage {
    pub fn new(message: Message, heartbeat: u64, version: u64, graph_name: impl Into<String>) -> Self {
        CollectorMessage { message, heartbeat, version, graph_name: graph_name.into() }
    }
}

/// Derives the heartbeat sequence number from a timestamp and period, per
/// spec.md §3: `seq = timestamp ÷ heartbeat_period`.
pub fn heartbeat_seq(timestamp: u64, heartbeat_period: u64) -> u64 {
    timestamp / heartbeat_period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_seq_is_floor_division() {
        assert_eq!(heartbeat_seq(0, 100), 0);
        assert_eq!(heartbeat_seq(99, 100), 0);
        assert_eq!(heartbeat_seq(100, 100), 1);
        assert_eq!(heartbeat_seq(250, 100), 2);
    }

    #[test]
    fn roundtrip_through_bincode() {
        let mut payload = BTreeMap::new();
        payload.insert("a".to_string(), Value::Scalar(1.0));
        let msg = Message::datagram(3, 42, payload);
        let bytes = bincode::serialize(&msg).unwrap();
        let back: Message = bincode::deserialize(&bytes).unwrap();
        assert_eq!(msg, back);
    }
}
