use std::collections::{BTreeMap, HashSet};

use ami_types::Value;
use tracing::debug;

/// A single heartbeat's worth of in-flight contributions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingSlot {
    pub heartbeat: u64,
    pub version: u64,
    pub values: BTreeMap<String, Value>,
    contributors: HashSet<u64>,
}

impl PendingSlot {
    fn new(heartbeat: u64, version: u64) -> Self {
        PendingSlot { heartbeat, version, values: BTreeMap::new(), contributors: HashSet::new() }
    }

    pub fn contributor_count(&self) -> usize {
        self.contributors.len()
    }
}

/// The result of feeding one contribution into [`EventBuilder::update`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Folded in; the slot for this heartbeat is not yet complete.
    Accepted,
    /// Folded in, and every expected contributor has now reported.
    Complete,
    /// Dropped: `version` was older than the builder's current fence.
    StaleVersion,
}

/// Synchronizes per-heartbeat contributions from many identities into a
/// single combined value per variable, with a bounded lookback window.
///
/// Grounded on `ami/worker.py::NodeCollector`'s per-message-type contributor
/// counting, generalized from "count messages of a type" to "count distinct
/// identities, per heartbeat, per variable set" as spec.md §4.4 describes.
/// `depth` bounds how many heartbeats can be in flight at once (spec.md's
/// pending ring, `D`); once full, the oldest incomplete heartbeat is
/// evicted to make room - the system's deliberate backpressure valve rather
/// than an unbounded queue.
pub struct EventBuilder {
    depth: usize,
    expected_contributors: usize,
    current_version: u64,
    pending: BTreeMap<u64, PendingSlot>,
}

impl EventBuilder {
    pub fn new(depth: usize, expected_contributors: usize) -> Self {
        assert!(depth >= 1, "pending ring depth must be at least 1");
        EventBuilder { depth, expected_contributors, current_version: 0, pending: BTreeMap::new() }
    }

    pub fn expected_contributors(&self) -> usize {
        self.expected_contributors
    }

    pub fn set_expected_contributors(&mut self, expected: usize) {
        self.expected_contributors = expected;
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    /// Folds one contribution in. `combine` reduces an existing value for
    /// `name` with the incoming one (e.g. [`ami_types::Reduction::combine`]);
    /// the first contribution for a name in a heartbeat is taken as-is.
    pub fn update(
        &mut self,
        identity: u64,
        heartbeat: u64,
        version: u64,
        name: &str,
        value: Value,
        combine: impl FnOnce(&Value, &Value) -> Value,
    ) -> UpdateOutcome {
        if version < self.current_version {
            debug!(version, current = self.current_version, "discarding contribution from a stale graph version");
            return UpdateOutcome::StaleVersion;
        }
        if version > self.current_version {
            // A newer compiled graph is in effect; anything still pending
            // belongs to a version this builder no longer trusts.
            self.current_version = version;
            self.pending.clear();
        }

        if !self.pending.contains_key(&heartbeat) && self.pending.len() >= self.depth {
            if let Some((&oldest, _)) = self.pending.iter().next() {
                debug!(evicted = oldest, "pending ring full, evicting oldest incomplete heartbeat");
                self.pending.remove(&oldest);
            }
        }

        let slot = self
            .pending
            .entry(heartbeat)
            .or_insert_with(|| PendingSlot::new(heartbeat, version));
        match slot.values.get(name) {
            Some(existing) => {
                let combined = combine(existing, &value);
                slot.values.insert(name.to_string(), combined);
            }
            None => {
                slot.values.insert(name.to_string(), value);
            }
        }
        slot.contributors.insert(identity);

        if slot.contributor_count() >= self.expected_contributors {
            UpdateOutcome::Complete
        } else {
            UpdateOutcome::Accepted
        }
    }

    /// True once a slot for `heartbeat` exists at all (some contribution has
    /// arrived for it).
    pub fn ready(&self, heartbeat: u64) -> bool {
        self.pending.contains_key(&heartbeat)
    }

    /// True once every expected contributor has reported for `heartbeat`.
    pub fn complete(&self, heartbeat: u64) -> bool {
        self.pending
            .get(&heartbeat)
            .map(|slot| slot.contributor_count() >= self.expected_contributors)
            .unwrap_or(false)
    }

    /// Removes and returns a completed heartbeat's slot, ready to be
    /// forwarded upstream. Returns `None` if the heartbeat isn't complete.
    pub fn take(&mut self, heartbeat: u64) -> Option<PendingSlot> {
        if self.complete(heartbeat) {
            self.pending.remove(&heartbeat)
        } else {
            None
        }
    }

    /// Discards a heartbeat's slot outright, whether or not it completed -
    /// used when a manager `purge` command invalidates in-flight data.
    pub fn prune(&mut self, heartbeat: u64) -> Option<PendingSlot> {
        self.pending.remove(&heartbeat)
    }

    /// Discards every slot at or before `heartbeat`, inclusive. Used to
    /// enforce a watermark after a transition barrier releases.
    pub fn prune_through(&mut self, heartbeat: u64) {
        self.pending.retain(|&hb, _| hb > heartbeat);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(a: &Value, b: &Value) -> Value {
        match (a, b) {
            (Value::Scalar(x), Value::Scalar(y)) => Value::Scalar(x + y),
            _ => b.clone(),
        }
    }

    #[test]
    fn update_completes_once_every_contributor_has_reported() {
        let mut eb = EventBuilder::new(10, 2);
        assert_eq!(eb.update(0, 5, 1, "x", Value::Scalar(1.0), sum), UpdateOutcome::Accepted);
        assert!(!eb.complete(5));
        assert_eq!(eb.update(1, 5, 1, "x", Value::Scalar(2.0), sum), UpdateOutcome::Complete);
        assert!(eb.complete(5));
        let slot = eb.take(5).unwrap();
        assert_eq!(slot.values.get("x"), Some(&Value::Scalar(3.0)));
    }

    #[test]
    fn stale_version_contributions_are_discarded() {
        let mut eb = EventBuilder::new(10, 1);
        eb.update(0, 1, 5, "x", Value::Scalar(1.0), sum);
        assert_eq!(eb.update(0, 2, 3, "x", Value::Scalar(9.0), sum), UpdateOutcome::StaleVersion);
    }

    #[test]
    fn version_bump_clears_pending_state() {
        let mut eb = EventBuilder::new(10, 2);
        eb.update(0, 1, 1, "x", Value::Scalar(1.0), sum);
        assert_eq!(eb.pending_len(), 1);
        eb.update(0, 1, 2, "x", Value::Scalar(1.0), sum);
        assert_eq!(eb.pending_len(), 1);
        assert_eq!(eb.current_version(), 2);
    }

    #[test]
    fn overflow_evicts_the_oldest_incomplete_heartbeat() {
        let mut eb = EventBuilder::new(2, 2);
        eb.update(0, 1, 1, "x", Value::Scalar(1.0), sum);
        eb.update(0, 2, 1, "x", Value::Scalar(1.0), sum);
        eb.update(0, 3, 1, "x", Value::Scalar(1.0), sum);
        assert_eq!(eb.pending_len(), 2);
        assert!(!eb.ready(1));
        assert!(eb.ready(2));
        assert!(eb.ready(3));
    }

    #[test]
    fn prune_through_drops_a_watermark_of_slots() {
        let mut eb = EventBuilder::new(10, 1);
        eb.update(0, 1, 1, "x", Value::Scalar(1.0), sum);
        eb.update(0, 2, 1, "x", Value::Scalar(1.0), sum);
        eb.update(0, 3, 1, "x", Value::Scalar(1.0), sum);
        eb.prune_through(2);
        assert!(!eb.ready(1));
        assert!(!eb.ready(2));
        assert!(eb.ready(3));
    }
}
