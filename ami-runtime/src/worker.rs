//! Per-worker event loop (spec.md §4.3).

use std::collections::BTreeMap;

use ami_graph::{CompiledGraph, Graph};
use ami_types::{message::heartbeat_seq, Color, CollectorMessage, Message, MsgKind, Operation, OperationName, Value};
use tracing::warn;

use crate::executor::GraphRunner;
use crate::RuntimeError;
use crate::source::Source;

/// A control-plane delta published by the manager, applied non-blockingly
/// between events (spec.md §4.3 step 2).
#[derive(Clone, Debug)]
pub enum ControlMessage {
    /// Full graph replacement (manager's `set_graph`/`create_graph`).
    Graph { version: u64, ops: Vec<Operation> },
    Add { version: u64, ops: Vec<Operation> },
    Del { version: u64, names: Vec<OperationName> },
    /// Drops all state for the graph (manager's `destroy_graph`).
    Purge,
}

/// What a worker forwards to its local collector after an event: always at
/// most a datagram of the worker-tier outputs, and, on a heartbeat
/// boundary, the just-closed sequence number.
#[derive(Clone, Debug)]
pub struct WorkerStep {
    pub heartbeat_closed: Option<u64>,
    pub datagram: Option<CollectorMessage>,
}

pub struct Worker<S: Source> {
    identity: u64,
    num_workers: usize,
    num_local_collectors: usize,
    heartbeat_period: u64,
    graph: Graph,
    version: u64,
    compiled: Option<CompiledGraph>,
    runner: Option<GraphRunner>,
    last_seq: u64,
    last_timestamp: u64,
    latest_env: BTreeMap<String, Value>,
    source: S,
}

impl<S: Source> Worker<S> {
    pub fn new(
        identity: u64,
        num_workers: usize,
        num_local_collectors: usize,
        heartbeat_period: u64,
        graph_name: impl Into<String>,
        source: S,
    ) -> Self {
        Worker {
            identity,
            num_workers,
            num_local_collectors,
            heartbeat_period,
            graph: Graph::new(graph_name),
            version: 0,
            compiled: None,
            runner: None,
            last_seq: 0,
            last_timestamp: 0,
            latest_env: BTreeMap::new(),
            source,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sources(&self) -> std::collections::BTreeSet<String> {
        self.compiled
            .as_ref()
            .map(|c| c.inputs_at(Color::Worker).iter().map(|v| v.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Applies one control-plane delta, recompiling the live graph. On
    /// failure the graph is rolled back to its pre-mutation snapshot and
    /// the previous compiled plan keeps running (spec.md §4.3 step 2).
    pub fn apply_control(&mut self, cmd: ControlMessage) -> Result<(), RuntimeError> {
        let snapshot = self.graph.clone();
        match cmd {
            ControlMessage::Graph { version, ops } => {
                let mut fresh = Graph::new(self.graph.name().to_string());
                if let Err(err) = fresh.add(ops) {
                    return Err(err.into());
                }
                self.recompile(fresh, version, snapshot)
            }
            ControlMessage::Add { version, ops } => {
                let mut next = self.graph.clone();
                if let Err(err) = next.add(ops) {
                    return Err(err.into());
                }
                self.recompile(next, version, snapshot)
            }
            ControlMessage::Del { version, names } => {
                let mut next = self.graph.clone();
                next.remove(&names);
                self.recompile(next, version, snapshot)
            }
            ControlMessage::Purge => {
                self.graph.reset();
                self.compiled = None;
                self.runner = None;
                self.latest_env.clear();
                Ok(())
            }
        }
    }

    fn recompile(&mut self, candidate: Graph, version: u64, snapshot: Graph) -> Result<(), RuntimeError> {
        match candidate.compile(self.num_workers, self.num_local_collectors, version) {
            Ok(compiled) => {
                self.graph = candidate;
                self.install(compiled);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "rejecting graph mutation, rolling back");
                self.graph = snapshot;
                Err(err.into())
            }
        }
    }

    fn install(&mut self, compiled: CompiledGraph) {
        self.version = compiled.version;
        let ops = compiled.tier(Color::Worker).to_vec();
        self.runner = Some(GraphRunner::new(ops, compiled.guarded_by.clone()));
        let names: std::collections::BTreeSet<String> =
            compiled.inputs_at(Color::Worker).iter().map(|v| v.name.clone()).collect();
        self.source.request(names);
        self.compiled = Some(compiled);
    }

    /// Advances the source by exactly one event. Returns `None` once the
    /// source is exhausted.
    pub fn step(&mut self) -> Option<WorkerStep> {
        let message = self.source.next_event(self.identity, self.num_workers as u64)?;
        let seq = heartbeat_seq(message.timestamp, self.heartbeat_period);
        let heartbeat_closed = if seq > self.last_seq {
            let closed = self.last_seq;
            self.last_seq = seq;
            Some(closed)
        } else {
            None
        };
        let flushed = heartbeat_closed.map(|hb| self.snapshot_outputs(hb));

        if let MsgKind::Datagram(payload) = message.kind {
            self.last_timestamp = message.timestamp;
            if let Some(runner) = self.runner.as_mut() {
                let mut env = payload;
                match runner.run_all(&mut env) {
                    Ok(()) => self.latest_env = env,
                    Err(err) => warn!(error = %err, "dropping event after per-event execution error"),
                }
            }
        }

        Some(WorkerStep { heartbeat_closed, datagram: flushed })
    }

    fn snapshot_outputs(&self, heartbeat: u64) -> CollectorMessage {
        let mut payload = BTreeMap::new();
        if let Some(compiled) = self.compiled.as_ref() {
            for v in compiled.outputs_at(Color::Worker) {
                if let Some(value) = self.latest_env.get(&v.name) {
                    payload.insert(v.name.clone(), value.clone());
                }
            }
        }
        let message = Message::datagram(self.identity, self.last_timestamp, payload);
        CollectorMessage::new(message, heartbeat, self.version, self.graph.name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FieldSpec, StaticSource};
    use ami_types::{ElementType, MapExpr, Reduction, Variable};
    use std::time::Duration;

    fn static_source(count: u64) -> StaticSource {
        let mut config = BTreeMap::new();
        config.insert("a".to_string(), FieldSpec::Scalar);
        StaticSource::new(config, Some(count), Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn worker_flushes_accumulated_sum_at_the_heartbeat_boundary() {
        let mut worker = Worker::new(0, 2, 1, 100, "g", static_source(300));
        worker
            .apply_control(ControlMessage::Graph {
                version: 1,
                ops: vec![Operation::Accumulator {
                    name: "sum".into(),
                    inputs: vec![Variable::new("a", ElementType::Scalar)],
                    outputs: vec![Variable::new("s", ElementType::Scalar)],
                    condition_needs: Vec::new(),
                    reduction: Reduction::Sum,
                    is_global: true,
                }],
            })
            .unwrap();

        let mut flush = None;
        // identity 0, num_workers 2: timestamps are 0, 2, 4, ... heartbeat
        // period 100 rolls over once every 50 events for this worker.
        for _ in 0..60 {
            if let Some(step) = worker.step() {
                if step.datagram.is_some() {
                    flush = step.datagram;
                    break;
                }
            }
        }
        let flush = flush.expect("a heartbeat boundary should have been crossed");
        match flush.message.kind {
            MsgKind::Datagram(payload) => assert_eq!(payload.get("s"), Some(&Value::Scalar(50.0))),
            _ => panic!("expected a datagram"),
        }
    }

    #[test]
    fn rejected_mutation_leaves_the_previous_graph_running() {
        let mut worker = Worker::new(0, 1, 1, 100, "g", static_source(1));
        worker
            .apply_control(ControlMessage::Graph {
                version: 1,
                ops: vec![Operation::Map {
                    name: "m".into(),
                    inputs: vec![Variable::new("a", ElementType::Scalar)],
                    outputs: vec![Variable::new("b", ElementType::Scalar)],
                    condition_needs: Vec::new(),
                    expr: MapExpr::Identity,
                }],
            })
            .unwrap();
        assert_eq!(worker.version(), 1);

        // Same output name already produced: must be rejected.
        let err = worker.apply_control(ControlMessage::Add {
            version: 2,
            ops: vec![Operation::Map {
                name: "m2".into(),
                inputs: vec![Variable::new("a", ElementType::Scalar)],
                outputs: vec![Variable::new("b", ElementType::Scalar)],
                condition_needs: Vec::new(),
                expr: MapExpr::Identity,
            }],
        });
        assert!(err.is_err());
        assert_eq!(worker.version(), 1);
        assert_eq!(worker.graph.len(), 1);
    }
}
