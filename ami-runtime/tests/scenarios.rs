//! End-to-end scenario coverage (spec.md §8) that doesn't fit inside any
//! one module's own unit tests: a full worker→local→global pipeline feeding
//! the manager's feature store, a supervised-restart sequence paired with
//! the version fence, and a window-size partition across all three tiers.

use std::collections::BTreeMap;

use ami_graph::{CompiledGraph, Graph};
use ami_runtime::{ChildStatus, ClientCommand, ClientReply, Collector, GraphRunner, Manager, RuntimeError, Supervised, Supervisor};
use ami_types::{Color, CollectorMessage, ElementType, Message, Operation, Reduction, Value, Variable};

/// Runs `events` ticks of a worker-tier sub-graph by hand and packages the
/// result the way `Worker::snapshot_outputs` would, without pulling in a
/// `Source` or the heartbeat-boundary timing machinery.
fn worker_contribution(compiled: &CompiledGraph, identity: u64, input: &str, events: usize) -> CollectorMessage {
    let mut runner = GraphRunner::new(compiled.tier(Color::Worker).to_vec(), compiled.guarded_by.clone());
    let mut env = BTreeMap::new();
    for _ in 0..events {
        env.insert(input.to_string(), Value::Scalar(1.0));
        runner.run_all(&mut env).unwrap();
    }
    let payload: BTreeMap<String, Value> = compiled
        .outputs_at(Color::Worker)
        .iter()
        .filter_map(|v| env.get(&v.name).map(|value| (v.name.clone(), value.clone())))
        .collect();
    CollectorMessage::new(Message::datagram(identity, events as u64, payload), 0, compiled.version, "g")
}

// Scenario 1: static scalar sum, W=2, L=1, 100 events split evenly.
#[test]
fn static_scalar_sum_converges_through_the_manager_feature_store() {
    let mut manager = Manager::new(2, 1);
    let reply = manager.handle(ClientCommand::AddGraph {
        graph: "g".into(),
        ops: vec![Operation::Accumulator {
            name: "sum".into(),
            inputs: vec![Variable::new("a", ElementType::Scalar)],
            outputs: vec![Variable::new("s", ElementType::Scalar)],
            condition_needs: Vec::new(),
            reduction: Reduction::Sum,
            is_global: true,
        }],
    });
    assert!(matches!(reply, ClientReply::Ok));
    let version = manager.version_of("g").unwrap();

    // Same graph, compiled standalone so the pipeline below sees the exact
    // tier operations the manager just installed.
    let mut g = Graph::new("g");
    g.insert(Operation::Accumulator {
        name: "sum".into(),
        inputs: vec![Variable::new("a", ElementType::Scalar)],
        outputs: vec![Variable::new("s", ElementType::Scalar)],
        condition_needs: Vec::new(),
        reduction: Reduction::Sum,
        is_global: true,
    })
    .unwrap();
    let compiled = g.compile(2, 1, version).unwrap();

    let mut local = Collector::new(Color::LocalCollector, "g", 10, 2);
    local.install(&compiled, 2);
    let mut global = Collector::new(Color::GlobalCollector, "g", 10, 1);
    global.install(&compiled, 1);

    // 100 events split evenly across 2 workers: 50 each before the shared
    // heartbeat closes.
    let mut finished = None;
    for identity in [0u64, 1u64] {
        let contribution = worker_contribution(&compiled, identity, "a", 50);
        if let Some(forwarded) = local.ingest(contribution).unwrap() {
            finished = global.ingest(forwarded).unwrap();
        }
    }
    let finished = finished.expect("global collector completes once its one local contributor reports");

    let payload = match finished.message.kind {
        ami_types::MsgKind::Datagram(payload) => payload,
        _ => panic!("expected a datagram"),
    };
    manager.ingest_result("g", finished.version, finished.heartbeat, payload).unwrap();

    let reply = manager.handle(ClientCommand::Fetch { graph: "g".into(), name: "s".into() });
    assert_eq!(reply, ClientReply::Value(Value::Scalar(100.0)));
}

// Scenario 6, piggy-backed on the same pipeline: fetching before any
// heartbeat has landed errors, fetching afterward succeeds.
#[test]
fn fetch_before_the_first_heartbeat_errors_then_succeeds() {
    let mut manager = Manager::new(1, 1);
    manager.handle(ClientCommand::CreateGraph("g".into()));

    let reply = manager.handle(ClientCommand::Fetch { graph: "g".into(), name: "s".into() });
    assert!(matches!(reply, ClientReply::Error(_)));

    let mut payload = BTreeMap::new();
    payload.insert("s".to_string(), Value::Scalar(7.0));
    manager.ingest_result("g", 0, 1, payload).unwrap();

    let reply = manager.handle(ClientCommand::Fetch { graph: "g".into(), name: "s".into() });
    assert_eq!(reply, ClientReply::Value(Value::Scalar(7.0)));
}

// Scenario 3: a worker dies mid-stream, its supervisor restarts it, and no
// result carrying a version older than the graph's current one ever lands
// in the store - the same version fence that makes restart-then-resume
// safe without the manager needing to know a restart happened at all.
struct FlakyWorker {
    alive: bool,
    restarts: usize,
}

impl Supervised for FlakyWorker {
    fn is_alive(&mut self) -> bool {
        self.alive
    }

    fn restart(&mut self) -> Result<(), RuntimeError> {
        self.restarts += 1;
        self.alive = true;
        Ok(())
    }
}

#[test]
fn a_restarted_worker_resumes_without_letting_stale_results_through() {
    let mut manager = Manager::new(1, 1);
    manager.handle(ClientCommand::AddGraph {
        graph: "g".into(),
        ops: vec![Operation::Accumulator {
            name: "sum".into(),
            inputs: vec![Variable::new("a", ElementType::Scalar)],
            outputs: vec![Variable::new("s", ElementType::Scalar)],
            condition_needs: Vec::new(),
            reduction: Reduction::Sum,
            is_global: true,
        }],
    });
    let version = manager.version_of("g").unwrap();

    let mut payload = BTreeMap::new();
    payload.insert("s".to_string(), Value::Scalar(10.0));
    manager.ingest_result("g", version, 1, payload).unwrap();

    // The worker dies; its supervisor brings it back within one probe tick.
    let mut supervisor = Supervisor::new("worker-0", FlakyWorker { alive: false, restarts: 0 });
    let restarted = supervisor.tick().unwrap();
    assert!(restarted);
    assert_eq!(supervisor.status(), ChildStatus::Running);
    assert_eq!(supervisor.child().restarts, 1);

    // A result generated before the restart, still in flight, must not
    // overwrite anything newer - it carries the version the graph had
    // before the restart, which by construction is never greater than the
    // one already committed.
    let mut late_payload = BTreeMap::new();
    late_payload.insert("s".to_string(), Value::Scalar(999.0));
    manager.ingest_result("g", version.saturating_sub(1), 0, late_payload).unwrap();

    // The restarted worker's own next heartbeat carries the current
    // version forward and must be accepted.
    let mut resumed_payload = BTreeMap::new();
    resumed_payload.insert("s".to_string(), Value::Scalar(20.0));
    manager.ingest_result("g", version, 2, resumed_payload).unwrap();

    let reply = manager.handle(ClientCommand::Fetch { graph: "g".into(), name: "s".into() });
    assert_eq!(reply, ClientReply::Value(Value::Scalar(20.0)));
    let reply = manager.handle(ClientCommand::GetHeartbeat("g".into()));
    assert_eq!(reply, ClientReply::Heartbeat(Some(2)));
}

// Scenario 5: W=4, L=2, N=8 - a global PickN(8) expands to worker N=2,
// local N=4, global N=8. Emitting exactly 8 events evenly across the 4
// workers should yield exactly 8 elements at the global tier.
#[test]
fn pickn_window_partitions_evenly_across_all_three_tiers() {
    let mut g = Graph::new("g");
    g.insert(Operation::PickN {
        name: "w".into(),
        inputs: vec![Variable::new("a", ElementType::Scalar)],
        outputs: vec![Variable::new("win", ElementType::Waveform)],
        condition_needs: Vec::new(),
        n: 8,
        is_global: true,
    })
    .unwrap();
    let compiled = g.compile(4, 2, 1).unwrap();

    let mut local0 = Collector::new(Color::LocalCollector, "g", 10, 2);
    local0.install(&compiled, 2);
    let mut local1 = Collector::new(Color::LocalCollector, "g", 10, 2);
    local1.install(&compiled, 2);
    let mut global = Collector::new(Color::GlobalCollector, "g", 10, 2);
    global.install(&compiled, 2);

    let mut last_global = None;
    for identity in [0u64, 1u64] {
        let contribution = worker_contribution(&compiled, identity, "a", 2);
        if let Some(forwarded) = local0.ingest(contribution).unwrap() {
            last_global = global.ingest(forwarded).unwrap();
        }
    }
    for identity in [2u64, 3u64] {
        let contribution = worker_contribution(&compiled, identity, "a", 2);
        if let Some(forwarded) = local1.ingest(contribution).unwrap() {
            last_global = global.ingest(forwarded).unwrap();
        }
    }

    let finished = last_global.expect("global collector completes once both locals report");
    match finished.message.kind {
        ami_types::MsgKind::Datagram(payload) => match payload.get("win") {
            Some(Value::Waveform(xs)) => assert_eq!(xs.len(), 8),
            other => panic!("expected an 8-element waveform, got {other:?}"),
        },
        _ => panic!("expected a datagram"),
    }
}
