//! The manager control plane (spec.md §4.5): authoritative graph table,
//! versioned mutation protocol, client command dispatch, and result
//! ingestion.

use std::collections::{BTreeMap, HashSet};

use ami_graph::{CompiledGraph, Graph};
use ami_types::{ElementType, Operation, OperationName, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::RuntimeError;

/// One graph's full authoritative state.
struct GraphEntry {
    graph: Graph,
    version: u64,
    compiled: Option<CompiledGraph>,
    store: BTreeMap<String, Value>,
    element_types: BTreeMap<String, ElementType>,
    last_heartbeat: Option<u64>,
}

impl GraphEntry {
    fn new(name: impl Into<String>) -> Self {
        GraphEntry {
            graph: Graph::new(name),
            version: 0,
            compiled: None,
            store: BTreeMap::new(),
            element_types: BTreeMap::new(),
            last_heartbeat: None,
        }
    }
}

/// A typed request a client can send the manager, replacing
/// `ami/manager.py`'s regex-based `command_listener` dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClientCommand {
    CreateGraph(String),
    DestroyGraph(String),
    ClearGraph(String),
    AddGraph { graph: String, ops: Vec<Operation> },
    DelGraph { graph: String, names: Vec<OperationName> },
    SetGraph { graph: String, ops: Vec<Operation> },
    ResetFeatures(String),
    GetGraph(String),
    GetFeatures(String),
    GetNames(String),
    GetSources(String),
    GetVersions,
    GetHeartbeat(String),
    Fetch { graph: String, name: String },
    ListGraphs,
}

/// The manager's reply to a [`ClientCommand`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientReply {
    Ok,
    Error(String),
    Graph(Vec<Operation>),
    Features(BTreeMap<String, Value>),
    Names(Vec<String>),
    Versions(BTreeMap<String, u64>),
    Heartbeat(Option<u64>),
    Value(Value),
    Graphs(Vec<String>),
}

/// The manager's graph table plus `(W, L)` sizing used for every compile.
pub struct Manager {
    graphs: BTreeMap<String, GraphEntry>,
    purged: HashSet<String>,
    num_workers: usize,
    num_local_collectors: usize,
}

impl Manager {
    pub fn new(num_workers: usize, num_local_collectors: usize) -> Self {
        Manager { graphs: BTreeMap::new(), purged: HashSet::new(), num_workers, num_local_collectors }
    }

    fn entry_mut(&mut self, name: &str) -> &mut GraphEntry {
        self.purged.remove(name);
        self.graphs.entry(name.to_string()).or_insert_with(|| GraphEntry::new(name))
    }

    /// Dispatches one client command, applying the mutation protocol
    /// (snapshot, apply, compile on a deep copy, commit-or-rollback) for
    /// every graph-mutating command (spec.md §4.5 "Mutation protocol").
    pub fn handle(&mut self, cmd: ClientCommand) -> ClientReply {
        match cmd {
            ClientCommand::CreateGraph(name) => {
                self.entry_mut(&name);
                ClientReply::Ok
            }
            ClientCommand::DestroyGraph(name) => {
                self.graphs.remove(&name);
                self.purged.insert(name);
                ClientReply::Ok
            }
            ClientCommand::ClearGraph(name) => self.mutate(&name, |g| {
                g.reset();
                Ok(())
            }),
            ClientCommand::AddGraph { graph, ops } => self.mutate(&graph, |g| g.add(ops.clone()).map_err(RuntimeError::from)),
            ClientCommand::DelGraph { graph, names } => self.mutate(&graph, |g| {
                g.remove(&names);
                Ok(())
            }),
            ClientCommand::SetGraph { graph, ops } => self.mutate(&graph, |g| {
                g.reset();
                g.add(ops.clone()).map_err(RuntimeError::from)
            }),
            ClientCommand::ResetFeatures(name) => {
                let entry = self.entry_mut(&name);
                entry.store.clear();
                entry.last_heartbeat = None;
                ClientReply::Ok
            }
            ClientCommand::GetGraph(name) => match self.graphs.get(&name) {
                Some(entry) => ClientReply::Graph(entry.graph.operations().cloned().collect()),
                None => ClientReply::Error(format!("unknown graph {name}")),
            },
            ClientCommand::GetFeatures(name) => match self.graphs.get(&name) {
                Some(entry) => ClientReply::Features(entry.store.clone()),
                None => ClientReply::Error(format!("unknown graph {name}")),
            },
            ClientCommand::GetNames(name) => match self.graphs.get(&name) {
                Some(entry) => ClientReply::Names(entry.graph.operations().map(|op| op.name().0.clone()).collect()),
                None => ClientReply::Error(format!("unknown graph {name}")),
            },
            ClientCommand::GetSources(name) => match self.graphs.get(&name) {
                Some(entry) => ClientReply::Names(
                    entry
                        .compiled
                        .as_ref()
                        .map(|c| c.inputs_at(ami_types::Color::Worker).iter().map(|v| v.name.clone()).collect())
                        .unwrap_or_default(),
                ),
                None => ClientReply::Error(format!("unknown graph {name}")),
            },
            ClientCommand::GetVersions => {
                ClientReply::Versions(self.graphs.iter().map(|(name, entry)| (name.clone(), entry.version)).collect())
            }
            ClientCommand::GetHeartbeat(name) => match self.graphs.get(&name) {
                Some(entry) => ClientReply::Heartbeat(entry.last_heartbeat),
                None => ClientReply::Error(format!("unknown graph {name}")),
            },
            ClientCommand::Fetch { graph, name } => match self.graphs.get(&graph) {
                Some(entry) => match entry.store.get(&name) {
                    Some(value) => ClientReply::Value(value.clone()),
                    None => ClientReply::Error(format!("no feature named {name}")),
                },
                None => ClientReply::Error(format!("unknown graph {graph}")),
            },
            ClientCommand::ListGraphs => ClientReply::Graphs(self.graphs.keys().cloned().collect()),
        }
    }

    /// Runs the mutation protocol: snapshot, apply `f` to a deep copy,
    /// compile, and either commit (bumping the version) or roll back to the
    /// snapshot untouched (spec.md §4.5, §8 scenario 2).
    fn mutate(&mut self, name: &str, f: impl FnOnce(&mut Graph) -> Result<(), RuntimeError>) -> ClientReply {
        let entry = self.entry_mut(name);
        let snapshot = entry.graph.clone();
        let mut candidate = entry.graph.clone();
        if let Err(err) = f(&mut candidate) {
            return ClientReply::Error(err.to_string());
        }
        match candidate.compile(self.num_workers, self.num_local_collectors, entry.version + 1) {
            Ok(compiled) => {
                entry.version = compiled.version;
                entry.graph = candidate;
                entry.compiled = Some(compiled);
                ClientReply::Ok
            }
            Err(err) => {
                warn!(graph = name, error = %err, "rejecting graph mutation, rolling back");
                entry.graph = snapshot;
                ClientReply::Error(err.to_string())
            }
        }
    }

    /// Merges one completed-heartbeat result into the feature store,
    /// applying the version-fence policy (spec.md §4.5 "Result ingestion").
    pub fn ingest_result(
        &mut self,
        graph: &str,
        version: u64,
        heartbeat: u64,
        payload: BTreeMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        let entry = match self.graphs.get_mut(graph) {
            Some(entry) => entry,
            None => {
                if !self.purged.contains(graph) {
                    warn!(graph, "result for an unknown graph");
                }
                return Ok(());
            }
        };
        if version < entry.version {
            return Ok(());
        }
        for (name, value) in payload {
            entry.element_types.insert(name.clone(), value.element_type());
            entry.store.insert(name, value);
        }
        entry.last_heartbeat = Some(heartbeat);
        Ok(())
    }

    pub fn version_of(&self, graph: &str) -> Option<u64> {
        self.graphs.get(graph).map(|e| e.version)
    }
}

pub mod command {
    //! Parses the client-comm wire format's textual commands, replacing
    //! `ami/manager.py`'s `feature:(?P<name>.*)` regex with an explicit
    //! small grammar.
    use super::ClientCommand;

    /// Parses a bare `fetch:<name>` request for a given graph. Every other
    /// command travels pre-typed over the wire as a serialized
    /// [`ClientCommand`], so only this legacy-shaped string form needs
    /// parsing.
    pub fn parse_fetch(graph: &str, raw: &str) -> Option<ClientCommand> {
        raw.strip_prefix("fetch:").map(|name| ClientCommand::Fetch { graph: graph.to_string(), name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_types::{MapExpr, Variable};

    fn map(name: &str, inputs: &[&str], outputs: &[&str]) -> Operation {
        Operation::Map {
            name: name.into(),
            inputs: inputs.iter().map(|n| Variable::new(*n, ElementType::Scalar)).collect(),
            outputs: outputs.iter().map(|n| Variable::new(*n, ElementType::Scalar)).collect(),
            condition_needs: Vec::new(),
            expr: MapExpr::Identity,
        }
    }

    #[test]
    fn rejected_mutation_leaves_the_graph_byte_for_byte_unchanged() {
        let mut manager = Manager::new(2, 1);
        manager.handle(ClientCommand::AddGraph { graph: "g".into(), ops: vec![map("a", &["x"], &["y"])] });
        let before = match manager.handle(ClientCommand::GetGraph("g".into())) {
            ClientReply::Graph(ops) => ops,
            other => panic!("expected a graph, got {other:?}"),
        };

        // Second operation declares the same output "y" - compile-time
        // rejected (duplicate output), so it must roll back entirely.
        let reply =
            manager.handle(ClientCommand::AddGraph { graph: "g".into(), ops: vec![map("b", &["x"], &["y"])] });
        assert!(matches!(reply, ClientReply::Error(_)));

        let after = match manager.handle(ClientCommand::GetGraph("g".into())) {
            ClientReply::Graph(ops) => ops,
            other => panic!("expected a graph, got {other:?}"),
        };
        assert_eq!(before, after);
    }

    #[test]
    fn fetch_on_empty_store_errors_then_succeeds_after_ingestion() {
        let mut manager = Manager::new(1, 1);
        manager.handle(ClientCommand::CreateGraph("g".into()));
        let reply = manager.handle(ClientCommand::Fetch { graph: "g".into(), name: "x".into() });
        assert!(matches!(reply, ClientReply::Error(_)));

        let mut payload = BTreeMap::new();
        payload.insert("x".to_string(), Value::Scalar(42.0));
        manager.ingest_result("g", 0, 1, payload).unwrap();

        let reply = manager.handle(ClientCommand::Fetch { graph: "g".into(), name: "x".into() });
        assert_eq!(reply, ClientReply::Value(Value::Scalar(42.0)));
    }

    #[test]
    fn purge_discards_late_arriving_datagrams() {
        let mut manager = Manager::new(1, 1);
        manager.handle(ClientCommand::CreateGraph("g".into()));
        manager.handle(ClientCommand::DestroyGraph("g".into()));

        let mut payload = BTreeMap::new();
        payload.insert("x".to_string(), Value::Scalar(1.0));
        manager.ingest_result("g", 0, 1, payload).unwrap();

        let reply = manager.handle(ClientCommand::GetFeatures("g".into()));
        assert!(matches!(reply, ClientReply::Error(_)));
    }

    #[test]
    fn stale_version_results_never_update_the_store() {
        let mut manager = Manager::new(1, 1);
        manager.handle(ClientCommand::AddGraph { graph: "g".into(), ops: vec![map("a", &["x"], &["y"])] });
        let version = manager.version_of("g").unwrap();

        let mut payload = BTreeMap::new();
        payload.insert("y".to_string(), Value::Scalar(1.0));
        manager.ingest_result("g", version, 1, payload).unwrap();

        let mut stale_payload = BTreeMap::new();
        stale_payload.insert("y".to_string(), Value::Scalar(99.0));
        manager.ingest_result("g", version.saturating_sub(1), 2, stale_payload).unwrap();

        let reply = manager.handle(ClientCommand::GetFeatures("g".into()));
        match reply {
            ClientReply::Features(store) => assert_eq!(store.get("y"), Some(&Value::Scalar(1.0))),
            other => panic!("expected features, got {other:?}"),
        }
    }
}
