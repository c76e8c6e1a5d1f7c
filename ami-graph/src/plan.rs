//! The output of [`crate::Graph::compile`]: a versioned, three-tier plan.

use std::collections::HashMap;

use ami_types::{Color, Operation, OperationName, Variable};

/// A compiled graph, ready to be shipped to workers and collectors.
///
/// Each tier's operation list is already fully rewired: a worker only ever
/// sees `worker`-suffixed variables on its boundary, a localCollector only
/// ever sees `worker`/`localCollector`-suffixed ones, and so on. Nothing
/// downstream of compilation needs to know about the original (uncolored)
/// graph at all.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledGraph {
    /// Monotonically increasing version assigned at compile time (spec.md
    /// §4.5's version-fence policy keys off this).
    pub version: u64,
    pub worker: Vec<Operation>,
    pub local_collector: Vec<Operation>,
    pub global_collector: Vec<Operation>,
    pub inputs: HashMap<Color, Vec<Variable>>,
    pub outputs: HashMap<Color, Vec<Variable>>,
    /// Maps a guarded operation to the filter that gates it. An operation
    /// absent from this map always runs; one present only runs when its
    /// filter's predicate holds for the current event.
    pub guarded_by: HashMap<OperationName, OperationName>,
}

impl CompiledGraph {
    /// The operations that run at a given tier.
    pub fn tier(&self, color: Color) -> &[Operation] {
        match color {
            Color::Worker => &self.worker,
            Color::LocalCollector => &self.local_collector,
            Color::GlobalCollector => &self.global_collector,
        }
    }

    /// The variables a tier expects to receive from its upstream neighbor.
    pub fn inputs_at(&self, color: Color) -> &[Variable] {
        self.inputs.get(&color).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The variables a tier ships to its downstream neighbor (or, for
    /// globalCollector, the graph's final results).
    pub fn outputs_at(&self, color: Color) -> &[Variable] {
        self.outputs.get(&color).map(Vec::as_slice).unwrap_or(&[])
    }
}
