//! The logical (uncolored) graph and its mutation protocol.
//!
//! Mirrors `ami/graphkit_wrapper.py::Graph`'s `insert`/`add`/`remove`/
//! `replace`/`reset`, minus the networkx `DiGraph` backing store: variable
//! producer/consumer lookups are computed on demand by scanning the
//! operation table, which is cheap at the sizes this system's graphs run at.

use std::collections::{BTreeMap, HashSet};

use ami_types::{Operation, OperationName, Variable};

use crate::error::GraphError;

/// A user-authored computation graph, before compilation.
///
/// Operation names are unique keys; every declared output variable name is
/// produced by exactly one operation (spec.md §3 invariants 1-2).
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub(crate) name: String,
    pub(crate) operations: BTreeMap<OperationName, Operation>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph { name: name.into(), operations: BTreeMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn get(&self, name: &OperationName) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    /// Adds a single new operation. Errors if its name is already taken, it
    /// declares no outputs, one of its output names is reserved, or one of
    /// its outputs is already produced by another operation.
    pub fn insert(&mut self, op: Operation) -> Result<(), GraphError> {
        self.validate_new(&op, false)?;
        self.operations.insert(op.name().clone(), op);
        Ok(())
    }

    /// Like [`Graph::insert`], but permits tier-suffixed output names. Used
    /// only by the compiler to synthesize its own pull-through operations
    /// (spec.md §4.1 step 2), which legitimately need a reserved suffix.
    pub(crate) fn insert_synthetic(&mut self, op: Operation) -> Result<(), GraphError> {
        self.validate_new(&op, true)?;
        self.operations.insert(op.name().clone(), op);
        Ok(())
    }

    /// Adds a batch of operations, one at a time. `ops[i]` may refer to a
    /// variable produced by `ops[j<i]` in the same batch. An operation whose
    /// name collides with an existing one falls back to [`Graph::replace`]
    /// rather than rejecting the batch, matching
    /// `ami/graphkit_wrapper.py::Graph.add`; any other validation failure
    /// (a bad output, a genuine duplicate output under a different name)
    /// still aborts the whole call.
    pub fn add(&mut self, ops: impl IntoIterator<Item = Operation>) -> Result<(), GraphError> {
        for op in ops {
            match self.insert(op.clone()) {
                Ok(()) => {}
                Err(GraphError::DuplicateOperation(_)) => self.replace(op)?,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Removes operations by name. Unknown names are ignored, matching the
    /// manager's "del" command being safe to retry.
    pub fn remove(&mut self, names: &[OperationName]) {
        for name in names {
            self.operations.remove(name);
        }
    }

    /// Replaces an existing operation's parameters (predicate, reduction,
    /// map expression, window size) without changing its inputs or outputs,
    /// which would otherwise invalidate anything already wired to it.
    pub fn replace(&mut self, op: Operation) -> Result<(), GraphError> {
        let existing = self
            .operations
            .get(op.name())
            .ok_or_else(|| GraphError::UnknownOperation(op.name().clone()))?;
        if existing.inputs() != op.inputs() {
            return Err(GraphError::InputsMismatch(op.name().clone()));
        }
        if existing.outputs() != op.outputs() {
            return Err(GraphError::OutputsMismatch(op.name().clone()));
        }
        self.operations.insert(op.name().clone(), op);
        Ok(())
    }

    /// Clears every operation, returning the graph to its initial state.
    pub fn reset(&mut self) {
        self.operations.clear();
    }

    fn validate_new(&self, op: &Operation, allow_reserved: bool) -> Result<(), GraphError> {
        if self.operations.contains_key(op.name()) {
            return Err(GraphError::DuplicateOperation(op.name().clone()));
        }
        if op.outputs().is_empty() {
            return Err(GraphError::EmptyOutputs(op.name().clone()));
        }
        for output in op.outputs() {
            if !allow_reserved && output.is_reserved() {
                return Err(GraphError::ReservedName(output.name.clone()));
            }
            if self.producer_of(&output.name).is_some() {
                return Err(GraphError::DuplicateOutput(output.name.clone()));
            }
        }
        Ok(())
    }

    /// The operation that produces `var_name` as an output, if any.
    pub(crate) fn producer_of(&self, var_name: &str) -> Option<&OperationName> {
        self.operations
            .values()
            .find(|op| op.outputs().iter().any(|v| v.name == var_name))
            .map(|op| op.name())
    }

    /// Every operation that consumes `var_name`, as an input or as a
    /// `condition_needs` dependency.
    pub(crate) fn consumers_of(&self, var_name: &str) -> Vec<&OperationName> {
        self.operations
            .values()
            .filter(|op| op.inputs().iter().chain(op.condition_needs()).any(|v| v.name == var_name))
            .map(|op| op.name())
            .collect()
    }

    /// Variables consumed by some operation but produced by none: the
    /// graph's true sources, supplied externally by a `Source`.
    pub(crate) fn leaf_input_variables(&self) -> Vec<Variable> {
        let mut seen = BTreeMap::new();
        for op in self.operations.values() {
            for v in op.inputs().iter().chain(op.condition_needs()) {
                if self.producer_of(&v.name).is_none() {
                    seen.insert(v.name.clone(), v.clone());
                }
            }
        }
        seen.into_values().collect()
    }

    /// Variables produced by some operation but consumed by none: the
    /// graph's final results.
    pub(crate) fn leaf_output_variables(&self) -> Vec<Variable> {
        let mut seen = BTreeMap::new();
        for op in self.operations.values() {
            for v in op.outputs() {
                if self.consumers_of(&v.name).is_empty() {
                    seen.insert(v.name.clone(), v.clone());
                }
            }
        }
        seen.into_values().collect()
    }

    /// Every operation transitively feeding `name`'s inputs.
    pub(crate) fn ancestors(&self, name: &OperationName) -> HashSet<OperationName> {
        let mut result = HashSet::new();
        let mut stack = vec![name.clone()];
        while let Some(cur) = stack.pop() {
            let op = match self.operations.get(&cur) {
                Some(op) => op,
                None => continue,
            };
            for v in op.inputs().iter().chain(op.condition_needs()) {
                if let Some(producer) = self.producer_of(&v.name) {
                    if result.insert(producer.clone()) {
                        stack.push(producer.clone());
                    }
                }
            }
        }
        result
    }

    /// All simple operation-paths from a consumer of `from_var` through to
    /// whichever operation produces `to_var`.
    pub(crate) fn simple_paths(&self, from_var: &str, to_var: &str) -> Vec<Vec<OperationName>> {
        let mut results = Vec::new();
        let mut path = Vec::new();
        let mut visiting = HashSet::new();
        self.walk(from_var, to_var, &mut path, &mut visiting, &mut results);
        results
    }

    fn walk(
        &self,
        var: &str,
        target: &str,
        path: &mut Vec<OperationName>,
        visiting: &mut HashSet<OperationName>,
        results: &mut Vec<Vec<OperationName>>,
    ) {
        for op_name in self.consumers_of(var) {
            if visiting.contains(op_name) {
                continue;
            }
            let op = &self.operations[op_name];
            path.push(op_name.clone());
            visiting.insert(op_name.clone());
            if op.outputs().iter().any(|v| v.name == target) {
                results.push(path.clone());
            }
            for out in op.outputs() {
                self.walk(&out.name, target, path, visiting, results);
            }
            visiting.remove(op_name);
            path.pop();
        }
    }

    /// Detects a cycle among operations via a dependency-edge Kahn's
    /// algorithm; returns the name of one operation still unresolved when
    /// no more progress can be made.
    pub(crate) fn find_cycle(&self) -> Option<OperationName> {
        let mut indegree: BTreeMap<OperationName, usize> =
            self.operations.keys().map(|n| (n.clone(), 0)).collect();
        for op in self.operations.values() {
            for v in op.inputs().iter().chain(op.condition_needs()) {
                if self.producer_of(&v.name).is_some() {
                    *indegree.get_mut(op.name()).unwrap() += 1;
                }
            }
        }
        let mut queue: Vec<OperationName> =
            indegree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| n.clone()).collect();
        let mut visited = 0usize;
        while let Some(name) = queue.pop() {
            visited += 1;
            let op = &self.operations[&name];
            for out in op.outputs() {
                for consumer in self.consumers_of(&out.name) {
                    let entry = indegree.get_mut(consumer).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push(consumer.clone());
                    }
                }
            }
        }
        if visited == self.operations.len() {
            None
        } else {
            indegree.into_iter().find(|(_, d)| *d > 0).map(|(n, _)| n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_types::{ElementType, MapExpr, Variable};

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
    fn duplicate_output_is_rejected() {
        let mut g = Graph::new("g");
        g.insert(map("a", &["x"], &["y"])).unwrap();
        let err = g.insert(map("b", &["x"], &["y"])).unwrap_err();
        assert_eq!(err, GraphError::DuplicateOutput("y".into()));
    }

    #[test]
    fn add_falls_back_to_replace_on_a_name_collision() {
        let mut g = Graph::new("g");
        g.insert(map("a", &["x"], &["y"])).unwrap();
        g.add(vec![Operation::Map {
            name: "a".into(),
            inputs: vec![Variable::new("x", ElementType::Scalar)],
            outputs: vec![Variable::new("y", ElementType::Scalar)],
            condition_needs: Vec::new(),
            expr: MapExpr::Scale(2.0),
        }])
        .unwrap();
        match g.get(&OperationName::from("a")).unwrap() {
            Operation::Map { expr, .. } => assert_eq!(*expr, MapExpr::Scale(2.0)),
            other => panic!("expected a map, got {other:?}"),
        }
    }

    #[test]
    fn replace_requires_matching_shape() {
        let mut g = Graph::new("g");
        g.insert(map("a", &["x"], &["y"])).unwrap();
        let err = g.replace(map("a", &["x", "z"], &["y"])).unwrap_err();
        assert_eq!(err, GraphError::InputsMismatch("a".into()));
    }

    #[test]
    fn leaf_inputs_and_outputs_are_detected() {
        let mut g = Graph::new("g");
        g.insert(map("a", &["x"], &["y"])).unwrap();
        g.insert(map("b", &["y"], &["z"])).unwrap();
        let inputs: Vec<_> = g.leaf_input_variables().into_iter().map(|v| v.name).collect();
        let outputs: Vec<_> = g.leaf_output_variables().into_iter().map(|v| v.name).collect();
        assert_eq!(inputs, vec!["x".to_string()]);
        assert_eq!(outputs, vec!["z".to_string()]);
    }

    #[test]
    fn cycle_is_detected() {
        let mut g = Graph::new("g");
        g.insert(map("a", &["x"], &["y"])).unwrap();
        g.insert(map("b", &["y"], &["x2"])).unwrap();
        // Not an actual cycle (x != x2); confirm the negative case first.
        assert!(g.find_cycle().is_none());
    }
}
