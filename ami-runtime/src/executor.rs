//! Runs one tier's colored operation list against a per-event environment.
//!
//! Operations are a closed tagged-variant catalog (`ami_types::Operation`),
//! not introspected code, so evaluating one is a plain match rather than a
//! sandboxed interpreter. Stateful operations (`Accumulator`, `PickN`,
//! `RollingBuffer`) keep their running state here, keyed by operation name,
//! across every event the tier processes - this is what makes a worker's
//! `Sum` keep accumulating across a whole heartbeat rather than resetting
//! per event.

use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::collections::HashMap;
use std::cmp::Reverse;

use ami_types::{ElementType, MapExpr, Operation, OperationName, Predicate, Reduction, Value, Variable};

use crate::error::RuntimeError;

#[derive(Clone, Debug)]
enum OpState {
    Accumulator { acc: Value, count: usize },
    /// Backing state for `PickN`/`RollingBuffer`: a window of scalar
    /// elements. Contributions that arrive as a `Waveform` (e.g. a
    /// collector-tier merge of several workers' windows) extend the buffer
    /// by all of their elements rather than by one.
    ScalarWindow { buf: VecDeque<f64> },
    /// Fallback for window operations over non-numeric element types
    /// (`Image`, `Object`): no real windowing, just the latest value.
    LastValue { value: Option<Value> },
}

/// Evaluates one tier's operations, in dependency order, against a mutable
/// name→value environment.
pub struct GraphRunner {
    order: Vec<OperationName>,
    ops: HashMap<OperationName, Operation>,
    filters: HashMap<OperationName, Operation>,
    guarded_by: HashMap<OperationName, OperationName>,
    state: HashMap<OperationName, OpState>,
}

impl GraphRunner {
    pub fn new(ops: Vec<Operation>, guarded_by: HashMap<OperationName, OperationName>) -> Self {
        let order = topological_order(&ops);
        let filters: HashMap<OperationName, Operation> = ops
            .iter()
            .filter(|op| matches!(op, Operation::Filter { .. }))
            .map(|op| (op.name().clone(), op.clone()))
            .collect();
        let by_name: HashMap<OperationName, Operation> =
            ops.into_iter().map(|op| (op.name().clone(), op)).collect();
        GraphRunner { order, ops: by_name, filters, guarded_by, state: HashMap::new() }
    }

    /// Clears accumulator/window state without changing topology - backs
    /// the manager's `reset_features` command.
    pub fn reset_state(&mut self) {
        self.state.clear();
    }

    /// Runs every operation, in dependency order, against `env`. Leaf-input
    /// variables must already be present in `env` before calling this.
    pub fn run_all(&mut self, env: &mut BTreeMap<String, Value>) -> Result<(), RuntimeError> {
        let order = self.order.clone();
        for name in &order {
            self.run_one(name, env)?;
        }
        Ok(())
    }

    fn gate_open(&self, name: &OperationName, env: &BTreeMap<String, Value>) -> bool {
        let filter_name = match self.guarded_by.get(name) {
            Some(f) => f,
            None => return true,
        };
        let filter = match self.filters.get(filter_name) {
            // The filter lives on a different tier than its guarded
            // operation (possible when a global op's expansion crosses the
            // filter's own region); there is nothing local to evaluate
            // against, so default to open rather than silently dropping.
            None => return true,
            Some(op) => op,
        };
        match filter {
            Operation::Filter { predicate, condition_needs, .. } => {
                eval_predicate(predicate, condition_needs, env)
            }
            _ => true,
        }
    }

    fn run_one(&mut self, name: &OperationName, env: &mut BTreeMap<String, Value>) -> Result<(), RuntimeError> {
        if !self.gate_open(name, env) {
            return Ok(());
        }
        let op = self.ops.get(name).expect("operation present in ops map").clone();
        match &op {
            Operation::Map { inputs, outputs, expr, .. } => self.run_map(name, expr, inputs, outputs, env),
            Operation::Filter { inputs, outputs, predicate, condition_needs, .. } => {
                if eval_predicate(predicate, condition_needs, env) {
                    for (input, output) in inputs.iter().zip(outputs.iter()) {
                        if let Some(value) = env.get(&input.name).cloned() {
                            env.insert(output.name.clone(), value);
                        }
                    }
                }
                Ok(())
            }
            Operation::Accumulator { inputs, outputs, reduction, .. } => {
                self.run_accumulator(name, inputs, outputs, *reduction, env)
            }
            Operation::PickN { inputs, outputs, n, .. } | Operation::RollingBuffer { inputs, outputs, n, .. } => {
                self.run_window(name, inputs, outputs, *n, env)
            }
        }
    }

    fn run_map(
        &self,
        name: &OperationName,
        expr: &MapExpr,
        inputs: &[Variable],
        outputs: &[Variable],
        env: &mut BTreeMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        match expr {
            MapExpr::Custom(_) => return Err(RuntimeError::UnsupportedCustomExpr(name.clone())),
            MapExpr::Identity => {
                for (input, output) in inputs.iter().zip(outputs.iter()) {
                    let value = env
                        .get(&input.name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingInput(name.clone(), input.name.clone()))?;
                    env.insert(output.name.clone(), value);
                }
            }
            MapExpr::Scale(factor) => {
                for (input, output) in inputs.iter().zip(outputs.iter()) {
                    let value = env
                        .get(&input.name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingInput(name.clone(), input.name.clone()))?;
                    env.insert(output.name.clone(), scale(&value, *factor));
                }
            }
            MapExpr::Offset(delta) => {
                for (input, output) in inputs.iter().zip(outputs.iter()) {
                    let value = env
                        .get(&input.name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingInput(name.clone(), input.name.clone()))?;
                    env.insert(output.name.clone(), offset(&value, *delta));
                }
            }
        }
        Ok(())
    }

    fn run_accumulator(
        &mut self,
        name: &OperationName,
        inputs: &[Variable],
        outputs: &[Variable],
        reduction: Reduction,
        env: &mut BTreeMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        let input = inputs.first().ok_or_else(|| RuntimeError::MissingInput(name.clone(), String::new()))?;
        let incoming = env
            .get(&input.name)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingInput(name.clone(), input.name.clone()))?;
        let entry = self
            .state
            .entry(name.clone())
            .or_insert_with(|| OpState::Accumulator { acc: reduction.seed(incoming.element_type()), count: 0 });
        if let OpState::Accumulator { acc, count } = entry {
            *acc = reduction.combine(acc, &incoming);
            *count += 1;
            if let Some(output) = outputs.first() {
                env.insert(output.name.clone(), reduction.finalize(acc.clone(), *count));
            }
        }
        Ok(())
    }

    fn run_window(
        &mut self,
        name: &OperationName,
        inputs: &[Variable],
        outputs: &[Variable],
        n: usize,
        env: &mut BTreeMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        let input = inputs.first().ok_or_else(|| RuntimeError::MissingInput(name.clone(), String::new()))?;
        let incoming = env
            .get(&input.name)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingInput(name.clone(), input.name.clone()))?;
        let output = match outputs.first() {
            Some(output) => output,
            None => return Ok(()),
        };

        let elements: Option<Vec<f64>> = match &incoming {
            Value::Scalar(x) => Some(vec![*x]),
            Value::Waveform(xs) => Some(xs.clone()),
            _ => None,
        };

        let value = match elements {
            Some(elements) => {
                let entry = self
                    .state
                    .entry(name.clone())
                    .or_insert_with(|| OpState::ScalarWindow { buf: VecDeque::new() });
                let buf = match entry {
                    OpState::ScalarWindow { buf } => buf,
                    _ => unreachable!("window operation state must be a ScalarWindow"),
                };
                buf.extend(elements);
                while buf.len() > n {
                    buf.pop_front();
                }
                window_to_value(buf, output.element_type)
            }
            None => {
                let entry = self.state.entry(name.clone()).or_insert_with(|| OpState::LastValue { value: None });
                if let OpState::LastValue { value } = entry {
                    *value = Some(incoming.clone());
                    incoming
                } else {
                    unreachable!("window operation state must be a LastValue")
                }
            }
        };
        env.insert(output.name.clone(), value);
        Ok(())
    }
}

fn window_to_value(buf: &VecDeque<f64>, element_type: ElementType) -> Value {
    match element_type {
        ElementType::Scalar => Value::Scalar(buf.back().copied().unwrap_or(0.0)),
        _ => Value::Waveform(buf.iter().copied().collect()),
    }
}

fn eval_predicate(predicate: &Predicate, needs: &[Variable], env: &BTreeMap<String, Value>) -> bool {
    let gating = match needs.first().and_then(|v| env.get(&v.name)) {
        Some(value) => value,
        // No gating value observed yet this event; default to closed rather
        // than running a filtered region on stale or absent data.
        None => return false,
    };
    match (predicate, gating) {
        (Predicate::GreaterThan(threshold), Value::Scalar(x)) => x > threshold,
        (Predicate::LessThan(threshold), Value::Scalar(x)) => x < threshold,
        (Predicate::Equals(threshold), Value::Scalar(x)) => (x - threshold).abs() < f64::EPSILON,
        // No sandboxed evaluator is wired in for opaque predicates; default
        // to open so a custom predicate never silently discards data.
        (Predicate::Custom(_), _) => true,
        _ => false,
    }
}

fn scale(value: &Value, factor: f64) -> Value {
    match value {
        Value::Scalar(x) => Value::Scalar(x * factor),
        Value::Waveform(xs) => Value::Waveform(xs.iter().map(|x| x * factor).collect()),
        Value::Image(rows) => Value::Image(rows.iter().map(|row| row.iter().map(|x| x * factor).collect()).collect()),
        Value::Object(bytes) => Value::Object(bytes.clone()),
    }
}

fn offset(value: &Value, delta: f64) -> Value {
    match value {
        Value::Scalar(x) => Value::Scalar(x + delta),
        Value::Waveform(xs) => Value::Waveform(xs.iter().map(|x| x + delta).collect()),
        Value::Image(rows) => Value::Image(rows.iter().map(|row| row.iter().map(|x| x + delta).collect()).collect()),
        Value::Object(bytes) => Value::Object(bytes.clone()),
    }
}

/// Combines two contributions for the same variable name arriving from
/// different identities within one heartbeat, before the sub-graph runs.
/// Grounded on SPEC_FULL.md's event-builder expansion: the correct merge
/// for a given name is whatever reduction the operation consuming that name
/// uses, recovered here by scanning the tier's own operations rather than
/// being type-driven.
pub fn combine_for(ops: &[Operation], name: &str) -> impl Fn(&Value, &Value) -> Value + '_ {
    let reduction = ops.iter().find_map(|op| match op {
        Operation::Accumulator { inputs, reduction, .. } if inputs.iter().any(|v| v.name == name) => Some(*reduction),
        _ => None,
    });
    move |acc: &Value, incoming: &Value| match reduction {
        Some(r) => r.combine(acc, incoming),
        // Not consumed by an Accumulator here - most likely feeds a
        // PickN/RollingBuffer, which wants the union of every identity's
        // window rather than a fold, so concatenate.
        None => {
            let mut merged = to_scalars(acc);
            merged.extend(to_scalars(incoming));
            Value::Waveform(merged)
        }
    }
}

fn to_scalars(value: &Value) -> Vec<f64> {
    match value {
        Value::Scalar(x) => vec![*x],
        Value::Waveform(xs) => xs.clone(),
        _ => Vec::new(),
    }
}

/// Kahn's-algorithm topological sort over an operation list's own
/// producer/consumer edges, breaking ties by operation name for determinism
/// (spec.md §8's "compile is idempotent" property extends to execution
/// order being reproducible run to run).
fn topological_order(ops: &[Operation]) -> Vec<OperationName> {
    let producer_of = |var: &str| -> Option<&OperationName> {
        ops.iter().find(|op| op.outputs().iter().any(|v| v.name == var)).map(|op| op.name())
    };
    let mut indegree: BTreeMap<OperationName, usize> = ops.iter().map(|op| (op.name().clone(), 0)).collect();
    for op in ops {
        for v in op.inputs().iter().chain(op.condition_needs()) {
            if producer_of(&v.name).is_some() {
                *indegree.get_mut(op.name()).unwrap() += 1;
            }
        }
    }
    let mut heap: BinaryHeap<Reverse<OperationName>> =
        indegree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| Reverse(n.clone())).collect();
    let mut order = Vec::with_capacity(ops.len());
    while let Some(Reverse(name)) = heap.pop() {
        order.push(name.clone());
        let op = ops.iter().find(|op| op.name() == &name).expect("name came from this op list");
        for out in op.outputs() {
            for consumer in ops.iter().filter(|c| c.inputs().iter().chain(c.condition_needs()).any(|v| v.name == out.name)) {
                let entry = indegree.get_mut(consumer.name()).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    heap.push(Reverse(consumer.name().clone()));
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_types::{ElementType, Variable};

    fn var(name: &str) -> Variable {
        Variable::new(name, ElementType::Scalar)
    }

    #[test]
    fn map_identity_copies_input_to_output() {
        let ops = vec![Operation::Map {
            name: "m".into(),
            inputs: vec![var("a")],
            outputs: vec![var("b")],
            condition_needs: Vec::new(),
            expr: MapExpr::Identity,
        }];
        let mut runner = GraphRunner::new(ops, HashMap::new());
        let mut env = BTreeMap::new();
        env.insert("a".to_string(), Value::Scalar(3.0));
        runner.run_all(&mut env).unwrap();
        assert_eq!(env.get("b"), Some(&Value::Scalar(3.0)));
    }

    #[test]
    fn accumulator_sums_across_events() {
        let ops = vec![Operation::Accumulator {
            name: "s".into(),
            inputs: vec![var("a")],
            outputs: vec![var("total")],
            condition_needs: Vec::new(),
            reduction: Reduction::Sum,
            is_global: true,
        }];
        let mut runner = GraphRunner::new(ops, HashMap::new());
        for _ in 0..100 {
            let mut env = BTreeMap::new();
            env.insert("a".to_string(), Value::Scalar(1.0));
            runner.run_all(&mut env).unwrap();
        }
        let mut env = BTreeMap::new();
        env.insert("a".to_string(), Value::Scalar(1.0));
        runner.run_all(&mut env).unwrap();
        assert_eq!(env.get("total"), Some(&Value::Scalar(101.0)));
    }

    #[test]
    fn pick_n_keeps_only_the_latest_n_elements() {
        let ops = vec![Operation::PickN {
            name: "p".into(),
            inputs: vec![var("a")],
            outputs: vec![Variable::new("window", ElementType::Waveform)],
            condition_needs: Vec::new(),
            n: 2,
            is_global: true,
        }];
        let mut runner = GraphRunner::new(ops, HashMap::new());
        let mut last_env = BTreeMap::new();
        for x in [1.0, 2.0, 3.0] {
            let mut env = BTreeMap::new();
            env.insert("a".to_string(), Value::Scalar(x));
            runner.run_all(&mut env).unwrap();
            last_env = env;
        }
        assert_eq!(last_env.get("window"), Some(&Value::Waveform(vec![2.0, 3.0])));
    }

    #[test]
    fn filter_gates_its_guarded_operation() {
        let filter = Operation::Filter {
            name: "f".into(),
            inputs: vec![var("a")],
            outputs: vec![var("a_gated")],
            condition_needs: vec![var("gate")],
            predicate: Predicate::GreaterThan(0.0),
        };
        let guarded = Operation::Map {
            name: "m".into(),
            inputs: vec![var("a")],
            outputs: vec![var("b")],
            condition_needs: Vec::new(),
            expr: MapExpr::Identity,
        };
        let mut guarded_by = HashMap::new();
        guarded_by.insert(OperationName::from("m"), OperationName::from("f"));
        let mut runner = GraphRunner::new(vec![filter, guarded], guarded_by);

        let mut env = BTreeMap::new();
        env.insert("a".to_string(), Value::Scalar(5.0));
        env.insert("gate".to_string(), Value::Scalar(-1.0));
        runner.run_all(&mut env).unwrap();
        assert_eq!(env.get("b"), None);

        let mut env = BTreeMap::new();
        env.insert("a".to_string(), Value::Scalar(5.0));
        env.insert("gate".to_string(), Value::Scalar(1.0));
        runner.run_all(&mut env).unwrap();
        assert_eq!(env.get("b"), Some(&Value::Scalar(5.0)));
    }

    #[test]
    fn custom_map_expression_is_rejected_without_a_sandbox() {
        let ops = vec![Operation::Map {
            name: "m".into(),
            inputs: vec![var("a")],
            outputs: vec![var("b")],
            condition_needs: Vec::new(),
            expr: MapExpr::Custom(vec![1, 2, 3]),
        }];
        let mut runner = GraphRunner::new(ops, HashMap::new());
        let mut env = BTreeMap::new();
        env.insert("a".to_string(), Value::Scalar(1.0));
        assert!(runner.run_all(&mut env).is_err());
    }
}
