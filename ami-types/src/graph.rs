//! Vocabulary of the logical graph: variables and operations.
//!
//! Operations are a closed, tagged-variant catalog rather than arbitrary
//! introspected code (per the "Dynamic graph of operations" design note):
//! per-event functions are one of a small built-in set, or an opaque blob
//! handed to a sandboxed evaluator the embedder provides. Parameters always
//! travel as data, never as a pickled closure.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::{ElementType, Value};

/// The three tiers a compiled operation can run at.
///
/// Ordered worker → localCollector → globalCollector, matching the
/// direction data flows through the aggregation tree (spec.md §2).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Worker,
    LocalCollector,
    GlobalCollector,
}

impl Color {
    /// The reserved name suffix a synthetic variable at this tier carries.
    pub fn suffix(&self) -> &'static str {
        match self {
            Color::Worker => "_worker",
            Color::LocalCollector => "_localCollector",
            Color::GlobalCollector => "_globalCollector",
        }
    }

    /// The tier immediately downstream of this one, if any.
    pub fn next(&self) -> Option<Color> {
        match self {
            Color::Worker => Some(Color::LocalCollector),
            Color::LocalCollector => Some(Color::GlobalCollector),
            Color::GlobalCollector => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Worker => write!(f, "worker"),
            Color::LocalCollector => write!(f, "localCollector"),
            Color::GlobalCollector => write!(f, "globalCollector"),
        }
    }
}

/// The three reserved suffixes that mark a variable as internally generated.
///
/// Matches `ami/graphkit_wrapper.py::Graph::_name_is_valid`.
const RESERVED_SUFFIXES: [&str; 3] = ["_worker", "_localCollector", "_globalCollector"];

/// A typed, named value vertex in the graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub element_type: ElementType,
}

impl Variable {
    pub fn new(name: impl Into<String>, element_type: ElementType) -> Self {
        Variable { name: name.into(), element_type }
    }

    /// True if `name` collides with a suffix the compiler generates
    /// internally, and so cannot be a user-chosen name (spec.md §3
    /// invariant 1).
    pub fn is_reserved(&self) -> bool {
        RESERVED_SUFFIXES.iter().any(|suffix| self.name.ends_with(suffix))
    }

    /// Synthesizes the tier-local copy of this variable, e.g. `s` becomes
    /// `s_worker` at the worker tier. Used by the compiler's expansion step.
    pub fn colored(&self, color: Color) -> Variable {
        Variable::new(format!("{}{}", self.name, color.suffix()), self.element_type)
    }
}

/// A named operation vertex.
///
/// Newtype rather than a bare `String` so operation identity can't be
/// confused with a variable name at the type level.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationName(pub String);

impl From<&str> for OperationName {
    fn from(s: &str) -> Self { OperationName(s.to_string()) }
}

impl From<String> for OperationName {
    fn from(s: String) -> Self { OperationName(s) }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OperationName {
    /// The name this operation would carry once expanded at `color`.
    pub fn at(&self, color: Color) -> OperationName {
        OperationName(format!("{}{}", self.0, color.suffix()))
    }
}

/// The small built-in language a [`Operation::Map`] expression may use.
///
/// `Custom` carries an opaque blob interpreted by an embedder-supplied
/// sandboxed evaluator; AMI's compiler never inspects it, only ships it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MapExpr {
    Identity,
    Scale(f64),
    Offset(f64),
    Custom(Vec<u8>),
}

/// A boolean predicate over `condition_needs` values, gating a [`Operation::Filter`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    GreaterThan(f64),
    LessThan(f64),
    Equals(f64),
    Custom(Vec<u8>),
}

/// A commutative reduction used by global operations to fold contributions
/// from many events, and by collector tiers to fold contributions from many
/// upstream identities.
///
/// Matches `ami/data.py::Strategies` (`Sum`, `Average`, `Pick1`), with
/// `Pick1`'s "most recent wins" semantics absorbed into [`Operation::PickN`]
/// rather than being a `Reduction` variant, since it needs a window size
/// rather than a fold.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reduction {
    Sum,
    Average,
    Max,
    Min,
    Last,
}

impl Reduction {
    /// The accumulator seed before any contribution has arrived.
    pub fn seed(&self, element_type: ElementType) -> Value {
        let scalar = match self {
            Reduction::Min => f64::INFINITY,
            Reduction::Max => f64::NEG_INFINITY,
            _ => 0.0,
        };
        match element_type {
            ElementType::Scalar => Value::Scalar(scalar),
            ElementType::Waveform => Value::Waveform(Vec::new()),
            ElementType::Image => Value::Image(Vec::new()),
            ElementType::Object => Value::Object(Vec::new()),
        }
    }

    /// Folds `incoming` into `acc`. For `Average`, this accumulates a
    /// running sum; call [`Reduction::finalize`] with the contributor count
    /// to obtain the mean.
    pub fn combine(&self, acc: &Value, incoming: &Value) -> Value {
        match (self, acc, incoming) {
            (Reduction::Sum | Reduction::Average, Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a + b),
            (Reduction::Max, Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a.max(*b)),
            (Reduction::Min, Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a.min(*b)),
            (Reduction::Last, _, incoming) => incoming.clone(),
            (Reduction::Sum | Reduction::Average, Value::Waveform(a), Value::Waveform(b)) => {
                Value::Waveform(elementwise(a, b, |x, y| x + y))
            }
            (Reduction::Max, Value::Waveform(a), Value::Waveform(b)) => {
                Value::Waveform(elementwise(a, b, f64::max))
            }
            (Reduction::Min, Value::Waveform(a), Value::Waveform(b)) => {
                Value::Waveform(elementwise(a, b, f64::min))
            }
            _ => incoming.clone(),
        }
    }

    /// Converts a running `Average` sum into a mean given the number of
    /// contributions folded into it. A no-op for every other reduction.
    pub fn finalize(&self, acc: Value, count: usize) -> Value {
        match (self, acc) {
            (Reduction::Average, Value::Scalar(sum)) if count > 0 => Value::Scalar(sum / count as f64),
            (_, acc) => acc,
        }
    }
}

fn elementwise(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    if a.is_empty() {
        return b.to_vec();
    }
    a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect()
}

/// A vertex in the logical graph: either a pure per-event map, a global
/// reduction, a windowing operation, or a guarding filter.
///
/// `is_global` on `Accumulator`/`PickN`/`RollingBuffer` marks the operation
/// for three-tier expansion by the compiler (spec.md §3 "a subset of
/// operations are marked global"). `Map` and `Filter` are never global.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Map {
        name: OperationName,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
        condition_needs: Vec<Variable>,
        expr: MapExpr,
    },
    Accumulator {
        name: OperationName,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
        condition_needs: Vec<Variable>,
        reduction: Reduction,
        is_global: bool,
    },
    PickN {
        name: OperationName,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
        condition_needs: Vec<Variable>,
        n: usize,
        is_global: bool,
    },
    RollingBuffer {
        name: OperationName,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
        condition_needs: Vec<Variable>,
        n: usize,
        is_global: bool,
    },
    Filter {
        name: OperationName,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
        condition_needs: Vec<Variable>,
        predicate: Predicate,
    },
}

impl Operation {
    pub fn name(&self) -> &OperationName {
        match self {
            Operation::Map { name, .. }
            | Operation::Accumulator { name, .. }
            | Operation::PickN { name, .. }
            | Operation::RollingBuffer { name, .. }
            | Operation::Filter { name, .. } => name,
        }
    }

    pub fn inputs(&self) -> &[Variable] {
        match self {
            Operation::Map { inputs, .. }
            | Operation::Accumulator { inputs, .. }
            | Operation::PickN { inputs, .. }
            | Operation::RollingBuffer { inputs, .. }
            | Operation::Filter { inputs, .. } => inputs,
        }
    }

    pub fn outputs(&self) -> &[Variable] {
        match self {
            Operation::Map { outputs, .. }
            | Operation::Accumulator { outputs, .. }
            | Operation::PickN { outputs, .. }
            | Operation::RollingBuffer { outputs, .. }
            | Operation::Filter { outputs, .. } => outputs,
        }
    }

    pub fn condition_needs(&self) -> &[Variable] {
        match self {
            Operation::Map { condition_needs, .. }
            | Operation::Accumulator { condition_needs, .. }
            | Operation::PickN { condition_needs, .. }
            | Operation::RollingBuffer { condition_needs, .. }
            | Operation::Filter { condition_needs, .. } => condition_needs,
        }
    }

    /// True if this operation must be expanded into a three-tier plan by
    /// the compiler.
    pub fn is_global(&self) -> bool {
        match self {
            Operation::Accumulator { is_global, .. }
            | Operation::PickN { is_global, .. }
            | Operation::RollingBuffer { is_global, .. } => *is_global,
            Operation::Map { .. } | Operation::Filter { .. } => false,
        }
    }

    /// The window size `N`, for operations that have one.
    pub fn window(&self) -> Option<usize> {
        match self {
            Operation::PickN { n, .. } | Operation::RollingBuffer { n, .. } => Some(*n),
            _ => None,
        }
    }

    /// Returns a copy of this operation with only `inputs` replaced. Used
    /// by the compiler's global pull-through step, which rewires a
    /// globally-colored operation's boundary input onto a synthesized
    /// `PickN(1)` without touching anything else about it.
    pub fn with_inputs(&self, inputs: Vec<Variable>) -> Operation {
        match self.clone() {
            Operation::Map { name, outputs, condition_needs, expr, .. } => {
                Operation::Map { name, inputs, outputs, condition_needs, expr }
            }
            Operation::Accumulator { name, outputs, condition_needs, reduction, is_global, .. } => {
                Operation::Accumulator { name, inputs, outputs, condition_needs, reduction, is_global }
            }
            Operation::PickN { name, outputs, condition_needs, n, is_global, .. } => {
                Operation::PickN { name, inputs, outputs, condition_needs, n, is_global }
            }
            Operation::RollingBuffer { name, outputs, condition_needs, n, is_global, .. } => {
                Operation::RollingBuffer { name, inputs, outputs, condition_needs, n, is_global }
            }
            Operation::Filter { name, outputs, condition_needs, predicate, .. } => {
                Operation::Filter { name, inputs, outputs, condition_needs, predicate }
            }
        }
    }

    /// Returns a copy of this operation with `name`/`inputs`/`outputs`
    /// replaced, keeping every other field. Used by the compiler's
    /// per-tier expansion (spec.md §4.1 step 3).
    pub fn retargeted(
        &self,
        name: OperationName,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
        n: Option<usize>,
    ) -> Operation {
        match self {
            Operation::Accumulator { condition_needs, reduction, .. } => Operation::Accumulator {
                name,
                inputs,
                outputs,
                condition_needs: condition_needs.clone(),
                reduction: *reduction,
                is_global: false,
            },
            Operation::PickN { condition_needs, .. } => Operation::PickN {
                name,
                inputs,
                outputs,
                condition_needs: condition_needs.clone(),
                n: n.unwrap_or(1),
                is_global: false,
            },
            Operation::RollingBuffer { condition_needs, .. } => Operation::RollingBuffer {
                name,
                inputs,
                outputs,
                condition_needs: condition_needs.clone(),
                n: n.unwrap_or(1),
                is_global: false,
            },
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_suffixes_are_detected() {
        let v = Variable::new("s_worker", ElementType::Scalar);
        assert!(v.is_reserved());
        let v = Variable::new("s", ElementType::Scalar);
        assert!(!v.is_reserved());
    }

    #[test]
    fn colored_appends_suffix() {
        let v = Variable::new("s", ElementType::Scalar);
        assert_eq!(v.colored(Color::Worker).name, "s_worker");
        assert_eq!(v.colored(Color::LocalCollector).name, "s_localCollector");
    }

    #[test]
    fn sum_reduction_folds_scalars() {
        let seed = Reduction::Sum.seed(ElementType::Scalar);
        let a = Reduction::Sum.combine(&seed, &Value::Scalar(3.0));
        let b = Reduction::Sum.combine(&a, &Value::Scalar(4.0));
        assert_eq!(b, Value::Scalar(7.0));
    }

    #[test]
    fn average_divides_by_count_on_finalize() {
        let seed = Reduction::Average.seed(ElementType::Scalar);
        let a = Reduction::Average.combine(&seed, &Value::Scalar(10.0));
        let b = Reduction::Average.combine(&a, &Value::Scalar(20.0));
        assert_eq!(Reduction::Average.finalize(b, 2), Value::Scalar(15.0));
    }
}
