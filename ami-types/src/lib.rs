//! Data model shared by every tier of the AMI pipeline.
//!
//! This crate defines the wire-level vocabulary (values, messages,
//! transitions) and the logical graph vocabulary (variables, operations)
//! described by the data model section of the specification. Nothing here
//! talks to a socket or runs an operator; it is the common currency that
//! `ami-codec`, `ami-graph`, `ami-collector`, and `ami-runtime` all build on.

pub mod value;
pub mod message;
pub mod graph;

pub use value::{ElementType, Value};
pub use message::{CollectorMessage, Message, MsgKind, Transition, TransitionType};
pub use graph::{Color, Operation, OperationName, Reduction, Variable};
