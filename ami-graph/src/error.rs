use ami_types::OperationName;

/// Failures that can occur while mutating or compiling a [`crate::Graph`].
///
/// Every variant corresponds to one of the invariants in spec.md §3; a
/// `GraphError` anywhere aborts the mutation in progress and the caller
/// (the manager, in practice) restores its prior snapshot.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("operation {0} may only be added once")]
    DuplicateOperation(OperationName),
    #[error("operation {0} not found")]
    UnknownOperation(OperationName),
    #[error("replacing operation {0}: inputs must match the existing operation")]
    InputsMismatch(OperationName),
    #[error("replacing operation {0}: outputs must match the existing operation")]
    OutputsMismatch(OperationName),
    #[error("output variable {0} is produced by more than one operation")]
    DuplicateOutput(String),
    #[error("operation {0} declares no outputs")]
    EmptyOutputs(OperationName),
    #[error("variable name {0} collides with a reserved compiler-generated suffix")]
    ReservedName(String),
    #[error("graph contains a cycle through operation {0}")]
    Cycle(OperationName),
}
