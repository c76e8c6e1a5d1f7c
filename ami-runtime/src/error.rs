use ami_graph::GraphError;
use ami_types::OperationName;

/// Errors raised while running a compiled graph or driving the control plane.
///
/// Per spec.md §7: a per-event execution error (`MissingInput`,
/// `UnsupportedCustomExpr`) is caught by the caller, the event is dropped,
/// and processing continues; a `Compile` error rolls the caller back to its
/// previous snapshot. Neither ever propagates further than the tier that
/// raised it.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("compiling graph: {0}")]
    Compile(#[from] GraphError),
    #[error("operation {0} references unknown input {1}")]
    MissingInput(OperationName, String),
    #[error("operation {0} carries a custom expression with no sandboxed evaluator wired in")]
    UnsupportedCustomExpr(OperationName),
    #[error("fabric error: {0}")]
    Fabric(#[from] ami_fabric::FabricError),
    #[error("codec error: {0}")]
    Codec(#[from] ami_codec::CodecError),
    #[error("unknown graph {0}")]
    UnknownGraph(String),
    #[error("client command rejected: {0}")]
    Rejected(String),
    #[error("{0} failed its restart budget and will not be retried")]
    PermanentlyFailed(String),
}
