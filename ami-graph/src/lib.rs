//! The AMI graph compiler.
//!
//! A [`Graph`] is a user-authored, uncolored DAG of [`ami_types::Operation`]
//! vertices. [`Graph::compile`] colors it, pulls worker-only inputs through
//! to the tiers that need them, expands every global operation into its
//! worker/localCollector/globalCollector triple, and lowers filters into a
//! guard map - producing a [`plan::CompiledGraph`] ready to ship out.

mod compile;
mod error;
mod graph;
mod plan;

pub use error::GraphError;
pub use graph::Graph;
pub use plan::CompiledGraph;
