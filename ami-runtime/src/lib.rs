//! The running pieces of an AMI deployment: worker and collector event
//! loops, the manager control plane, process supervision, and the shared
//! graph executor they all sit on top of.

pub mod collector;
pub mod error;
pub mod executor;
pub mod manager;
pub mod source;
pub mod supervisor;
pub mod worker;

pub use collector::Collector;
pub use error::RuntimeError;
pub use executor::GraphRunner;
pub use manager::{ClientCommand, ClientReply, Manager};
pub use source::{FieldSpec, RandomFieldSpec, RandomSource, Source, StaticSource};
pub use supervisor::{ChildStatus, Supervised, Supervisor};
pub use worker::{ControlMessage, Worker, WorkerStep};
