//! AMI's two logging layers.
//!
//! [`registry`] is internal structured telemetry: buffered, typed event
//! streams a component can subscribe to, modernized from the teacher's own
//! `logging` crate. [`text`] is the operator-facing layer: `tracing` text
//! output to stderr or a `--log-file`, filtered by `--log-level` or the
//! `AMI_LOG` environment variable (spec.md §6).

pub mod events;
pub mod registry;
pub mod text;

pub use events::{CollectorEvent, GraphEvent};
pub use registry::{Logger, Registry};
pub use text::{init, LogLevel, LoggingGuard};
