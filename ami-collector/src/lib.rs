//! The heartbeat-synchronizing event builder shared by local and global
//! collectors (spec.md §4.4).
//!
//! Grounded on `ami/worker.py::NodeCollector`, which tracks per-message-type
//! contribution counts against `num_workers` and forwards/resets once every
//! upstream identity has checked in for a given heartbeat. `ami/comm.py`'s
//! `EventBuilder` stub names the shape (`depth`, `pending`) but never filled
//! it in; the bounded-ring, per-heartbeat contribution tracking here is new,
//! built to match spec.md's fuller description of the same component.

mod builder;
mod transition;

pub use builder::{EventBuilder, PendingSlot, UpdateOutcome};
pub use transition::TransitionBarrier;
