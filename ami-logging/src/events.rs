//! Concrete structured-event types logged through [`crate::registry::Logger`].

/// Emitted by the manager around a graph mutation (spec.md §4.5).
#[derive(Clone, Debug, PartialEq)]
pub enum GraphEvent {
    Compiled { version: u64, worker_ops: usize, local_collector_ops: usize, global_collector_ops: usize },
    RolledBack { attempted_version: u64, reason: String },
}

/// Emitted by a collector tier around heartbeat synchronization (spec.md §4.4).
#[derive(Clone, Debug, PartialEq)]
pub enum CollectorEvent {
    HeartbeatComplete { heartbeat: u64, contributors: usize },
    HeartbeatEvicted { heartbeat: u64 },
    StaleVersionDiscarded { heartbeat: u64, version: u64 },
}
