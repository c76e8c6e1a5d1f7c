//! Process supervision (spec.md §5 "Cancellation & timeout"): a 250ms
//! liveness probe and a rolling-window restart budget, generalized from the
//! retry-on-connect-failure pattern in `ami/data.py`'s `start_connections`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::RuntimeError;

pub const DEFAULT_MAX_RESTARTS: usize = 5;
pub const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// A child the supervisor can check on and bring back up. A real binary
/// implements this over an OS process handle; tests implement it over a
/// plain flag.
pub trait Supervised {
    /// Checks whether the child is still running. Takes `&mut self`
    /// because a real process handle (`std::process::Child::try_wait`)
    /// must reap its exit status to answer this, which is inherently a
    /// mutating operation.
    fn is_alive(&mut self) -> bool;
    fn restart(&mut self) -> Result<(), RuntimeError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildStatus {
    Running,
    Restarting,
    PermanentlyFailed,
}

/// Watches one supervised child, restarting it on death up to
/// `max_restarts` times inside `window`; beyond that it gives up and marks
/// the child [`ChildStatus::PermanentlyFailed`] (spec.md §5).
pub struct Supervisor<C: Supervised> {
    name: String,
    child: C,
    probe_interval: Duration,
    max_restarts: usize,
    window: Duration,
    restarts: VecDeque<Instant>,
    status: ChildStatus,
}

impl<C: Supervised> Supervisor<C> {
    pub fn new(name: impl Into<String>, child: C) -> Self {
        Supervisor {
            name: name.into(),
            child,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            max_restarts: DEFAULT_MAX_RESTARTS,
            window: DEFAULT_RESTART_WINDOW,
            restarts: VecDeque::new(),
            status: ChildStatus::Running,
        }
    }

    pub fn with_budget(mut self, max_restarts: usize, window: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.window = window;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    pub fn status(&self) -> ChildStatus {
        self.status
    }

    pub fn child(&self) -> &C {
        &self.child
    }

    /// Runs one liveness-probe tick. A caller drives this on
    /// [`Self::probe_interval`]; the supervisor never sleeps itself, staying
    /// a cooperative step rather than a long-lived blocking loop (spec.md
    /// §5 "no blocking calls inside long-lived loops").
    pub fn tick(&mut self) -> Result<bool, RuntimeError> {
        if self.status == ChildStatus::PermanentlyFailed {
            return Ok(false);
        }
        if self.child.is_alive() {
            self.status = ChildStatus::Running;
            return Ok(false);
        }

        let now = Instant::now();
        while matches!(self.restarts.front(), Some(t) if now.duration_since(*t) > self.window) {
            self.restarts.pop_front();
        }
        if self.restarts.len() >= self.max_restarts {
            self.status = ChildStatus::PermanentlyFailed;
            error!(name = %self.name, restarts = self.restarts.len(), "giving up after repeated failures");
            return Err(RuntimeError::PermanentlyFailed(self.name.clone()));
        }

        self.status = ChildStatus::Restarting;
        warn!(name = %self.name, "child died, restarting");
        self.restarts.push_back(now);
        self.child.restart()?;
        self.status = ChildStatus::Running;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyChild {
        alive: bool,
        restart_calls: usize,
    }

    impl Supervised for FlakyChild {
        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn restart(&mut self) -> Result<(), RuntimeError> {
            self.restart_calls += 1;
            self.alive = true;
            Ok(())
        }
    }

    #[test]
    fn restarts_a_dead_child_and_reports_it_as_running_again() {
        let mut supervisor = Supervisor::new("worker-0", FlakyChild { alive: false, restart_calls: 0 });
        let restarted = supervisor.tick().unwrap();
        assert!(restarted);
        assert_eq!(supervisor.status(), ChildStatus::Running);
        assert_eq!(supervisor.child().restart_calls, 1);
    }

    #[test]
    fn gives_up_after_the_restart_budget_is_exhausted() {
        let mut supervisor =
            Supervisor::new("worker-0", FlakyChild { alive: false, restart_calls: 0 }).with_budget(2, Duration::from_secs(60));

        supervisor.child.alive = false;
        supervisor.tick().unwrap();
        supervisor.child.alive = false;
        supervisor.tick().unwrap();
        supervisor.child.alive = false;
        let err = supervisor.tick();

        assert!(err.is_err());
        assert_eq!(supervisor.status(), ChildStatus::PermanentlyFailed);
    }

    #[test]
    fn a_live_child_never_counts_against_the_restart_budget() {
        let mut supervisor = Supervisor::new("worker-0", FlakyChild { alive: true, restart_calls: 0 });
        assert!(!supervisor.tick().unwrap());
        assert_eq!(supervisor.status(), ChildStatus::Running);
        assert_eq!(supervisor.child().restart_calls, 0);
    }
}
