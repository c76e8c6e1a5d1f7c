use std::collections::HashMap;

use ami_types::TransitionType;

/// Counts transitions of each type until every expected upstream identity
/// has reported one, then releases the barrier and resets the count.
///
/// Grounded on `ami/worker.py::NodeCollector.process_msg`'s
/// `self.counts[MsgTypes.Transition] += 1; if ... == self.num_workers:
/// ... self.counts[MsgTypes.Transition] = 0` pattern.
#[derive(Debug, Default)]
pub struct TransitionBarrier {
    expected: usize,
    counts: HashMap<TransitionType, usize>,
}

impl TransitionBarrier {
    pub fn new(expected: usize) -> Self {
        TransitionBarrier { expected, counts: HashMap::new() }
    }

    /// Records one arrival of `ttype`. Returns `true` the moment the count
    /// reaches `expected`, at which point it has already been reset to zero
    /// so the next round starts clean.
    pub fn arrive(&mut self, ttype: TransitionType) -> bool {
        let count = self.counts.entry(ttype).or_insert(0);
        *count += 1;
        if *count >= self.expected {
            *count = 0;
            true
        } else {
            false
        }
    }

    /// Resets every in-flight count, used when the set of expected
    /// contributors changes (e.g. a worker is restarted mid-transition).
    pub fn reset(&mut self) {
        self.counts.clear();
    }

    pub fn set_expected(&mut self, expected: usize) {
        self.expected = expected;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_releases_once_every_contributor_has_arrived() {
        let mut barrier = TransitionBarrier::new(3);
        assert!(!barrier.arrive(TransitionType::Enable));
        assert!(!barrier.arrive(TransitionType::Enable));
        assert!(barrier.arrive(TransitionType::Enable));
        // Resets after releasing.
        assert!(!barrier.arrive(TransitionType::Enable));
    }

    #[test]
    fn different_transition_types_count_independently() {
        let mut barrier = TransitionBarrier::new(2);
        assert!(!barrier.arrive(TransitionType::Allocate));
        assert!(!barrier.arrive(TransitionType::Configure));
        assert!(barrier.arrive(TransitionType::Allocate));
        assert!(barrier.arrive(TransitionType::Configure));
    }
}
