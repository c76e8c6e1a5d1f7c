//! A buffered, typed structured-event logging registry.
//!
//! Modernized from `logging::Registry`/`Logger<T>` (the teacher's own
//! internal telemetry crate): `Box<Any>` becomes `Box<dyn Any>`, `Box<Fn>`
//! becomes `Box<dyn Fn>`, and the rest of the shape - a name-keyed map of
//! type-erased loggers, each buffering events behind a shared `RefCell`
//! until capacity or an explicit flush - is unchanged. Used internally by
//! the manager and workers to batch structured events (compiles, rollbacks,
//! heartbeat completions) without forcing every caller to agree on one
//! global event enum.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A name-keyed table of type-erased [`Logger`]s, sharing one clock.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds `name` to an action invoked on buffer flush. Returns whatever
    /// was previously bound to `name`, if anything - existing [`Logger`]
    /// handles keep writing to their original destination, only new ones
    /// pick up the replacement.
    pub fn insert<T: 'static>(
        &mut self,
        name: impl Into<String>,
        action: Box<dyn Fn(&Duration, &[(Duration, T)])>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name.into(), Box::new(logger))
    }

    /// Unbinds a logger, signaling the end of its stream to any reader.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a shared handle to a previously-inserted logger.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map.get(name).and_then(|entry| entry.downcast_ref::<Logger<T>>()).cloned()
    }
}

/// A cheaply-cloneable, buffering logger for events of type `T`.
pub struct Logger<T> {
    time: Instant,
    action: Rc<Box<dyn Fn(&Duration, &[(Duration, T)])>>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { time: self.time, action: Rc::clone(&self.action), buffer: Rc::clone(&self.buffer) }
    }
}

impl<T> Logger<T> {
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)])>) -> Self {
        Logger { time, action: Rc::new(action), buffer: Rc::new(RefCell::new(Vec::with_capacity(1024))) }
    }

    /// Buffers one event, flushing automatically once capacity is reached.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Forces a flush regardless of buffer occupancy.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn logger_flushes_when_capacity_is_reached() {
        let flushed = Rc::new(Cell::new(0usize));
        let flushed_clone = Rc::clone(&flushed);
        let logger = Logger::<u32>::new(
            Instant::now(),
            Box::new(move |_now, batch| flushed_clone.set(flushed_clone.get() + batch.len())),
        );
        for i in 0..1024u32 {
            logger.log(i);
        }
        assert_eq!(flushed.get(), 1024);
    }

    #[test]
    fn registry_lookup_round_trips_a_logger() {
        let mut registry = Registry::new(Instant::now());
        registry.insert::<u32>("events", Box::new(|_now, _batch| {}));
        assert!(registry.get::<u32>("events").is_some());
        assert!(registry.get::<u32>("missing").is_none());
    }
}
