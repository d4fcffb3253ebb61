//! Counter of in-flight background contexts.
//!
//! Every detached worker (loader, saver, request perform) is announced with
//! [`AsyncContextCounter::add`] before it is spawned and released by an
//! [`AsyncContextGuard`] when it finishes. Shutdown blocks in
//! [`AsyncContextCounter::wait_async_contexts_finish`] until the counter
//! drains.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct AsyncContextCounter {
    count: Mutex<usize>,
    drained: Condvar,
}

impl AsyncContextCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce one in-flight context. Call before spawning the worker so a
    /// concurrent shutdown cannot miss it.
    pub fn add(&self) {
        *self.count.lock().expect("async counter poisoned") += 1;
    }

    /// Release one context.
    pub fn release(&self) {
        let mut count = self.count.lock().expect("async counter poisoned");
        debug_assert!(*count > 0, "async context released more than announced");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Block until every announced context has been released.
    pub fn wait_async_contexts_finish(&self) {
        let mut count = self.count.lock().expect("async counter poisoned");
        while *count > 0 {
            count = self
                .drained
                .wait(count)
                .expect("async counter poisoned");
        }
    }
}

/// Releases one context on drop; runs inside the worker so the release
/// happens on every exit path.
pub struct AsyncContextGuard<'a> {
    counter: &'a AsyncContextCounter,
}

impl<'a> AsyncContextGuard<'a> {
    pub fn new(counter: &'a AsyncContextCounter) -> Self {
        AsyncContextGuard { counter }
    }
}

impl Drop for AsyncContextGuard<'_> {
    fn drop(&mut self) {
        self.counter.release();
    }
}
