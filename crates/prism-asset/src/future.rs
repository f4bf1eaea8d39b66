//! Shared load futures.
//!
//! A [`LoadFuture`] is a clonable handle to one eventual value. Any number of
//! holders may wait on or poll the same future; the value is cloned out to
//! each of them.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct FutureState<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

/// Clonable condvar-backed future.
pub struct LoadFuture<T> {
    state: Arc<FutureState<T>>,
}

impl<T> Clone for LoadFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone> LoadFuture<T> {
    /// A future that has not been fulfilled yet.
    pub(crate) fn pending() -> Self {
        Self {
            state: Arc::new(FutureState {
                slot: Mutex::new(None),
                cond: Condvar::new(),
            }),
        }
    }

    /// A future that is already resolved.
    pub fn ready(value: T) -> Self {
        Self {
            state: Arc::new(FutureState {
                slot: Mutex::new(Some(value)),
                cond: Condvar::new(),
            }),
        }
    }

    /// Fulfill the future and wake all waiters. Fulfilling twice keeps the
    /// first value.
    pub(crate) fn fulfill(&self, value: T) {
        let mut slot = self.state.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.state.cond.notify_all();
        }
    }

    /// Block until the value is available and return a clone of it.
    pub fn wait(&self) -> T {
        let mut slot = self.state.slot.lock();
        while slot.is_none() {
            self.state.cond.wait(&mut slot);
        }
        slot.as_ref().cloned().expect("slot checked above")
    }

    /// Non-blocking check; returns a clone of the value if resolved.
    pub fn try_get(&self) -> Option<T> {
        self.state.slot.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ready_future_resolves_immediately() {
        let future = LoadFuture::ready(42u32);
        assert_eq!(future.try_get(), Some(42));
        assert_eq!(future.wait(), 42);
    }

    #[test]
    fn pending_future_blocks_until_fulfilled() {
        let future: LoadFuture<u32> = LoadFuture::pending();
        assert_eq!(future.try_get(), None);

        let producer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.fulfill(7);
        });

        assert_eq!(future.wait(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn clones_share_the_same_value() {
        let future: LoadFuture<String> = LoadFuture::pending();
        let a = future.clone();
        let b = future.clone();
        future.fulfill("done".to_string());
        assert_eq!(a.wait(), "done");
        assert_eq!(b.try_get(), Some("done".to_string()));
    }

    #[test]
    fn second_fulfill_is_ignored() {
        let future = LoadFuture::pending();
        future.fulfill(1u32);
        future.fulfill(2u32);
        assert_eq!(future.wait(), 1);
    }
}
