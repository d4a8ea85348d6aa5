// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};
use tracing::error;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    enabled: bool,
}

/// FIFO handing buffer headers between the completion callback and the
/// pipeline threads.
///
/// The queue is sized for a port's buffer pool so pushes never block; the
/// callback thread must not be stalled by a slow consumer. Disabling the
/// queue wakes every blocked consumer, which then observes `None`.
///
/// # Example
///
/// ```
/// use edgefirst_omx::queue::BoundedQueue;
///
/// let queue = BoundedQueue::new(2);
/// queue.push(7);
/// assert_eq!(queue.pop(), Some(7));
///
/// queue.disable();
/// assert_eq!(queue.pop(), None);
/// ```
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                enabled: true,
            }),
            cond: Condvar::new(),
        }
    }

    /// Updates the expected bound after the owning pool was resized.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        let additional = capacity.saturating_sub(inner.items.len());
        inner.items.reserve(additional);
    }

    /// Appends an item and wakes one waiting consumer.
    ///
    /// Exceeding the capacity means a header was accounted twice; the item
    /// is still queued so nothing is lost, but the violation is logged.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.items.len() >= inner.capacity {
            error!(
                "queue over capacity: {} items, capacity {}",
                inner.items.len() + 1,
                inner.capacity
            );
            debug_assert!(inner.items.len() < inner.capacity, "queue over capacity");
        }
        inner.items.push_back(item);
        self.cond.notify_one();
    }

    /// Blocks until an item is available or the queue is disabled.
    pub fn pop(&self) -> Option<T> {
        self.pop_full(true, false)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.pop_full(false, false)
    }

    /// Pops with explicit blocking and disabled-state handling.
    ///
    /// With `ignore_disabled` items are returned even while the queue is
    /// disabled.
    pub fn pop_full(&self, block: bool, ignore_disabled: bool) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if !inner.enabled && !ignore_disabled {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if !block {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Blocks for at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if !inner.enabled {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                if !inner.enabled {
                    return None;
                }
                return inner.items.pop_front();
            }
        }
    }

    pub fn enable(&self) {
        self.inner.lock().enabled = true;
    }

    /// Disables the queue and wakes all consumers.
    pub fn disable(&self) {
        let mut inner = self.inner.lock();
        inner.enabled = false;
        self.cond.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Removes every queued item regardless of the enabled state.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn fifo_order() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.push(i);
        }
        let popped: Vec<_> = (0..4).filter_map(|_| queue.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3]);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn disable_wakes_blocked_pop() {
        let queue = Arc::new(BoundedQueue::<u32>::new(1));
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.disable();
        assert_eq!(waiter.join().ok().flatten(), None);
    }

    #[test]
    fn drain_ignores_disabled() {
        let queue = BoundedQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.disable();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop_full(false, true), Some(1));
        assert_eq!(queue.drain(), vec![2]);
    }

    #[test]
    fn timed_pop_expires() {
        let queue = BoundedQueue::<u8>::new(1);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
