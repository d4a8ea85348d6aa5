// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Rendezvous primitives shared with the component callback thread.

use crate::{
    component::State,
    error::{Error, ErrorCode, Result},
};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a semaphore wait.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wake {
    Signaled,
    TimedOut,
    Interrupted,
}

struct Count {
    value: usize,
    interrupted: bool,
}

/// Counting semaphore that can be interrupted by a fatal error.
///
/// Once interrupted every pending and future `down` returns
/// [`Wake::Interrupted`] until [`Semaphore::reset`].
pub struct Semaphore {
    count: Mutex<Count>,
    cond: Condvar,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    pub fn new() -> Self {
        Semaphore {
            count: Mutex::new(Count {
                value: 0,
                interrupted: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn up(&self) {
        let mut count = self.count.lock();
        count.value += 1;
        self.cond.notify_one();
    }

    pub fn down(&self, timeout: Option<Duration>) -> Wake {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut count = self.count.lock();
        loop {
            if count.interrupted {
                return Wake::Interrupted;
            }
            if count.value > 0 {
                count.value -= 1;
                return Wake::Signaled;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut count, deadline).timed_out() {
                        return match count.value {
                            0 => Wake::TimedOut,
                            _ => {
                                count.value -= 1;
                                Wake::Signaled
                            }
                        };
                    }
                }
                None => self.cond.wait(&mut count),
            }
        }
    }

    pub fn interrupt(&self) {
        let mut count = self.count.lock();
        count.interrupted = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        let mut count = self.count.lock();
        count.value = 0;
        count.interrupted = false;
    }
}

struct Status {
    state: State,
    error: Option<ErrorCode>,
}

/// Component state plus the sticky error, guarded by one mutex so a waiter
/// sees both consistently.
pub struct StateCell {
    status: Mutex<Status>,
    cond: Condvar,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        StateCell {
            status: Mutex::new(Status {
                state: State::Invalid,
                error: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn get(&self) -> State {
        self.status.lock().state
    }

    pub fn set(&self, state: State) {
        let mut status = self.status.lock();
        status.state = state;
        self.cond.notify_all();
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.status.lock().error
    }

    /// Records a sticky error and wakes every state waiter. The first error
    /// wins.
    pub fn set_error(&self, code: ErrorCode) {
        let mut status = self.status.lock();
        status.error.get_or_insert(code);
        self.cond.notify_all();
    }

    pub fn clear_error(&self) {
        self.status.lock().error = None;
    }

    /// Waits until the state equals `target`, a sticky error is raised, or
    /// `timeout` elapses. `None` waits forever.
    pub fn wait_for(&self, target: State, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut status = self.status.lock();
        loop {
            if let Some(code) = status.error {
                return Err(Error::Component(code));
            }
            if status.state == target {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut status, deadline).timed_out() {
                        if let Some(code) = status.error {
                            return Err(Error::Component(code));
                        }
                        if status.state == target {
                            return Ok(());
                        }
                        return Err(Error::StateTimeout {
                            expected: target,
                            actual: status.state,
                        });
                    }
                }
                None => self.cond.wait(&mut status),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn semaphore_counts() {
        let sem = Semaphore::new();
        sem.up();
        sem.up();
        assert_eq!(sem.down(Some(Duration::ZERO)), Wake::Signaled);
        assert_eq!(sem.down(None), Wake::Signaled);
        assert_eq!(sem.down(Some(Duration::from_millis(5))), Wake::TimedOut);
    }

    #[test]
    fn semaphore_interrupt() {
        let sem = Arc::new(Semaphore::new());
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.down(None))
        };
        thread::sleep(Duration::from_millis(10));
        sem.interrupt();
        assert_eq!(waiter.join().ok(), Some(Wake::Interrupted));
        sem.reset();
        sem.up();
        assert_eq!(sem.down(None), Wake::Signaled);
    }

    #[test]
    fn state_wait_times_out() {
        let cell = StateCell::new();
        cell.set(State::Loaded);
        match cell.wait_for(State::Idle, Some(Duration::from_millis(5))) {
            Err(Error::StateTimeout { expected, actual }) => {
                assert_eq!(expected, State::Idle);
                assert_eq!(actual, State::Loaded);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn error_unblocks_state_wait() {
        let cell = Arc::new(StateCell::new());
        let waiter = {
            let cell = cell.clone();
            thread::spawn(move || cell.wait_for(State::Executing, None))
        };
        thread::sleep(Duration::from_millis(10));
        cell.set_error(ErrorCode::HARDWARE);
        cell.set_error(ErrorCode::UNDEFINED);
        match waiter.join() {
            Ok(Err(Error::Component(code))) => assert_eq!(code, ErrorCode::HARDWARE),
            _ => panic!("waiter did not observe the error"),
        }
    }
}
