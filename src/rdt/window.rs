use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::debug;

/// Sender-side flow control: a nominal capacity and a live count of the
/// bytes still allowed in flight. Writers that grow the count wake one
/// sender parked on the empty window.
#[derive(Debug)]
pub struct Window {
    state: Mutex<State>,
    nonempty: Condvar,
}

#[derive(Debug)]
struct State {
    capacity: i64,
    remaining: i64,
}

impl Window {
    pub fn new(capacity: u32) -> Window {
        Window {
            state: Mutex::new(State {
                capacity: i64::from(capacity),
                remaining: i64::from(capacity),
            }),
            nonempty: Condvar::new(),
        }
    }

    /// Accounts for `n` payload bytes put in flight.
    pub fn decrease(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.remaining -= n as i64;
        debug!(remaining = state.remaining, "window decrease");
    }

    /// Accounts for `n` bytes newly acknowledged by the peer.
    pub fn increase(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.remaining += i64::from(n);
        debug!(remaining = state.remaining, "window increase");
        self.nonempty.notify_one();
    }

    /// Reopens the window to its full capacity, optionally replacing the
    /// capacity first. Used on rollback and when the mode is configured.
    pub fn reset(&self, capacity: Option<u32>) {
        let mut state = self.state.lock().unwrap();
        if let Some(capacity) = capacity {
            state.capacity = i64::from(capacity);
        }
        state.remaining = state.capacity;
        debug!(remaining = state.remaining, "window reset");
        self.nonempty.notify_one();
    }

    pub fn size(&self) -> i64 {
        self.state.lock().unwrap().remaining
    }

    /// Parks the caller until the window grows or `timeout` elapses.
    pub fn wait_until_non_empty(&self, timeout: Duration) {
        let state = self.state.lock().unwrap();
        let _state = self
            .nonempty
            .wait_timeout_while(state, timeout, |state| state.remaining <= 0)
            .unwrap();
    }
}
