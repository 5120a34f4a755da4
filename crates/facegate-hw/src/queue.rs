//! Bounded hand-off between a producer thread and the gating loop.
//!
//! The producer never blocks: when the queue is full the oldest frame is
//! evicted. The consumer drains whatever has accumulated and keeps only the
//! newest frame, so processing latency never compounds.

use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub struct LatestFrameQueue {
    capacity: usize,
    state: Mutex<State>,
    ready: Condvar,
}

struct State {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// Outcome of [`LatestFrameQueue::take_latest`].
#[derive(Debug)]
pub enum Take {
    /// Newest frame plus how many older frames were discarded for it.
    Frame { frame: Frame, discarded: usize },
    TimedOut,
    Closed,
}

impl LatestFrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                frames: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue a frame, evicting the oldest when full. Returns whether a frame was evicted.
    pub fn push(&self, frame: Frame) -> bool {
        let mut state = self.lock();
        let evicted = if state.frames.len() >= self.capacity {
            state.frames.pop_front();
            true
        } else {
            false
        };
        state.frames.push_back(frame);
        drop(state);
        self.ready.notify_one();
        evicted
    }

    /// Wait up to `timeout` for a frame, then take at most `drain_max` queued
    /// frames and return the newest of them.
    pub fn take_latest(&self, drain_max: usize, timeout: Duration) -> Take {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.frames.is_empty() {
            if state.closed {
                return Take::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Take::TimedOut;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let take = drain_max.max(1).min(state.frames.len());
        let mut drained = state.frames.drain(..take);
        let mut discarded = 0;
        let mut latest = drained.next();
        for frame in drained {
            latest = Some(frame);
            discarded += 1;
        }
        match latest {
            Some(frame) => Take::Frame { frame, discarded },
            None => Take::TimedOut,
        }
    }

    /// Wake any waiter and make further takes on an empty queue return [`Take::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
