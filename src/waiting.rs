//! Waiting list of idle workers.
//!
//! Workers that ask for work while the queue is empty park here instead of
//! being torn down. They are woken strictly in arrival order.

use std::collections::VecDeque;
use std::fmt;

/// Pool-local worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// FIFO of parked workers.
#[derive(Debug, Default)]
pub struct WaitingList {
    parked: VecDeque<WorkerId>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a worker. Parking an already-parked worker keeps its place.
    pub fn push(&mut self, id: WorkerId) {
        if !self.parked.contains(&id) {
            self.parked.push_back(id);
        }
    }

    pub fn pop_longest_waiting(&mut self) -> Option<WorkerId> {
        self.parked.pop_front()
    }

    /// Drop a worker that died while parked.
    pub fn remove(&mut self, id: WorkerId) -> bool {
        match self.parked.iter().position(|w| *w == id) {
            Some(idx) => {
                self.parked.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.parked.clear();
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
