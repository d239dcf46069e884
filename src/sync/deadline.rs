//! Run deadlines
//!
//! A run is cut short before the host's execution limit so the last flush and
//! checkpoint still fit. The deadline is consulted only between work units:
//! once before each collection and once before each plan.

use std::time::{Duration, Instant};

/// Where the run is about to start work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPosition {
    pub collection_index: usize,
    /// `None` when checking before a collection's plans are listed.
    pub item_index: Option<usize>,
}

impl WorkPosition {
    pub fn collection(collection_index: usize) -> Self {
        Self {
            collection_index,
            item_index: None,
        }
    }

    pub fn item(collection_index: usize, item_index: usize) -> Self {
        Self {
            collection_index,
            item_index: Some(item_index),
        }
    }
}

pub trait RunDeadline: Send + Sync {
    /// Whether work at `position` must not be started.
    fn is_expired(&self, position: WorkPosition) -> bool;
}

/// Wall-clock deadline measured from run start.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionDeadline {
    started: Instant,
    budget: Duration,
}

impl ExecutionDeadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }
}

impl RunDeadline for ExecutionDeadline {
    fn is_expired(&self, _position: WorkPosition) -> bool {
        self.started.elapsed() >= self.budget
    }
}
