//! Session budget for sequential batch runs.
//!
//! The budget is checked before each work item, never mid-item.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SessionBudget {
    max_items: Option<usize>,
    max_duration: Option<Duration>,
    started: Instant,
    processed: usize,
}

impl SessionBudget {
    pub fn new(max_items: Option<usize>, max_duration: Option<Duration>) -> Self {
        Self {
            max_items,
            max_duration,
            started: Instant::now(),
            processed: 0,
        }
    }

    pub fn record_item(&mut self) {
        self.processed += 1;
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Why the next item may not start, if the budget is spent.
    pub fn exhausted_reason(&self) -> Option<String> {
        if let Some(max) = self.max_items
            && self.processed >= max
        {
            return Some(format!("processed {} of {} items", self.processed, max));
        }
        if let Some(max) = self.max_duration
            && self.started.elapsed() >= max
        {
            return Some(format!("ran for {}s of {}s", self.started.elapsed().as_secs(), max.as_secs()));
        }
        None
    }
}
