//! Test doubles for the clock and interval sink.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::tracker::{Clock, IntervalSink, StoreClosed};
use crate::types::Interval;

#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        Self(Arc::new(Mutex::new(start)))
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug, Default)]
struct SinkState {
    intervals: Vec<Interval>,
    failing: bool,
    closed: bool,
}

/// Records appended intervals in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<SinkState>>);

impl MemorySink {
    pub fn intervals(&self) -> Vec<Interval> {
        self.0.lock().unwrap().intervals.clone()
    }

    pub fn fail_writes(&self) {
        self.0.lock().unwrap().failing = true;
    }

    pub fn close(&self) {
        self.0.lock().unwrap().closed = true;
    }
}

impl IntervalSink for MemorySink {
    fn append(&self, interval: &Interval) -> Result<bool, StoreClosed> {
        let mut state = self.0.lock().unwrap();
        if state.closed {
            return Err(StoreClosed);
        }
        if state.failing {
            return Ok(false);
        }
        state.intervals.push(interval.clone());
        Ok(true)
    }
}
