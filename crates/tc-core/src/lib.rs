//! Core domain logic for tab time tracking.
//!
//! This crate contains:
//! - Tracker: the state machine that keeps a single active surface and closes intervals
//! - Policy: per-engine eligibility and identity rules applied before the tracker
//! - Snapshot: crash-recovery persistence of in-flight entries

pub mod policy;
pub mod snapshot;
#[cfg(test)]
mod testing;
pub mod tracker;
mod types;

pub use policy::{ConsentProvider, EnginePolicy, GrantAll};
pub use snapshot::{SnapshotError, SnapshotStore, TrackerSnapshot};
pub use tracker::{
    Clock, IntervalSink, Outcome, Rejection, SharedTracker, StoreClosed, SystemClock, Tracker,
};
pub use types::{ActiveEntry, Engine, EngineTag, IndexProfile, Interval, PlatformTag, TabEvent};
