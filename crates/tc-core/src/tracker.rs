//! The activity state machine.
//!
//! Each tracked tab is either idle (absent from `active_entries`) or active
//! (present). `last_active` designates at most one active entry: the single
//! surface currently in focus. Activating a different surface first closes
//! the previous one, and every close turns an entry into an [`Interval`]
//! handed to the [`IntervalSink`].
//!
//! # Thread Safety
//!
//! All transitions take `&mut self`. Share a tracker between policies with
//! [`SharedTracker`], which serializes callers behind one mutex so a read of
//! `last_active` can never interleave with another caller's write.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::snapshot::{SnapshotStore, TrackerSnapshot};
use crate::types::{ActiveEntry, EngineTag, Interval, PlatformTag, TabEvent};

/// Returned when an interval store is used after `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interval store is closed")]
pub struct StoreClosed;

/// Destination for closed intervals.
pub trait IntervalSink {
    /// Persists one interval.
    ///
    /// Returns `Ok(false)` when the write failed and was logged, and
    /// `Err(StoreClosed)` when the sink has already been closed.
    fn append(&self, interval: &Interval) -> Result<bool, StoreClosed>;
}

/// Source of the current time.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why an event was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingField(&'static str),
    Incognito,
    PrivateContainer,
    PrivateBrowsing,
    ConsentMissing,
    UnchangedUrl,
    UntrackableUrl,
    Paused,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::Incognito => f.write_str("incognito tab"),
            Self::PrivateContainer => f.write_str("private container tab"),
            Self::PrivateBrowsing => f.write_str("private browsing"),
            Self::ConsentMissing => f.write_str("no tracking consent for domain"),
            Self::UnchangedUrl => f.write_str("url unchanged for tab"),
            Self::UntrackableUrl => f.write_str("browser-internal url"),
            Self::Paused => f.write_str("tracking paused"),
        }
    }
}

/// Result of feeding one event through the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected(Rejection),
    /// The transition happened but the closed interval could not be stored.
    PersistFailed,
}

impl Outcome {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Tracker state shared between engine policies.
pub type SharedTracker<S> = Arc<Mutex<Tracker<S>>>;

/// Owner of the active-surface state and its crash-recovery snapshot.
pub struct Tracker<S> {
    sink: S,
    snapshots: SnapshotStore,
    clock: Box<dyn Clock>,
    active_entries: BTreeMap<String, ActiveEntry>,
    last_active: Option<String>,
    paused: bool,
}

impl<S: IntervalSink> Tracker<S> {
    /// Creates a tracker, restoring in-flight state from `snapshots`.
    pub fn new(sink: S, snapshots: SnapshotStore) -> Self {
        Self::with_clock(sink, snapshots, Box::new(SystemClock))
    }

    /// Creates a tracker with an explicit time source.
    ///
    /// A missing snapshot starts empty. An unreadable one is logged and also
    /// starts empty: only the interval that was open at crash time is lost.
    pub fn with_clock(sink: S, snapshots: SnapshotStore, clock: Box<dyn Clock>) -> Self {
        let restored = match snapshots.load() {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    path = %snapshots.path().display(),
                    entries = snapshot.active_entries.len(),
                    "restored tracker snapshot"
                );
                snapshot
            }
            Ok(None) => {
                tracing::debug!(path = %snapshots.path().display(), "no tracker snapshot, starting fresh");
                TrackerSnapshot::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable tracker snapshot");
                TrackerSnapshot::default()
            }
        };

        let TrackerSnapshot {
            mut active_entries,
            last_active,
            paused,
        } = restored;
        let last_active = last_active.and_then(|entry| {
            if active_entries.contains_key(&entry.tab_id) {
                Some(entry.tab_id)
            } else {
                tracing::warn!(tab_id = %entry.tab_id, "snapshot last_active has no active entry, dropping");
                None
            }
        });
        // Only the focused surface may stay open; any other entry would
        // never be closed by a later activation and would overlap it.
        active_entries.retain(|tab_id, entry| {
            let keep = last_active.as_deref() == Some(tab_id.as_str());
            if !keep {
                tracing::warn!(tab_id, url = %entry.url, "dropping snapshot entry that is not the active surface");
            }
            keep
        });

        Self {
            sink,
            snapshots,
            clock,
            active_entries,
            last_active,
            paused,
        }
    }

    /// Wraps the tracker for sharing between policies.
    pub fn into_shared(self) -> SharedTracker<S> {
        Arc::new(Mutex::new(self))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn active_entries(&self) -> &BTreeMap<String, ActiveEntry> {
        &self.active_entries
    }

    pub fn entry(&self, tab_id: &str) -> Option<&ActiveEntry> {
        self.active_entries.get(tab_id)
    }

    /// The single surface currently in focus, if any.
    pub fn last_active(&self) -> Option<&ActiveEntry> {
        self.last_active
            .as_deref()
            .and_then(|tab_id| self.active_entries.get(tab_id))
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Current state in persistable form.
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            active_entries: self.active_entries.clone(),
            last_active: self.last_active().cloned(),
            paused: self.paused,
        }
    }

    /// Pauses or resumes tracking.
    ///
    /// Pausing closes the active surface at the current time. While paused,
    /// every activation is rejected. The flag survives restarts.
    pub fn set_paused(&mut self, paused: bool) -> Result<Outcome, StoreClosed> {
        if self.paused == paused {
            return Ok(Outcome::Accepted);
        }
        self.paused = paused;
        tracing::info!(paused, "tracking state changed");

        let mut written = true;
        if let Some(previous) = self.last_active.clone() {
            let now = self.clock.now();
            written = self.close(&previous, now)?;
        } else {
            self.persist();
        }
        if written {
            Ok(Outcome::Accepted)
        } else {
            Ok(Outcome::PersistFailed)
        }
    }

    /// Makes the event's tab the active surface.
    ///
    /// Requires `url`, `engine_tag`, `tab_id` and `window_id`; a missing field
    /// rejects the event without touching state. Re-activating the current
    /// surface with the same URL keeps its start time and emits nothing.
    pub fn activate(&mut self, event: &TabEvent) -> Result<Outcome, StoreClosed> {
        if self.paused {
            tracing::debug!("activation rejected while paused");
            return Ok(Outcome::Rejected(Rejection::Paused));
        }
        let (tab_id, url, engine_tag) = match validate(event) {
            Ok(fields) => fields,
            Err(rejection) => {
                tracing::debug!(reason = %rejection, "activation rejected");
                return Ok(Outcome::Rejected(rejection));
            }
        };

        if let Some(current) = self.last_active() {
            if current.tab_id == tab_id && current.url == url {
                tracing::trace!(tab_id, "tab already active");
                return Ok(Outcome::Accepted);
            }
        }

        let now = self.clock.now();
        if let Some(previous) = self.last_active.clone() {
            self.close(&previous, now)?;
        }

        let entry = ActiveEntry {
            tab_id: tab_id.to_string(),
            url: url.to_string(),
            engine_tag,
            platform_tag: event
                .platform_tag
                .unwrap_or_else(|| default_platform(engine_tag)),
            start_time: now,
        };
        tracing::debug!(tab_id, url, engine = %engine_tag, "tab activated");
        self.active_entries.insert(entry.tab_id.clone(), entry);
        self.last_active = Some(tab_id.to_string());
        self.persist();

        Ok(Outcome::Accepted)
    }

    /// Closes the tab's interval at `end_time`.
    ///
    /// Deactivating a tab that isn't active is a no-op.
    pub fn deactivate(
        &mut self,
        tab_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<Outcome, StoreClosed> {
        if !self.active_entries.contains_key(tab_id) {
            tracing::trace!(tab_id, "deactivate on idle tab");
            return Ok(Outcome::Accepted);
        }
        if self.close(tab_id, end_time)? {
            Ok(Outcome::Accepted)
        } else {
            Ok(Outcome::PersistFailed)
        }
    }

    /// Removes the entry, persists the snapshot, then appends the interval.
    ///
    /// The snapshot is written first so it never references a tab whose
    /// interval is already stored.
    fn close(&mut self, tab_id: &str, end_time: DateTime<Utc>) -> Result<bool, StoreClosed> {
        let Some(entry) = self.active_entries.remove(tab_id) else {
            return Ok(true);
        };
        if self.last_active.as_deref() == Some(tab_id) {
            self.last_active = None;
        }
        self.persist();

        let interval = Interval::close(&entry, end_time);
        let written = self.sink.append(&interval)?;
        if written {
            tracing::debug!(
                tab_id,
                url = %interval.url,
                duration_ms = interval.duration_ms,
                "interval closed"
            );
        } else {
            tracing::error!(tab_id, url = %interval.url, "closed interval was not stored");
        }
        Ok(written)
    }

    fn persist(&self) {
        if let Err(e) = self.snapshots.save(&self.snapshot()) {
            tracing::warn!(error = %e, "failed to persist tracker snapshot");
        }
    }
}

fn validate(event: &TabEvent) -> Result<(&str, &str, EngineTag), Rejection> {
    let url = event.url().ok_or(Rejection::MissingField("url"))?;
    let engine_tag = event
        .engine_tag
        .ok_or(Rejection::MissingField("engine_tag"))?;
    let tab_id = event.tab_id().ok_or(Rejection::MissingField("tab_id"))?;
    event
        .window_id()
        .ok_or(Rejection::MissingField("window_id"))?;
    Ok((tab_id, url, engine_tag))
}

const fn default_platform(engine_tag: EngineTag) -> PlatformTag {
    match engine_tag {
        EngineTag::ChromiumMobile | EngineTag::GeckoMobile | EngineTag::WebKitMobile => {
            PlatformTag::Mobile
        }
        EngineTag::ChromiumDesktop | EngineTag::GeckoDesktop | EngineTag::WebKitDesktop => {
            PlatformTag::Desktop
        }
    }
}
