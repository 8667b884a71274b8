//! Ingest command for feeding browser events through an engine policy.
//!
//! Reads one JSON object per line from stdin. The `kind` field selects the
//! policy operation; the remaining fields form the tab event:
//!
//! ```text
//! {"kind":"activated","url":"https://a.com","tab_id":"1","window_id":"1"}
//! {"kind":"visibility","visible":false,"url":"https://a.com","tab_id":"1","window_id":"1"}
//! {"kind":"tracking","enabled":false}
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Deserialize;

use tc_core::{Engine, EnginePolicy, Outcome, SharedTracker, StoreClosed, TabEvent, Tracker};
use tc_db::Database;

use crate::Config;

/// One line of ingest input.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestRecord {
    Activated {
        #[serde(flatten)]
        event: TabEvent,
    },
    Updated {
        #[serde(flatten)]
        event: TabEvent,
    },
    Visibility {
        visible: bool,
        #[serde(flatten)]
        event: TabEvent,
    },
    Focus {
        focused: bool,
        #[serde(flatten)]
        event: TabEvent,
    },
    Tracking {
        enabled: bool,
    },
}

impl IngestRecord {
    fn dispatch(&self, policy: &EnginePolicy<Database>) -> Result<Outcome, StoreClosed> {
        match self {
            Self::Activated { event } => policy.on_tab_activated(event),
            Self::Updated { event } => policy.on_tab_updated(event),
            Self::Visibility { visible, event } => policy.on_visibility_changed(event, *visible),
            Self::Focus { focused, event } => policy.on_window_focus_changed(event, *focused),
            Self::Tracking { enabled } => policy.set_tracking(*enabled),
        }
    }
}

/// Counts of how each input line was handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub malformed: usize,
}

/// Returns the path to the lock file guarding the tracker snapshot.
fn lock_path(snapshot_path: &Path) -> PathBuf {
    let mut path = snapshot_path.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

/// Tracker over the configured database, plus the lock file that guards its
/// snapshot. The lock is held until the returned `File` is dropped.
pub(crate) fn open_tracker(config: &Config) -> Result<(File, SharedTracker<Database>)> {
    let snapshots = config.snapshot_store();
    if let Some(parent) = snapshots.path().parent() {
        fs::create_dir_all(parent).context("failed to create snapshot directory")?;
    }
    let lock_file: File = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(snapshots.path()))
        .context("failed to open lock file")?;
    lock_file
        .lock_exclusive()
        .context("failed to acquire lock")?;

    let db = Database::open(&config.database_path, config.platform)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((lock_file, Tracker::new(db, snapshots).into_shared()))
}

/// Runs the ingest command.
///
/// Holds an exclusive lock for the whole run so concurrent ingest processes
/// take turns on the same tracker state.
pub fn run<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    config: &Config,
    engine: Engine,
    grant_permission: bool,
) -> Result<IngestSummary> {
    let (lock_file, tracker) = open_tracker(config)?;
    let mut policy = EnginePolicy::new(engine, config.platform, tracker);
    if grant_permission {
        policy.set_permission(true);
    }

    let summary = ingest_lines(reader, &policy)?;
    writeln!(
        writer,
        "accepted: {}, rejected: {}, failed: {}, malformed: {}",
        summary.accepted, summary.rejected, summary.failed, summary.malformed
    )?;

    // Lock is released when lock_file is dropped
    drop(lock_file);
    Ok(summary)
}

fn ingest_lines<R: BufRead>(reader: R, policy: &EnginePolicy<Database>) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read event line")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping malformed event");
                summary.malformed += 1;
                continue;
            }
        };
        match record.dispatch(policy)? {
            Outcome::Accepted => summary.accepted += 1,
            Outcome::Rejected(_) => summary.rejected += 1,
            Outcome::PersistFailed => summary.failed += 1,
        }
    }
    Ok(summary)
}
