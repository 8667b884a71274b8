//! Storage layer for closed activity intervals.
//!
//! Provides the durable, queryable interval log using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization.
//!
//! Several `Database` instances may write to the same file at once (for
//! example one per browser profile). The connection runs in WAL mode with a
//! busy timeout, so concurrent writers queue on the write lock instead of
//! failing, and readers never block writers.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond
//! precision (e.g., `2024-01-15T10:30:00.000Z`). The fixed width keeps
//! lexicographic ordering identical to chronological ordering, which range
//! queries and retention rely on.
//!
//! ## Indexes
//!
//! Desktop stores index `url` and `(start_time, end_time)`. Mobile and tablet
//! stores keep a single `start_time` index to reduce write overhead. Both
//! layouts answer the same queries.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use thiserror::Error;

use tc_core::{EngineTag, IndexProfile, Interval, IntervalSink, PlatformTag, StoreClosed};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The database was used after `close`.
    #[error(transparent)]
    Closed(#[from] StoreClosed),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for interval {id}: {timestamp}")]
    TimestampParse {
        id: i64,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored tag column holds an unknown value.
    #[error("invalid {column} for interval {id}: {value}")]
    InvalidTag {
        id: i64,
        column: &'static str,
        value: String,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Option<Connection>,
    platform: PlatformTag,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema and the platform's index layout are initialized on open.
    pub fn open(path: &Path, platform: PlatformTag) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000; PRAGMA journal_mode=WAL;")?;
        Self::init(conn, platform)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory(platform: PlatformTag) -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, platform)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(conn: Connection, platform: PlatformTag) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            -- start_time/end_time/created_at: ISO 8601 UTC with milliseconds
            -- platform_type/engine_type: wire names of PlatformTag/EngineTag
            CREATE TABLE IF NOT EXISTS intervals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_ms INTEGER NOT NULL CHECK (duration_ms >= 0),
                platform_type TEXT NOT NULL,
                engine_type TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )?;
        match platform.index_profile() {
            IndexProfile::Full => conn.execute_batch(
                "
                CREATE INDEX IF NOT EXISTS idx_intervals_url ON intervals(url);
                CREATE INDEX IF NOT EXISTS idx_intervals_times ON intervals(start_time, end_time);
                ",
            )?,
            IndexProfile::Minimal => conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_intervals_start ON intervals(start_time);",
            )?,
        }
        Ok(Self {
            conn: Some(conn),
            platform,
        })
    }

    pub const fn platform(&self) -> PlatformTag {
        self.platform
    }

    pub const fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn conn(&self) -> Result<&Connection, StoreClosed> {
        self.conn.as_ref().ok_or(StoreClosed)
    }

    /// Writes one interval.
    ///
    /// Write failures are logged and reported as `Ok(false)`.
    pub fn append(&self, interval: &Interval) -> Result<bool, StoreClosed> {
        let conn = self.conn()?;
        match insert_interval(conn, interval) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!(error = %e, url = %interval.url, "failed to store interval");
                Ok(false)
            }
        }
    }

    /// Lists intervals that lie entirely within `[start, end]`, newest first.
    ///
    /// Rows that fail to decode are logged and skipped. Query failures are
    /// logged and yield an empty list.
    pub fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Interval>, StoreClosed> {
        let conn = self.conn()?;
        match select_intervals(conn, start, end) {
            Ok(intervals) => Ok(intervals),
            Err(e) => {
                tracing::error!(error = %e, "failed to query intervals");
                Ok(Vec::new())
            }
        }
    }

    /// Deletes intervals older than the platform's retention window.
    ///
    /// Returns the number of rows removed. Failures are logged and count as
    /// zero rows.
    pub fn apply_retention(&self, platform: PlatformTag) -> Result<usize, StoreClosed> {
        self.apply_retention_at(platform, Utc::now())
    }

    /// Retention relative to an explicit `now`.
    pub fn apply_retention_at(
        &self,
        platform: PlatformTag,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreClosed> {
        let conn = self.conn()?;
        let cutoff = now - platform.retention_window();
        match conn.execute(
            "DELETE FROM intervals WHERE start_time < ?",
            [format_timestamp(cutoff)],
        ) {
            Ok(deleted) => {
                tracing::info!(%platform, cutoff = %cutoff, deleted, "applied retention");
                Ok(deleted)
            }
            Err(e) => {
                tracing::error!(error = %e, %platform, "failed to apply retention");
                Ok(0)
            }
        }
    }

    /// Number of stored intervals.
    pub fn count(&self) -> Result<i64, DbError> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM intervals", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Closes the connection. Later operations return [`StoreClosed`].
    ///
    /// Closing twice is harmless.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::error!(error = %e, "database did not close cleanly");
            }
        }
    }
}

impl IntervalSink for Database {
    fn append(&self, interval: &Interval) -> Result<bool, StoreClosed> {
        Self::append(self, interval)
    }
}

fn insert_interval(conn: &Connection, interval: &Interval) -> Result<(), DbError> {
    conn.execute(
        "
        INSERT INTO intervals
        (url, start_time, end_time, duration_ms, platform_type, engine_type, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
        params![
            interval.url,
            format_timestamp(interval.start_time),
            format_timestamp(interval.end_time),
            interval.duration_ms,
            interval.platform_tag.as_str(),
            interval.engine_tag.as_str(),
            interval.is_active,
        ],
    )?;
    Ok(())
}

#[derive(Debug)]
struct IntervalRow {
    id: i64,
    url: String,
    start_time: String,
    end_time: String,
    duration_ms: i64,
    platform_type: String,
    engine_type: String,
    is_active: bool,
}

impl IntervalRow {
    fn into_interval(self) -> Result<Interval, DbError> {
        let platform_tag: PlatformTag =
            self.platform_type
                .parse()
                .map_err(|_| DbError::InvalidTag {
                    id: self.id,
                    column: "platform_type",
                    value: self.platform_type.clone(),
                })?;
        let engine_tag: EngineTag = self
            .engine_type
            .parse()
            .map_err(|_| DbError::InvalidTag {
                id: self.id,
                column: "engine_type",
                value: self.engine_type.clone(),
            })?;
        Ok(Interval {
            start_time: parse_timestamp(&self.start_time, self.id)?,
            end_time: parse_timestamp(&self.end_time, self.id)?,
            url: self.url,
            duration_ms: self.duration_ms,
            platform_tag,
            engine_tag,
            is_active: self.is_active,
        })
    }
}

fn select_intervals(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Interval>, DbError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, url, start_time, end_time, duration_ms, platform_type, engine_type, is_active
        FROM intervals
        WHERE start_time >= ? AND end_time <= ?
        ORDER BY start_time DESC, id DESC
        ",
    )?;
    let rows = stmt.query_map([format_timestamp(start), format_timestamp(end)], |row| {
        Ok(IntervalRow {
            id: row.get(0)?,
            url: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            duration_ms: row.get(4)?,
            platform_type: row.get(5)?,
            engine_type: row.get(6)?,
            is_active: row.get(7)?,
        })
    })?;
    let mut intervals = Vec::new();
    for row in rows {
        match row?.into_interval() {
            Ok(interval) => intervals.push(interval),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable interval row"),
        }
    }
    Ok(intervals)
}

fn parse_timestamp(timestamp: &str, id: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            id,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
