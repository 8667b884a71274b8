//! Prune command for applying the retention policy.

use std::io::Write;

use anyhow::Result;
use tc_core::PlatformTag;
use tc_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, platform: PlatformTag) -> Result<usize> {
    let deleted = db.apply_retention(platform)?;
    writeln!(
        writer,
        "Removed {deleted} intervals older than {} days ({platform})",
        platform.retention_window().num_days()
    )?;
    Ok(deleted)
}
