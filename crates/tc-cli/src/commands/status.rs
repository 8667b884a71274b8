//! Status command for showing stored totals and the active surface.

use std::io::Write;

use anyhow::Result;

use tc_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, db: &Database) -> Result<()> {
    writeln!(writer, "Tab time tracker status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Platform: {}", config.platform)?;
    writeln!(writer, "Intervals: {}", db.count()?)?;

    // Read the snapshot directly; constructing a tracker would rewrite it.
    match config.snapshot_store().load() {
        Ok(Some(snapshot)) => {
            if snapshot.paused {
                writeln!(writer, "Tracking paused.")?;
            }
            match snapshot.last_active {
                Some(entry) => writeln!(
                    writer,
                    "Active: {} {} ({}) since {}",
                    entry.tab_id,
                    entry.url,
                    entry.engine_tag,
                    entry.start_time.format("%Y-%m-%d %H:%M:%S")
                )?,
                None => writeln!(writer, "No active surface.")?,
            }
        }
        Ok(None) => writeln!(writer, "No active surface.")?,
        Err(e) => writeln!(writer, "Snapshot unreadable: {e}")?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use tc_core::{ActiveEntry, EngineTag, PlatformTag, TrackerSnapshot};

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            database_path: dir.join("activity.db"),
            snapshot_path: None,
            platform: PlatformTag::Desktop,
        }
    }

    fn render(config: &Config) -> String {
        let db = Database::open(&config.database_path, config.platform).unwrap();
        let mut output = Vec::new();
        run(&mut output, config, &db).unwrap();
        let output = String::from_utf8(output).unwrap();
        output.replace(&config.database_path.display().to_string(), "[TEMP]/activity.db")
    }

    #[test]
    fn status_command_shows_active_surface() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        let entry = ActiveEntry {
            tab_id: "tabB".to_string(),
            url: "https://b.com".to_string(),
            engine_tag: EngineTag::GeckoDesktop,
            platform_tag: PlatformTag::Desktop,
            start_time: Utc.with_ymd_and_hms(2025, 1, 1, 9, 1, 0).unwrap(),
        };
        let mut active_entries = BTreeMap::new();
        active_entries.insert(entry.tab_id.clone(), entry.clone());
        config
            .snapshot_store()
            .save(&TrackerSnapshot {
                active_entries,
                last_active: Some(entry),
                paused: false,
            })
            .unwrap();

        assert_snapshot!(render(&config), @r"
        Tab time tracker status
        Database: [TEMP]/activity.db
        Platform: desktop
        Intervals: 0
        Active: tabB https://b.com (gecko_desktop) since 2025-01-01 09:01:00
        ");
    }

    #[test]
    fn status_command_without_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());

        let output = render(&config);

        assert!(output.ends_with("No active surface.\n"));
    }

    #[test]
    fn status_command_reports_pause() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        config
            .snapshot_store()
            .save(&TrackerSnapshot {
                paused: true,
                ..TrackerSnapshot::default()
            })
            .unwrap();

        let output = render(&config);

        assert!(output.ends_with("Tracking paused.\nNo active surface.\n"));
    }

    #[test]
    fn status_command_reports_corrupt_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        std::fs::write(config.snapshot_store().path(), "corrupted data").unwrap();

        let output = render(&config);

        assert!(output.contains("Snapshot unreadable: corrupt snapshot"));
    }
}
