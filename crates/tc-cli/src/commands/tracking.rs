//! Pause and resume commands.

use std::io::Write;

use anyhow::{Result, bail};
use tc_core::Outcome;

use crate::Config;

use super::ingest::open_tracker;

pub fn run<W: Write>(writer: &mut W, config: &Config, enabled: bool) -> Result<()> {
    let (lock_file, tracker) = open_tracker(config)?;
    let outcome = tracker
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .set_paused(!enabled)?;
    drop(lock_file);

    if outcome == Outcome::PersistFailed {
        bail!("tracking state changed but the open interval could not be stored");
    }
    if enabled {
        writeln!(writer, "Tracking resumed.")?;
    } else {
        writeln!(writer, "Tracking paused.")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tc_core::PlatformTag;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            database_path: dir.join("activity.db"),
            snapshot_path: None,
            platform: PlatformTag::Desktop,
        }
    }

    #[test]
    fn pause_then_resume_round_trips_flag() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        let mut output = Vec::new();

        run(&mut output, &config, false).unwrap();
        assert!(config.snapshot_store().load().unwrap().unwrap().paused);

        run(&mut output, &config, true).unwrap();
        assert!(!config.snapshot_store().load().unwrap().unwrap().paused);

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Tracking paused.\nTracking resumed.\n"
        );
    }
}
