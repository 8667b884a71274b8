//! Query command for listing stored intervals.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use tc_db::Database;

use super::util::format_duration;

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let intervals = db.query(start, end)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&intervals)?)?;
        return Ok(());
    }

    if intervals.is_empty() {
        writeln!(writer, "No intervals recorded.")?;
        return Ok(());
    }

    let total_ms: i64 = intervals.iter().map(|i| i.duration_ms).sum();
    writeln!(
        writer,
        "{} intervals, {} active",
        intervals.len(),
        format_duration(total_ms)
    )?;
    for interval in &intervals {
        writeln!(
            writer,
            "{}  {:>7}  {:<16}  {}",
            interval.start_time.format("%Y-%m-%d %H:%M:%S"),
            format_duration(interval.duration_ms),
            interval.engine_tag.as_str(),
            interval.url
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};
    use insta::assert_snapshot;
    use tc_core::{EngineTag, Interval, PlatformTag};

    fn seeded_db() -> Database {
        let db = Database::open_in_memory(PlatformTag::Desktop).unwrap();
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        for (offset, secs, url, engine_tag) in [
            (0, 60, "https://a.com", EngineTag::ChromiumDesktop),
            (5, 185, "https://b.com/docs", EngineTag::GeckoDesktop),
        ] {
            let start = base + Duration::minutes(offset);
            db.append(&Interval {
                url: url.to_string(),
                start_time: start,
                end_time: start + Duration::seconds(secs),
                duration_ms: secs * 1000,
                platform_tag: PlatformTag::Desktop,
                engine_tag,
                is_active: false,
            })
            .unwrap();
        }
        db
    }

    fn range() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn query_command_lists_intervals_newest_first() {
        let db = seeded_db();
        let (start, end) = range();
        let mut output = Vec::new();

        run(&mut output, &db, start, end, false).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        2 intervals, 4m 05s active
        2025-01-01 09:05:00   3m 05s  gecko_desktop     https://b.com/docs
        2025-01-01 09:00:00   1m 00s  chromium_desktop  https://a.com
        ");
    }

    #[test]
    fn query_command_reports_empty_range() {
        let db = Database::open_in_memory(PlatformTag::Desktop).unwrap();
        let (start, end) = range();
        let mut output = Vec::new();

        run(&mut output, &db, start, end, false).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "No intervals recorded.\n");
    }

    #[test]
    fn query_command_emits_json() {
        let db = seeded_db();
        let (start, end) = range();
        let mut output = Vec::new();

        run(&mut output, &db, start, end, true).unwrap();

        let parsed: Vec<Interval> = serde_json::from_slice(&output).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].url, "https://b.com/docs");
        assert_eq!(parsed[1].engine_tag, EngineTag::ChromiumDesktop);
    }
}
