//! Engine, platform, event and interval types shared across the workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Browser engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Chromium,
    Gecko,
    #[serde(rename = "webkit")]
    WebKit,
}

impl Engine {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Gecko => "gecko",
            Self::WebKit => "webkit",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Self::Chromium),
            "gecko" => Ok(Self::Gecko),
            "webkit" => Ok(Self::WebKit),
            _ => Err(format!("invalid engine: {s}")),
        }
    }
}

/// Form factor of the device the browser runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformTag {
    #[default]
    Desktop,
    Mobile,
    Tablet,
}

/// Index layout used by the interval store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexProfile {
    /// Indexes over `url` and `(start_time, end_time)`.
    Full,
    /// A single index over `start_time` to keep writes cheap.
    Minimal,
}

impl PlatformTag {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }

    /// Maximum age of an interval before retention deletes it.
    #[must_use]
    pub const fn retention_window(&self) -> Duration {
        match self {
            Self::Mobile => Duration::days(7),
            Self::Desktop | Self::Tablet => Duration::days(30),
        }
    }

    #[must_use]
    pub const fn index_profile(&self) -> IndexProfile {
        match self {
            Self::Desktop => IndexProfile::Full,
            Self::Mobile | Self::Tablet => IndexProfile::Minimal,
        }
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            "tablet" => Ok(Self::Tablet),
            _ => Err(format!("invalid platform: {s}")),
        }
    }
}

/// Canonical engine + form factor tag recorded on every interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineTag {
    ChromiumDesktop,
    ChromiumMobile,
    GeckoDesktop,
    GeckoMobile,
    #[serde(rename = "webkit_desktop")]
    WebKitDesktop,
    #[serde(rename = "webkit_mobile")]
    WebKitMobile,
}

impl EngineTag {
    /// Tablets share the desktop tag.
    #[must_use]
    pub const fn for_engine(engine: Engine, platform: PlatformTag) -> Self {
        let mobile = matches!(platform, PlatformTag::Mobile);
        match (engine, mobile) {
            (Engine::Chromium, false) => Self::ChromiumDesktop,
            (Engine::Chromium, true) => Self::ChromiumMobile,
            (Engine::Gecko, false) => Self::GeckoDesktop,
            (Engine::Gecko, true) => Self::GeckoMobile,
            (Engine::WebKit, false) => Self::WebKitDesktop,
            (Engine::WebKit, true) => Self::WebKitMobile,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ChromiumDesktop => "chromium_desktop",
            Self::ChromiumMobile => "chromium_mobile",
            Self::GeckoDesktop => "gecko_desktop",
            Self::GeckoMobile => "gecko_mobile",
            Self::WebKitDesktop => "webkit_desktop",
            Self::WebKitMobile => "webkit_mobile",
        }
    }
}

impl fmt::Display for EngineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium_desktop" => Ok(Self::ChromiumDesktop),
            "chromium_mobile" => Ok(Self::ChromiumMobile),
            "gecko_desktop" => Ok(Self::GeckoDesktop),
            "gecko_mobile" => Ok(Self::GeckoMobile),
            "webkit_desktop" => Ok(Self::WebKitDesktop),
            "webkit_mobile" => Ok(Self::WebKitMobile),
            _ => Err(format!("invalid engine tag: {s}")),
        }
    }
}

/// A raw focus/visibility event as delivered by the listener layer.
///
/// Required fields are optional here so that validation can report which
/// one is missing instead of failing deserialization outright.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabEvent {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tab_id: Option<String>,
    #[serde(default)]
    pub window_id: Option<String>,
    #[serde(default)]
    pub engine_tag: Option<EngineTag>,
    #[serde(default)]
    pub platform_tag: Option<PlatformTag>,
    #[serde(default)]
    pub incognito: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default, alias = "cookieStoreId")]
    pub container_id: Option<String>,
    #[serde(default, alias = "ios_tab_id")]
    pub ios_native_id: Option<String>,
}

impl TabEvent {
    /// Builds an event carrying the three identity fields every source provides.
    pub fn new(
        url: impl Into<String>,
        tab_id: impl Into<String>,
        window_id: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            tab_id: Some(tab_id.into()),
            window_id: Some(window_id.into()),
            ..Self::default()
        }
    }

    /// Returns the tab ID if present and non-empty.
    pub fn tab_id(&self) -> Option<&str> {
        non_empty(self.tab_id.as_deref())
    }

    /// Returns the URL if present and non-empty.
    pub fn url(&self) -> Option<&str> {
        non_empty(self.url.as_deref())
    }

    /// Returns the window ID if present and non-empty.
    pub fn window_id(&self) -> Option<&str> {
        non_empty(self.window_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// A tab that is currently accumulating active time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEntry {
    pub tab_id: String,
    pub url: String,
    pub engine_tag: EngineTag,
    pub platform_tag: PlatformTag,
    pub start_time: DateTime<Utc>,
}

/// A closed, immutable period during which one URL was the active surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub platform_tag: PlatformTag,
    pub engine_tag: EngineTag,
    pub is_active: bool,
}

impl Interval {
    /// Closes `entry` at `end_time`.
    ///
    /// Both ends are truncated to whole milliseconds, the precision the
    /// store keeps. A negative span (clock skew) is clamped to zero, so
    /// `duration_ms` is never negative.
    pub fn close(entry: &ActiveEntry, end_time: DateTime<Utc>) -> Self {
        let start_time = entry.start_time.trunc_subsecs(3);
        let end_time = end_time.trunc_subsecs(3);
        let duration_ms = end_time
            .signed_duration_since(start_time)
            .num_milliseconds();
        if duration_ms < 0 {
            tracing::warn!(
                tab_id = %entry.tab_id,
                skew_ms = -duration_ms,
                "interval end precedes start, clamping duration to zero"
            );
        }
        Self {
            url: entry.url.clone(),
            start_time,
            end_time,
            duration_ms: duration_ms.max(0),
            platform_tag: entry.platform_tag,
            engine_tag: entry.engine_tag,
            is_active: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(start: DateTime<Utc>) -> ActiveEntry {
        ActiveEntry {
            tab_id: "tab-1".to_string(),
            url: "https://a.com".to_string(),
            engine_tag: EngineTag::ChromiumDesktop,
            platform_tag: PlatformTag::Desktop,
            start_time: start,
        }
    }

    #[test]
    fn engine_tag_follows_platform() {
        assert_eq!(
            EngineTag::for_engine(Engine::Gecko, PlatformTag::Mobile),
            EngineTag::GeckoMobile
        );
        assert_eq!(
            EngineTag::for_engine(Engine::WebKit, PlatformTag::Tablet),
            EngineTag::WebKitDesktop
        );
        assert_eq!(
            EngineTag::for_engine(Engine::Chromium, PlatformTag::Desktop),
            EngineTag::ChromiumDesktop
        );
    }

    #[test]
    fn engine_tag_serializes_as_wire_name() {
        let json = serde_json::to_string(&EngineTag::WebKitMobile).unwrap();
        assert_eq!(json, r#""webkit_mobile""#);
        let parsed: EngineTag = "webkit_desktop".parse().unwrap();
        assert_eq!(parsed, EngineTag::WebKitDesktop);
    }

    #[test]
    fn retention_window_is_shorter_on_mobile() {
        assert_eq!(PlatformTag::Mobile.retention_window(), Duration::days(7));
        assert_eq!(PlatformTag::Desktop.retention_window(), Duration::days(30));
        assert_eq!(PlatformTag::Tablet.retention_window(), Duration::days(30));
    }

    #[test]
    fn close_computes_duration() {
        let start = Utc::now();
        let interval = Interval::close(&entry_at(start), start + Duration::seconds(60));
        assert_eq!(interval.duration_ms, 60_000);
        assert!(!interval.is_active);
    }

    #[test]
    fn close_clamps_clock_skew_to_zero() {
        let start = Utc::now();
        let interval = Interval::close(&entry_at(start), start - Duration::seconds(5));
        assert_eq!(interval.duration_ms, 0);
    }

    #[test]
    fn close_truncates_to_milliseconds() {
        use chrono::TimeZone;

        let start = Utc.timestamp_opt(1_735_722_000, 123_456_789).unwrap();
        let end = start + Duration::nanoseconds(1_500_900_000);

        let interval = Interval::close(&entry_at(start), end);

        assert_eq!(interval.start_time.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(interval.end_time.timestamp_subsec_nanos(), 624_000_000);
        assert_eq!(interval.duration_ms, 1_501);
    }

    #[test]
    fn tab_event_accepts_browser_field_aliases() {
        let event: TabEvent = serde_json::from_str(
            r#"{"url":"https://a.com","tab_id":"1","window_id":"w","cookieStoreId":"private-1","ios_tab_id":"42"}"#,
        )
        .unwrap();
        assert_eq!(event.container_id.as_deref(), Some("private-1"));
        assert_eq!(event.ios_native_id.as_deref(), Some("42"));
        assert!(!event.incognito);
    }

    #[test]
    fn empty_fields_count_as_missing() {
        let event = TabEvent::new("", "tab-1", "w");
        assert_eq!(event.url(), None);
        assert_eq!(event.tab_id(), Some("tab-1"));
    }
}
