//! Per-engine gating and normalization of raw tab events.
//!
//! One [`EnginePolicy`] exists per (engine, platform) pair. Each operation
//! runs the engine's eligibility rule, tags the event with its canonical
//! engine and platform, rewrites identity where the platform requires it and
//! only then hands the event to the shared [`Tracker`]. An ineligible event
//! never reaches the tracker.
//!
//! Every engine rejects browser-internal pages (`chrome://`, `about:` and
//! the like) before its own rule runs.
//!
//! | Engine   | Rejects                                               | Normalizes                         |
//! |----------|-------------------------------------------------------|------------------------------------|
//! | Chromium | incognito tabs                                        | -                                  |
//! | Gecko    | containers whose ID starts with `private`             | -                                  |
//! | WebKit   | private browsing; domains without consent while restricted | mobile: `tab_id = ios_<native id>` |

use std::sync::{MutexGuard, PoisonError};

use crate::tracker::{IntervalSink, Outcome, Rejection, SharedTracker, StoreClosed, Tracker};
use crate::types::{Engine, EngineTag, PlatformTag, TabEvent};

/// Container IDs with this prefix belong to private browsing.
const PRIVATE_CONTAINER_PREFIX: &str = "private";

/// URL schemes of browser UI pages, which are never tracked.
const UNTRACKABLE_URL_PREFIXES: [&str; 5] = [
    "chrome://",
    "chrome-extension://",
    "about:",
    "edge://",
    "brave://",
];

/// Namespace for tab IDs derived from iOS native tab identifiers.
const IOS_TAB_PREFIX: &str = "ios_";

/// Per-domain tracking consent.
pub trait ConsentProvider: Send + Sync {
    fn has_consent(&self, domain: &str) -> bool;
}

/// Consent source that allows every domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

impl ConsentProvider for GrantAll {
    fn has_consent(&self, _domain: &str) -> bool {
        true
    }
}

/// Eligibility and normalization rules for one engine on one platform.
pub struct EnginePolicy<S> {
    engine: Engine,
    platform: PlatformTag,
    tracker: SharedTracker<S>,
    restricted: bool,
    consent: Box<dyn ConsentProvider>,
}

impl<S: IntervalSink> EnginePolicy<S> {
    /// WebKit policies start in restricted mode until
    /// [`set_permission`](Self::set_permission) records a granted check.
    pub fn new(engine: Engine, platform: PlatformTag, tracker: SharedTracker<S>) -> Self {
        let restricted = engine == Engine::WebKit;
        if restricted {
            tracing::info!(%platform, "webkit policy starting in restricted mode");
        }
        Self {
            engine,
            platform,
            tracker,
            restricted,
            consent: Box::new(GrantAll),
        }
    }

    #[must_use]
    pub fn with_consent(mut self, consent: Box<dyn ConsentProvider>) -> Self {
        self.consent = consent;
        self
    }

    pub const fn engine(&self) -> Engine {
        self.engine
    }

    pub const fn platform(&self) -> PlatformTag {
        self.platform
    }

    pub const fn engine_tag(&self) -> EngineTag {
        EngineTag::for_engine(self.engine, self.platform)
    }

    pub const fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Records the result of a platform permission check.
    pub fn set_permission(&mut self, granted: bool) {
        if self.engine != Engine::WebKit {
            return;
        }
        self.restricted = !granted;
        if granted {
            tracing::info!(platform = %self.platform, "webkit permission granted, leaving restricted mode");
        } else {
            tracing::info!(platform = %self.platform, "webkit permission denied, staying restricted");
        }
    }

    /// Pauses or resumes the shared tracker. See [`Tracker::set_paused`].
    pub fn set_tracking(&self, enabled: bool) -> Result<Outcome, StoreClosed> {
        self.lock().set_paused(!enabled)
    }

    pub fn on_tab_activated(&self, event: &TabEvent) -> Result<Outcome, StoreClosed> {
        let event = match self.prepare(event) {
            Ok(event) => event,
            Err(rejection) => return Ok(self.reject(rejection)),
        };
        self.lock().activate(&event)
    }

    /// Handles a URL change. An update that repeats the tab's current URL is
    /// rejected as a no-op.
    pub fn on_tab_updated(&self, event: &TabEvent) -> Result<Outcome, StoreClosed> {
        let event = match self.prepare(event) {
            Ok(event) => event,
            Err(rejection) => return Ok(self.reject(rejection)),
        };
        let mut tracker = self.lock();
        let unchanged = match (event.tab_id(), event.url()) {
            (Some(tab_id), Some(url)) => tracker.entry(tab_id).is_some_and(|e| e.url == url),
            _ => false,
        };
        if unchanged {
            return Ok(self.reject(Rejection::UnchangedUrl));
        }
        tracker.activate(&event)
    }

    pub fn on_visibility_changed(
        &self,
        event: &TabEvent,
        is_visible: bool,
    ) -> Result<Outcome, StoreClosed> {
        if is_visible {
            self.on_tab_activated(event)
        } else {
            self.leave(event)
        }
    }

    pub fn on_window_focus_changed(
        &self,
        event: &TabEvent,
        has_focus: bool,
    ) -> Result<Outcome, StoreClosed> {
        if has_focus {
            self.on_tab_activated(event)
        } else {
            self.leave(event)
        }
    }

    fn leave(&self, event: &TabEvent) -> Result<Outcome, StoreClosed> {
        let event = match self.prepare(event) {
            Ok(event) => event,
            Err(rejection) => return Ok(self.reject(rejection)),
        };
        let Some(tab_id) = event.tab_id() else {
            return Ok(self.reject(Rejection::MissingField("tab_id")));
        };
        let mut tracker = self.lock();
        let now = tracker.now();
        tracker.deactivate(tab_id, now)
    }

    /// Eligibility, tagging and identity normalization, in that order.
    fn prepare(&self, event: &TabEvent) -> Result<TabEvent, Rejection> {
        self.check_eligibility(event)?;
        let mut event = event.clone();
        event.engine_tag = Some(self.engine_tag());
        event.platform_tag = Some(self.platform);
        self.normalize(&mut event);
        Ok(event)
    }

    fn check_eligibility(&self, event: &TabEvent) -> Result<(), Rejection> {
        if event.url().is_some_and(is_untrackable) {
            return Err(Rejection::UntrackableUrl);
        }
        match self.engine {
            Engine::Chromium => {
                if event.incognito {
                    return Err(Rejection::Incognito);
                }
            }
            Engine::Gecko => {
                if event
                    .container_id
                    .as_deref()
                    .is_some_and(|id| id.starts_with(PRIVATE_CONTAINER_PREFIX))
                {
                    return Err(Rejection::PrivateContainer);
                }
            }
            Engine::WebKit => {
                if self.restricted {
                    let domain = domain_of(event.url().unwrap_or_default());
                    if !self.consent.has_consent(&domain) {
                        return Err(Rejection::ConsentMissing);
                    }
                }
                if event.private {
                    return Err(Rejection::PrivateBrowsing);
                }
            }
        }
        Ok(())
    }

    fn normalize(&self, event: &mut TabEvent) {
        if self.engine == Engine::WebKit && self.platform == PlatformTag::Mobile {
            if let Some(native_id) = event.ios_native_id.as_deref().filter(|id| !id.is_empty()) {
                event.tab_id = Some(format!("{IOS_TAB_PREFIX}{native_id}"));
            }
        }
    }

    fn reject(&self, rejection: Rejection) -> Outcome {
        tracing::debug!(engine_tag = %self.engine_tag(), reason = %rejection, "event rejected");
        Outcome::Rejected(rejection)
    }

    fn lock(&self) -> MutexGuard<'_, Tracker<S>> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_untrackable(url: &str) -> bool {
    UNTRACKABLE_URL_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

/// Host part of `raw`, or `raw` itself when it has none.
fn domain_of(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}
