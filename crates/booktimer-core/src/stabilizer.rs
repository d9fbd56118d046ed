//! Title stabilization.
//!
//! Browsers report several intermediate titles while a page loads
//! (the bare URL, a placeholder, the real title). A title is only
//! trusted once it has stayed unchanged for a site-dependent quiet
//! window, and it is offered for promotion only while its
//! `(url, title)` signature differs from the last promoted one.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::elapsed_ms;
use crate::urls::{clean, title_signature};

/// Per-tab debounce state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleStabilizer {
    last: String,
    first_seen: DateTime<Utc>,
    stable: bool,
}

/// Result of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityOutput {
    /// Stable title eligible for promotion.
    pub stable: Option<String>,
    /// The title crossed the quiet window in this observation.
    pub newly_stable: bool,
}

impl StabilityOutput {
    fn quiet() -> Self {
        Self {
            stable: None,
            newly_stable: false,
        }
    }
}

/// Inputs that do not belong to the stabilizer itself.
#[derive(Debug, Clone, Copy)]
pub struct StabilityContext<'a> {
    /// Only candidate pages on a supported site are tracked.
    pub tracked: bool,
    pub quiet_ms: u64,
    pub observed_url: &'a str,
    pub last_stable_signature: &'a str,
}

impl TitleStabilizer {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last: String::new(),
            first_seen: now,
            stable: false,
        }
    }

    /// Forget the current title, e.g. after a navigation.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Self::new(now);
    }

    pub fn last_title(&self) -> &str {
        &self.last
    }

    pub fn observe(
        &mut self,
        title: &str,
        now: DateTime<Utc>,
        ctx: StabilityContext<'_>,
    ) -> StabilityOutput {
        if !ctx.tracked {
            return StabilityOutput::quiet();
        }
        let t = clean(title);
        if t.is_empty() {
            self.reset(now);
            return StabilityOutput::quiet();
        }
        if self.last != t {
            self.last = t.clone();
            self.first_seen = now;
            self.stable = false;
        }

        if elapsed_ms(self.first_seen, now) < ctx.quiet_ms {
            return StabilityOutput::quiet();
        }
        let newly_stable = !self.stable;
        self.stable = true;

        let unseen = ctx.last_stable_signature != title_signature(ctx.observed_url, &t);
        StabilityOutput {
            stable: unseen.then_some(t),
            newly_stable: newly_stable && unseen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://kakuyomu.jp/works/1/episodes/2";

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid ts")
            .with_timezone(&Utc)
    }

    fn ctx(sig: &str) -> StabilityContext<'_> {
        StabilityContext {
            tracked: true,
            quiet_ms: 500,
            observed_url: URL,
            last_stable_signature: sig,
        }
    }

    // ── 1. Quiet window ─────────────────────────────────────────────

    #[test]
    fn emits_after_quiet_window() {
        let t0 = ts("2026-03-01T10:00:00Z");
        let mut s = TitleStabilizer::new(t0);
        assert_eq!(s.observe("Ep - Work", t0, ctx("")).stable, None);
        assert_eq!(
            s.observe("Ep - Work", ts("2026-03-01T10:00:00.400Z"), ctx("")).stable,
            None
        );
        let out = s.observe("Ep - Work", ts("2026-03-01T10:00:00.500Z"), ctx(""));
        assert_eq!(out.stable.as_deref(), Some("Ep - Work"));
        assert!(out.newly_stable);
    }

    // ── 2. Changes restart the window ───────────────────────────────

    #[test]
    fn changed_title_restarts_window() {
        let t0 = ts("2026-03-01T10:00:00Z");
        let mut s = TitleStabilizer::new(t0);
        s.observe("Loading", t0, ctx(""));
        let out = s.observe("Ep - Work", ts("2026-03-01T10:00:00.600Z"), ctx(""));
        assert_eq!(out.stable, None);
        let out = s.observe("Ep - Work", ts("2026-03-01T10:00:01.100Z"), ctx(""));
        assert_eq!(out.stable.as_deref(), Some("Ep - Work"));
    }

    #[test]
    fn empty_title_resets() {
        let t0 = ts("2026-03-01T10:00:00Z");
        let mut s = TitleStabilizer::new(t0);
        s.observe("Ep - Work", t0, ctx(""));
        s.observe("   ", ts("2026-03-01T10:00:00.300Z"), ctx(""));
        assert_eq!(s.last_title(), "");
        let out = s.observe("Ep - Work", ts("2026-03-01T10:00:00.600Z"), ctx(""));
        assert_eq!(out.stable, None);
    }

    // ── 3. Suppression ──────────────────────────────────────────────

    #[test]
    fn already_promoted_signature_is_suppressed() {
        let t0 = ts("2026-03-01T10:00:00Z");
        let sig = title_signature(URL, "Ep - Work");
        let mut s = TitleStabilizer::new(t0);
        s.observe("Ep - Work", t0, ctx(&sig));
        let out = s.observe("Ep - Work", ts("2026-03-01T10:00:01Z"), ctx(&sig));
        assert_eq!(out.stable, None);
        assert!(!out.newly_stable);
    }

    #[test]
    fn stays_eligible_until_promoted() {
        let t0 = ts("2026-03-01T10:00:00Z");
        let mut s = TitleStabilizer::new(t0);
        s.observe("Ep - Work", t0, ctx(""));
        let first = s.observe("Ep - Work", ts("2026-03-01T10:00:01Z"), ctx(""));
        let second = s.observe("Ep - Work", ts("2026-03-01T10:00:02Z"), ctx(""));
        assert!(first.newly_stable);
        assert!(!second.newly_stable);
        assert_eq!(second.stable.as_deref(), Some("Ep - Work"));
    }

    #[test]
    fn untracked_pages_are_ignored() {
        let t0 = ts("2026-03-01T10:00:00Z");
        let mut s = TitleStabilizer::new(t0);
        let c = StabilityContext {
            tracked: false,
            ..ctx("")
        };
        let out = s.observe("Ep - Work", ts("2026-03-01T10:00:05Z"), c);
        assert_eq!(out, StabilityOutput::quiet());
        assert_eq!(s.last_title(), "");
    }
}
