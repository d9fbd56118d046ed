//! Per-tab reading session state machine.
//!
//! A [`TabState`] is owned by exactly one tab actor and mutated only by
//! the methods below, each of which takes `now` and returns the
//! [`SessionEvent`]s it produced. Commits leave the state machine as
//! [`SessionEvent::Commit`] requests; the caller forwards them to the
//! ledger.
//!
//! Accounting:
//!
//! - `reading` is derived from `active_start`, so the two cannot drift.
//! - `uncommitted = accumulated + inflight − committed` never goes
//!   negative: every commit advances `committed` by exactly its delta and
//!   pausing moves the uncommitted balance into a pending segment.
//! - A pending segment is only created when reading stops, and is
//!   re-absorbed on the next start when it is young enough and names the
//!   same work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::resolver::meta_matches_url;
use crate::settings::Settings;
use crate::stabilizer::{StabilityContext, TitleStabilizer};
use crate::types::{Certificate, ContentIdentity, Site, TabId, WindowId};
use crate::urls::{clean, is_candidate_url, normalize_url, same_page_ignoring_fragment, title_signature};
use crate::{elapsed_ms, span};

// ─── Reasons ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseReason {
    NotVisible,
    IdleHold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Navigation,
    TabRemoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitReason {
    Navigation,
    TabRemoved,
    AutoFlush,
    /// An unexpired pending committed because its tab closed.
    PendingOnClose,
}

impl From<StopReason> for CommitReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Navigation => Self::Navigation,
            StopReason::TabRemoved => Self::TabRemoved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Expired,
    Empty,
    IdentityMismatch,
    TabClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PromoteBlock {
    MetaUrlMismatch,
    Debounce,
}

macro_rules! display_via_serde_name {
    ($($ty:ty => { $($variant:ident = $name:literal),+ $(,)? }),+ $(,)?) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self { $(Self::$variant => $name),+ })
            }
        })+
    };
}

display_via_serde_name! {
    PauseReason => { NotVisible = "NOT_VISIBLE", IdleHold = "IDLE_HOLD" },
    StopReason => { Navigation = "NAVIGATION", TabRemoved = "TAB_REMOVED" },
    CommitReason => {
        Navigation = "NAVIGATION",
        TabRemoved = "TAB_REMOVED",
        AutoFlush = "AUTO_FLUSH",
        PendingOnClose = "PENDING_ON_CLOSE",
    },
    DropReason => {
        Expired = "expired",
        Empty = "empty",
        IdentityMismatch = "identity_mismatch",
        TabClosed = "tab_closed",
    },
    PromoteBlock => { MetaUrlMismatch = "metaUrlMismatch", Debounce = "debounce" },
}

// ─── Pending ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingKind {
    /// A whole session ended below the minimum.
    Short,
    /// An in-progress session was paused.
    Segment,
}

impl PendingKind {
    pub fn timeout_ms(self, settings: &Settings) -> u64 {
        match self {
            Self::Short => settings.pending_short_timeout_ms,
            Self::Segment => settings.pending_segment_timeout_ms,
        }
    }
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Short => "short",
            Self::Segment => "segment",
        })
    }
}

/// Uncommitted reading time held back after reading stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSegment {
    pub kind: PendingKind,
    pub ms: u64,
    pub stopped_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub identity: ContentIdentity,
    pub source_url: String,
    pub session_id: String,
}

impl PendingSegment {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        elapsed_ms(self.stopped_at, now)
    }
}

// ─── Events ───────────────────────────────────────────────────────

/// Time to be written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub tab_id: TabId,
    pub identity: ContentIdentity,
    pub session_id: String,
    pub url: String,
    pub delta_ms: u64,
    /// End of the committed span; the span is `[at − delta, at]`.
    pub at: DateTime<Utc>,
    pub reason: CommitReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MetaApplied { certificate: Certificate, site: Option<Site> },
    MetaStale { url: String },
    TitleStable { title: String },
    PromoteBlocked { reason: PromoteBlock },
    Promoted { title: String },
    Started { session_id: String, resume: bool },
    Paused { session_id: String, reason: PauseReason, add_ms: u64 },
    Stopped { reason: StopReason, elapsed_ms: u64 },
    PendingStored { kind: PendingKind, ms: u64 },
    PendingAbsorbed { kind: PendingKind, ms: u64, age_ms: u64 },
    PendingDropped { kind: PendingKind, ms: u64, age_ms: u64, reason: DropReason },
    BecameVisible,
    Interaction { ts: DateTime<Utc> },
    Commit(CommitRequest),
}

pub type Events = Vec<SessionEvent>;

// ─── TabState ─────────────────────────────────────────────────────

/// Everything the tracker knows about one tab.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub tab_id: TabId,
    pub window_id: Option<WindowId>,
    /// Updated on every navigation signal.
    pub observed_url: String,
    /// Updated only on promotion.
    pub confirmed_url: String,
    pub title: String,
    pub candidate: bool,
    pub meta: ContentIdentity,
    pub session_id: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub active_start: Option<DateTime<Utc>>,
    pub accumulated_ms: u64,
    pub committed_ms: u64,
    pub content_url_at_start: String,
    pub last_stable_title: String,
    pub last_stable_signature: String,
    pub page_hidden: bool,
    pub became_visible_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    pub pending: Option<PendingSegment>,
    pub start_grace_until: DateTime<Utc>,
    pub idle_resume_grace_until: Option<DateTime<Utc>>,
    pub promote_debounce_at: Option<DateTime<Utc>>,
    pub resume_gate_blocked: bool,
    #[serde(skip)]
    meta_signature: String,
    #[serde(skip)]
    stabilizer: TitleStabilizer,
}

impl TabState {
    pub fn new(
        tab_id: TabId,
        window_id: Option<WindowId>,
        url: &str,
        title: &str,
        now: DateTime<Utc>,
        settings: &Settings,
    ) -> Self {
        Self {
            tab_id,
            window_id,
            observed_url: url.to_string(),
            confirmed_url: String::new(),
            title: title.to_string(),
            candidate: is_candidate_url(url),
            meta: ContentIdentity::none(None),
            session_id: None,
            session_start: None,
            active_start: None,
            accumulated_ms: 0,
            committed_ms: 0,
            content_url_at_start: String::new(),
            last_stable_title: String::new(),
            last_stable_signature: String::new(),
            page_hidden: false,
            became_visible_at: now,
            last_interaction: now,
            pending: None,
            start_grace_until: now + span(settings.start_grace_ms),
            idle_resume_grace_until: None,
            promote_debounce_at: None,
            resume_gate_blocked: false,
            meta_signature: String::new(),
            stabilizer: TitleStabilizer::new(now),
        }
    }

    pub fn is_reading(&self) -> bool {
        self.active_start.is_some()
    }

    pub fn inflight_ms(&self, now: DateTime<Utc>) -> u64 {
        self.active_start.map_or(0, |start| elapsed_ms(start, now))
    }

    pub fn uncommitted_ms(&self, now: DateTime<Utc>) -> u64 {
        (self.accumulated_ms + self.inflight_ms(now)).saturating_sub(self.committed_ms)
    }

    /// Uncommitted time counted toward the live in-flight total.
    pub fn billable_inflight_ms(&self, now: DateTime<Utc>) -> u64 {
        if self.meta.is_billable() {
            self.uncommitted_ms(now)
        } else {
            0
        }
    }

    fn record_url(&self) -> String {
        [&self.content_url_at_start, &self.confirmed_url, &self.observed_url]
            .into_iter()
            .find(|u| !u.is_empty())
            .cloned()
            .unwrap_or_default()
    }

    fn commit_request(&self, delta_ms: u64, at: DateTime<Utc>, reason: CommitReason) -> Option<CommitRequest> {
        let session_id = self.session_id.clone()?;
        Some(CommitRequest {
            tab_id: self.tab_id,
            identity: self.meta.clone(),
            session_id,
            url: self.record_url(),
            delta_ms,
            at,
            reason,
        })
    }

    // ─── Observation ──────────────────────────────────────────────

    /// Record a navigation/title signal. A URL change that is more than a
    /// fragment change hard-stops the session. The caller re-resolves
    /// `meta` afterwards.
    pub fn observe(
        &mut self,
        url: Option<&str>,
        title: Option<&str>,
        now: DateTime<Utc>,
        settings: &Settings,
    ) -> Events {
        let mut events = Vec::new();
        if let Some(url) = url
            && !url.is_empty()
            && url != self.observed_url
        {
            if !same_page_ignoring_fragment(&self.observed_url, url) {
                events.extend(self.stop(StopReason::Navigation, now, settings));
                self.stabilizer.reset(now);
            }
            self.observed_url = url.to_string();
        }
        if let Some(title) = title {
            self.title = title.to_string();
        }
        self.candidate = is_candidate_url(&self.observed_url);
        events
    }

    /// Apply a resolved identity unless the tab has navigated since the
    /// resolution for `resolved_url` was issued.
    pub fn apply_meta(&mut self, resolved_url: &str, meta: ContentIdentity) -> Option<SessionEvent> {
        if resolved_url != self.observed_url {
            return Some(SessionEvent::MetaStale {
                url: resolved_url.to_string(),
            });
        }
        let signature = meta.signature();
        let changed = signature != self.meta_signature;
        let event = (changed && meta.certificate != Certificate::None).then(|| SessionEvent::MetaApplied {
            certificate: meta.certificate,
            site: meta.site,
        });
        self.meta = meta;
        self.meta_signature = signature;
        event
    }

    /// Run the stabilizer and promotion, then re-evaluate.
    pub fn settle(&mut self, now: DateTime<Utc>, settings: &Settings, site_enabled: bool) -> Events {
        let mut events = Vec::new();
        let ctx = StabilityContext {
            tracked: self.candidate && self.meta.site.is_some(),
            quiet_ms: settings.title_stable_ms(self.meta.site),
            observed_url: &self.observed_url,
            last_stable_signature: &self.last_stable_signature,
        };
        let title = self.title.clone();
        let out = self.stabilizer.observe(&title, now, ctx);
        if let Some(stable) = out.stable {
            if out.newly_stable {
                events.push(SessionEvent::TitleStable { title: stable.clone() });
            }
            if self.meta.certificate == Certificate::Title {
                events.extend(self.promote(&stable, now, settings, site_enabled));
            }
        }
        events.extend(self.evaluate(now, settings, site_enabled));
        events
    }

    // ─── Promotion ────────────────────────────────────────────────

    pub fn promote(
        &mut self,
        stable_title: &str,
        now: DateTime<Utc>,
        settings: &Settings,
        site_enabled: bool,
    ) -> Events {
        let title = clean(stable_title);
        let prev = self.record_url();
        if !prev.is_empty()
            && !self.observed_url.is_empty()
            && prev != self.observed_url
            && normalize_url(&prev) == normalize_url(&self.observed_url)
        {
            if self.confirmed_url.is_empty() {
                self.confirmed_url = self.observed_url.clone();
            }
            if self.content_url_at_start.is_empty() {
                self.content_url_at_start = self.confirmed_url.clone();
            }
        }

        let check_url = if self.observed_url.is_empty() {
            &self.confirmed_url
        } else {
            &self.observed_url
        };
        if !meta_matches_url(&self.meta, check_url) {
            return vec![SessionEvent::PromoteBlocked {
                reason: PromoteBlock::MetaUrlMismatch,
            }];
        }

        let debounce_ms = settings.promote_debounce_for(self.meta.site);
        if let Some(at) = self.promote_debounce_at
            && elapsed_ms(at, now) < debounce_ms
        {
            return vec![SessionEvent::PromoteBlocked {
                reason: PromoteBlock::Debounce,
            }];
        }
        self.promote_debounce_at = Some(now);

        let signature = title_signature(&self.observed_url, &title);
        if self.is_reading() && self.last_stable_signature == signature {
            return Vec::new();
        }
        self.last_stable_title = title.clone();
        self.last_stable_signature = signature;
        if !self.observed_url.is_empty() {
            self.confirmed_url = self.observed_url.clone();
        }

        let mut events = vec![SessionEvent::Promoted { title }];
        events.extend(self.start_or_resume(now, settings, site_enabled));
        events
    }

    // ─── Start / pause / stop ─────────────────────────────────────

    pub fn can_start(&self, now: DateTime<Utc>, settings: &Settings, site_enabled: bool) -> bool {
        let stable_ok = !self.last_stable_title.is_empty()
            && self.last_stable_signature == title_signature(&self.observed_url, &self.last_stable_title);
        let visible_ok = !self.page_hidden
            && elapsed_ms(self.became_visible_at, now) >= settings.visibility_stabilize_ms;
        let in_start_grace = now < self.start_grace_until;
        let recent_interaction =
            elapsed_ms(self.last_interaction, now) <= settings.recent_interaction_skip_start_grace_ms;
        let grace_ok = !in_start_grace || recent_interaction;

        site_enabled
            && self.candidate
            && self.meta.is_billable()
            && visible_ok
            && stable_ok
            && grace_ok
            && !self.resume_gate_blocked
    }

    fn can_continue(&self, now: DateTime<Utc>, settings: &Settings) -> bool {
        if self.page_hidden {
            return false;
        }
        let in_resume_grace = self.idle_resume_grace_until.is_some_and(|until| now < until);
        elapsed_ms(self.last_interaction, now) < settings.idle_hold_ms || in_resume_grace
    }

    pub fn start_or_resume(&mut self, now: DateTime<Utc>, settings: &Settings, site_enabled: bool) -> Events {
        if self.is_reading() || !self.can_start(now, settings, site_enabled) {
            return Vec::new();
        }
        let resume = self.session_id.is_some();
        let session_id = self
            .session_id
            .get_or_insert_with(|| new_session_id(now))
            .clone();
        self.session_start.get_or_insert(now);
        self.active_start = Some(now);
        if self.content_url_at_start.is_empty() {
            self.content_url_at_start = if self.observed_url.is_empty() {
                self.confirmed_url.clone()
            } else {
                self.observed_url.clone()
            };
        }

        let mut events = Vec::new();
        events.extend(self.absorb_pending(now, settings));
        self.idle_resume_grace_until = Some(now + span(settings.idle_resume_grace_ms));
        self.resume_gate_blocked = false;
        self.last_interaction = now;
        events.push(SessionEvent::Started { session_id, resume });
        events
    }

    fn absorb_pending(&mut self, now: DateTime<Utc>, settings: &Settings) -> Option<SessionEvent> {
        let pending = self.pending.take()?;
        let age_ms = pending.age_ms(now);
        let window = settings.absorb_window_ms(pending.kind.timeout_ms(settings));
        let dropped = |reason| SessionEvent::PendingDropped {
            kind: pending.kind,
            ms: pending.ms,
            age_ms,
            reason,
        };
        if pending.ms == 0 {
            return Some(dropped(DropReason::Empty));
        }
        if age_ms > window {
            return Some(dropped(DropReason::Expired));
        }
        if !pending.identity.same_work(&self.meta) {
            return Some(dropped(DropReason::IdentityMismatch));
        }
        self.accumulated_ms += pending.ms;
        Some(SessionEvent::PendingAbsorbed {
            kind: pending.kind,
            ms: pending.ms,
            age_ms,
        })
    }

    /// Hold the running interval as a `segment` pending; a non-billable
    /// interval is discarded. Time already folded into `accumulated_ms`
    /// stays with the session. No-op unless reading.
    pub fn pause(&mut self, reason: PauseReason, now: DateTime<Utc>, settings: &Settings) -> Events {
        let Some(start) = self.active_start.take() else {
            return Vec::new();
        };
        let end = match reason {
            PauseReason::IdleHold => now
                .min(self.last_interaction + span(settings.idle_hold_ms))
                .max(start),
            PauseReason::NotVisible => now,
        };
        let add_ms = elapsed_ms(start, end);
        self.resume_gate_blocked = reason == PauseReason::IdleHold;
        let session_id = self.session_id.clone().unwrap_or_default();

        let mut events = Vec::new();
        if self.meta.is_billable() && add_ms > 0 {
            self.pending = Some(PendingSegment {
                kind: PendingKind::Segment,
                ms: add_ms,
                stopped_at: end,
                expires_at: end + span(settings.pending_segment_timeout_ms),
                identity: self.meta.clone(),
                source_url: self.record_url(),
                session_id: session_id.clone(),
            });
            events.push(SessionEvent::PendingStored {
                kind: PendingKind::Segment,
                ms: add_ms,
            });
        }
        events.push(SessionEvent::Paused {
            session_id,
            reason,
            add_ms,
        });
        events
    }

    /// End the session: commit, or hold a below-minimum balance as a
    /// `short` pending. A live pending for the same work is folded into
    /// the new one; any other is dropped. Session identity is cleared and
    /// a pending that was not replaced survives.
    pub fn stop(&mut self, reason: StopReason, now: DateTime<Utc>, settings: &Settings) -> Events {
        if self.session_id.is_none() {
            return Vec::new();
        }
        if let Some(start) = self.active_start.take() {
            self.accumulated_ms += elapsed_ms(start, now);
        }
        let delta = self.uncommitted_ms(now);
        let mut events = Vec::new();

        if self.meta.is_billable() && delta > 0 {
            let force = reason == StopReason::TabRemoved && settings.commit_on_close_below_min;
            if delta >= settings.min_session_ms || force {
                if let Some(req) = self.commit_request(delta, now, reason.into()) {
                    self.committed_ms += delta;
                    events.push(SessionEvent::Commit(req));
                }
            } else {
                let mut ms = delta;
                if let Some(prev) = self.pending.take() {
                    if !prev.is_expired(now) && prev.identity.same_work(&self.meta) {
                        ms += prev.ms;
                    } else {
                        events.push(SessionEvent::PendingDropped {
                            kind: prev.kind,
                            ms: prev.ms,
                            age_ms: prev.age_ms(now),
                            reason: if prev.is_expired(now) {
                                DropReason::Expired
                            } else {
                                DropReason::IdentityMismatch
                            },
                        });
                    }
                }
                self.pending = Some(PendingSegment {
                    kind: PendingKind::Short,
                    ms,
                    stopped_at: now,
                    expires_at: now + span(settings.pending_short_timeout_ms),
                    identity: self.meta.clone(),
                    source_url: self.record_url(),
                    session_id: self.session_id.clone().unwrap_or_default(),
                });
                events.push(SessionEvent::PendingStored {
                    kind: PendingKind::Short,
                    ms,
                });
            }
        }

        self.accumulated_ms = 0;
        self.committed_ms = 0;
        self.session_id = None;
        self.session_start = None;
        self.content_url_at_start.clear();
        self.last_stable_title.clear();
        self.last_stable_signature.clear();
        self.promote_debounce_at = None;
        events.push(SessionEvent::Stopped {
            reason,
            elapsed_ms: delta,
        });
        events
    }

    /// Forced stop when the tab goes away. An unexpired billable pending
    /// is committed under its own identity when close-commits are enabled.
    pub fn close(&mut self, now: DateTime<Utc>, settings: &Settings) -> Events {
        let mut events = self.stop(StopReason::TabRemoved, now, settings);
        let Some(pending) = self.pending.take() else {
            return events;
        };
        let age_ms = pending.age_ms(now);
        let committable = settings.commit_on_close_below_min
            && !pending.is_expired(now)
            && pending.ms > 0
            && pending.identity.is_billable();
        if committable {
            events.push(SessionEvent::Commit(CommitRequest {
                tab_id: self.tab_id,
                identity: pending.identity,
                session_id: pending.session_id,
                url: pending.source_url,
                delta_ms: pending.ms,
                at: pending.stopped_at,
                reason: CommitReason::PendingOnClose,
            }));
        } else {
            events.push(SessionEvent::PendingDropped {
                kind: pending.kind,
                ms: pending.ms,
                age_ms,
                reason: DropReason::TabClosed,
            });
        }
        events
    }

    // ─── Periodic passes ──────────────────────────────────────────

    pub fn expire_pending(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        if !self.pending.as_ref().is_some_and(|p| p.is_expired(now)) {
            return None;
        }
        let pending = self.pending.take()?;
        Some(SessionEvent::PendingDropped {
            kind: pending.kind,
            ms: pending.ms,
            age_ms: pending.age_ms(now),
            reason: DropReason::Expired,
        })
    }

    /// Drop expired pendings, then pause or start as the current
    /// visibility and recency allow.
    pub fn evaluate(&mut self, now: DateTime<Utc>, settings: &Settings, site_enabled: bool) -> Events {
        let mut events: Events = self.expire_pending(now).into_iter().collect();
        if self.is_reading() {
            if !self.can_continue(now, settings) {
                let reason = if self.page_hidden {
                    PauseReason::NotVisible
                } else {
                    PauseReason::IdleHold
                };
                events.extend(self.pause(reason, now, settings));
            }
        } else {
            events.extend(self.start_or_resume(now, settings, site_enabled));
        }
        events
    }

    /// AUTO_FLUSH: commit a long-enough uncommitted balance without
    /// ending the session.
    pub fn flush(&mut self, now: DateTime<Utc>, settings: &Settings) -> Option<SessionEvent> {
        self.session_id.as_ref()?;
        let delta = self.uncommitted_ms(now);
        if delta < settings.min_session_ms || !self.meta.is_billable() {
            return None;
        }
        let req = self.commit_request(delta, now, CommitReason::AutoFlush)?;
        self.committed_ms += delta;
        Some(SessionEvent::Commit(req))
    }

    // ─── Page signals ─────────────────────────────────────────────

    /// Visibility report from the page. Becoming hidden pauses at once.
    pub fn set_visibility(&mut self, hidden: bool, now: DateTime<Utc>, settings: &Settings) -> Events {
        let was_hidden = self.page_hidden;
        self.page_hidden = hidden;
        match (was_hidden, hidden) {
            (true, false) => {
                self.became_visible_at = now;
                vec![SessionEvent::BecameVisible]
            }
            (false, true) => self.pause(PauseReason::NotVisible, now, settings),
            _ => Vec::new(),
        }
    }

    /// Heartbeat interaction timestamp; only newer values count.
    pub fn heartbeat_interaction(&mut self, ts: DateTime<Utc>) -> Option<SessionEvent> {
        if ts <= self.last_interaction {
            return None;
        }
        Some(self.interaction(ts))
    }

    /// Explicit activity (scroll, key, click). Clears the resume gate.
    pub fn interaction(&mut self, ts: DateTime<Utc>) -> SessionEvent {
        self.last_interaction = ts;
        self.resume_gate_blocked = false;
        SessionEvent::Interaction { ts }
    }

    /// The tab became the active tab of its window.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Events {
        let was_hidden = self.page_hidden;
        self.page_hidden = false;
        self.last_interaction = now;
        if was_hidden {
            self.became_visible_at = now;
            vec![SessionEvent::BecameVisible]
        } else {
            Vec::new()
        }
    }
}

fn new_session_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("s_{:x}_{}", now.timestamp_millis(), &random[..12])
}
