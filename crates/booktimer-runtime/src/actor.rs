//! Tab session actor: the [`TabWorker`] that owns one tab's [`TabState`].
//!
//! Every signal for a tab arrives as a [`TabCommand`] on that tab's lane,
//! so the state machine never sees concurrent mutation. The actor resolves
//! page metadata, runs the state machine, writes commits to the ledger and
//! keeps the idle watchdog armed while the tab is reading.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use booktimer_core::urls::site_of;
use booktimer_core::{
    CatalogInfo, PauseReason, SessionEvent, Settings, TabId, TabState, WindowId, catalog_code,
    resolve,
};
use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::catalog::NarouCatalogClient;
use crate::clock::Clock;
use crate::ledger_service::LedgerService;
use crate::live::LiveHub;
use crate::sites::SiteFlags;
use crate::tab_queue::{Mailbox, TabWorker};

/// Shared handles every actor needs.
pub struct ActorContext {
    pub settings: watch::Receiver<Settings>,
    pub sites: Arc<SiteFlags>,
    pub ledger: Arc<LedgerService>,
    pub catalog: Arc<NarouCatalogClient>,
    pub live: Arc<LiveHub>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<TabRegistry>,
}

#[derive(Debug)]
pub enum TabCommand {
    /// Navigation or title signal; also the periodic sweep.
    Observe {
        url: Option<String>,
        title: Option<String>,
        window_id: Option<WindowId>,
    },
    Activated {
        window_id: Option<WindowId>,
    },
    Heartbeat {
        hidden: bool,
        last_interaction: Option<DateTime<Utc>>,
    },
    Activity {
        ts: DateTime<Utc>,
        ev_type: String,
    },
    CatalogResolved {
        url: String,
        info: Option<CatalogInfo>,
    },
    IdleFired {
        generation: u64,
    },
    Flush,
    Close,
    /// Completes once every earlier unit on the lane has run.
    Sync(oneshot::Sender<()>),
}

impl TabCommand {
    /// Commands that bring a tab into existence. The rest are no-ops for
    /// a tab the actor has never seen.
    fn creates_state(&self) -> bool {
        matches!(
            self,
            Self::Observe { .. } | Self::Activated { .. } | Self::Heartbeat { .. } | Self::Activity { .. }
        )
    }
}

// ─── Registry ─────────────────────────────────────────────────────

/// Latest state published by every live actor, for stats and debugging.
#[derive(Default)]
pub struct TabRegistry {
    tabs: StdMutex<BTreeMap<TabId, TabState>>,
}

impl TabRegistry {
    fn publish(&self, state: &TabState) {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.tab_id, state.clone());
    }

    fn remove(&self, tab_id: TabId) {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&tab_id);
    }

    /// Uncommitted time of all tabs whose identity is billable.
    pub fn inflight_ms(&self, now: DateTime<Utc>) -> u64 {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|state| state.billable_inflight_ms(now))
            .sum()
    }

    pub fn dump(&self) -> Vec<TabState> {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

// ─── Idle watchdog ────────────────────────────────────────────────

/// Fires `IdleFired` after the idle hold. Re-arming bumps the generation
/// so a timer that already fired into the lane is ignored.
#[derive(Default)]
struct IdleTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl IdleTimer {
    fn cancel(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn arm(&mut self, hold: Duration, mailbox: Mailbox<TabCommand>) {
        self.cancel();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            mailbox.send(TabCommand::IdleFired { generation });
        }));
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ─── Actor ────────────────────────────────────────────────────────

pub struct TabSessionActor {
    tab_id: TabId,
    state: Option<TabState>,
    ctx: Arc<ActorContext>,
    mailbox: Mailbox<TabCommand>,
    idle: IdleTimer,
    /// URL whose catalog lookup is in flight.
    awaiting_catalog: Option<String>,
}

impl TabSessionActor {
    pub fn new(ctx: Arc<ActorContext>, mailbox: Mailbox<TabCommand>) -> Self {
        Self {
            tab_id: mailbox.tab_id(),
            state: None,
            ctx,
            mailbox,
            idle: IdleTimer::default(),
            awaiting_catalog: None,
        }
    }

    fn site_enabled(&self, state: &TabState) -> bool {
        state
            .meta
            .site
            .or_else(|| site_of(&state.observed_url))
            .is_some_and(|site| self.ctx.sites.is_enabled(site))
    }

    /// Re-resolve the identity for the current URL and title. A Narou
    /// page whose catalog entry is not cached resolves without it for now
    /// and gets a `CatalogResolved` once the lookup lands.
    fn refresh_meta(&mut self, state: &mut TabState) -> Option<SessionEvent> {
        let url = state.observed_url.clone();
        let catalog = match catalog_code(&url) {
            None => None,
            Some(code) => match self.ctx.catalog.cached(&code) {
                Some(hit) => hit,
                None => {
                    self.request_catalog(url.clone(), code);
                    None
                }
            },
        };
        self.apply_resolved(state, &url, catalog.as_ref())
    }

    fn apply_resolved(
        &self,
        state: &mut TabState,
        url: &str,
        catalog: Option<&CatalogInfo>,
    ) -> Option<SessionEvent> {
        match resolve(url, &state.title, catalog) {
            Ok(meta) => state.apply_meta(url, meta),
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, error = %e, "meta.parse.error");
                None
            }
        }
    }

    fn request_catalog(&mut self, url: String, code: String) {
        if self.awaiting_catalog.as_deref() == Some(url.as_str()) {
            return;
        }
        self.awaiting_catalog = Some(url.clone());
        let catalog = Arc::clone(&self.ctx.catalog);
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let info = catalog.get(&code).await;
            if !mailbox.send(TabCommand::CatalogResolved { url, info }) {
                tracing::debug!(tab_id = %mailbox.tab_id(), code = %code, "catalog result for closed tab");
            }
        });
    }

    fn run(&mut self, state: &mut TabState, cmd: TabCommand, now: DateTime<Utc>, s: &Settings) -> Step {
        let mut step = Step::default();
        match cmd {
            TabCommand::Observe {
                url,
                title,
                window_id,
            } => {
                if window_id.is_some() {
                    state.window_id = window_id;
                }
                step.events = state.observe(url.as_deref(), title.as_deref(), now, s);
                step.events.extend(self.refresh_meta(state));
                let enabled = self.site_enabled(state);
                step.events.extend(state.settle(now, s, enabled));
            }
            TabCommand::Activated { window_id } => {
                if window_id.is_some() {
                    state.window_id = window_id;
                }
                step.events = state.activate(now);
                let enabled = self.site_enabled(state);
                step.events.extend(state.evaluate(now, s, enabled));
                step.rearm = true;
            }
            TabCommand::Heartbeat {
                hidden,
                last_interaction,
            } => {
                step.events = state.set_visibility(hidden, now, s);
                if let Some(ts) = last_interaction {
                    step.events.extend(state.heartbeat_interaction(ts));
                }
                let enabled = self.site_enabled(state);
                step.events.extend(state.settle(now, s, enabled));
            }
            TabCommand::Activity { ts, ev_type } => {
                tracing::trace!(tab_id = %self.tab_id, ev_type = %ev_type, "activity");
                step.events.push(state.interaction(ts));
                let enabled = self.site_enabled(state);
                step.events.extend(state.evaluate(now, s, enabled));
            }
            TabCommand::CatalogResolved { url, info } => {
                if self.awaiting_catalog.as_deref() == Some(url.as_str()) {
                    self.awaiting_catalog = None;
                }
                step.events.extend(self.apply_resolved(state, &url, info.as_ref()));
                let enabled = self.site_enabled(state);
                step.events.extend(state.settle(now, s, enabled));
            }
            TabCommand::IdleFired { generation } => {
                if generation == self.idle.generation {
                    step.events = state.pause(PauseReason::IdleHold, now, s);
                }
            }
            TabCommand::Flush => {
                step.events.extend(state.flush(now, s));
            }
            TabCommand::Close => {
                step.events = state.close(now, s);
                step.closed = true;
            }
            TabCommand::Sync(done) => {
                let _ = done.send(());
            }
        }
        step
    }

    /// Log every event and hand commits to the ledger. Returns whether
    /// anything was committed.
    fn report(&self, events: &[SessionEvent]) -> bool {
        let tab_id = self.tab_id;
        let mut committed = false;
        for event in events {
            match event {
                SessionEvent::MetaApplied { certificate, site } => {
                    tracing::info!(tab_id = %tab_id, certificate = %certificate, site = ?site, "meta.apply");
                }
                SessionEvent::MetaStale { url } => {
                    tracing::debug!(tab_id = %tab_id, url = %url, "meta.apply.stale");
                }
                SessionEvent::TitleStable { title } => {
                    tracing::debug!(tab_id = %tab_id, title = %title, "title.stable");
                }
                SessionEvent::PromoteBlocked { reason } => {
                    tracing::debug!(tab_id = %tab_id, reason = %reason, "title.promote.block");
                }
                SessionEvent::Promoted { title } => {
                    tracing::info!(tab_id = %tab_id, title = %title, "session.promote");
                }
                SessionEvent::Started { session_id, resume } => {
                    tracing::info!(tab_id = %tab_id, session_id = %session_id, resume = *resume, "reading.start");
                }
                SessionEvent::Paused {
                    session_id,
                    reason,
                    add_ms,
                } => {
                    tracing::info!(
                        tab_id = %tab_id,
                        session_id = %session_id,
                        reason = %reason,
                        add_ms = *add_ms,
                        "reading.pause"
                    );
                }
                SessionEvent::Stopped { reason, elapsed_ms } => {
                    tracing::info!(tab_id = %tab_id, reason = %reason, elapsed_ms = *elapsed_ms, "reading.stop");
                }
                SessionEvent::PendingStored { kind, ms } => {
                    tracing::info!(tab_id = %tab_id, kind = %kind, ms = *ms, "pending.store");
                }
                SessionEvent::PendingAbsorbed { kind, ms, age_ms } => {
                    tracing::info!(tab_id = %tab_id, kind = %kind, ms = *ms, age_ms = *age_ms, "pending.absorb");
                }
                SessionEvent::PendingDropped {
                    kind,
                    ms,
                    age_ms,
                    reason,
                } => {
                    tracing::info!(
                        tab_id = %tab_id,
                        kind = %kind,
                        ms = *ms,
                        age_ms = *age_ms,
                        reason = %reason,
                        "pending.drop"
                    );
                }
                SessionEvent::BecameVisible => {
                    tracing::debug!(tab_id = %tab_id, "visible.transition");
                }
                SessionEvent::Interaction { ts } => {
                    tracing::trace!(tab_id = %tab_id, ts = %ts, "interaction");
                }
                SessionEvent::Commit(req) => {
                    let added = self.ctx.ledger.commit(req);
                    tracing::info!(
                        tab_id = %tab_id,
                        session_id = %req.session_id,
                        reason = %req.reason,
                        delta_ms = req.delta_ms,
                        added_ms = added,
                        "commit.saved"
                    );
                    committed = true;
                }
            }
        }
        committed
    }
}

#[derive(Default)]
struct Step {
    events: Vec<SessionEvent>,
    rearm: bool,
    closed: bool,
}

impl TabWorker for TabSessionActor {
    type Command = TabCommand;

    async fn handle(&mut self, cmd: TabCommand) -> anyhow::Result<()> {
        if self.state.is_none() && !cmd.creates_state() {
            match cmd {
                TabCommand::Sync(done) => {
                    let _ = done.send(());
                }
                TabCommand::Close => self.ctx.registry.remove(self.tab_id),
                _ => {}
            }
            return Ok(());
        }

        let now = self.ctx.clock.now();
        let settings = self.ctx.settings.borrow().clone();
        let mut state = match self.state.take() {
            Some(state) => state,
            None => {
                tracing::info!(tab_id = %self.tab_id, "session.bootstrap");
                TabState::new(self.tab_id, None, "", "", now, &settings)
            }
        };

        let step = self.run(&mut state, cmd, now, &settings);
        let committed = self.report(&step.events);

        if step.closed {
            self.idle.cancel();
            self.ctx.registry.remove(self.tab_id);
            tracing::info!(tab_id = %self.tab_id, "tab.closed");
            if committed {
                self.ctx.live.request_push();
            }
            return Ok(());
        }

        if state.is_reading() {
            let touched = step
                .events
                .iter()
                .any(|e| matches!(e, SessionEvent::Started { .. } | SessionEvent::Interaction { .. }));
            if step.rearm || touched {
                self.idle
                    .arm(Duration::from_millis(settings.idle_hold_ms), self.mailbox.clone());
            }
        } else {
            self.idle.cancel();
        }

        self.ctx.registry.publish(&state);
        self.state = Some(state);
        // After publishing, so the push sees the advanced committed balance.
        if committed {
            self.ctx.live.request_push();
        }
        Ok(())
    }
}
