//! The tracker engine: storage bootstrap, the tab actor table, and every
//! host-facing operation.
//!
//! Tab events are fire-and-forget: they are routed onto the tab's lane
//! and the caller gets an acknowledgement straight away. Queries read the
//! ledger and the registry of published tab states.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use booktimer_core::ledger::keys;
use booktimer_core::settings::CURRENT_VERSION;
use booktimer_core::urls::is_internal;
use booktimer_core::{Ledger, LedgerStats, Settings, SettingsError, Site, TabId, TabState, WindowId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, watch};

use crate::actor::{ActorContext, TabCommand, TabRegistry, TabSessionActor};
use crate::catalog::{CatalogFetcher, NarouCatalogClient};
use crate::clock::Clock;
use crate::ledger_service::LedgerService;
use crate::live::LiveHub;
use crate::sites::SiteFlags;
use crate::store::{KvStore, StoreError, StoreMap, WriteQueue};
use crate::tab_queue::TabQueue;
use crate::tab_source::{ReportedTabs, TabInfo, TabSource};

/// Valid interaction timestamps lie strictly inside this range (epoch ms).
const EPOCH_MS_RANGE: (f64, f64) = (1e12, 4_102_444_800_000.0);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

pub struct Engine {
    queue: TabQueue<TabSessionActor>,
    ctx: Arc<ActorContext>,
    tabs: ReportedTabs,
    settings_tx: watch::Sender<Settings>,
    writes: WriteQueue,
}

impl Engine {
    /// Load the store, fill in missing keys and start the background
    /// writer and catalog drain.
    pub async fn start(
        store: Arc<dyn KvStore>,
        fetcher: Arc<dyn CatalogFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, StoreError> {
        let stored = store.load().await?;
        let (settings, rejected) = Settings::from_stored(stored.get(keys::SETTINGS));
        for field in &rejected {
            tracing::warn!(field = %field, "invalid stored setting, using default");
        }
        let (ledger, malformed) = Ledger::from_snapshot(&stored);
        for key in &malformed {
            tracing::warn!(key = %key, "malformed stored key, using default");
        }
        let sites = Arc::new(SiteFlags::from_stored(stored.get(keys::SITE_ENABLE)));

        let writes = WriteQueue::spawn(store);
        let mut init: StoreMap = ledger
            .to_snapshot()
            .into_iter()
            .filter(|(key, _)| {
                !stored.contains_key(key) || malformed.iter().any(|m| *m == key.as_str())
            })
            .collect();
        if !stored.contains_key(keys::SITE_ENABLE) {
            init.insert(keys::SITE_ENABLE.into(), sites.to_value());
        }
        init.insert(keys::SETTINGS.into(), settings_value(&settings));
        init.insert(keys::VERSION.into(), Value::from(CURRENT_VERSION));
        writes.enqueue(init);

        let (settings_tx, settings_rx) = watch::channel(settings);
        let catalog = NarouCatalogClient::spawn(fetcher, settings_rx.clone());
        let ctx = Arc::new(ActorContext {
            settings: settings_rx,
            sites,
            ledger: Arc::new(LedgerService::new(ledger, writes.clone())),
            catalog,
            live: Arc::new(LiveHub::new()),
            clock,
            registry: Arc::new(TabRegistry::default()),
        });
        let actor_ctx = Arc::clone(&ctx);
        let queue = TabQueue::new(move |_, mailbox| TabSessionActor::new(Arc::clone(&actor_ctx), mailbox));

        tracing::info!(total_ms = ctx.ledger.stats(ctx.clock.now(), 0).total, "engine started");
        Ok(Arc::new(Self {
            queue,
            ctx,
            tabs: ReportedTabs::default(),
            settings_tx,
            writes,
        }))
    }

    pub fn settings(&self) -> Settings {
        self.settings_tx.borrow().clone()
    }

    pub fn watch_settings(&self) -> watch::Receiver<Settings> {
        self.settings_tx.subscribe()
    }

    pub fn live(&self) -> &LiveHub {
        &self.ctx.live
    }

    #[cfg(test)]
    pub fn tab_source(&self) -> &dyn TabSource {
        &self.tabs
    }

    // ─── Tab events ───────────────────────────────────────────────

    pub fn tab_updated(
        &self,
        tab_id: TabId,
        window_id: Option<WindowId>,
        url: Option<String>,
        title: Option<String>,
    ) {
        if url.as_deref().is_some_and(is_internal) {
            tracing::trace!(tab_id = %tab_id, "ignoring internal page");
            return;
        }
        self.tabs
            .update(tab_id, window_id, url.as_deref(), title.as_deref());
        self.queue.enqueue(
            tab_id,
            TabCommand::Observe {
                url,
                title,
                window_id,
            },
        );
    }

    /// History, fragment or commit navigation; the title is unchanged.
    pub fn navigation(&self, tab_id: TabId, url: String) {
        self.tab_updated(tab_id, None, Some(url), None);
    }

    pub fn tab_activated(&self, tab_id: TabId, window_id: Option<WindowId>) {
        self.tabs.set_focused(tab_id, window_id);
        self.queue.enqueue(tab_id, TabCommand::Activated { window_id });
    }

    pub fn tab_removed(&self, tab_id: TabId) {
        self.tabs.remove(tab_id);
        if !self.queue.close(tab_id, TabCommand::Close) {
            tracing::debug!(tab_id = %tab_id, "removed tab had no state");
        }
    }

    /// Replace the host's tab list and reconcile against it at once.
    pub fn tabs_snapshot(&self, tabs: Vec<TabInfo>, focused: Option<TabId>) {
        let tabs: Vec<TabInfo> = tabs.into_iter().filter(|t| !is_internal(&t.url)).collect();
        tracing::debug!(count = tabs.len(), "tabs snapshot");
        self.tabs.replace(tabs, focused);
        self.sweep_all();
    }

    /// Page signals only count for tabs the host has reported. A late
    /// heartbeat from a closed tab must not bring its state back.
    fn is_known(&self, tab_id: TabId) -> bool {
        self.tabs.get(tab_id).is_some() || self.queue.contains(tab_id)
    }

    pub fn heartbeat(&self, tab_id: TabId, visibility_state: &str, last_interaction: Option<f64>) {
        if !self.is_known(tab_id) {
            tracing::debug!(tab_id = %tab_id, "heartbeat for unknown tab ignored");
            return;
        }
        let now = self.ctx.clock.now();
        self.tabs.update(tab_id, None, None, None);
        self.queue.enqueue(
            tab_id,
            TabCommand::Heartbeat {
                hidden: visibility_state == "hidden",
                last_interaction: last_interaction.map(|raw| epoch_ms_or_now(raw, now)),
            },
        );
    }

    pub fn scroll_activity(&self, tab_id: TabId, ts: Option<f64>, ev_type: Option<String>) {
        if !self.is_known(tab_id) {
            tracing::debug!(tab_id = %tab_id, "activity for unknown tab ignored");
            return;
        }
        let now = self.ctx.clock.now();
        self.tabs.update(tab_id, None, None, None);
        self.queue.enqueue(
            tab_id,
            TabCommand::Activity {
                ts: ts.map_or(now, |raw| epoch_ms_or_now(raw, now)),
                ev_type: ev_type.unwrap_or_else(|| "scroll".to_string()),
            },
        );
    }

    // ─── Sweeps ───────────────────────────────────────────────────

    /// Coarse sweep: observe every reported tab and close the ones that
    /// are no longer reported.
    pub fn sweep_all(&self) {
        let listed = self.tabs.list();
        let known: HashSet<TabId> = listed.iter().map(|t| t.tab_id).collect();
        for info in listed {
            self.queue.enqueue(info.tab_id, observe_command(info));
        }
        for tab_id in self.queue.tab_ids() {
            if !known.contains(&tab_id) {
                tracing::info!(tab_id = %tab_id, "tab vanished");
                self.queue.close(tab_id, TabCommand::Close);
            }
        }
    }

    /// Fine sweep of the focused tab only.
    pub fn sweep_focused(&self) {
        if let Some(info) = self.tabs.focused().and_then(|id| self.tabs.get(id)) {
            self.queue.enqueue(info.tab_id, observe_command(info));
        }
    }

    /// AUTO_FLUSH pass over every tab.
    pub fn flush_all(&self) {
        for tab_id in self.queue.tab_ids() {
            self.queue.enqueue(tab_id, TabCommand::Flush);
        }
    }

    /// Wait until every tab lane has drained what is queued now.
    pub async fn sync_all(&self) {
        let mut waits = Vec::new();
        for tab_id in self.queue.tab_ids() {
            let (tx, rx) = oneshot::channel();
            self.queue.enqueue(tab_id, TabCommand::Sync(tx));
            waits.push(rx);
        }
        for rx in waits {
            let _ = rx.await;
        }
    }

    /// Offer current stats to live subscribers.
    pub fn push_live(&self) -> bool {
        let min_gap = Duration::from_millis(self.settings_tx.borrow().live_push_min_gap_ms);
        self.ctx.live.offer(self.stats(), min_gap)
    }

    /// Commit what can be committed and wait for the store.
    pub async fn shutdown(&self) {
        self.flush_all();
        self.sync_all().await;
        self.writes.flush().await;
        tracing::info!("engine flushed");
    }

    // ─── Queries and commands ─────────────────────────────────────

    pub fn stats(&self) -> LedgerStats {
        let now = self.ctx.clock.now();
        self.ctx
            .ledger
            .stats(now, self.ctx.registry.inflight_ms(now))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerStats> {
        self.ctx.live.subscribe()
    }

    /// The portable keys: ledger, settings and site flags.
    pub fn export_store(&self) -> StoreMap {
        let mut snapshot = self.ctx.ledger.snapshot();
        snapshot.insert(keys::SETTINGS.into(), settings_value(&self.settings()));
        snapshot.insert(keys::SITE_ENABLE.into(), self.ctx.sites.to_value());
        snapshot
    }

    /// Replace portable keys from an exported snapshot. Unknown keys are
    /// ignored; a malformed known key rejects the whole import.
    pub fn import_store(&self, snapshot: &Value) -> Result<(), EngineError> {
        let Value::Object(incoming) = snapshot else {
            return Err(EngineError::InvalidParams("snapshot must be an object".into()));
        };
        let accepted: StoreMap = incoming
            .iter()
            .filter(|(key, _)| keys::PORTABLE.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut ledger_keys = self.ctx.ledger.snapshot();
        for key in [keys::TOTAL, keys::DAILY, keys::LOG, keys::DETAILS] {
            if let Some(value) = accepted.get(key) {
                ledger_keys.insert(key.into(), value.clone());
            }
        }
        let (ledger, malformed) = Ledger::from_snapshot(&ledger_keys);
        if !malformed.is_empty() {
            return Err(EngineError::InvalidParams(format!(
                "malformed keys: {}",
                malformed.join(", ")
            )));
        }
        let settings = match accepted.get(keys::SETTINGS) {
            Some(value) => Settings::default().merged(value)?,
            None => self.settings(),
        };
        let site_flags = accepted.get(keys::SITE_ENABLE);
        if site_flags.is_some_and(|v| !v.is_object()) {
            return Err(EngineError::InvalidParams(format!(
                "{} must be an object",
                keys::SITE_ENABLE
            )));
        }

        self.ctx.ledger.replace(ledger);
        if let Some(flags) = site_flags {
            self.ctx.sites.replace_from(flags);
        }
        self.settings_tx.send_replace(settings);

        let mut patch = self.export_store();
        patch.insert(keys::VERSION.into(), Value::from(CURRENT_VERSION));
        self.writes.enqueue(patch);
        self.ctx.live.request_push();
        tracing::info!(keys = accepted.len(), "store imported");
        Ok(())
    }

    pub fn site_enable(&self) -> Value {
        self.ctx.sites.to_value()
    }

    pub fn set_site_enable(&self, domain: &str, enabled: bool) -> Result<(), EngineError> {
        let site: Site = domain
            .parse()
            .map_err(|e: booktimer_core::ResolveError| EngineError::InvalidParams(e.to_string()))?;
        self.ctx.sites.set(site, enabled);
        let mut patch = StoreMap::new();
        patch.insert(keys::SITE_ENABLE.into(), self.ctx.sites.to_value());
        self.writes.enqueue(patch);
        tracing::info!(site = %site, enabled, "site flag changed");
        Ok(())
    }

    /// Merge a partial settings object, validate, persist and broadcast.
    pub fn set_settings(&self, patch: &Value) -> Result<Settings, EngineError> {
        let next = self.settings().merged(patch)?;
        let mut store_patch = StoreMap::new();
        store_patch.insert(keys::SETTINGS.into(), settings_value(&next));
        self.writes.enqueue(store_patch);
        self.settings_tx.send_replace(next.clone());
        tracing::info!("settings updated");
        Ok(next)
    }

    pub fn reset_today(&self) {
        self.ctx.ledger.reset_today(self.ctx.clock.now());
        self.ctx.live.request_push();
        tracing::info!("today reset");
    }

    pub fn reset_all(&self) {
        self.ctx.ledger.reset_all();
        self.ctx.live.request_push();
        tracing::info!("all totals reset");
    }

    pub fn dump_state(&self) -> Vec<TabState> {
        self.ctx.registry.dump()
    }
}

fn observe_command(info: TabInfo) -> TabCommand {
    TabCommand::Observe {
        url: Some(info.url).filter(|u| !u.is_empty()),
        title: Some(info.title).filter(|t| !t.is_empty()),
        window_id: info.window_id,
    }
}

fn settings_value(settings: &Settings) -> Value {
    serde_json::to_value(settings).unwrap_or(Value::Null)
}

/// Epoch milliseconds from the page, or `now` when out of range.
fn epoch_ms_or_now(raw: f64, now: DateTime<Utc>) -> DateTime<Utc> {
    let (lo, hi) = EPOCH_MS_RANGE;
    if !(raw > lo && raw < hi) {
        return now;
    }
    DateTime::from_timestamp_millis(raw as i64).unwrap_or(now)
}
