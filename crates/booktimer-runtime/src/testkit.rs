//! Fixtures shared by the runtime tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use booktimer_core::{CatalogInfo, Certificate, TabId};
use chrono::{DateTime, Utc};

use crate::catalog::{CatalogError, CatalogFetcher, CatalogFuture};
use crate::clock::ManualClock;
use crate::engine::Engine;
use crate::store::MemoryStore;

pub const EP1: &str = "https://kakuyomu.jp/works/100/episodes/1";
pub const EP2: &str = "https://kakuyomu.jp/works/100/episodes/2";
pub const EP1_TITLE: &str = "第1話 出会い - 星の旅（佐藤） - カクヨム";
pub const EP2_TITLE: &str = "第2話 別れ - 星の旅（佐藤） - カクヨム";

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid ts")
        .with_timezone(&Utc)
}

pub fn tab(id: i64) -> TabId {
    TabId::new(id).expect("positive")
}

/// Catalog endpoint stub answering every code the same way.
pub struct StaticFetcher {
    answer: Option<CatalogInfo>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn found(title: &str, writer: &str, noveltype: u8) -> Self {
        Self {
            answer: Some(CatalogInfo {
                title: title.into(),
                writer: writer.into(),
                noveltype,
            }),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            fail: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails until [`StaticFetcher::recover`], then answers like `found`.
    pub fn down_then_found(title: &str, writer: &str, noveltype: u8) -> Self {
        let fetcher = Self::found(title, writer, noveltype);
        fetcher.fail.store(true, Ordering::SeqCst);
        fetcher
    }

    pub fn recover(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CatalogFetcher for StaticFetcher {
    fn fetch<'a>(&'a self, _code: &'a str) -> CatalogFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CatalogError::Api(503, "unavailable".into()));
            }
            Ok(self.answer.clone())
        })
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub fetcher: Arc<StaticFetcher>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with(MemoryStore::default(), StaticFetcher::failing()).await
    }

    pub async fn with(store: MemoryStore, fetcher: StaticFetcher) -> Self {
        let store = Arc::new(store);
        let fetcher = Arc::new(fetcher);
        let clock = Arc::new(ManualClock::new(ts("2026-03-01T03:00:00Z")));
        let engine = Engine::start(store.clone(), fetcher.clone(), clock.clone())
            .await
            .expect("engine starts");
        Self {
            engine,
            store,
            clock,
            fetcher,
        }
    }

    pub fn clock_ms(&self) -> f64 {
        use crate::clock::Clock;
        self.clock.now().timestamp_millis() as f64
    }

    /// Advance the clock, then let every lane drain.
    pub async fn advance(&self, ms: i64) {
        self.clock.advance_ms(ms);
        self.engine.sync_all().await;
    }

    pub async fn navigate(&self, id: i64, url: &str, title: &str) {
        self.engine
            .tab_updated(tab(id), Some(1), Some(url.to_string()), Some(title.to_string()));
        self.engine.sync_all().await;
    }

    /// Re-observe every tab, as the coarse sweep does.
    pub async fn sweep(&self) {
        self.engine.sweep_all();
        self.engine.sync_all().await;
    }

    pub fn certificate(&self, id: i64) -> Option<Certificate> {
        self.engine
            .dump_state()
            .into_iter()
            .find(|st| st.tab_id == tab(id))
            .map(|st| st.meta.certificate)
    }

    /// Sweep until the tab reaches `certificate`; catalog lookups land
    /// asynchronously.
    pub async fn await_certificate(&self, id: i64, certificate: Certificate) {
        eventually(|| self.certificate(id) == Some(certificate)).await;
    }

    pub fn state(&self, id: i64) -> booktimer_core::TabState {
        self.engine
            .dump_state()
            .into_iter()
            .find(|st| st.tab_id == tab(id))
            .expect("tab has state")
    }
}

/// Poll `check` until it holds; lanes and lookups finish asynchronously.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("condition never held");
}
