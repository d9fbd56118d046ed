//! Narou catalog client.
//!
//! Lookups are answered from a TTL cache when possible. Misses go through
//! a FIFO queue drained by one task that keeps to a sliding-window rate
//! limit. A failed fetch caches `None` for the full TTL so a broken
//! endpoint is not hammered.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use booktimer_core::{CatalogInfo, Settings};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub const DEFAULT_ENDPOINT: &str = "https://api.syosetu.com/novelapi/api/";
const USER_AGENT: &str = concat!("booktimer/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("network error: {0}")]
    Network(String),

    #[error("catalog api error {0}: {1}")]
    Api(u16, String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type CatalogFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<CatalogInfo>, CatalogError>> + Send + 'a>>;

/// One catalog request. `Ok(None)` means the endpoint knows no such work.
pub trait CatalogFetcher: Send + Sync + 'static {
    fn fetch<'a>(&'a self, code: &'a str) -> CatalogFuture<'a>;
}

// ─── HTTP ─────────────────────────────────────────────────────────

pub struct HttpCatalogFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCatalogFetcher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl CatalogFetcher for HttpCatalogFetcher {
    fn fetch<'a>(&'a self, code: &'a str) -> CatalogFuture<'a> {
        Box::pin(async move {
            tracing::debug!(code, "catalog fetch");
            let response = self
                .client
                .get(&self.endpoint)
                .query(&[("out", "json"), ("of", "t-w-nt"), ("ncode", code)])
                .send()
                .await
                .map_err(|e| CatalogError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CatalogError::Api(status.as_u16(), body));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| CatalogError::Parse(e.to_string()))?;
            parse_catalog_response(&body)
        })
    }
}

/// The endpoint answers `[{"allcount": n}, {title, writer, noveltype}, ...]`.
pub fn parse_catalog_response(body: &Value) -> Result<Option<CatalogInfo>, CatalogError> {
    let Value::Array(items) = body else {
        return Err(CatalogError::Parse("expected a JSON array".into()));
    };
    match items.get(1) {
        None => Ok(None),
        Some(entry) => serde_json::from_value(entry.clone())
            .map(Some)
            .map_err(|e| CatalogError::Parse(e.to_string())),
    }
}

// ─── Cached, rate-limited client ──────────────────────────────────

struct CacheEntry {
    info: Option<CatalogInfo>,
    stored_at: Instant,
}

type Cache = Arc<StdMutex<HashMap<String, CacheEntry>>>;

struct Lookup {
    code: String,
    reply: oneshot::Sender<Option<CatalogInfo>>,
}

pub struct NarouCatalogClient {
    cache: Cache,
    queue: mpsc::UnboundedSender<Lookup>,
    settings: watch::Receiver<Settings>,
}

impl NarouCatalogClient {
    /// Start the drain task and return a shared handle.
    pub fn spawn(fetcher: Arc<dyn CatalogFetcher>, settings: watch::Receiver<Settings>) -> Arc<Self> {
        let cache = Cache::default();
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_drain(fetcher, rx, Arc::clone(&cache), settings.clone()));
        Arc::new(Self {
            cache,
            queue,
            settings,
        })
    }

    /// Cache lookup without queuing. The outer `None` is a miss; the
    /// inner one a cached failure or unknown work.
    pub fn cached(&self, code: &str) -> Option<Option<CatalogInfo>> {
        lookup(&self.cache, code, cache_ttl(&self.settings.borrow()))
    }

    pub async fn get(&self, code: &str) -> Option<CatalogInfo> {
        if let Some(hit) = self.cached(code) {
            return hit;
        }
        let (reply, rx) = oneshot::channel();
        let lookup = Lookup {
            code: code.to_string(),
            reply,
        };
        if self.queue.send(lookup).is_err() {
            tracing::warn!(code, "catalog queue closed");
            return None;
        }
        rx.await.unwrap_or(None)
    }
}

fn cache_ttl(settings: &Settings) -> Duration {
    Duration::from_millis(settings.narou_cache_ttl_ms)
}

fn lookup(cache: &Cache, code: &str, ttl: Duration) -> Option<Option<CatalogInfo>> {
    let cache = cache.lock().unwrap_or_else(|e| e.into_inner());
    let entry = cache.get(code)?;
    (entry.stored_at.elapsed() < ttl).then(|| entry.info.clone())
}

/// Send timestamps within the current window.
#[derive(Default)]
struct SlidingWindow {
    sent: VecDeque<Instant>,
}

impl SlidingWindow {
    async fn acquire(&mut self, max: usize, window: Duration) {
        loop {
            let now = Instant::now();
            while self
                .sent
                .front()
                .is_some_and(|t| now.duration_since(*t) >= window)
            {
                self.sent.pop_front();
            }
            if self.sent.len() < max {
                self.sent.push_back(now);
                return;
            }
            let Some(oldest) = self.sent.front().copied() else {
                continue;
            };
            let wait = (oldest + window).saturating_duration_since(now);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "catalog rate limit");
            tokio::time::sleep(wait).await;
        }
    }
}

async fn run_drain(
    fetcher: Arc<dyn CatalogFetcher>,
    mut rx: mpsc::UnboundedReceiver<Lookup>,
    cache: Cache,
    settings: watch::Receiver<Settings>,
) {
    let mut window = SlidingWindow::default();
    while let Some(Lookup { code, reply }) = rx.recv().await {
        let (ttl, max, span) = {
            let s = settings.borrow();
            (
                cache_ttl(&s),
                usize::try_from(s.narou_rate_max_per_window).unwrap_or(usize::MAX).max(1),
                Duration::from_millis(s.narou_rate_window_ms),
            )
        };
        // Duplicate lookups queued behind the first one hit the cache here.
        if let Some(hit) = lookup(&cache, &code, ttl) {
            let _ = reply.send(hit);
            continue;
        }

        window.acquire(max, span).await;
        let info = match fetcher.fetch(&code).await {
            Ok(info) => {
                tracing::debug!(code = %code, found = info.is_some(), "catalog fetched");
                info
            }
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "catalog fetch failed");
                None
            }
        };

        {
            let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            cache.insert(
                code,
                CacheEntry {
                    info: info.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        let _ = reply.send(info);
    }
    tracing::debug!("catalog drain stopped");
}
