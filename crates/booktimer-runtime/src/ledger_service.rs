//! The ledger as a shared service: the only cross-tab resource.
//!
//! Commits and resets mutate the in-memory [`Ledger`] under a lock and
//! queue the changed keys for persistence. Day keys use the local zone.

use std::sync::Mutex as StdMutex;

use booktimer_core::{CommitRequest, Ledger, LedgerStats};
use chrono::{DateTime, Local, Utc};

use crate::store::{StoreMap, WriteQueue};

pub struct LedgerService {
    ledger: StdMutex<Ledger>,
    writes: WriteQueue,
}

impl LedgerService {
    pub fn new(ledger: Ledger, writes: WriteQueue) -> Self {
        Self {
            ledger: StdMutex::new(ledger),
            writes,
        }
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut Ledger) -> T) -> T {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut ledger)
    }

    /// Apply one commit. Returns the milliseconds actually added.
    pub fn commit(&self, req: &CommitRequest) -> u64 {
        self.with_ledger(|ledger| {
            let added = ledger.commit(req, &Local);
            if added > 0 {
                self.writes.enqueue(ledger.to_snapshot());
            }
            added
        })
    }

    pub fn stats(&self, now: DateTime<Utc>, inflight_ms: u64) -> LedgerStats {
        self.with_ledger(|ledger| ledger.stats(now, &Local, inflight_ms))
    }

    pub fn reset_today(&self, now: DateTime<Utc>) {
        self.with_ledger(|ledger| {
            ledger.reset_today(now, &Local);
            self.writes.enqueue(ledger.to_snapshot());
        });
    }

    pub fn reset_all(&self) {
        self.with_ledger(|ledger| {
            ledger.reset_all();
            self.writes.enqueue(ledger.to_snapshot());
        });
    }

    /// Swap in an imported ledger. Persisting it is the caller's job.
    pub fn replace(&self, next: Ledger) {
        self.with_ledger(|ledger| *ledger = next);
    }

    pub fn snapshot(&self) -> StoreMap {
        self.with_ledger(|ledger| ledger.to_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use booktimer_core::ledger::keys;
    use booktimer_core::{CommitReason, ContentIdentity, Site, TabId, day_key};
    use serde_json::json;
    use std::sync::Arc;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid ts")
            .with_timezone(&Utc)
    }

    fn request(delta_ms: u64, at: DateTime<Utc>) -> CommitRequest {
        CommitRequest {
            tab_id: TabId::new(1).expect("positive"),
            identity: ContentIdentity::titled(Site::Kakuyomu, true, "星の旅", "第1話", "佐藤"),
            session_id: "s_1".into(),
            url: "https://kakuyomu.jp/works/1/episodes/2".into(),
            delta_ms,
            at,
            reason: CommitReason::Navigation,
        }
    }

    // ── 1. Commit ───────────────────────────────────────────────────

    #[tokio::test]
    async fn commit_updates_stats_and_persists() {
        let store = Arc::new(MemoryStore::default());
        let writes = WriteQueue::spawn(store.clone());
        let service = LedgerService::new(Ledger::default(), writes.clone());

        // Midday UTC stays on one local day for any zone within ±11h.
        let at = ts("2026-03-01T12:00:00Z");
        assert_eq!(service.commit(&request(10_000, at)), 10_000);
        let stats = service.stats(at, 250);
        assert_eq!(stats.total, 10_000);
        assert_eq!(stats.daily, 10_000);
        assert_eq!(stats.inflight_ms, 250);
        assert_eq!(stats.recent.len(), 1);

        writes.flush().await;
        let data = store.snapshot();
        assert_eq!(data[keys::TOTAL], json!(10_000));
        assert_eq!(data[keys::LOG][day_key(at, &Local)], json!(10_000));
    }

    #[tokio::test]
    async fn non_billable_commit_is_not_written() {
        let store = Arc::new(MemoryStore::default());
        let writes = WriteQueue::spawn(store.clone());
        let service = LedgerService::new(Ledger::default(), writes.clone());

        let mut req = request(5_000, ts("2026-03-01T12:00:00Z"));
        req.identity = ContentIdentity::url_only(Site::Pixiv, true);
        assert_eq!(service.commit(&req), 0);
        writes.flush().await;
        assert_eq!(store.write_count(), 0);
    }

    // ── 2. Resets ───────────────────────────────────────────────────

    #[tokio::test]
    async fn reset_today_keeps_earlier_days() {
        let store = Arc::new(MemoryStore::default());
        let writes = WriteQueue::spawn(store.clone());
        let service = LedgerService::new(Ledger::default(), writes.clone());

        let yesterday = ts("2026-03-01T12:00:00Z");
        let today = ts("2026-03-02T12:00:00Z");
        service.commit(&request(7_000, yesterday));
        service.commit(&request(5_000, today));

        service.reset_today(today);
        let stats = service.stats(today, 0);
        assert_eq!(stats.total, 7_000);
        assert_eq!(stats.daily, 0);
        assert!(stats.recent.is_empty());

        service.reset_all();
        assert_eq!(service.stats(today, 0).total, 0);
        writes.flush().await;
        assert_eq!(store.snapshot()[keys::TOTAL], json!(0));
    }
}
