//! Live stats fan-out to subscribed viewers.
//!
//! A push is skipped when the previous one was less than the minimum gap
//! ago or when the stats signature has not changed since the last push.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use booktimer_core::LedgerStats;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct PushState {
    signature: String,
    last_push: Option<Instant>,
}

pub struct LiveHub {
    tx: broadcast::Sender<LedgerStats>,
    state: StdMutex<PushState>,
    wake: Notify,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            state: StdMutex::new(PushState::default()),
            wake: Notify::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerStats> {
        self.tx.subscribe()
    }

    /// Ask the live loop for an out-of-band push (after a commit or reset).
    pub fn request_push(&self) {
        self.wake.notify_one();
    }

    pub async fn push_requested(&self) {
        self.wake.notified().await;
    }

    /// Publish `stats` unless throttled or unchanged. Returns whether a
    /// push happened.
    pub fn offer(&self, stats: LedgerStats, min_gap: Duration) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if state
            .last_push
            .is_some_and(|last| now.duration_since(last) < min_gap)
        {
            return false;
        }
        let signature = stats.signature();
        if signature == state.signature {
            return false;
        }
        state.signature = signature;
        state.last_push = Some(now);
        // No receivers is fine; viewers come and go.
        let _ = self.tx.send(stats);
        true
    }
}
