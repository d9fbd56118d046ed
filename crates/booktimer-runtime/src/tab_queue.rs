//! Per-tab serial work queue.
//!
//! Each tab gets its own lane: an unbounded channel drained by one task
//! that owns the tab's worker. Units for one tab run strictly one at a
//! time in enqueue order; lanes of different tabs run concurrently and
//! share nothing. A unit that returns an error is logged and the lane
//! moves on to the next one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex as StdMutex;

use booktimer_core::TabId;
use tokio::sync::mpsc;

/// State owned by one lane.
pub trait TabWorker: Send + 'static {
    type Command: Send + 'static;

    fn handle(&mut self, cmd: Self::Command) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Handle a worker uses to enqueue onto its own lane (timers, async
/// lookups). Holds no strong reference, so it goes dead once the lane
/// is closed.
pub struct Mailbox<C> {
    tab_id: TabId,
    tx: mpsc::WeakUnboundedSender<C>,
}

impl<C> Clone for Mailbox<C> {
    fn clone(&self) -> Self {
        Self {
            tab_id: self.tab_id,
            tx: self.tx.clone(),
        }
    }
}

impl<C> Mailbox<C> {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Returns false when the lane is gone.
    pub fn send(&self, cmd: C) -> bool {
        self.tx.upgrade().is_some_and(|tx| tx.send(cmd).is_ok())
    }
}

type Factory<W> = Box<dyn Fn(TabId, Mailbox<<W as TabWorker>::Command>) -> W + Send + Sync>;

pub struct TabQueue<W: TabWorker> {
    lanes: StdMutex<HashMap<TabId, mpsc::UnboundedSender<W::Command>>>,
    factory: Factory<W>,
}

impl<W: TabWorker> TabQueue<W> {
    pub fn new(factory: impl Fn(TabId, Mailbox<W::Command>) -> W + Send + Sync + 'static) -> Self {
        Self {
            lanes: StdMutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Append a unit to the tab's lane, creating the lane on first use.
    /// A lane whose task died is replaced with a fresh worker.
    pub fn enqueue(&self, tab_id: TabId, cmd: W::Command) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let cmd = match lanes.get(&tab_id) {
            Some(tx) => match tx.send(cmd) {
                Ok(()) => return,
                Err(mpsc::error::SendError(cmd)) => {
                    tracing::warn!(tab_id = %tab_id, "tab lane died, respawning");
                    cmd
                }
            },
            None => cmd,
        };
        let tx = self.spawn_lane(tab_id);
        if tx.send(cmd).is_err() {
            tracing::warn!(tab_id = %tab_id, "fresh tab lane rejected a unit");
        }
        lanes.insert(tab_id, tx);
    }

    /// Queue a final unit and retire the lane. The worker drains what is
    /// already queued, runs `cmd` and exits. Returns false when the tab
    /// had no lane.
    pub fn close(&self, tab_id: TabId, cmd: W::Command) -> bool {
        let tx = self
            .lanes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&tab_id);
        tx.is_some_and(|tx| tx.send(cmd).is_ok())
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.lanes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&tab_id)
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self
            .lanes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn spawn_lane(&self, tab_id: TabId) -> mpsc::UnboundedSender<W::Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox {
            tab_id,
            tx: tx.downgrade(),
        };
        let worker = (self.factory)(tab_id, mailbox);
        tokio::spawn(run_lane(tab_id, worker, rx));
        tracing::debug!(tab_id = %tab_id, "tab lane started");
        tx
    }
}

async fn run_lane<W: TabWorker>(tab_id: TabId, mut worker: W, mut rx: mpsc::UnboundedReceiver<W::Command>) {
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = worker.handle(cmd).await {
            tracing::warn!(tab_id = %tab_id, "tab unit failed: {e:#}");
        }
    }
    tracing::debug!(tab_id = %tab_id, "tab lane closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type Log = Arc<StdMutex<Vec<(i64, u32)>>>;

    enum Cmd {
        Work { id: u32, delay_ms: u64 },
        Fail,
        Echo(u32),
        Sync(oneshot::Sender<()>),
    }

    struct Recorder {
        tab: TabId,
        log: Log,
        mailbox: Mailbox<Cmd>,
    }

    impl TabWorker for Recorder {
        type Command = Cmd;

        async fn handle(&mut self, cmd: Cmd) -> anyhow::Result<()> {
            match cmd {
                Cmd::Work { id, delay_ms } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    self.log.lock().expect("lock").push((self.tab.get(), id));
                }
                Cmd::Fail => anyhow::bail!("unit failed on purpose"),
                Cmd::Echo(id) => {
                    self.mailbox.send(Cmd::Work { id, delay_ms: 0 });
                }
                Cmd::Sync(done) => {
                    let _ = done.send(());
                }
            }
            Ok(())
        }
    }

    fn tab(id: i64) -> TabId {
        TabId::new(id).expect("positive")
    }

    fn queue(log: &Log) -> TabQueue<Recorder> {
        let log = Arc::clone(log);
        TabQueue::new(move |tab, mailbox| Recorder {
            tab,
            log: Arc::clone(&log),
            mailbox,
        })
    }

    async fn sync(q: &TabQueue<Recorder>, id: TabId) {
        let (tx, rx) = oneshot::channel();
        q.enqueue(id, Cmd::Sync(tx));
        rx.await.expect("lane alive");
    }

    // ── 1. Ordering ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn units_for_one_tab_run_in_enqueue_order() {
        let log = Log::default();
        let q = queue(&log);
        q.enqueue(tab(1), Cmd::Work { id: 1, delay_ms: 30 });
        q.enqueue(tab(1), Cmd::Work { id: 2, delay_ms: 5 });
        q.enqueue(tab(1), Cmd::Work { id: 3, delay_ms: 10 });
        sync(&q, tab(1)).await;

        let ids: Vec<u32> = log.lock().expect("lock").iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn tabs_do_not_block_each_other() {
        let log = Log::default();
        let q = queue(&log);
        q.enqueue(tab(1), Cmd::Work { id: 1, delay_ms: 500 });
        q.enqueue(tab(2), Cmd::Work { id: 2, delay_ms: 10 });
        sync(&q, tab(2)).await;

        assert_eq!(*log.lock().expect("lock"), vec![(2, 2)]);
        sync(&q, tab(1)).await;
        assert_eq!(log.lock().expect("lock").len(), 2);
        assert_eq!(q.tab_ids(), vec![tab(1), tab(2)]);
    }

    // ── 2. Failure containment ──────────────────────────────────────

    #[tokio::test]
    async fn failing_unit_does_not_block_later_ones() {
        let log = Log::default();
        let q = queue(&log);
        q.enqueue(tab(4), Cmd::Fail);
        q.enqueue(tab(4), Cmd::Work { id: 9, delay_ms: 0 });
        sync(&q, tab(4)).await;
        assert_eq!(*log.lock().expect("lock"), vec![(4, 9)]);
    }

    // ── 3. Lane lifecycle ───────────────────────────────────────────

    #[tokio::test]
    async fn mailbox_feeds_own_lane() {
        let log = Log::default();
        let q = queue(&log);
        q.enqueue(tab(3), Cmd::Echo(7));
        sync(&q, tab(3)).await;
        sync(&q, tab(3)).await;
        assert_eq!(*log.lock().expect("lock"), vec![(3, 7)]);
    }

    #[tokio::test]
    async fn close_drains_then_retires_lane() {
        let log = Log::default();
        let q = queue(&log);
        q.enqueue(tab(5), Cmd::Work { id: 1, delay_ms: 0 });
        let (tx, rx) = oneshot::channel();
        assert!(q.close(tab(5), Cmd::Sync(tx)));
        rx.await.expect("final unit ran");

        assert!(!q.contains(tab(5)));
        assert!(!q.close(tab(5), Cmd::Fail));
        assert_eq!(*log.lock().expect("lock"), vec![(5, 1)]);
    }
}
