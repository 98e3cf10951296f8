use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::storage::KeyValueStorage;
use crate::store::TaskStore;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(60);

/// Background expiry recompute. Runs once on start, then every `period`,
/// until [`ExpiryTicker::stop`] is called or the ticker is dropped.
#[derive(Debug)]
pub struct ExpiryTicker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl ExpiryTicker {
    pub fn start<S>(store: Arc<Mutex<TaskStore<S>>>, period: Duration) -> anyhow::Result<Self>
    where
        S: KeyValueStorage + 'static,
    {
        Self::start_with_clock(store, period, Utc::now)
    }

    pub fn start_with_clock<S, C>(
        store: Arc<Mutex<TaskStore<S>>>,
        period: Duration,
        clock: C,
    ) -> anyhow::Result<Self>
    where
        S: KeyValueStorage + 'static,
        C: Fn() -> DateTime<Utc> + Send + 'static,
    {
        Self::start_with_hook(store, period, clock, |_| {})
    }

    /// Like [`ExpiryTicker::start_with_clock`], calling `on_tick` with the
    /// store still locked after every recompute.
    pub fn start_with_hook<S, C, F>(
        store: Arc<Mutex<TaskStore<S>>>,
        period: Duration,
        clock: C,
        on_tick: F,
    ) -> anyhow::Result<Self>
    where
        S: KeyValueStorage + 'static,
        C: Fn() -> DateTime<Utc> + Send + 'static,
        F: Fn(&TaskStore<S>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let ticks = Arc::new(AtomicU64::new(0));
        let thread_ticks = Arc::clone(&ticks);

        let handle = thread::Builder::new()
            .name("expiry-ticker".to_string())
            .spawn(move || {
                loop {
                    {
                        let mut guard = store.lock();
                        let expired = guard.recompute_expiry(clock());
                        let n = thread_ticks.fetch_add(1, Ordering::SeqCst) + 1;
                        trace!(tick = n, expired, "expiry tick");
                        on_tick(&guard);
                    }

                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("expiry ticker thread exiting");
            })
            .context("failed to spawn expiry ticker thread")?;

        info!(period_ms = period.as_millis() as u64, "started expiry ticker");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            ticks,
        })
    }

    /// Number of recomputes run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the schedule and waits for the thread. No tick runs after
    /// this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("expiry ticker thread panicked");
            } else {
                info!(ticks = self.ticks(), "stopped expiry ticker");
            }
        }
    }
}

impl Drop for ExpiryTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
