//!
//! tablescout table monitor
//! ------------------------
//! Background task that polls the source catalog on a fixed interval and publishes the
//! latest table list as an immutable snapshot.
//!
//! Lifecycle: `NotStarted -> Running -> StopRequested -> Stopped`. The state lives in a
//! `watch` channel owned by the monitor: the poll loop observes it to notice shutdown in
//! the middle of a query or a sleep, and `join` observes it to wait for `Stopped`.
//!
//! Snapshots are `Arc<[String]>` values swapped wholesale under a `parking_lot::RwLock`,
//! so `tables()` never waits on a poll and never sees a half-written list. A failed poll
//! keeps the previous snapshot; the monitor cares about continuity of the best known
//! table set, not about any single query.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt; // catch_unwind on the catalog query
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::catalog::CatalogReader;
use crate::connection::SourceConnection;
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Catalog queries attempted to completion (successful or failed).
    pub polls: u64,
    pub failures: u64,
    /// Polls whose table set differed from the previous snapshot.
    pub changes: u64,
    pub last_success: Option<DateTime<Utc>>,
}

struct Shared {
    state: watch::Sender<MonitorState>,
    snapshot: RwLock<Arc<[String]>>,
    published: watch::Sender<Arc<[String]>>,
    polls: AtomicU64,
    failures: AtomicU64,
    changes: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

/// Marks the monitor `Stopped` when the poll task ends, however it ends.
struct StoppedOnDrop(Arc<Shared>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.state.send_replace(MonitorState::Stopped);
    }
}

pub struct TableMonitor {
    name: String,
    conn: Arc<dyn SourceConnection>,
    reader: CatalogReader,
    context: Arc<dyn ConnectorContext>,
    poll_interval: Duration,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TableMonitor {
    pub fn new(
        name: impl Into<String>,
        conn: Arc<dyn SourceConnection>,
        reader: CatalogReader,
        context: Arc<dyn ConnectorContext>,
        poll_interval: Duration,
    ) -> Self {
        let empty: Arc<[String]> = Arc::from(Vec::<String>::new());
        let (state, _) = watch::channel(MonitorState::NotStarted);
        let (published, _) = watch::channel(empty.clone());
        Self {
            name: name.into(),
            conn,
            reader,
            context,
            poll_interval,
            shared: Arc::new(Shared {
                state,
                snapshot: RwLock::new(empty),
                published,
                polls: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                changes: AtomicU64::new(0),
                last_success: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Launch the poll task. Must be called from within a tokio runtime, exactly once.
    pub fn start(&self) -> ConnectorResult<()> {
        let rt = tokio::runtime::Handle::try_current().map_err(|_| {
            ConnectorError::lifecycle("no_runtime", "table monitor must be started inside a tokio runtime")
        })?;
        let mut started = false;
        self.shared.state.send_if_modified(|s| {
            if *s == MonitorState::NotStarted {
                *s = MonitorState::Running;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ConnectorError::lifecycle(
                "already_started".to_string(),
                format!("table monitor '{}' was already started", self.name),
            ));
        }

        let poller = Poller {
            conn: self.conn.clone(),
            reader: self.reader.clone(),
            context: self.context.clone(),
            poll_interval: self.poll_interval,
            shared: self.shared.clone(),
        };
        let span = info_span!("table_monitor", connector = %self.name);
        let handle = rt.spawn(poller.run().instrument(span));
        *self.handle.lock() = Some(handle);
        info!(target: "tablescout::monitor", "table monitor '{}' started, polling every {:?}", self.name, self.poll_interval);
        Ok(())
    }

    /// Latest published table list. Empty until the first successful poll; still readable
    /// (and frozen) after the monitor stopped.
    pub fn tables(&self) -> Arc<[String]> {
        self.shared.snapshot.read().clone()
    }

    /// Receiver that yields every newly published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<[String]>> {
        self.shared.published.subscribe()
    }

    pub fn state(&self) -> MonitorState {
        *self.shared.state.borrow()
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            polls: self.shared.polls.load(Ordering::SeqCst),
            failures: self.shared.failures.load(Ordering::SeqCst),
            changes: self.shared.changes.load(Ordering::SeqCst),
            last_success: *self.shared.last_success.lock(),
        }
    }

    /// Ask the poll task to stop. Returns immediately; repeated calls have no further effect.
    pub fn shutdown(&self) {
        let requested = self.shared.state.send_if_modified(|s| match *s {
            MonitorState::Running => {
                *s = MonitorState::StopRequested;
                true
            }
            // Nothing was ever spawned, so there is nothing to wait for
            MonitorState::NotStarted => {
                *s = MonitorState::Stopped;
                true
            }
            MonitorState::StopRequested | MonitorState::Stopped => false,
        });
        if requested {
            debug!(target: "tablescout::monitor", "shutdown requested for table monitor '{}'", self.name);
        }
    }

    /// Wait until the monitor reached `Stopped` (or was never started) or `timeout`
    /// elapsed. Returns whether it stopped; a timeout is not an error.
    pub async fn join(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        let done = |s: &MonitorState| matches!(s, MonitorState::Stopped | MonitorState::NotStarted);
        let stopped = tokio::time::timeout(timeout, wait_for_state(&mut rx, done)).await.is_ok();
        if stopped {
            self.handle.lock().take();
        } else {
            warn!(target: "tablescout::monitor", "table monitor '{}' did not stop within {:?}", self.name, timeout);
        }
        stopped
    }
}

impl Drop for TableMonitor {
    fn drop(&mut self) {
        if let Some(h) = self.handle.get_mut().take() {
            h.abort();
        }
    }
}

async fn wait_for_state<F: FnMut(&MonitorState) -> bool>(rx: &mut watch::Receiver<MonitorState>, pred: F) {
    // A closed channel means the monitor itself is gone
    let _ = rx.wait_for(pred).await;
}

struct Poller {
    conn: Arc<dyn SourceConnection>,
    reader: CatalogReader,
    context: Arc<dyn ConnectorContext>,
    poll_interval: Duration,
    shared: Arc<Shared>,
}

impl Poller {
    async fn run(self) {
        let _stopped = StoppedOnDrop(self.shared.clone());
        let mut state_rx = self.shared.state.subscribe();
        loop {
            let outcome = tokio::select! {
                biased;
                _ = wait_for_state(&mut state_rx, |s| *s != MonitorState::Running) => break,
                r = AssertUnwindSafe(self.reader.list_tables(self.conn.as_ref())).catch_unwind() => r,
            };
            self.shared.polls.fetch_add(1, Ordering::SeqCst);
            match outcome {
                Ok(Ok(tables)) => self.publish(tables),
                Ok(Err(e)) => {
                    self.shared.failures.fetch_add(1, Ordering::SeqCst);
                    warn!(target: "tablescout::monitor", "table discovery on {} failed, keeping previous snapshot: {}", self.conn.describe(), e);
                }
                Err(panic) => {
                    self.shared.failures.fetch_add(1, Ordering::SeqCst);
                    let detail = panic_message(panic.as_ref());
                    error!(target: "tablescout::monitor", "catalog reader panicked on {}, keeping previous snapshot: {}", self.conn.describe(), detail);
                    self.context.raise_error(ConnectorError::lifecycle(
                        "poll_panicked".to_string(),
                        format!("catalog reader panicked on {}: {}", self.conn.describe(), detail),
                    ));
                }
            }

            tokio::select! {
                biased;
                _ = wait_for_state(&mut state_rx, |s| *s != MonitorState::Running) => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(target: "tablescout::monitor", "poll loop exited");
    }

    fn publish(&self, tables: Vec<String>) {
        let next: Arc<[String]> = Arc::from(tables);
        let prev = self.shared.snapshot.read().clone();
        let (added, removed) = diff_sets(&prev, &next);

        *self.shared.snapshot.write() = next.clone();
        *self.shared.last_success.lock() = Some(Utc::now());
        self.shared.published.send_replace(next.clone());

        if added.is_empty() && removed.is_empty() {
            debug!(target: "tablescout::monitor", "table set unchanged ({} tables)", next.len());
            return;
        }
        self.shared.changes.fetch_add(1, Ordering::SeqCst);
        info!(
            target: "tablescout::monitor",
            added = ?added,
            removed = ?removed,
            "table set changed: {} tables now",
            next.len()
        );
        self.context.request_task_reconfiguration();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Tables present only in `next`, and tables present only in `prev`, each in list order.
fn diff_sets(prev: &[String], next: &[String]) -> (Vec<String>, Vec<String>) {
    let prev_set: HashSet<&str> = prev.iter().map(|s| s.as_str()).collect();
    let next_set: HashSet<&str> = next.iter().map(|s| s.as_str()).collect();
    let added = next.iter().filter(|t| !prev_set.contains(t.as_str())).cloned().collect();
    let removed = prev.iter().filter(|t| !next_set.contains(t.as_str())).cloned().collect();
    (added, removed)
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod monitor_tests;
