//! Host-facing event sink handed to the connector.
//!
//! The host runtime implements [`ConnectorContext`]; the table monitor calls
//! `request_task_reconfiguration` whenever the table set changes so the host asks the
//! coordinator for fresh task configurations.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::error;

use crate::error::ConnectorError;

pub trait ConnectorContext: Send + Sync {
    /// The set of tables changed; task configurations should be recomputed.
    fn request_task_reconfiguration(&self);

    /// An unrecoverable background error, such as a panic in the poll task. Discovery
    /// failures never end up here.
    fn raise_error(&self, err: ConnectorError);
}

/// Context for callers that do not care about reconfiguration events.
#[derive(Debug, Default)]
pub struct NoopContext;

impl ConnectorContext for NoopContext {
    fn request_task_reconfiguration(&self) {}

    fn raise_error(&self, err: ConnectorError) {
        error!(target: "tablescout::context", "connector error: {}", err);
    }
}

/// Context that counts requests and wakes waiters. Used by the binary and by tests.
#[derive(Debug, Default)]
pub struct NotifyContext {
    requests: AtomicU64,
    notify: Notify,
    errors: Mutex<Vec<ConnectorError>>,
}

impl NotifyContext {
    pub fn new() -> Self { Self::default() }

    pub fn reconfiguration_requests(&self) -> u64 { self.requests.load(Ordering::SeqCst) }

    /// Wait for the next reconfiguration request. A request made while nobody waits is
    /// remembered, so it is not lost between two calls.
    pub async fn reconfigured(&self) {
        self.notify.notified().await;
    }

    pub fn errors(&self) -> Vec<ConnectorError> { self.errors.lock().clone() }
}

impl ConnectorContext for NotifyContext {
    fn request_task_reconfiguration(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn raise_error(&self, err: ConnectorError) {
        error!(target: "tablescout::context", "connector error: {}", err);
        self.errors.lock().push(err);
    }
}
