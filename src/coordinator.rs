//!
//! tablescout connector coordinator
//! --------------------------------
//! Entry point the host runtime drives:
//! - `start(props)` validates configuration, opens the single source connection and
//!   launches the table monitor.
//! - `task_configs(max_workers)` turns the monitor's latest snapshot into one property set
//!   per worker. It never waits on I/O.
//! - `stop()` shuts the monitor down with a bounded join, then closes the connection. It
//!   never fails; problems along the way are logged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogReader;
use crate::config::{ConnectorProps, SourceConfig, TABLES_CONFIG, TABLES_DELIMITER};
use crate::connection::{driver_for_url, redact_url, SourceConnection, SourceDriver};
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, ConnectorResult};
use crate::monitor::{MonitorState, MonitorStats, TableMonitor};
use crate::planner::plan;

/// How long `stop` waits for the monitor before closing the connection anyway.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Property naming the connector instance, used in logs.
pub const CONNECTOR_NAME_CONFIG: &str = "name";
const DEFAULT_CONNECTOR_NAME: &str = "tablescout";

struct Running {
    props: ConnectorProps,
    conn: Arc<dyn SourceConnection>,
    monitor: TableMonitor,
}

pub struct SourceCoordinator {
    driver: Option<Arc<dyn SourceDriver>>,
    context: Arc<dyn ConnectorContext>,
    join_timeout: Duration,
    // serializes start/stop; task_configs only touches `running`
    lifecycle: tokio::sync::Mutex<()>,
    running: RwLock<Option<Arc<Running>>>,
}

impl SourceCoordinator {
    /// Coordinator that picks its driver from the `connection.url` scheme.
    pub fn new(context: Arc<dyn ConnectorContext>) -> Self {
        Self {
            driver: None,
            context,
            join_timeout: STOP_JOIN_TIMEOUT,
            lifecycle: tokio::sync::Mutex::new(()),
            running: RwLock::new(None),
        }
    }

    /// Coordinator that always connects through `driver`.
    pub fn with_driver(driver: Arc<dyn SourceDriver>, context: Arc<dyn ConnectorContext>) -> Self {
        Self { driver: Some(driver), ..Self::new(context) }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub async fn start(&self, props: ConnectorProps) -> ConnectorResult<()> {
        let _lc = self.lifecycle.lock().await;
        if self.running.read().is_some() {
            return Err(ConnectorError::lifecycle("already_started", "connector is already running"));
        }

        let config = SourceConfig::from_props(&props).map_err(|e| {
            error!(target: "tablescout::coordinator", "couldn't start connector due to configuration error: {}", e);
            e
        })?;
        let name = props
            .get(CONNECTOR_NAME_CONFIG)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONNECTOR_NAME.to_string());

        let driver = match &self.driver {
            Some(d) => d.clone(),
            None => driver_for_url(&config.connection_url)?,
        };
        let url_desc = redact_url(&config.connection_url);
        debug!(target: "tablescout::coordinator", "trying to connect to {}", url_desc);
        let conn = driver.connect(&config.connection_url).await.map_err(|e| {
            error!(target: "tablescout::coordinator", "couldn't open connection to {}: {}", url_desc, e);
            e
        })?;

        let monitor = TableMonitor::new(
            name.clone(),
            conn.clone(),
            CatalogReader::new(config.table_filter.clone()),
            self.context.clone(),
            config.poll_interval,
        );
        if let Err(e) = monitor.start() {
            close_quietly(conn.as_ref()).await;
            return Err(e);
        }

        info!(target: "tablescout::coordinator", "connector '{}' started against {}", name, conn.describe());
        *self.running.write() = Some(Arc::new(Running { props, conn, monitor }));
        Ok(())
    }

    /// One worker configuration per table group: the base properties plus `tables`, the
    /// group's tables joined with a comma. At most `max_workers` records; none when no
    /// tables are known yet.
    pub fn task_configs(&self, max_workers: usize) -> ConnectorResult<Vec<ConnectorProps>> {
        let running = self.current()?;
        let tables = running.monitor.tables();
        let groups = plan(&tables[..], max_workers);
        let configs: Vec<ConnectorProps> = groups
            .into_iter()
            .map(|group| {
                let mut task = running.props.clone();
                task.insert(TABLES_CONFIG.to_string(), group.join(TABLES_DELIMITER));
                task
            })
            .collect();
        debug!(
            target: "tablescout::coordinator",
            "planned {} task configs for {} tables (max_workers={})",
            configs.len(),
            tables.len(),
            max_workers
        );
        Ok(configs)
    }

    /// Stop the monitor (bounded wait) and close the connection. Never fails.
    pub async fn stop(&self) {
        let _lc = self.lifecycle.lock().await;
        let taken = self.running.write().take();
        let Some(running) = taken else {
            debug!(target: "tablescout::coordinator", "stop called while not running");
            return;
        };

        info!(target: "tablescout::coordinator", "stopping table monitoring task");
        running.monitor.shutdown();
        if !running.monitor.join(self.join_timeout).await {
            warn!(
                target: "tablescout::coordinator",
                "table monitor still running after {:?}, closing connection anyway",
                self.join_timeout
            );
        }

        debug!(target: "tablescout::coordinator", "trying to close connection to {}", running.conn.describe());
        close_quietly(running.conn.as_ref()).await;
    }

    pub fn is_running(&self) -> bool { self.running.read().is_some() }

    /// Current table snapshot; empty when not running.
    pub fn tables(&self) -> Arc<[String]> {
        match self.running.read().as_ref() {
            Some(r) => r.monitor.tables(),
            None => Arc::from(Vec::<String>::new()),
        }
    }

    pub fn monitor_state(&self) -> Option<MonitorState> {
        self.running.read().as_ref().map(|r| r.monitor.state())
    }

    pub fn monitor_stats(&self) -> Option<MonitorStats> {
        self.running.read().as_ref().map(|r| r.monitor.stats())
    }

    fn current(&self) -> ConnectorResult<Arc<Running>> {
        self.running
            .read()
            .clone()
            .ok_or_else(|| ConnectorError::lifecycle("not_started", "connector has not been started"))
    }
}

async fn close_quietly(conn: &dyn SourceConnection) {
    if let Err(e) = conn.close().await {
        error!(target: "tablescout::coordinator", "failed to close connection to {}: {}", conn.describe(), e);
    }
}
