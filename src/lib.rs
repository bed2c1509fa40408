pub mod error;
pub mod config;
pub mod connection;
pub mod memory;
pub mod catalog;
pub mod context;
pub mod monitor;
pub mod planner;
pub mod coordinator;

pub use catalog::{CatalogReader, TableFilter};
pub use config::{ConnectorProps, SourceConfig};
pub use connection::{CatalogEntry, SourceConnection, SourceDriver};
pub use context::{ConnectorContext, NoopContext, NotifyContext};
pub use coordinator::SourceCoordinator;
pub use error::{ConnectorError, ConnectorResult, ErrorKind};
pub use monitor::{MonitorState, MonitorStats, TableMonitor};
pub use planner::plan;
