//! In-memory data source.
//!
//! `memory://<name>` URLs resolve against catalogs registered on a [`MemoryDriver`]; an
//! unregistered name with a `?tables=a,b,c` query string gets a fresh static catalog
//! holding those tables in the `public` schema. Catalogs are shared handles, so a test can
//! keep one and add or drop tables (or inject failures) while a monitor polls it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::config::split_list;
use crate::connection::{CatalogEntry, SourceConnection, SourceDriver};
use crate::error::{ConnectorError, ConnectorResult};

pub const MEMORY_SCHEME: &str = "memory://";
pub const DEFAULT_SCHEMA: &str = "public";

#[derive(Default)]
struct CatalogInner {
    entries: RwLock<Vec<CatalogEntry>>,
    fail_polls: AtomicUsize,
    query_delay: Mutex<Duration>,
    queries: AtomicU64,
    closes: AtomicU64,
    fail_close: AtomicBool,
}

/// Shared, mutable table catalog.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<CatalogInner>,
}

impl MemoryCatalog {
    pub fn new() -> Self { Self::default() }

    /// Catalog holding `tables` in the default schema, in the given order.
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let c = Self::new();
        c.set_tables(tables);
        c
    }

    pub fn set_tables<I, S>(&self, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = tables.into_iter().map(|t| CatalogEntry::new(DEFAULT_SCHEMA.to_string(), t.into())).collect();
        *self.inner.entries.write() = entries;
    }

    pub fn set_entries(&self, entries: Vec<CatalogEntry>) {
        *self.inner.entries.write() = entries;
    }

    pub fn add_table(&self, schema: &str, table: &str) {
        self.inner.entries.write().push(CatalogEntry::new(schema, table));
    }

    /// Drop every entry named `table`, in any schema. Returns how many were removed.
    pub fn remove_table(&self, table: &str) -> usize {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|e| e.table != table);
        before - entries.len()
    }

    /// Make the next `n` catalog queries fail with a discovery error.
    pub fn fail_next_polls(&self, n: usize) {
        self.inner.fail_polls.store(n, Ordering::SeqCst);
    }

    /// Delay every catalog query by `d`, simulating a slow source.
    pub fn set_query_delay(&self, d: Duration) {
        *self.inner.query_delay.lock() = d;
    }

    pub fn fail_close(&self, fail: bool) {
        self.inner.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Catalog queries answered (successful or not).
    pub fn query_count(&self) -> u64 { self.inner.queries.load(Ordering::SeqCst) }

    pub fn close_count(&self) -> u64 { self.inner.closes.load(Ordering::SeqCst) }
}

/// Driver for `memory://` URLs.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    catalogs: Arc<RwLock<HashMap<String, MemoryCatalog>>>,
    connect_error: Arc<Mutex<Option<ConnectorError>>>,
    connects: Arc<AtomicU64>,
}

impl MemoryDriver {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, name: &str, catalog: MemoryCatalog) {
        self.catalogs.write().insert(name.to_string(), catalog);
    }

    /// Make every subsequent `connect` fail with `err` until cleared with `None`.
    pub fn set_connect_error(&self, err: Option<ConnectorError>) {
        *self.connect_error.lock() = err;
    }

    pub fn connect_count(&self) -> u64 { self.connects.load(Ordering::SeqCst) }
}

#[async_trait]
impl SourceDriver for MemoryDriver {
    async fn connect(&self, url: &str) -> ConnectorResult<Arc<dyn SourceConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.connect_error.lock().clone() {
            return Err(err);
        }
        let rest = url.trim().strip_prefix(MEMORY_SCHEME).ok_or_else(|| {
            ConnectorError::config("invalid_url".to_string(), format!("'{}' is not a memory:// url", url))
        })?;
        let (name, query) = match rest.split_once('?') {
            Some((n, q)) => (n, Some(q)),
            None => (rest, None),
        };
        let registered = self.catalogs.read().get(name).cloned();
        let catalog = match (registered, query) {
            (Some(c), _) => c,
            (None, Some(q)) => {
                let tables = q
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("tables="))
                    .map(split_list)
                    .unwrap_or_default();
                let c = MemoryCatalog::with_tables(tables);
                self.register(name, c.clone());
                c
            }
            (None, None) => {
                return Err(ConnectorError::connection(
                    "unknown_catalog".to_string(),
                    format!("no in-memory catalog named '{}'", name),
                ))
            }
        };
        Ok(Arc::new(MemoryConnection { name: name.to_string(), catalog, closed: AtomicBool::new(false) }))
    }
}

pub struct MemoryConnection {
    name: String,
    catalog: MemoryCatalog,
    closed: AtomicBool,
}

#[async_trait]
impl SourceConnection for MemoryConnection {
    async fn catalog_entries(&self, schema_pattern: Option<&str>) -> ConnectorResult<Vec<CatalogEntry>> {
        let inner = &self.catalog.inner;
        inner.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *inner.query_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::discovery("connection_closed".to_string(), format!("{} is closed", self.describe())));
        }
        let failing = inner
            .fail_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectorError::discovery("catalog_query".to_string(), format!("injected failure on {}", self.describe())));
        }
        let entries = inner.entries.read().clone();
        Ok(match schema_pattern {
            Some(p) => {
                let re = like_regex(p)?;
                entries.into_iter().filter(|e| re.is_match(&e.schema)).collect()
            }
            None => entries,
        })
    }

    async fn close(&self) -> ConnectorResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ConnectorError::shutdown("already_closed".to_string(), format!("{} was already closed", self.describe())));
        }
        self.catalog.inner.closes.fetch_add(1, Ordering::SeqCst);
        if self.catalog.inner.fail_close.load(Ordering::SeqCst) {
            return Err(ConnectorError::shutdown("close_failed".to_string(), format!("injected close failure on {}", self.describe())));
        }
        Ok(())
    }

    fn describe(&self) -> String { format!("{}{}", MEMORY_SCHEME, self.name) }
}

/// SQL `LIKE` pattern as a regex anchored at both ends: `%` becomes `.*`, `_` becomes
/// `.`, everything else matches literally.
pub fn sql_like_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

pub fn like_regex(pattern: &str) -> ConnectorResult<Regex> {
    Regex::new(&sql_like_to_regex(pattern)).map_err(|e| {
        ConnectorError::discovery("invalid_pattern".to_string(), format!("bad LIKE pattern '{}': {}", pattern, e))
    })
}
